//! Debugger core: breakpoint/watchpoint registries, the step/continue/run
//! loop and bounds-checked state inspection.

use crate::debug::{Breakpoint, Watchpoint, WatchpointKind};
use crate::error::{DebuggerError, ExecuteError};
use crate::interpreter::Machine;
use crate::state::{RunResult, StopReason};

use cucaracha_asm::{regs, Opcode, Word};

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Called after every executed step with the reason the step produced.
/// Returning `false` asks the loop to stop with [`StopReason::Interrupt`].
pub type StepCallback = Box<dyn FnMut(StopReason, Word) -> bool>;

/// Cloneable handle raising the interrupt flag of a [`Debugger`].
///
/// This is the only shared-mutable touch point of the debugger: it may be
/// used from another thread or from a signal handler. Delivery is
/// best-effort; at most one instruction executes after the flag is raised.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    /// Request an interrupt. The running loop observes the flag between
    /// instructions.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Breakpoints, watchpoints, termination addresses and the execution loop
/// over a [`Machine`].
pub struct Debugger {
    machine: Machine,
    breakpoints: BTreeMap<u32, Breakpoint>,
    watchpoints: BTreeMap<u32, Watchpoint>,
    termination: HashSet<Word>,
    next_id: u32,
    interrupt: InterruptHandle,
    callback: Option<StepCallback>,
}

impl Debugger {
    /// Wrap a machine.
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            breakpoints: BTreeMap::new(),
            watchpoints: BTreeMap::new(),
            termination: HashSet::new(),
            next_id: 1,
            interrupt: InterruptHandle::default(),
            callback: None,
        }
    }

    /// The underlying machine.
    pub const fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Mutable access to the underlying machine. Must not be used
    /// concurrently with a step.
    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// Handle for raising an interrupt from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Install the per-step event callback.
    pub fn set_callback(&mut self, callback: StepCallback) {
        self.callback = Some(callback);
    }

    /// Drop the per-step event callback.
    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    /* registries */

    /// Register a breakpoint; returns its id.
    pub fn add_breakpoint(&mut self, address: Word) -> u32 {
        let id = self.fresh_id();
        self.breakpoints.insert(id, Breakpoint::new(id, address));
        debug!(id, address, "breakpoint set");

        id
    }

    /// Register a watchpoint over `size` bytes at `address`; returns its id.
    ///
    /// The current memory content becomes the initial `last_value`.
    pub fn add_watchpoint(
        &mut self,
        address: Word,
        size: usize,
        kind: WatchpointKind,
    ) -> Result<u32, DebuggerError> {
        if !matches!(size, 1 | 2 | 4) {
            return Err(DebuggerError::InvalidWatchSize(size));
        }

        let value = self.read_watched(address, size)?;
        let id = self.fresh_id();
        self.watchpoints
            .insert(id, Watchpoint::new(id, address, size, kind, value));
        debug!(id, address, size, "watchpoint set");

        Ok(id)
    }

    /// Remove a breakpoint or watchpoint by id. Ids are never reused.
    pub fn remove(&mut self, id: u32) -> Result<(), DebuggerError> {
        if self.breakpoints.remove(&id).is_some() || self.watchpoints.remove(&id).is_some() {
            return Ok(());
        }

        Err(DebuggerError::UnknownBreakpoint(id))
    }

    /// Enable or disable a breakpoint or watchpoint.
    pub fn set_enabled(&mut self, id: u32, enabled: bool) -> Result<(), DebuggerError> {
        if let Some(bp) = self.breakpoints.get_mut(&id) {
            bp.enabled = enabled;
            return Ok(());
        }

        if let Some(wp) = self.watchpoints.get_mut(&id) {
            wp.enabled = enabled;
            return Ok(());
        }

        Err(DebuggerError::UnknownBreakpoint(id))
    }

    /// Registered breakpoints, in id order.
    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    /// Registered watchpoints, in id order.
    pub fn watchpoints(&self) -> impl Iterator<Item = &Watchpoint> {
        self.watchpoints.values()
    }

    /// Look up a breakpoint by id.
    pub fn breakpoint(&self, id: u32) -> Result<&Breakpoint, DebuggerError> {
        self.breakpoints
            .get(&id)
            .ok_or(DebuggerError::UnknownBreakpoint(id))
    }

    /// Look up a watchpoint by id.
    pub fn watchpoint(&self, id: u32) -> Result<&Watchpoint, DebuggerError> {
        self.watchpoints
            .get(&id)
            .ok_or(DebuggerError::UnknownWatchpoint(id))
    }

    /// Register `address` as a normal-termination target.
    pub fn add_termination_address(&mut self, address: Word) {
        self.termination.insert(address);
    }

    /// Drop `address` from the termination set.
    pub fn remove_termination_address(&mut self, address: Word) {
        self.termination.remove(&address);
    }

    /// Whether `address` terminates execution.
    pub fn is_termination_address(&self, address: Word) -> bool {
        self.termination.contains(&address)
    }

    fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;

        id
    }

    /* execution */

    /// Execute a single instruction.
    ///
    /// A breakpoint at the current `pc` does not re-trigger: stepping is the
    /// way off a breakpoint.
    pub fn step(&mut self) -> RunResult {
        let mut result = RunResult::default();
        let reason = self.step_inner(false, &mut result);

        self.finish(reason, result)
    }

    /// Run until something other than a plain step happens, or until
    /// `max_steps` is exhausted.
    pub fn continue_(&mut self, max_steps: Option<u64>) -> RunResult {
        self.interrupt.clear();

        let mut result = RunResult::default();
        let mut first = true;

        loop {
            if !first && self.interrupt.take() {
                return self.finish(StopReason::Interrupt, result);
            }

            if let Some(max) = max_steps {
                if result.steps_executed >= max {
                    return self.finish(StopReason::MaxSteps, result);
                }
            }

            let reason = self.step_inner(!first, &mut result);
            first = false;

            if !reason.is_step() {
                return self.finish(reason, result);
            }

            if let Some(callback) = self.callback.as_mut() {
                if !callback(StopReason::Step, self.machine.pc()) {
                    return self.finish(StopReason::Interrupt, result);
                }
            }
        }
    }

    /// Alias of [`Self::continue_`]; the entry point used by `run`-style
    /// commands after loading.
    pub fn run(&mut self, max_steps: Option<u64>) -> RunResult {
        self.continue_(max_steps)
    }

    /// One step of the machine plus breakpoint/termination/watchpoint
    /// bookkeeping. `check_breakpoints` is false on the first step of an
    /// invocation so execution can leave a breakpoint it stopped on.
    fn step_inner(&mut self, check_breakpoints: bool, result: &mut RunResult) -> StopReason {
        let pc = self.machine.pc();

        if self.termination.contains(&pc) {
            return StopReason::Termination;
        }

        if check_breakpoints {
            let hit = self
                .breakpoints
                .values_mut()
                .find(|bp| bp.enabled && bp.address == pc);

            if let Some(bp) = hit {
                bp.hit_count += 1;
                result.breakpoint_id = Some(bp.id);
                debug!(id = bp.id, pc, "breakpoint hit");
                return StopReason::Breakpoint;
            }
        }

        // Watchpoint read detection needs the instruction's address operand
        // before it executes.
        let load = self.decode_load(pc);

        let cycles_before = self.machine.cycles();
        let state = match self.machine.step() {
            Ok(state) => state,
            Err(ExecuteError::Halted) => return StopReason::Halt,
            Err(err) => {
                result.error = Some(err);
                return StopReason::Error;
            }
        };

        result.steps_executed += 1;
        result.cycles_executed += self.machine.cycles() - cycles_before;
        result.merge_lag(state.lag());

        if let Some(id) = self.eval_watchpoints(load) {
            result.watchpoint_id = Some(id);
            return StopReason::Watchpoint;
        }

        StopReason::Step
    }

    /// Source address of a load instruction at `pc`, if any.
    fn decode_load(&self, pc: Word) -> Option<(Word, usize)> {
        let instruction = self.machine.decode_at(pc).ok()?;

        if instruction.opcode() != Opcode::LD {
            return None;
        }

        let addr_reg = instruction.operand(0)? as usize;

        Some((self.machine.reg(addr_reg), 4))
    }

    fn eval_watchpoints(&mut self, load: Option<(Word, usize)>) -> Option<u32> {
        let mut hit = None;

        for wp in self.watchpoints.values_mut() {
            if !wp.enabled {
                continue;
            }

            let value = match read_watched_value(&self.machine, wp.address, wp.size) {
                Some(value) => value,
                None => continue,
            };

            let written = wp.kind.watches_writes() && value != wp.last_value;
            let read = wp.kind.watches_reads()
                && load.map_or(false, |(addr, size)| wp.overlaps(addr, size));

            if written || read {
                wp.last_value = value;
                wp.hit_count += 1;
                debug!(id = wp.id, value, "watchpoint hit");
                hit.get_or_insert(wp.id);
            }
        }

        hit
    }

    fn finish(&mut self, reason: StopReason, mut result: RunResult) -> RunResult {
        result.stop_reason = reason;
        result.last_pc = self.machine.pc();

        if let Some(callback) = self.callback.as_mut() {
            let proceed = callback(result.stop_reason, result.last_pc);

            if !proceed && result.stop_reason != StopReason::Interrupt {
                result.stop_reason = StopReason::Interrupt;
            }
        }

        result
    }

    /* inspection */

    /// Read `size` (1, 2 or 4) bytes at `address` as a little-endian value.
    pub fn read_watched(&self, address: Word, size: usize) -> Result<Word, DebuggerError> {
        if !matches!(size, 1 | 2 | 4) {
            return Err(DebuggerError::InvalidWatchSize(size));
        }

        read_watched_value(&self.machine, address, size)
            .ok_or(DebuggerError::MemoryAccess { addr: address, size })
    }

    /// Read memory, independent of execution state.
    pub fn read_memory(&self, address: Word, size: usize) -> Result<&[u8], DebuggerError> {
        self.machine
            .read_bytes(address, size)
            .map_err(|_| DebuggerError::MemoryAccess { addr: address, size })
    }

    /// Write memory, independent of execution state.
    pub fn write_memory(&mut self, address: Word, bytes: &[u8]) -> Result<(), DebuggerError> {
        self.machine.write_bytes(address, bytes).map_err(|_| {
            DebuggerError::MemoryAccess {
                addr: address,
                size: bytes.len(),
            }
        })
    }

    /// Read a register by architectural name (`r0..r9`, `sp`, `lr`, `cpsr`,
    /// `pc`).
    pub fn read_register(&self, name: &str) -> Result<Word, DebuggerError> {
        if name.eq_ignore_ascii_case("pc") {
            return Ok(self.machine.pc());
        }

        regs::parse(name)
            .map(|id| self.machine.reg(id))
            .ok_or_else(|| DebuggerError::UnknownRegister(name.into()))
    }

    /// Write a register by architectural name. Takes effect immediately.
    pub fn write_register(&mut self, name: &str, value: Word) -> Result<(), DebuggerError> {
        if name.eq_ignore_ascii_case("pc") {
            self.machine.set_pc(value);
            return Ok(());
        }

        match regs::parse(name) {
            Some(id) => {
                self.machine.set_reg(id, value);
                Ok(())
            }
            None => Err(DebuggerError::UnknownRegister(name.into())),
        }
    }

    /// Render the instruction stored at `address`.
    pub fn disassemble(&self, address: Word) -> Result<String, DebuggerError> {
        self.machine
            .decode_at(address)
            .map(|instruction| instruction.to_string())
            .map_err(|_| DebuggerError::MemoryAccess { addr: address, size: 4 })
    }
}

fn read_watched_value(machine: &Machine, address: Word, size: usize) -> Option<Word> {
    let bytes = machine.read_bytes(address, size).ok()?;

    let mut value = 0u32;
    for (i, byte) in bytes.iter().enumerate() {
        value |= (*byte as u32) << (8 * i);
    }

    Some(value)
}
