//! Command-level orchestration on top of the debugger and the runner.
//!
//! The controller parses user commands, drives execution, keeps the
//! frame selection and the last reported source position, and talks to the
//! outside world exclusively through the [`Ui`] contract.

use crate::debug::WatchpointKind;
use crate::error::{DebuggerError, EvalError};
use crate::eval::Evaluator;
use crate::runner::{Frame, Runner};
use crate::state::{RunResult, StopReason};
use crate::ui::{DebugEvent, Severity, Ui, View};

use cucaracha_asm::{regs, Word};

use tracing::debug;

const HELP: &str = "\
step [n]        source-line step            stepi [n]   instruction step
next [n]        source-line step over calls nexti [n]   instruction step over calls
continue        resume execution            run         run to termination
break <loc>     set breakpoint              watch <loc> set write watchpoint
delete <id>     remove break/watchpoint     list        show registries
print <expr>    evaluate and print          eval <expr> same as print
set <reg> <v>   write a register            disasm [a] [n]  disassemble
info            registers and status        memory <expr>[, n]  dump memory
stack           raw frames                  backtrace   frames with selection
up [n] / down [n] / frame <i>               select a frame
source [n]      show source context         vars        variables in scope
help            this text                   quit        leave the debugger";

/// Interactive debug session driver.
pub struct Controller<U> {
    runner: Runner,
    ui: U,
    running: bool,
    selected_frame: usize,
    frames: Vec<Frame>,
    last_location: Option<(String, usize)>,
}

impl<U: Ui> Controller<U> {
    /// Build a controller over a runner and a UI.
    pub fn new(runner: Runner, ui: U) -> Self {
        Self {
            runner,
            ui,
            running: true,
            selected_frame: 0,
            frames: Vec::new(),
            last_location: None,
        }
    }

    /// The wrapped runner.
    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Mutable access to the wrapped runner.
    pub fn runner_mut(&mut self) -> &mut Runner {
        &mut self.runner
    }

    /// The UI.
    pub fn ui(&self) -> &U {
        &self.ui
    }

    /// Whether `quit` has been issued.
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Read commands from the UI until `quit` or end of input.
    pub fn run_loop(&mut self) {
        while self.running {
            if let Some((columns, rows)) = self.ui.take_resize() {
                debug!(columns, rows, "terminal resized");
            }

            let line = match self.ui.read_line("(cdb) ") {
                Ok(line) => line,
                Err(_) => break,
            };

            self.execute(&line);
        }
    }

    /// Execute a single command line.
    pub fn execute(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        debug!(command, rest, "command");

        match command {
            "step" | "s" => self.cmd_source_step(rest, false),
            "next" | "n" => self.cmd_source_step(rest, true),
            "stepi" | "si" => self.cmd_instruction_step(rest, false),
            "nexti" | "ni" => self.cmd_instruction_step(rest, true),
            "continue" | "c" => self.cmd_continue(),
            "run" | "r" => self.cmd_continue(),
            "break" | "b" => self.cmd_break(rest),
            "watch" | "w" => self.cmd_watch(rest),
            "delete" | "d" => self.cmd_delete(rest),
            "list" | "l" => self.cmd_list(),
            "print" | "p" | "eval" => self.cmd_eval(rest),
            "set" => self.cmd_set(rest),
            "disasm" => self.cmd_disasm(rest),
            "memory" | "m" => self.cmd_memory(rest),
            "info" | "i" => self.cmd_info(),
            "stack" => self.cmd_stack(false),
            "backtrace" | "bt" => self.cmd_stack(true),
            "up" => self.cmd_frame_delta(rest, 1),
            "down" => self.cmd_frame_delta(rest, -1),
            "frame" | "f" => self.cmd_frame(rest),
            "source" => self.cmd_source(rest),
            "vars" | "v" => self.cmd_vars(),
            "help" | "h" | "?" => self.ui.show(&View::Help(HELP.to_string())),
            "quit" | "q" | "exit" => self.running = false,
            other => self.message(Severity::Error, format!("unknown command {other:?}")),
        }
    }

    /* execution commands */

    fn cmd_continue(&mut self) {
        let result = self.runner.debugger_mut().continue_(None);
        self.after_execution(result);
    }

    fn cmd_instruction_step(&mut self, rest: &str, over_calls: bool) {
        let count = parse_count(rest).unwrap_or(1);
        let mut last = RunResult::default();

        for _ in 0..count {
            last = if over_calls {
                self.runner.next()
            } else {
                self.runner.debugger_mut().step()
            };

            if !last.stop_reason.is_step() {
                break;
            }
        }

        self.after_execution(last);
    }

    /// Iterate instruction steps until the source line changes. Without
    /// debug info this degrades to a single instruction step.
    fn cmd_source_step(&mut self, rest: &str, over_calls: bool) {
        let count = parse_count(rest).unwrap_or(1);
        let mut last = RunResult::default();

        'outer: for _ in 0..count {
            let start = self.current_location();

            if start.is_none() {
                last = self.one_step(over_calls);
                if !last.stop_reason.is_step() {
                    break;
                }
                continue;
            }

            let cap = self.runner.config().line_step_cap;
            let mut executed = 0u64;

            loop {
                last = self.one_step(over_calls);
                executed += 1;

                if !last.stop_reason.is_step() {
                    break 'outer;
                }

                if self.current_location() != start {
                    break;
                }

                if executed >= cap {
                    self.message(
                        Severity::Warning,
                        format!("gave up after {cap} instructions without a line change"),
                    );
                    break 'outer;
                }
            }
        }

        self.after_execution(last);
    }

    fn one_step(&mut self, over_calls: bool) -> RunResult {
        if over_calls {
            self.runner.next()
        } else {
            self.runner.debugger_mut().step()
        }
    }

    /// Source location of the current `pc`, from debug info.
    fn current_location(&self) -> Option<(String, usize)> {
        let pc = self.runner.debugger().machine().pc();

        self.runner
            .program()?
            .debug_info
            .location(pc)
            .map(|l| (l.file.clone(), l.line))
    }

    /// Shared post-execution bookkeeping: frame selection resets, events
    /// fire, the source position is reported when it changed.
    fn after_execution(&mut self, result: RunResult) {
        self.selected_frame = 0;
        self.frames = self.runner.backtrace();

        // one lagging warning per invocation at most
        if result.lagging {
            self.ui.event(&DebugEvent::Lagging {
                cycles: result.lag_cycles,
            });
        }

        match result.stop_reason {
            StopReason::Breakpoint => {
                if let Some(id) = result.breakpoint_id {
                    self.ui.event(&DebugEvent::BreakpointHit {
                        id,
                        address: result.last_pc,
                    });
                }
            }
            StopReason::Watchpoint => {
                if let Some(id) = result.watchpoint_id {
                    let (address, value) = self
                        .runner
                        .debugger()
                        .watchpoint(id)
                        .map(|wp| (wp.address, wp.last_value))
                        .unwrap_or_default();

                    self.ui.event(&DebugEvent::WatchpointHit { id, address, value });
                }
            }
            StopReason::Termination => {
                self.ui.event(&DebugEvent::Terminated {
                    exit_code: self.runner.return_value(),
                });
            }
            StopReason::Halt => self.ui.event(&DebugEvent::Halted),
            StopReason::Interrupt => self.ui.event(&DebugEvent::Interrupted),
            StopReason::Error => {
                let message = result
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "execution failed".into());
                self.ui.event(&DebugEvent::ExecutionError { message });
            }
            StopReason::Step | StopReason::MaxSteps | StopReason::None => {}
        }

        // Suppress repeats of the same position inside one statement.
        if let Some((file, line)) = self.current_location() {
            if self.last_location.as_ref() != Some(&(file.clone(), line)) {
                self.ui.event(&DebugEvent::SourceLocationChanged {
                    file: file.clone(),
                    line,
                });
                self.last_location = Some((file, line));
            }
        }
    }

    /* registry commands */

    fn cmd_break(&mut self, rest: &str) {
        match self.resolve_location(rest) {
            Ok(address) => {
                let id = self.runner.debugger_mut().add_breakpoint(address);
                self.message(
                    Severity::Success,
                    format!("breakpoint {id} at 0x{address:08x}"),
                );
            }
            Err(message) => self.message(Severity::Error, message),
        }
    }

    fn cmd_watch(&mut self, rest: &str) {
        match self.resolve_location(rest) {
            Ok(address) => {
                match self
                    .runner
                    .debugger_mut()
                    .add_watchpoint(address, 4, WatchpointKind::Write)
                {
                    Ok(id) => self.message(
                        Severity::Success,
                        format!("watchpoint {id} at 0x{address:08x}"),
                    ),
                    Err(err) => self.message(Severity::Error, err.to_string()),
                }
            }
            Err(message) => self.message(Severity::Error, message),
        }
    }

    fn cmd_delete(&mut self, rest: &str) {
        let id = match rest.parse::<u32>() {
            Ok(id) => id,
            Err(_) => {
                return self.message(Severity::Error, format!("bad id {rest:?}"));
            }
        };

        match self.runner.debugger_mut().remove(id) {
            Ok(()) => self.message(Severity::Success, format!("deleted {id}")),
            Err(DebuggerError::UnknownBreakpoint(_)) | Err(DebuggerError::UnknownWatchpoint(_)) => {
                self.message(Severity::Error, format!("no breakpoint or watchpoint {id}"))
            }
            Err(err) => self.message(Severity::Error, err.to_string()),
        }
    }

    fn cmd_list(&mut self) {
        let breakpoints = self.runner.debugger().breakpoints().copied().collect();
        self.ui.show(&View::Breakpoints(breakpoints));

        let watchpoints = self.runner.debugger().watchpoints().copied().collect();
        self.ui.show(&View::Watchpoints(watchpoints));
    }

    /* inspection commands */

    fn cmd_eval(&mut self, rest: &str) {
        if rest.is_empty() {
            return self.message(Severity::Error, "expected an expression".into());
        }

        match self.evaluate(rest) {
            Ok(value) => self.ui.show(&View::EvalResult {
                expression: rest.to_string(),
                value,
            }),
            Err(err) => self.message(Severity::Error, err.to_string()),
        }
    }

    fn cmd_set(&mut self, rest: &str) {
        let (name, value_text) = match rest.split_once(char::is_whitespace) {
            Some((name, value)) => (name.trim(), value.trim()),
            None => {
                return self.message(Severity::Error, "usage: set <register> <value>".into());
            }
        };

        let value = match self.evaluate(value_text) {
            Ok(value) => value,
            Err(err) => return self.message(Severity::Error, err.to_string()),
        };

        match self.runner.debugger_mut().write_register(name, value) {
            Ok(()) => self.message(Severity::Success, format!("{name} = 0x{value:08x}")),
            Err(err) => self.message(Severity::Error, err.to_string()),
        }
    }

    fn cmd_disasm(&mut self, rest: &str) {
        let mut parts = rest.split_whitespace();
        let base = match parts.next() {
            Some(text) => match self.evaluate(text) {
                Ok(value) => value,
                Err(err) => return self.message(Severity::Error, err.to_string()),
            },
            None => self.runner.debugger().machine().pc(),
        };
        let count = parts.next().and_then(|t| t.parse::<u32>().ok()).unwrap_or(8);

        let mut lines = Vec::new();
        for i in 0..count {
            let address = base.wrapping_add(4 * i);
            match self.runner.debugger().disassemble(address) {
                Ok(text) => lines.push((address, text)),
                Err(_) => lines.push((address, "??".to_string())),
            }
        }

        let pc = self.runner.debugger().machine().pc();
        self.ui.show(&View::Disassembly {
            lines,
            current: Some(pc),
        });
    }

    fn cmd_memory(&mut self, rest: &str) {
        let (expr, count) = match rest.split_once(',') {
            Some((expr, count)) => (
                expr.trim(),
                count.trim().parse::<usize>().unwrap_or(64),
            ),
            None => (rest, 64),
        };

        let base = match self.evaluate(expr) {
            Ok(value) => value,
            Err(err) => return self.message(Severity::Error, err.to_string()),
        };

        match self.runner.debugger().read_memory(base, count) {
            Ok(bytes) => {
                let bytes = bytes.to_vec();
                let annotations = self.region_annotations();
                self.ui.show(&View::Memory {
                    base,
                    bytes,
                    annotations,
                });
            }
            Err(err) => self.message(Severity::Error, err.to_string()),
        }
    }

    fn region_annotations(&self) -> Vec<(Word, String)> {
        let mut annotations = Vec::new();

        if let Some(layout) = self.runner.program().and_then(|p| p.layout) {
            annotations.push((layout.code_start, "code".to_string()));
            annotations.push((layout.data_start, "data".to_string()));
        }

        annotations.push((self.runner.debugger().machine().sp(), "stack".to_string()));

        annotations
    }

    fn cmd_info(&mut self) {
        let machine = self.runner.debugger().machine();
        let mut registers = vec![("pc".to_string(), machine.pc())];

        for n in 0..regs::GP_COUNT {
            registers.push((format!("r{n}"), machine.reg(regs::r(n))));
        }

        registers.push(("sp".to_string(), machine.sp()));
        registers.push(("lr".to_string(), machine.lr()));
        registers.push(("cpsr".to_string(), machine.reg(regs::CPSR)));

        self.ui.show(&View::Registers(registers));
    }

    fn cmd_stack(&mut self, with_selection: bool) {
        self.frames = self.runner.backtrace();

        let view = if with_selection {
            View::Backtrace {
                frames: self.frames.clone(),
                selected: self.selected_frame.min(self.frames.len().saturating_sub(1)),
            }
        } else {
            View::Stack {
                frames: self.frames.clone(),
            }
        };

        self.ui.show(&view);
    }

    /* frame navigation */

    fn cmd_frame_delta(&mut self, rest: &str, direction: i64) {
        let count = parse_count(rest).unwrap_or(1) as i64;
        self.refresh_frames();

        let target = self.selected_frame as i64 + direction * count;
        self.select_frame(target);
    }

    fn cmd_frame(&mut self, rest: &str) {
        let index = match rest.parse::<i64>() {
            Ok(index) => index,
            Err(_) => return self.message(Severity::Error, format!("bad frame index {rest:?}")),
        };

        self.refresh_frames();
        self.select_frame(index);
    }

    fn refresh_frames(&mut self) {
        if self.frames.is_empty() {
            self.frames = self.runner.backtrace();
        }
    }

    fn select_frame(&mut self, index: i64) {
        if self.frames.is_empty() {
            return self.message(Severity::Error, "no stack".into());
        }

        let max = self.frames.len() as i64 - 1;
        let clamped = index.clamp(0, max) as usize;
        self.selected_frame = clamped;

        self.ui.show(&View::Backtrace {
            frames: self.frames.clone(),
            selected: clamped,
        });
    }

    /// The pc inspection commands honor: the selected frame's, not
    /// necessarily the machine's.
    fn selected_pc(&self) -> Word {
        self.frames
            .get(self.selected_frame)
            .map(|frame| frame.address)
            .unwrap_or_else(|| self.runner.debugger().machine().pc())
    }

    /* source & variables */

    fn cmd_source(&mut self, rest: &str) {
        let context = parse_count(rest).unwrap_or(5) as usize;
        let pc = self.selected_pc();

        let location = self
            .runner
            .program()
            .and_then(|p| p.debug_info.location(pc))
            .cloned();

        let location = match location {
            Some(location) => location,
            None => return self.message(Severity::Warning, "no source information here".into()),
        };

        let text = match std::fs::read_to_string(&location.file) {
            Ok(text) => text,
            Err(err) => {
                return self.message(
                    Severity::Warning,
                    format!("cannot read {}: {err}", location.file),
                )
            }
        };

        let current = location.line;
        let first = current.saturating_sub(context).max(1);
        let lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.to_string()))
            .filter(|(number, _)| *number >= first && *number <= current + context)
            .collect();

        self.ui.show(&View::Source {
            file: location.file,
            lines,
            current: Some(current),
        });
    }

    fn cmd_vars(&mut self) {
        let pc = self.selected_pc();

        let program = match self.runner.program() {
            Some(program) => program,
            None => return self.message(Severity::Warning, "no program loaded".into()),
        };

        let function = match program.debug_info.function_at(pc) {
            Some(function) => function,
            None => return self.message(Severity::Warning, "no variable information here".into()),
        };

        let names: Vec<String> = function
            .visible_at(pc)
            .map(|variable| variable.name.clone())
            .collect();

        let evaluator = Evaluator::new(self.runner.debugger(), self.runner.program());
        let variables = names
            .into_iter()
            .map(|name| {
                let value = evaluator.eval(&name).ok();
                (name, value)
            })
            .collect();

        self.ui.show(&View::Variables(variables));
    }

    /* helpers */

    fn evaluate(&self, input: &str) -> Result<Word, EvalError> {
        Evaluator::new(self.runner.debugger(), self.runner.program()).eval(input)
    }

    /// `<numeric literal>`, `<symbol>` or `<file>:<line>`.
    fn resolve_location(&self, text: &str) -> Result<Word, String> {
        let text = text.trim();

        if text.is_empty() {
            return Err("expected an address, symbol or file:line".into());
        }

        // file:line goes through the debug info's line table
        if let Some((file, line)) = text.rsplit_once(':') {
            if let Ok(line) = line.parse::<usize>() {
                return self
                    .runner
                    .program()
                    .and_then(|p| {
                        p.debug_info
                            .locations
                            .iter()
                            .filter(|(_, loc)| loc.line == line && loc.file.ends_with(file))
                            .map(|(addr, _)| *addr)
                            .min()
                    })
                    .ok_or_else(|| format!("no code at {file}:{line}"));
            }
        }

        self.evaluate(text).map_err(|err| err.to_string())
    }

    fn message(&mut self, severity: Severity, text: String) {
        self.ui.show(&View::Message { severity, text });
    }
}

fn parse_count(rest: &str) -> Option<u64> {
    let first = rest.split_whitespace().next()?;

    first.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::debugger::Debugger;
    use crate::interpreter::Machine;
    use crate::parser::parse_assembly_source;
    use crate::program::SourceLocation;
    use crate::resolver::resolve;
    use crate::ui::RecordingUi;

    const SOURCE: &str = "\
	.type	main,@function
main:
	movl	5, r0
	movl	0, r1
	add	r0, r1, r1
	movl	1, r2
	sub	r0, r2, r0
	jmp	lr, r9
";

    fn controller() -> Controller<RecordingUi> {
        let program = resolve(
            parse_assembly_source(SOURCE).unwrap(),
            &LayoutConfig {
                base_address: 0x100,
                ..LayoutConfig::default()
            },
        )
        .unwrap();

        let mut runner = Runner::new(Debugger::new(Machine::with_memory_size(0x1000)));
        runner.load(program).unwrap();

        Controller::new(runner, RecordingUi::default())
    }

    fn messages(ui: &RecordingUi) -> Vec<(Severity, String)> {
        ui.views
            .iter()
            .filter_map(|view| match view {
                View::Message { severity, text } => Some((*severity, text.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn run_terminates_and_reports_exit_code() {
        let mut controller = controller();

        controller.execute("run");

        assert!(controller
            .ui()
            .events
            .iter()
            .any(|e| matches!(e, DebugEvent::Terminated { exit_code: 4 })));
    }

    #[test]
    fn breakpoints_by_symbol() {
        let mut controller = controller();

        controller.execute("break main");
        controller.execute("continue");

        // the first continue steps off the entry, loops around nothing;
        // main is the entry so the first stop is termination, but the
        // breakpoint registry must hold the resolved address
        let bp = controller.runner().debugger().breakpoints().next().unwrap();
        assert_eq!(0x100, bp.address);
    }

    #[test]
    fn step_resets_frame_selection() {
        let mut controller = controller();

        controller.execute("stepi");
        controller.execute("frame 0");
        controller.execute("stepi");

        assert_eq!(0, controller.selected_frame);
    }

    #[test]
    fn quit_clears_running() {
        let mut controller = controller();

        assert!(controller.is_running());
        controller.execute("quit");
        assert!(!controller.is_running());
    }

    #[test]
    fn unknown_command_is_reported() {
        let mut controller = controller();

        controller.execute("frobnicate");

        let msgs = messages(controller.ui());
        assert!(msgs.iter().any(|(s, t)| *s == Severity::Error && t.contains("frobnicate")));
    }

    #[test]
    fn eval_and_set() {
        let mut controller = controller();

        controller.execute("set r5 0x10 + 2");
        controller.execute("print r5 * 2");

        assert!(controller.ui().views.iter().any(|view| matches!(
            view,
            View::EvalResult { value: 0x24, .. }
        )));
    }

    #[test]
    fn delete_unknown_id_is_an_error_message() {
        let mut controller = controller();

        controller.execute("delete 99");

        let msgs = messages(controller.ui());
        assert!(msgs.iter().any(|(s, _)| *s == Severity::Error));
    }

    #[test]
    fn disasm_shows_decoded_instructions() {
        let mut controller = controller();

        controller.execute("disasm 0x100 2");

        let disasm = controller
            .ui()
            .views
            .iter()
            .find_map(|view| match view {
                View::Disassembly { lines, .. } => Some(lines.clone()),
                _ => None,
            })
            .unwrap();

        assert_eq!((0x100, "movl 0x5, r0".to_string()), disasm[0]);
    }

    #[test]
    fn source_location_changes_are_deduplicated() {
        let mut controller = controller();

        // fabricate debug info: two instructions on line 1, rest on line 2
        {
            let runner = controller.runner_mut();
            let mut program = runner.program().unwrap().clone();
            program
                .debug_info
                .locations
                .insert(0x100, SourceLocation { file: "t.c".into(), line: 1, column: 1 });
            program
                .debug_info
                .locations
                .insert(0x104, SourceLocation { file: "t.c".into(), line: 1, column: 1 });
            program
                .debug_info
                .locations
                .insert(0x108, SourceLocation { file: "t.c".into(), line: 2, column: 1 });
            runner.load(program).unwrap();
        }

        controller.execute("stepi");
        controller.execute("stepi");
        controller.execute("stepi");

        let changes: Vec<_> = controller
            .ui()
            .events
            .iter()
            .filter(|e| matches!(e, DebugEvent::SourceLocationChanged { .. }))
            .collect();

        // line 1 reported once (after the first step it is unchanged),
        // line 2 reported once
        assert_eq!(2, changes.len());
    }

    #[test]
    fn source_step_walks_a_whole_line() {
        let mut controller = controller();

        {
            let runner = controller.runner_mut();
            let mut program = runner.program().unwrap().clone();
            for (addr, line) in [(0x100u32, 1usize), (0x104, 1), (0x108, 2)] {
                program
                    .debug_info
                    .locations
                    .insert(addr, SourceLocation { file: "t.c".into(), line, column: 1 });
            }
            runner.load(program).unwrap();
        }

        controller.execute("step");

        // both line-1 instructions executed in one source step
        assert_eq!(0x108, controller.runner().debugger().machine().pc());
    }
}
