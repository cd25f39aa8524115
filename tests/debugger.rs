use cucaracha::debug::WatchpointKind;
use cucaracha::prelude::*;

use std::thread;
use std::time::Duration;

fn debugger_with(program: &[Instruction]) -> Debugger {
    let mut vm = Machine::default();
    let bytes: Vec<u8> = program.iter().flat_map(|i| i.to_bytes()).collect();
    vm.load_binary(&bytes, 0).expect("failed to load program");

    Debugger::new(vm)
}

#[test]
fn watchpoint_triggers_on_write() {
    // st r0, r1 with r1 = 0x1000, r0 = 0xDEADBEEF
    let mut dbg = debugger_with(&[Instruction::new(
        Opcode::ST,
        &[regs::r(0) as u32, regs::r(1) as u32],
    )]);
    dbg.machine_mut().set_reg(regs::r(0), 0xdead_beef);
    dbg.machine_mut().set_reg(regs::r(1), 0x1000);

    let id = dbg
        .add_watchpoint(0x1000, 4, WatchpointKind::Write)
        .expect("watchpoint");

    let result = dbg.step();

    assert_eq!(StopReason::Watchpoint, result.stop_reason);
    assert_eq!(Some(id), result.watchpoint_id);

    let wp = dbg.watchpoint(id).unwrap();
    assert_eq!(1, wp.hit_count);
    assert_eq!(0xdead_beef, wp.last_value);
}

#[test]
fn watchpoint_ignores_stores_that_keep_the_value() {
    let mut dbg = debugger_with(&[Instruction::new(
        Opcode::ST,
        &[regs::r(0) as u32, regs::r(1) as u32],
    )]);
    dbg.machine_mut().set_reg(regs::r(0), 0);
    dbg.machine_mut().set_reg(regs::r(1), 0x1000);

    dbg.add_watchpoint(0x1000, 4, WatchpointKind::Write).unwrap();

    let result = dbg.step();

    assert_eq!(StopReason::Step, result.stop_reason);
}

#[test]
fn read_watchpoint_triggers_on_load() {
    let mut dbg = debugger_with(&[Instruction::new(
        Opcode::LD,
        &[regs::r(1) as u32, regs::r(0) as u32],
    )]);
    dbg.machine_mut().set_reg(regs::r(1), 0x1000);

    let id = dbg.add_watchpoint(0x1000, 4, WatchpointKind::Read).unwrap();

    let result = dbg.step();

    assert_eq!(StopReason::Watchpoint, result.stop_reason);
    assert_eq!(Some(id), result.watchpoint_id);
}

#[test]
fn breakpoint_hit_count_matches_hits() {
    // a loop that keeps jumping back to 0
    let mut dbg = debugger_with(&[
        Instruction::new(Opcode::NOP, &[]),
        Instruction::new(Opcode::MOVL, &[0, regs::r(1) as u32]),
        Instruction::new(Opcode::JMP, &[regs::r(1) as u32, regs::r(9) as u32]),
    ]);

    let id = dbg.add_breakpoint(0);

    for expected in 1..=5u64 {
        let result = dbg.continue_(None);

        assert_eq!(StopReason::Breakpoint, result.stop_reason);
        assert_eq!(expected, dbg.breakpoint(id).unwrap().hit_count);
    }
}

#[test]
fn disabled_breakpoints_do_not_hit() {
    let mut dbg = debugger_with(&[
        Instruction::new(Opcode::NOP, &[]),
        Instruction::new(Opcode::NOP, &[]),
        Instruction::new(Opcode::NOP, &[]),
    ]);
    dbg.add_termination_address(12);

    let id = dbg.add_breakpoint(8);
    dbg.set_enabled(id, false).unwrap();

    let result = dbg.continue_(None);

    assert_eq!(StopReason::Termination, result.stop_reason);
    assert_eq!(0, dbg.breakpoint(id).unwrap().hit_count);
}

#[test]
fn interrupt_from_another_thread() {
    // an endless loop: jmp to self address held in r1
    let mut dbg = debugger_with(&[
        Instruction::new(Opcode::MOVL, &[4, regs::r(1) as u32]),
        Instruction::new(Opcode::JMP, &[regs::r(1) as u32, regs::r(9) as u32]),
    ]);

    let handle = dbg.interrupt_handle();
    let raiser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.interrupt();
    });

    let result = dbg.continue_(None);
    raiser.join().unwrap();

    assert_eq!(StopReason::Interrupt, result.stop_reason);
    assert!(result.steps_executed > 0);
}

#[test]
fn interrupt_executes_at_most_one_more_instruction() {
    let mut dbg = debugger_with(&[
        Instruction::new(Opcode::MOVL, &[4, regs::r(1) as u32]),
        Instruction::new(Opcode::JMP, &[regs::r(1) as u32, regs::r(9) as u32]),
    ]);

    let handle = dbg.interrupt_handle();
    let mut observed = 0u64;

    dbg.set_callback(Box::new(move |reason, _| {
        if reason == StopReason::Step {
            observed += 1;
            if observed == 10 {
                handle.interrupt();
            }
        }
        true
    }));

    let result = dbg.continue_(None);

    assert_eq!(StopReason::Interrupt, result.stop_reason);
    // raised after the 10th step; the loop stops before executing an 11th
    assert!(result.steps_executed <= 11);
}

#[test]
fn error_keeps_the_failing_pc() {
    let mut dbg = debugger_with(&[
        Instruction::new(Opcode::NOP, &[]),
        Instruction::new(Opcode::DIV, &[regs::r(0) as u32, regs::r(1) as u32, regs::r(2) as u32]),
    ]);

    let result = dbg.continue_(None);

    assert_eq!(StopReason::Error, result.stop_reason);
    assert_eq!(Some(ExecuteError::DivisionByZero), result.error);
    // the machine stays at the failing instruction for inspection
    assert_eq!(4, result.last_pc);
    assert_eq!(4, dbg.machine().pc());
}

#[test]
fn register_writes_take_effect_immediately() {
    let mut dbg = debugger_with(&[Instruction::new(
        Opcode::ADD,
        &[regs::r(0) as u32, regs::r(1) as u32, regs::r(2) as u32],
    )]);

    dbg.write_register("r0", 30).unwrap();
    dbg.write_register("r1", 12).unwrap();
    dbg.step();

    assert_eq!(42, dbg.read_register("r2").unwrap());
}

#[test]
fn watchpoint_sizes_are_validated() {
    let mut dbg = debugger_with(&[]);

    assert!(dbg.add_watchpoint(0, 1, WatchpointKind::Write).is_ok());
    assert!(dbg.add_watchpoint(0, 2, WatchpointKind::Write).is_ok());
    assert!(matches!(
        dbg.add_watchpoint(0, 3, WatchpointKind::Write),
        Err(DebuggerError::InvalidWatchSize(3))
    ));
}
