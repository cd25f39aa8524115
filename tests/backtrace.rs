//! Call-stack reconstruction and step-over-call, from assembly source to
//! frames.

use cucaracha::config::LayoutConfig;
use cucaracha::prelude::*;

const CALLS: &str = "\
	.type	main,@function
	.type	callee,@function
main:
	mov	lr, r8
	movl	callee@lo, r4
	movh	callee@hi, r4
	jmp	r4, lr
	mov	r8, lr
	jmp	lr, r9
callee:
	movl	7, r0
	jmp	lr, r9
";

fn load() -> Runner {
    let program = parse_assembly_source(CALLS).expect("parse failed");
    let program = resolve(
        program,
        &LayoutConfig {
            base_address: 0x10000,
            ..LayoutConfig::default()
        },
    )
    .expect("resolve failed");

    let mut runner = Runner::new(Debugger::new(Machine::default()));
    runner.load(program).expect("load failed");

    runner
}

#[test]
fn next_over_call_stops_after_the_call_site() {
    let mut runner = load();

    // mov, movl, movh: now at the call
    for _ in 0..3 {
        runner.debugger_mut().step();
    }
    let call_pc = runner.debugger().machine().pc();
    assert!(runner.classify_call(call_pc));

    let result = runner.next();

    assert_eq!(StopReason::Step, result.stop_reason);
    assert_eq!(call_pc + 4, result.last_pc);
    // the callee did run
    assert_eq!(7, runner.debugger().machine().reg(regs::r(0)));
}

#[test]
fn single_step_enters_the_call() {
    let mut runner = load();

    for _ in 0..3 {
        runner.debugger_mut().step();
    }

    let result = runner.debugger_mut().step();

    assert_eq!(StopReason::Step, result.stop_reason);
    assert_eq!("callee", runner.frame_at(result.last_pc).function.unwrap());
}

#[test]
fn backtrace_inside_the_callee() {
    let mut runner = load();

    for _ in 0..4 {
        runner.debugger_mut().step();
    }

    let frames = runner.backtrace();

    assert_eq!(2, frames.len());
    assert_eq!(Some("callee".to_string()), frames[0].function);
    assert_eq!(Some("main".to_string()), frames[1].function);
}

#[test]
fn frames_never_repeat_addresses() {
    let mut runner = load();

    for _ in 0..4 {
        runner.debugger_mut().step();
    }

    let frames = runner.backtrace();
    let mut addresses: Vec<_> = frames.iter().map(|f| f.address).collect();
    addresses.sort_unstable();
    addresses.dedup();

    assert_eq!(frames.len(), addresses.len());
}

#[test]
fn whole_program_still_terminates() {
    let mut runner = load();

    let result = runner.debugger_mut().run(Some(100));

    assert_eq!(StopReason::Termination, result.stop_reason);
    assert_eq!(7, runner.return_value());
}

#[test]
fn sentinel_is_never_a_frame() {
    let runner = load();

    // at entry lr holds the termination sentinel, which must not unwind
    let frames = runner.backtrace();

    assert_eq!(1, frames.len());
    assert_eq!(Some("main".to_string()), frames[0].function);
}
