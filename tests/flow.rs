//! Full-pipeline control-flow tests: assembly source in, execution results
//! out.

use cucaracha::config::LayoutConfig;
use cucaracha::prelude::*;

fn load_source(source: &str) -> Runner {
    let program = parse_assembly_source(source).expect("parse failed");
    let program = resolve(program, &LayoutConfig::default()).expect("resolve failed");

    let mut runner = Runner::new(Debugger::new(Machine::default()));
    runner.load(program).expect("load failed");

    runner
}

const LOOP_SUM: &str = "\
	.type	main,@function
main:
	movl	5, r0
	movl	0, r1
	movl	1, r2
	movl	.L_loop@lo, r4
	movh	.L_loop@hi, r4
.L_loop:
	add	r1, r0, r1
	sub	r0, r2, r0
	cmp	r0, r2, cpsr
	cjmp	ge, r4, r9
	jmp	lr, r9
";

#[test]
fn loop_sum_runs_to_termination() {
    let mut runner = load_source(LOOP_SUM);

    let result = runner.debugger_mut().run(Some(1_000));

    assert_eq!(StopReason::Termination, result.stop_reason);
    assert_eq!(15, runner.debugger().machine().reg(regs::r(1)));
    assert_eq!(0, runner.debugger().machine().reg(regs::r(0)));
}

#[test]
fn loop_sum_step_count_is_deterministic() {
    let mut runner = load_source(LOOP_SUM);

    // 5 setup + 5 iterations of 4 + the final fall-through jmp
    let result = runner.debugger_mut().run(None);

    assert_eq!(StopReason::Termination, result.stop_reason);
    assert_eq!(5 + 5 * 4 + 1, result.steps_executed);
}

#[test]
fn conditional_jump_falls_through_when_unsatisfied() {
    let mut runner = load_source(
        "\
	.type	main,@function
main:
	movl	1, r0
	movl	2, r1
	cmp	r0, r1, cpsr
	movl	.L_skip@lo, r4
	movh	.L_skip@hi, r4
	cjmp	eq, r4, r9
	movl	7, r5
.L_skip:
	jmp	lr, r9
",
    );

    let result = runner.debugger_mut().run(None);

    assert_eq!(StopReason::Termination, result.stop_reason);
    // 1 != 2: the guarded movl executes
    assert_eq!(7, runner.debugger().machine().reg(regs::r(5)));
}

#[test]
fn termination_reports_r0_as_exit_code() {
    let mut runner = load_source(
        "\
	.type	main,@function
main:
	movl	42, r0
	jmp	lr, r9
",
    );

    let result = runner.debugger_mut().run(None);

    assert_eq!(StopReason::Termination, result.stop_reason);
    assert_eq!(42, runner.return_value());
}

#[test]
fn loads_and_stores_through_globals() {
    let mut runner = load_source(
        "\
	.type	main,@function
main:
	movl	counter@lo, r1
	movh	counter@hi, r1
	ld	r1, r0
	movl	1, r2
	add	r0, r2, r0
	st	r0, r1
	jmp	lr, r9
	.type	counter,@object
	.size	counter, 4
counter:
	.long	41
",
    );

    let result = runner.debugger_mut().run(None);
    assert_eq!(StopReason::Termination, result.stop_reason);
    assert_eq!(42, runner.return_value());

    // the store went back to the global's memory
    let counter = runner
        .program()
        .unwrap()
        .global("counter")
        .unwrap()
        .address
        .unwrap();
    let bytes = runner.debugger().read_memory(counter, 4).unwrap();
    assert_eq!(bytes, [42, 0, 0, 0]);
}

#[test]
fn entry_point_is_main_even_when_not_first() {
    let mut runner = load_source(
        "\
	.type	helper,@function
	.type	main,@function
helper:
	movl	1, r0
	jmp	lr, r9
main:
	movl	2, r0
	jmp	lr, r9
",
    );

    let result = runner.debugger_mut().run(None);

    assert_eq!(StopReason::Termination, result.stop_reason);
    assert_eq!(2, runner.return_value());
}
