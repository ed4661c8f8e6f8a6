//! This module is an integration test that checks how states carry on once
//! the fork budget of a run is spent, and how forks count towards the depth
//! of a state.
#![cfg(test)]

use common::{input_value, reg, word};
use path_explorer::{
    executor,
    executor::{HaltReason, StateTerminationType},
    expr::CompareOp,
    program::{BlockId, InstructionKind, Operand, ProgramBuilder, Register},
};

mod common;

/// Compares argument `index` against `value` into `dest`.
fn compare(dest: u32, op: CompareOp, index: u32, value: u64) -> InstructionKind {
    InstructionKind::Compare {
        dest: Register(dest),
        op,
        lhs: Operand::Argument(index),
        rhs: word(value),
    }
}

fn branch(cond: u32, then: BlockId, otherwise: BlockId) -> InstructionKind {
    InstructionKind::Branch {
        cond: reg(cond),
        then,
        otherwise,
    }
}

#[test]
fn paths_run_to_completion_after_the_fork_budget() -> anyhow::Result<()> {
    // if (x < 10) { if (x < 5) a else b } else { if (x < 15) a else b }
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 1)?;
    let entry = builder.add_block(main)?;
    let low = builder.add_block(main)?;
    let high = builder.add_block(main)?;
    let a = builder.add_block(main)?;
    let b = builder.add_block(main)?;
    builder.push(entry, compare(0, CompareOp::Ult, 0, 10))?;
    builder.push(entry, branch(0, low, high))?;
    builder.push(low, compare(1, CompareOp::Ult, 0, 5))?;
    builder.push(low, branch(1, a, b))?;
    builder.push(high, compare(2, CompareOp::Ult, 0, 15))?;
    builder.push(high, branch(2, a, b))?;
    builder.push(a, InstructionKind::Return { value: None })?;
    builder.push(b, InstructionKind::Return { value: None })?;
    let program = builder.build()?;

    let config = executor::Config::default().with_max_forks(1);
    let result = common::new_explorer(program, config).explore("main")?;

    assert_eq!(result.halt_reason, HaltReason::NoMoreStates);
    assert_eq!(result.stats.forks, 1);
    assert_eq!(result.tests.len(), 2);
    assert!(result
        .tests
        .iter()
        .all(|t| t.termination == StateTerminationType::Exit));

    Ok(())
}

#[test]
fn spent_budget_sends_a_switch_to_its_least_visited_case() -> anyhow::Result<()> {
    // Both sides of the first branch enter `looped`, and then reach a switch
    // whose first case leads back into it.
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 2)?;
    let entry = builder.add_block(main)?;
    let looped = builder.add_block(main)?;
    let switch = builder.add_block(main)?;
    let fresh = builder.add_block(main)?;
    let other = builder.add_block(main)?;
    builder.push(entry, compare(0, CompareOp::Eq, 1, 0))?;
    builder.push(entry, branch(0, looped, looped))?;
    builder.push(looped, InstructionKind::Jump { target: switch })?;
    builder.push(switch, InstructionKind::Switch {
        value:   Operand::Argument(0),
        cases:   vec![(2, looped), (1, fresh)],
        default: other,
    })?;
    builder.push(fresh, InstructionKind::Return { value: None })?;
    builder.push(other, InstructionKind::Return { value: None })?;
    let program = builder.build()?;

    let config = executor::Config::default()
        .with_max_forks(1)
        .with_max_instructions(1000);
    let result = common::new_explorer(program, config).explore("main")?;

    assert_eq!(result.halt_reason, HaltReason::NoMoreStates);
    assert_eq!(result.stats.forks, 1);
    assert_eq!(result.tests.len(), 2);
    for test in 0..result.tests.len() {
        assert_eq!(result.tests[test].termination, StateTerminationType::Exit);
        assert_eq!(input_value(&result, test, "arg0")?, 1);
    }

    Ok(())
}

#[test]
fn switch_counts_as_a_single_fork_in_depth() -> anyhow::Result<()> {
    // switch (x) { case 1: .. case 2: .. default: .. } and then, in every
    // case, if (y == 0) done else done.
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 2)?;
    let entry = builder.add_block(main)?;
    let cases: Vec<BlockId> = (0..3)
        .map(|_| builder.add_block(main))
        .collect::<Result<_, _>>()?;
    let done = builder.add_block(main)?;
    builder.push(entry, InstructionKind::Switch {
        value:   Operand::Argument(0),
        cases:   vec![(1, cases[0]), (2, cases[1])],
        default: cases[2],
    })?;
    for block in &cases {
        builder.push(*block, compare(0, CompareOp::Eq, 1, 0))?;
        builder.push(*block, branch(0, done, done))?;
    }
    builder.push(done, InstructionKind::Return { value: None })?;
    let program = builder.build()?;

    let config = executor::Config::default().with_max_depth(2);
    let result = common::new_explorer(program, config).explore("main")?;

    assert_eq!(result.stats.forks, 5);
    assert_eq!(result.tests.len(), 6);
    assert!(result
        .tests
        .iter()
        .all(|t| t.termination == StateTerminationType::Exit));
    assert!(!result
        .stats
        .terminations
        .contains_key(&StateTerminationType::MaxDepth));

    Ok(())
}
