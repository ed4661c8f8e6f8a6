//! This module is an integration test that checks that a query the solver
//! cannot answer ends only the state that issued it.
#![cfg(test)]

use std::time::Duration;

use common::{reg, word};
use path_explorer::{
    constraint::ConstraintSet,
    error::solver,
    executor,
    executor::{HaltReason, StateTerminationType},
    expr::{Assignment, CompareOp},
    memory,
    program::{InstructionKind, Operand, ProgramBuilder, Register},
    solver::{Assumption, Solver},
};

mod common;

/// A solver that never answers in time.
struct Stalling;

impl Solver for Stalling {
    fn name(&self) -> &'static str {
        "stalling"
    }

    fn check(
        &self,
        _: &ConstraintSet,
        _: &[Assumption],
        timeout: Duration,
    ) -> solver::Result<Option<Assignment>> {
        Err(solver::Error::Timeout { timeout })
    }
}

#[test]
fn timed_out_fork_ends_the_state_with_a_solver_error() -> anyhow::Result<()> {
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 1)?;
    let entry = builder.add_block(main)?;
    let then = builder.add_block(main)?;
    builder.push(entry, InstructionKind::Compare {
        dest: Register(0),
        op:   CompareOp::Eq,
        lhs:  Operand::Argument(0),
        rhs:  word(42),
    })?;
    builder.push(entry, InstructionKind::Branch {
        cond:      reg(0),
        then,
        otherwise: then,
    })?;
    builder.push(then, InstructionKind::Return { value: None })?;
    let program = builder.build()?;

    let result = common::new_explorer(program, executor::Config::default())
        .with_solver(Box::new(Stalling))
        .explore("main")?;

    assert_eq!(result.halt_reason, HaltReason::NoMoreStates);
    assert!(result.tests.is_empty());
    assert!(result.bugs.is_empty());
    assert_eq!(
        result.stats.terminations.get(&StateTerminationType::SolverError),
        Some(&1)
    );
    assert!(result.stats.solver.timeouts > 0);

    Ok(())
}

#[test]
fn incomplete_resolution_ends_the_unresolved_paths() -> anyhow::Result<()> {
    // p = x == 0 ? a : b; *p;
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 1)?;
    let entry = builder.add_block(main)?;
    for kind in [
        InstructionKind::Malloc {
            dest: Register(0),
            size: word(8),
        },
        InstructionKind::Malloc {
            dest: Register(1),
            size: word(8),
        },
        InstructionKind::Compare {
            dest: Register(2),
            op:   CompareOp::Eq,
            lhs:  Operand::Argument(0),
            rhs:  word(0),
        },
        InstructionKind::Select {
            dest:      Register(3),
            cond:      reg(2),
            then:      reg(0),
            otherwise: reg(1),
        },
        InstructionKind::Load {
            dest:    Register(4),
            pointer: reg(3),
            width:   8,
        },
        InstructionKind::Return { value: None },
    ] {
        builder.push(entry, kind)?;
    }
    let program = builder.build()?;

    let config = executor::Config::default().with_memory(memory::Config::default().with_max_resolutions(1));
    let result = common::new_explorer(program, config).explore("main")?;

    assert!(result.bugs.is_empty());
    assert_eq!(result.tests.len(), 1);
    assert_eq!(result.tests[0].termination, StateTerminationType::Exit);
    assert_eq!(
        result.stats.terminations.get(&StateTerminationType::SolverError),
        Some(&1)
    );

    Ok(())
}
