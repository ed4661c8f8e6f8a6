//! This module is an integration test that checks that a run can be stopped
//! from the outside through a watchdog while it is exploring.
#![cfg(test)]

use std::{cell::Cell, rc::Rc};

use common::word;
use path_explorer as pe;
use path_explorer::{
    executor,
    executor::{HaltReason, StateTerminationType},
    expr::{CompareOp, Context},
    program::{InstructionKind, Operand, ProgramBuilder, Register},
    watchdog::Watchdog,
};

mod common;

/// A watchdog that asks the run to stop once it has been polled `limit`
/// times.
#[derive(Debug)]
struct StopAfter {
    polls: Cell<usize>,
    limit: usize,
}

impl Watchdog for StopAfter {
    fn should_stop(&self) -> bool {
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        polls > self.limit
    }

    fn poll_every(&self) -> usize {
        1
    }
}

#[test]
fn watchdog_interrupts_the_run_while_it_explores() -> anyhow::Result<()> {
    common::init_logging();

    // A loop whose exit depends on the input, so exploration never runs dry.
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 1)?;
    let head = builder.add_block(main)?;
    let exit = builder.add_block(main)?;
    builder.push(head, InstructionKind::Compare {
        dest: Register(0),
        op:   CompareOp::Eq,
        lhs:  Operand::Argument(0),
        rhs:  word(0),
    })?;
    builder.push(head, InstructionKind::Branch {
        cond:      Operand::Register(Register(0)),
        then:      exit,
        otherwise: head,
    })?;
    builder.push(exit, InstructionKind::Return { value: None })?;
    let program = builder.build()?;

    let watchdog = Rc::new(StopAfter {
        polls: Cell::new(0),
        limit: 20,
    });
    let result = pe::new(
        program,
        executor::Config::default(),
        Context::default(),
        watchdog.clone(),
    )
    .explore("main")?;

    assert_eq!(result.halt_reason, HaltReason::Interrupt);
    assert_eq!(watchdog.polls.get(), 21);
    assert!(result.stats.instructions > 0 && result.stats.instructions <= 20);
    assert!(result.bugs.is_empty());
    assert!(result
        .tests
        .iter()
        .any(|t| t.termination == StateTerminationType::Interrupted));

    Ok(())
}
