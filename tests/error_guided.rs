//! This module is an integration test that checks that traces predicting an
//! error are confirmed when the error occurs, and reported as false positives
//! when it does not.
#![cfg(test)]

use common::{input_value, push_lines, reg, word};
use path_explorer::{
    executor,
    executor::{HaltReason, StateTerminationType},
    expr::CompareOp,
    program::{InstructionKind, Operand, Program, ProgramBuilder, Register},
    target::{spec, GuidanceKind, ReachWithError},
};

mod common;

const TRACES: &str = r#"[{
    "id": "df",
    "locations": [{ "file": "src/free.c", "start_line": 3, "end_line": 3 }],
    "errors": ["DoubleFree"]
}]"#;

/// Builds `main` from `free.c`, which frees its first allocation on line 2
/// and, if `twice` is set, again on line 3.
fn free_program(twice: bool) -> anyhow::Result<Program> {
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 0)?;
    builder.set_source_file(main, "free.c")?;
    let entry = builder.add_block(main)?;

    let second = if twice {
        InstructionKind::Free { pointer: reg(0) }
    } else {
        InstructionKind::Store {
            pointer: reg(1),
            value:   word(7),
        }
    };
    push_lines(&mut builder, entry, "free.c", 0, vec![
        InstructionKind::Malloc {
            dest: Register(0),
            size: word(8),
        },
        InstructionKind::Malloc {
            dest: Register(1),
            size: word(8),
        },
        InstructionKind::Free { pointer: reg(0) },
        second,
        InstructionKind::Return { value: None },
    ])?;
    Ok(builder.build()?)
}

fn guided() -> executor::Config {
    executor::Config::default().with_guidance(GuidanceKind::ErrorGuidance)
}

#[test]
fn confirms_a_predicted_double_free() -> anyhow::Result<()> {
    let traces = spec::parse(TRACES)?;
    let program = free_program(true)?;

    let result = common::new_explorer(program, guided())
        .with_traces(traces)
        .explore("main")?;

    assert_eq!(result.halt_reason, HaltReason::ReachedTarget);
    assert_eq!(result.true_positives.len(), 1);
    assert_eq!(result.true_positives[0].trace_id, "df");
    assert_eq!(result.true_positives[0].error, ReachWithError::DoubleFree);
    assert!(result.false_positives.is_empty());

    let bugs: Vec<_> = result.bugs_of(StateTerminationType::Free).collect();
    assert_eq!(bugs.len(), 1);
    assert_eq!(bugs[0].error, ReachWithError::DoubleFree);
    assert_eq!(bugs[0].trace_id.as_deref(), Some("df"));

    Ok(())
}

#[test]
fn reports_an_unconfirmed_trace_as_false_positive() -> anyhow::Result<()> {
    let traces = spec::parse(TRACES)?;
    let program = free_program(false)?;

    let result = common::new_explorer(program, guided())
        .with_traces(traces)
        .explore("main")?;

    assert!(result.bugs.is_empty());
    assert!(result.true_positives.is_empty());
    assert_eq!(result.false_positives.len(), 1);
    assert_eq!(result.false_positives[0].trace_id, "df");
    assert_eq!(result.false_positives[0].errors, vec![ReachWithError::DoubleFree]);

    Ok(())
}

#[test]
fn guided_branch_follows_only_the_side_reaching_the_trace() -> anyhow::Result<()> {
    const BRANCH_TRACES: &str = r#"[{
        "id": "df",
        "locations": [{ "file": "src/free.c", "start_line": 4, "end_line": 4 }],
        "errors": ["DoubleFree"]
    }]"#;

    // p = malloc(8); if (x == 7) { free(p); free(p); } return;
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 1)?;
    builder.set_source_file(main, "free.c")?;
    let entry = builder.add_block(main)?;
    let frees = builder.add_block(main)?;
    let done = builder.add_block(main)?;
    push_lines(&mut builder, entry, "free.c", 0, vec![
        InstructionKind::Malloc {
            dest: Register(0),
            size: word(8),
        },
        InstructionKind::Compare {
            dest: Register(1),
            op:   CompareOp::Eq,
            lhs:  Operand::Argument(0),
            rhs:  word(7),
        },
        InstructionKind::Branch {
            cond:      reg(1),
            then:      frees,
            otherwise: done,
        },
    ])?;
    push_lines(&mut builder, frees, "free.c", 3, vec![
        InstructionKind::Free { pointer: reg(0) },
        InstructionKind::Free { pointer: reg(0) },
        InstructionKind::Return { value: None },
    ])?;
    push_lines(&mut builder, done, "free.c", 10, vec![InstructionKind::Return {
        value: None,
    }])?;
    let program = builder.build()?;

    let result = common::new_explorer(program, guided())
        .with_traces(spec::parse(BRANCH_TRACES)?)
        .explore("main")?;

    // The side that cannot reach the trace is never forked off.
    assert_eq!(result.stats.forks, 0);
    assert_eq!(result.true_positives.len(), 1);
    assert_eq!(result.tests.len(), 1);
    assert_eq!(result.tests[0].termination, StateTerminationType::Free);
    assert_eq!(input_value(&result, 0, "arg0")?, 7);

    Ok(())
}
