//! This module is an integration test that checks the errors the explored
//! program can commit on memory, and the resolution of pointers that may
//! point into more than one object.
#![cfg(test)]

use common::{constant, input_value, reg, word};
use path_explorer::{
    executor,
    executor::StateTerminationType,
    expr::CompareOp,
    program::{InstructionKind, Operand, ProgramBuilder, Register},
    state::SymcreteKind,
    target::ReachWithError,
};

mod common;

#[test]
fn invents_an_object_for_a_pointer_from_input() -> anyhow::Result<()> {
    // main(p) { return *(int *)p; }
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 1)?;
    let entry = builder.add_block(main)?;
    builder.push(entry, InstructionKind::Load {
        dest:    Register(0),
        pointer: Operand::Argument(0),
        width:   32,
    })?;
    builder.push(entry, InstructionKind::Return { value: None })?;
    let program = builder.build()?;

    let result = common::new_explorer(program, executor::Config::default()).explore("main")?;
    assert_eq!(result.tests.len(), 2);

    let null: Vec<_> = result.bugs_of(StateTerminationType::Ptr).collect();
    assert_eq!(null.len(), 1);
    assert_eq!(null[0].error, ReachWithError::MayBeNullPointerException);

    let exit = result
        .tests
        .iter()
        .find(|t| t.termination == StateTerminationType::Exit)
        .ok_or_else(|| anyhow::anyhow!("No path read through the pointer"))?;
    assert!(exit.objects.iter().any(|o| o.name == "lazy_init_content"));
    let kinds: Vec<_> = exit.symcretes.iter().map(|s| s.kind).collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&SymcreteKind::Address));
    assert!(kinds.contains(&SymcreteKind::Size));

    Ok(())
}

#[test]
fn reports_use_after_free() -> anyhow::Result<()> {
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 0)?;
    let entry = builder.add_block(main)?;
    for kind in [
        InstructionKind::Malloc {
            dest: Register(0),
            size: word(8),
        },
        InstructionKind::Free { pointer: reg(0) },
        InstructionKind::Load {
            dest:    Register(1),
            pointer: reg(0),
            width:   8,
        },
        InstructionKind::Return { value: None },
    ] {
        builder.push(entry, kind)?;
    }
    let program = builder.build()?;

    let result = common::new_explorer(program, executor::Config::default()).explore("main")?;

    let bugs: Vec<_> = result.bugs_of(StateTerminationType::Ptr).collect();
    assert_eq!(bugs.len(), 1);
    assert_eq!(bugs[0].message, "memory error: use after free");
    assert_eq!(bugs[0].error, ReachWithError::UseAfterFree);
    assert!(result
        .tests
        .iter()
        .all(|t| t.termination != StateTerminationType::Exit));

    Ok(())
}

#[test]
fn reports_free_of_a_stack_object() -> anyhow::Result<()> {
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 0)?;
    let entry = builder.add_block(main)?;
    builder.push(entry, InstructionKind::Alloca {
        dest:      Register(0),
        size:      word(8),
        alignment: 8,
    })?;
    builder.push(entry, InstructionKind::Free { pointer: reg(0) })?;
    builder.push(entry, InstructionKind::Return { value: None })?;
    let program = builder.build()?;

    let result = common::new_explorer(program, executor::Config::default()).explore("main")?;

    let bugs: Vec<_> = result.bugs_of(StateTerminationType::Free).collect();
    assert_eq!(bugs.len(), 1);
    assert_eq!(bugs[0].message, "memory error: free of alloca");
    assert_eq!(result.tests.len(), 1);

    Ok(())
}

#[test]
fn reports_store_to_read_only_global() -> anyhow::Result<()> {
    let mut builder = ProgramBuilder::new();
    let counter = builder.add_global("counter", 1, None, false);
    let table = builder.add_global("table", 8, Some(vec![0; 8]), true);
    let main = builder.declare_function("main", 0)?;
    let entry = builder.add_block(main)?;
    builder.push(entry, InstructionKind::Store {
        pointer: Operand::Global(counter),
        value:   constant(1, 8),
    })?;
    builder.push(entry, InstructionKind::Store {
        pointer: Operand::Global(table),
        value:   constant(1, 8),
    })?;
    builder.push(entry, InstructionKind::Return { value: None })?;
    let program = builder.build()?;
    let store = program.block(entry)?.instructions[1].id;

    let result = common::new_explorer(program, executor::Config::default()).explore("main")?;

    assert_eq!(result.bugs.len(), 1);
    assert_eq!(result.bugs[0].kind, StateTerminationType::ReadOnly);
    assert_eq!(result.bugs[0].message, "memory error: object read only");
    assert_eq!(result.bugs[0].instruction, store);

    Ok(())
}

#[test]
fn forks_once_per_object_a_pointer_may_point_into() -> anyhow::Result<()> {
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

    let result = common::new_explorer(program, executor::Config::default()).explore("main")?;

    assert!(result.bugs.is_empty());
    assert_eq!(result.stats.forks, 1);
    assert_eq!(result.tests.len(), 2);
    assert!(result
        .tests
        .iter()
        .all(|t| t.termination == StateTerminationType::Exit));
    let mut inputs = vec![input_value(&result, 0, "arg0")?, input_value(&result, 1, "arg0")?];
    inputs.sort_unstable();
    assert_eq!(inputs[0], 0);
    assert_ne!(inputs[1], 0);

    Ok(())
}
