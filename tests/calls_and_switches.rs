//! This module is an integration test that checks the exploration of
//! programs that call between functions and switch on their inputs.
#![cfg(test)]

use common::{constant, input_value, reg, word};
use path_explorer::{
    executor,
    executor::StateTerminationType,
    expr::CompareOp,
    program::{Callee, CastKind, InstructionKind, Operand, ProgramBuilder, Register},
};

mod common;

#[test]
fn explores_every_case_of_a_switch_in_a_callee() -> anyhow::Result<()> {
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 1)?;
    let classify = builder.declare_function("classify", 1)?;

    // classify(x) = match x { 1 => 10, 2 => 20, _ => 0 }
    let switch = builder.add_block(classify)?;
    let one = builder.add_block(classify)?;
    let two = builder.add_block(classify)?;
    let other = builder.add_block(classify)?;
    builder.push(switch, InstructionKind::Switch {
        value:   Operand::Argument(0),
        cases:   vec![(1, one), (2, two)],
        default: other,
    })?;
    for (block, value) in [(one, 10), (two, 20), (other, 0)] {
        builder.push(block, InstructionKind::Return {
            value: Some(constant(value, 8)),
        })?;
    }

    // assert(classify((u8) arg0) != 20)
    let entry = builder.add_block(main)?;
    for kind in [
        InstructionKind::Cast {
            dest:  Register(0),
            kind:  CastKind::Trunc,
            value: Operand::Argument(0),
            width: 8,
        },
        InstructionKind::Call {
            dest:   Some(Register(1)),
            callee: Callee::Direct(classify),
            args:   vec![reg(0)],
        },
        InstructionKind::Compare {
            dest: Register(2),
            op:   CompareOp::Ne,
            lhs:  reg(1),
            rhs:  constant(20, 8),
        },
        InstructionKind::Assert {
            cond:    reg(2),
            message: "classified as two".to_string(),
        },
        InstructionKind::Return { value: None },
    ] {
        builder.push(entry, kind)?;
    }
    let program = builder.build()?;

    let result = common::new_explorer(program, executor::Config::default()).explore("main")?;

    assert_eq!(result.tests.len(), 3);
    let failures: Vec<_> = result.bugs_of(StateTerminationType::Assert).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("classified as two"));

    let test = failures[0]
        .test
        .ok_or_else(|| anyhow::anyhow!("Assertion failure has no test case"))?;
    assert_eq!(input_value(&result, test, "arg0")? & 0xff, 2);

    let mut exits: Vec<_> = result
        .tests
        .iter()
        .enumerate()
        .filter(|(_, t)| t.termination == StateTerminationType::Exit)
        .map(|(i, _)| input_value(&result, i, "arg0").map(|v| v & 0xff))
        .collect::<anyhow::Result<_>>()?;
    exits.sort_unstable();
    assert_eq!(exits.len(), 2);
    assert!(exits.contains(&1));
    assert!(exits.iter().all(|v| *v != 2));

    Ok(())
}

#[test]
fn follows_every_possible_target_of_an_indirect_call() -> anyhow::Result<()> {
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 1)?;
    let first = builder.declare_function("first", 0)?;
    let second = builder.declare_function("second", 0)?;
    for (function, value) in [(first, 1), (second, 2)] {
        let body = builder.add_block(function)?;
        builder.push(body, InstructionKind::Return {
            value: Some(word(value)),
        })?;
    }

    // f = arg0 == 0 ? first : second; if (f() == 2) abort();
    let entry = builder.add_block(main)?;
    let fails = builder.add_block(main)?;
    let passes = builder.add_block(main)?;
    for kind in [
        InstructionKind::Compare {
            dest: Register(0),
            op:   CompareOp::Eq,
            lhs:  Operand::Argument(0),
            rhs:  word(0),
        },
        InstructionKind::Select {
            dest:      Register(1),
            cond:      reg(0),
            then:      Operand::Function(first),
            otherwise: Operand::Function(second),
        },
        InstructionKind::Call {
            dest:   Some(Register(2)),
            callee: Callee::Indirect(reg(1)),
            args:   vec![],
        },
        InstructionKind::Compare {
            dest: Register(3),
            op:   CompareOp::Eq,
            lhs:  reg(2),
            rhs:  word(2),
        },
        InstructionKind::Branch {
            cond:      reg(3),
            then:      fails,
            otherwise: passes,
        },
    ] {
        builder.push(entry, kind)?;
    }
    builder.push(fails, InstructionKind::Abort {
        message: "second was called".to_string(),
    })?;
    builder.push(passes, InstructionKind::Return { value: None })?;
    let program = builder.build()?;

    let result = common::new_explorer(program, executor::Config::default()).explore("main")?;

    assert_eq!(result.tests.len(), 2);
    let aborts: Vec<_> = result.bugs_of(StateTerminationType::Abort).collect();
    assert_eq!(aborts.len(), 1);
    let test = aborts[0]
        .test
        .ok_or_else(|| anyhow::anyhow!("Abort has no test case"))?;
    assert_ne!(input_value(&result, test, "arg0")?, 0);

    Ok(())
}
