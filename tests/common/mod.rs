//! This module contains common utilities for simplifying the writing of
//! integration tests for this library.

#![cfg(test)]

use anyhow::anyhow;
use path_explorer as pe;
use path_explorer::{
    executor,
    explorer::InitialExplorer,
    expr::{Context, Width},
    program::{BlockId, InstructionKind, Operand, Program, ProgramBuilder, Register, SourceLocation},
    report::ExecutionResult,
    watchdog::LazyWatchdog,
};

/// Installs a subscriber that prints the engine's logs, filtered by
/// `RUST_LOG`. Only the first call in a test binary has an effect.
#[allow(unused)] // It is actually
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Constructs a new explorer for `program` using the provided `config` and a
/// 64-bit little-endian machine.
#[allow(unused)] // It is actually
pub fn new_explorer(program: Program, config: executor::Config) -> InitialExplorer {
    init_logging();
    pe::new(program, config, Context::default(), LazyWatchdog.in_rc())
}

/// A pointer-sized constant.
#[allow(unused)] // It is actually
pub fn word(value: u64) -> Operand {
    Operand::constant(value, 64)
}

/// A constant of the given `width`.
#[allow(unused)] // It is actually
pub fn constant(value: u64, width: Width) -> Operand {
    Operand::constant(value, width)
}

/// The value held in register `index`.
#[allow(unused)] // It is actually
pub fn reg(index: u32) -> Operand {
    Operand::Register(Register(index))
}

/// Appends `instructions` to `block`, placing the `n`th of them on line
/// `first_line + n` of `file`.
#[allow(unused)] // It is actually
pub fn push_lines(
    builder: &mut ProgramBuilder,
    block: BlockId,
    file: &str,
    first_line: u32,
    instructions: Vec<InstructionKind>,
) -> anyhow::Result<()> {
    for (line, kind) in (first_line..).zip(instructions) {
        builder.push_at(block, kind, Some(SourceLocation::new(file, line, 1)))?;
    }
    Ok(())
}

/// Reads the value that the test case `test` of `result` gives to the
/// symbolic object named `name`, as a little-endian number.
#[allow(unused)] // It is actually
pub fn input_value(result: &ExecutionResult, test: usize, name: &str) -> anyhow::Result<u64> {
    let test = result
        .tests
        .get(test)
        .ok_or_else(|| anyhow!("No test case with index {test}"))?;
    let object = test
        .objects
        .iter()
        .find(|o| o.name == name)
        .ok_or_else(|| anyhow!("Test case {} has no object named {name}", test.id))?;
    Ok(object
        .bytes
        .iter()
        .rev()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
}
