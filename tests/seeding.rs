//! This module is an integration test that checks the replay of known inputs
//! through seeds.
#![cfg(test)]

use common::{constant, input_value, reg, word};
use path_explorer::{
    error,
    executor,
    executor::{HaltReason, StateTerminationType},
    expr::CompareOp,
    program::{InstructionKind, Operand, Program, ProgramBuilder, Register},
    seed,
    seed::{Seed, SeedObject},
};

mod common;

/// Builds a program that reads a symbolic 32-bit word and aborts if it is 42.
fn word_program() -> anyhow::Result<Program> {
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 0)?;
    let entry = builder.add_block(main)?;
    let fails = builder.add_block(main)?;
    let passes = builder.add_block(main)?;
    for kind in [
        InstructionKind::Alloca {
            dest:      Register(0),
            size:      word(4),
            alignment: 4,
        },
        InstructionKind::MakeSymbolic {
            pointer: reg(0),
            name:    "word".to_string(),
        },
        InstructionKind::Load {
            dest:    Register(1),
            pointer: reg(0),
            width:   32,
        },
        InstructionKind::Compare {
            dest: Register(2),
            op:   CompareOp::Eq,
            lhs:  reg(1),
            rhs:  constant(42, 32),
        },
        InstructionKind::Branch {
            cond:      reg(2),
            then:      fails,
            otherwise: passes,
        },
    ] {
        builder.push(entry, kind)?;
    }
    builder.push(fails, InstructionKind::Abort {
        message: "bad word".to_string(),
    })?;
    builder.push(passes, InstructionKind::Return { value: None })?;
    Ok(builder.build()?)
}

fn word_seed(id: &str, bytes: &[u8]) -> Seed {
    Seed {
        id:      id.to_string(),
        objects: vec![SeedObject {
            name:  "word".to_string(),
            bytes: bytes.to_vec(),
        }],
    }
}

fn replaying(only_seed: bool) -> executor::Config {
    executor::Config::default().with_seeding(
        seed::Config::default()
            .with_only_replay_seeds(true)
            .with_only_seed(only_seed),
    )
}

#[test]
fn seeded_run_follows_the_side_of_its_seed() -> anyhow::Result<()> {
    let result = common::new_explorer(word_program()?, replaying(true))
        .with_seeds(vec![word_seed("crash", &[42, 0, 0, 0])])
        .explore("main")?;

    assert_eq!(result.halt_reason, HaltReason::SeedsReplayed);
    assert_eq!(result.stats.forks, 0);
    assert_eq!(result.tests.len(), 1);
    assert_eq!(result.tests[0].termination, StateTerminationType::Abort);
    assert_eq!(input_value(&result, 0, "word")?, 42);
    assert_eq!(result.bugs_of(StateTerminationType::Abort).count(), 1);

    Ok(())
}

#[test]
fn seeds_on_both_sides_split_at_the_fork() -> anyhow::Result<()> {
    let result = common::new_explorer(word_program()?, replaying(false))
        .with_seeds(vec![
            word_seed("crash", &[42, 0, 0, 0]),
            word_seed("pass", &[7, 0, 0, 0]),
        ])
        .explore("main")?;

    assert_eq!(result.halt_reason, HaltReason::NoMoreStates);
    assert_eq!(result.stats.forks, 1);
    let mut terminations: Vec<_> = result.tests.iter().map(|t| t.termination).collect();
    terminations.sort();
    assert_eq!(terminations, vec![
        StateTerminationType::Exit,
        StateTerminationType::Abort
    ]);

    Ok(())
}

#[test]
fn replays_a_test_case_of_an_earlier_run() -> anyhow::Result<()> {
    // main(x) { if (x == 42) abort(); }
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 1)?;
    let entry = builder.add_block(main)?;
    let fails = builder.add_block(main)?;
    let passes = builder.add_block(main)?;
    builder.push(entry, InstructionKind::Compare {
        dest: Register(0),
        op:   CompareOp::Eq,
        lhs:  Operand::Argument(0),
        rhs:  word(42),
    })?;
    builder.push(entry, InstructionKind::Branch {
        cond:      reg(0),
        then:      fails,
        otherwise: passes,
    })?;
    builder.push(fails, InstructionKind::Abort {
        message: "bad argument".to_string(),
    })?;
    builder.push(passes, InstructionKind::Return { value: None })?;
    let program = builder.build()?;

    let first = common::new_explorer(program.clone(), executor::Config::default()).explore("main")?;
    assert_eq!(first.tests.len(), 2);
    let crash = first
        .tests
        .iter()
        .find(|t| t.termination == StateTerminationType::Abort)
        .ok_or_else(|| anyhow::anyhow!("No aborting test case"))?;

    let replay = common::new_explorer(program, replaying(true))
        .with_seeds(vec![Seed::from(crash)])
        .explore("main")?;
    assert_eq!(replay.tests.len(), 1);
    assert_eq!(replay.tests[0].termination, StateTerminationType::Abort);
    assert_eq!(input_value(&replay, 0, "arg0")?, 42);

    Ok(())
}

#[test]
fn seed_of_the_wrong_size_ends_the_state() -> anyhow::Result<()> {
    let result = common::new_explorer(word_program()?, replaying(true))
        .with_seeds(vec![word_seed("short", &[42, 0])])
        .explore("main")?;

    let mismatches: Vec<_> = result.bugs_of(StateTerminationType::User).collect();
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].message, "replace size mismatch: word[2] vs word[4]");

    // Once short seeds may be extended, the seed is followed as before.
    let config = executor::Config::default().with_seeding(
        seed::Config::default()
            .with_only_replay_seeds(true)
            .with_only_seed(true)
            .with_allow_seed_extension(true),
    );
    let result = common::new_explorer(word_program()?, config)
        .with_seeds(vec![word_seed("short", &[42, 0])])
        .explore("main")?;
    assert_eq!(result.bugs_of(StateTerminationType::User).count(), 0);
    assert_eq!(result.bugs_of(StateTerminationType::Abort).count(), 1);

    Ok(())
}

#[test]
fn malformed_seeds_are_rejected() -> anyhow::Result<()> {
    let json = r#"[{ "id": "empty", "objects": [] }]"#;
    assert_eq!(
        seed::parse(json),
        Err(error::seed::Error::EmptySeed {
            id: "empty".to_string(),
        })
    );

    let empty = Seed {
        id:      "empty".to_string(),
        objects: vec![],
    };
    let Err(errors) = common::new_explorer(word_program()?, executor::Config::default())
        .with_seeds(vec![empty])
        .explore("main")
    else {
        anyhow::bail!("Exploration accepted a seed without objects");
    };
    assert!(matches!(
        errors.payloads()[0].payload,
        error::Error::Seed(error::seed::Error::EmptySeed { .. })
    ));

    Ok(())
}
