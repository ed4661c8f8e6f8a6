//! This module contains property tests for the parts of the engine whose
//! results must hold for every program and input, rather than for a handful
//! of hand-written ones.
#![cfg(test)]

use std::{rc::Rc, time::Duration};

use common::{constant, input_value, reg};
use path_explorer::{
    codegraph::CodeGraphDistance,
    constraint::ConstraintSet,
    executor,
    executor::StateTerminationType,
    expr::{ArraySource, CompareOp, Context, ExprBuilder, UpdateList},
    memory::{AddressSpace, AllocSite, MemoryManager, ObjectFlags, ObjectState},
    program::{BlockId, InstructionId, InstructionKind, Operand, ProgramBuilder, Register},
    solver::{EnumerationSolver, TimingSolver},
};
use proptest::prelude::*;

mod common;

const BLOCKS: u32 = 8;

/// The way a generated block ends.
#[derive(Clone, Debug)]
enum Exit {
    Return,
    Jump(u32),
    Branch(u32, u32),
}

fn exit_strategy() -> impl Strategy<Value = Exit> {
    prop_oneof![
        Just(Exit::Return),
        (0..BLOCKS).prop_map(Exit::Jump),
        (0..BLOCKS, 0..BLOCKS).prop_map(|(a, b)| Exit::Branch(a, b)),
    ]
}

fn exit_instruction(exit: &Exit) -> InstructionKind {
    match exit {
        Exit::Return => InstructionKind::Return { value: None },
        Exit::Jump(target) => InstructionKind::Jump {
            target: BlockId(*target),
        },
        Exit::Branch(then, otherwise) => InstructionKind::Branch {
            cond:      constant(1, 1),
            then:      BlockId(*then),
            otherwise: BlockId(*otherwise),
        },
    }
}

fn successors(exit: &Exit) -> Vec<u32> {
    match exit {
        Exit::Return => vec![],
        Exit::Jump(target) => vec![*target],
        Exit::Branch(then, otherwise) => vec![*then, *otherwise],
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn backward_distances_are_consistent_with_edges(
        exits in prop::collection::vec(exit_strategy(), BLOCKS as usize)
    ) {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", 0).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let mut blocks = Vec::new();
        for _ in 0..BLOCKS {
            blocks.push(builder.add_block(main).map_err(|e| TestCaseError::fail(e.to_string()))?);
        }
        for (block, exit) in blocks.iter().zip(&exits) {
            builder
                .push(*block, exit_instruction(exit))
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        let program = builder.build().map_err(|e| TestCaseError::fail(e.to_string()))?;
        let graph = CodeGraphDistance::new(Rc::new(program));

        for target in &blocks {
            let distances = graph.backward_distance(*target);
            prop_assert_eq!(distances.get(target), Some(&0));

            for (from, exit) in blocks.iter().zip(&exits) {
                for to in successors(exit) {
                    if let Some(after) = distances.get(&BlockId(to)) {
                        let before = distances.get(from);
                        prop_assert!(before.is_some());
                        prop_assert!(*before.unwrap_or(&u32::MAX) <= after + 1);
                    }
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn forked_paths_partition_the_input(bound in 1u64..=255) {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", 0).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let entry = builder.add_block(main).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let below = builder.add_block(main).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let above = builder.add_block(main).map_err(|e| TestCaseError::fail(e.to_string()))?;

        for kind in [
            InstructionKind::Alloca {
                dest:      Register(0),
                size:      Operand::constant(1, 64),
                alignment: 1,
            },
            InstructionKind::MakeSymbolic {
                pointer: reg(0),
                name:    "x".to_string(),
            },
            InstructionKind::Load {
                dest:    Register(1),
                pointer: reg(0),
                width:   8,
            },
            InstructionKind::Compare {
                dest: Register(2),
                op:   CompareOp::Ult,
                lhs:  reg(1),
                rhs:  constant(bound, 8),
            },
            InstructionKind::Branch {
                cond:      reg(2),
                then:      below,
                otherwise: above,
            },
        ] {
            builder.push(entry, kind).map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        builder
            .push(below, InstructionKind::Abort { message: "below".to_string() })
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        builder
            .push(above, InstructionKind::Return { value: None })
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let program = builder.build().map_err(|e| TestCaseError::fail(e.to_string()))?;

        let result = common::new_explorer(program, executor::Config::default())
            .explore("main")
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(result.tests.len(), 2);
        for (index, test) in result.tests.iter().enumerate() {
            let x = input_value(&result, index, "x").map_err(|e| TestCaseError::fail(e.to_string()))?;
            match test.termination {
                StateTerminationType::Abort => prop_assert!(x < bound),
                StateTerminationType::Exit => prop_assert!(x >= bound),
                other => prop_assert!(false, "unexpected termination {other:?}"),
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn resolution_finds_exactly_the_objects_in_range(bound in 1u64..=64) {
        let builder = Rc::new(ExprBuilder::new(Context::default()));
        let solver = TimingSolver::new(
            Box::new(EnumerationSolver::new()),
            builder.clone(),
            Duration::from_secs(5),
        );
        let manager = MemoryManager::new(builder.clone());
        let mut space = AddressSpace::new();

        let site = AllocSite::Instruction(InstructionId(0));
        let objects = [
            manager.allocate_concrete(8, 8, ObjectFlags::heap(), site.clone(), "a"),
            manager.allocate_concrete(8, 8, ObjectFlags::heap(), site, "b"),
        ];
        for object in &objects {
            let root = builder.create_array(object.name(), 8, ArraySource::Zeroed);
            space.bind_object(object.clone(), ObjectState::new(object.id(), root));
        }

        // p = &a + i, where i < bound.
        let input = builder.create_array("i", 1, ArraySource::MakeSymbolic);
        let index = builder.zext(&builder.read(&UpdateList::new(input), &builder.pointer(0)), 64);
        let base = objects[0]
            .concrete_address()
            .ok_or_else(|| TestCaseError::fail("object has no concrete address"))?;
        let pointer = builder.add(&builder.pointer(base), &index);
        let mut constraints = ConstraintSet::new();
        constraints.add(builder.ult(&index, &builder.pointer(bound)));

        let expected: Vec<_> = objects
            .iter()
            .filter(|o| (0..bound).any(|i| o.contains_address(base + i)))
            .map(|o| o.id())
            .collect();

        let first = space.resolve(&builder, &solver, &constraints, &pointer, 0);
        let second = space.resolve(&builder, &solver, &constraints, &pointer, 0);
        prop_assert!(!first.incomplete);
        prop_assert_eq!(first.ids(), expected);
        prop_assert_eq!(first.ids(), second.ids());
    }
}
