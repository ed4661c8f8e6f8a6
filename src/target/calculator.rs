//! This module contains the [`TargetCalculator`], which picks coverage targets
//! for states that have stopped making progress.

use std::{collections::BTreeSet, rc::Rc};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    codegraph::CodeGraphDistance,
    program::{BlockId, FunctionId, Program},
    state::ExecutionState,
    target::{TargetCache, TargetRef},
};

/// Tracks the blocks and branches covered by the run and computes the nearest
/// uncovered code for a state.
#[derive(Debug)]
pub struct TargetCalculator {
    graph:   Rc<CodeGraphDistance>,
    targets: Rc<TargetCache>,

    covered_blocks:    FxHashSet<BlockId>,
    covered_branches:  FxHashMap<BlockId, BTreeSet<usize>>,
    covered_functions: FxHashSet<FunctionId>,
}

impl TargetCalculator {
    #[must_use]
    pub fn new(graph: Rc<CodeGraphDistance>, targets: Rc<TargetCache>) -> Self {
        Self {
            graph,
            targets,
            covered_blocks: FxHashSet::default(),
            covered_branches: FxHashMap::default(),
            covered_functions: FxHashSet::default(),
        }
    }

    fn program(&self) -> &Program {
        self.graph.program()
    }

    /// Records the coverage of the step that `state` has just taken.
    ///
    /// Returns `true` if the step covered a block or branch for the first
    /// time.
    pub fn update(&mut self, state: &ExecutionState) -> bool {
        let program = self.graph.program().clone();
        let Ok(pc) = program.instruction(state.pc) else {
            return false;
        };
        let mut covered_new = self.covered_blocks.insert(pc.block);

        if let Ok(prev) = program.instruction(state.prev_pc) {
            if prev.kind.is_terminator() {
                if let Ok(block) = program.block(prev.block) {
                    if block.successors.len() > 1 {
                        if let Some(index) = block.successors.iter().position(|s| *s == pc.block) {
                            covered_new |= self
                                .covered_branches
                                .entry(block.id)
                                .or_default()
                                .insert(index);
                        }
                    }
                }
            }
        }

        if covered_new {
            if let Ok(block) = program.block(pc.block) {
                self.refresh_function(block.function);
            }
        }
        covered_new
    }

    fn refresh_function(&mut self, function: FunctionId) {
        let Ok(f) = self.program().function(function) else {
            return;
        };
        let covered = f.blocks.iter().all(|b| !self.is_block_uncovered(*b));
        if covered {
            self.covered_functions.insert(function);
        }
    }

    /// Checks whether `block` has been entered on some path.
    #[must_use]
    pub fn is_covered(&self, block: BlockId) -> bool {
        self.covered_blocks.contains(&block)
    }

    /// Checks whether every block and branch of `function` has been covered.
    #[must_use]
    pub fn is_function_covered(&self, function: FunctionId) -> bool {
        self.covered_functions.contains(&function)
    }

    fn is_block_uncovered(&self, block: BlockId) -> bool {
        if !self.covered_blocks.contains(&block) {
            return true;
        }
        let Ok(b) = self.program().block(block) else {
            return false;
        };
        b.successors.len() > 1
            && self
                .covered_branches
                .get(&block)
                .map_or(0, BTreeSet::len)
                < b.successors.len()
    }

    /// Checks whether `block` still has something to cover: the block itself,
    /// one of its branches, or, for a call block, code in a function it calls.
    #[must_use]
    pub fn uncovered_block_predicate(&self, block: BlockId) -> bool {
        if self.is_block_uncovered(block) {
            return true;
        }
        self.program().block(block).is_ok_and(|b| {
            b.callees()
                .iter()
                .any(|callee| !self.is_function_covered(*callee))
        })
    }

    /// Computes coverage targets for `state`.
    ///
    /// Frames are searched from the innermost outwards, and the targets are the
    /// nearest uncovered code in the first frame that has any.
    #[must_use]
    pub fn calculate(&self, state: &ExecutionState) -> BTreeSet<TargetRef> {
        let program = self.program();
        let mut targets = BTreeSet::new();
        let Ok(mut block) = state.pc_block(program) else {
            return targets;
        };

        for frame in state.stack.frames().iter().rev() {
            if !self.is_function_covered(frame.function) {
                let nearest = self
                    .graph
                    .nearest_successor_satisfying(block, |b| self.uncovered_block_predicate(b));
                for candidate in nearest {
                    targets.extend(self.targets_in(candidate));
                }
                if !targets.is_empty() {
                    return targets;
                }
            }
            match frame.caller.and_then(|c| program.instruction(c).ok()) {
                Some(caller) => block = caller.block,
                None => break,
            }
        }
        targets
    }

    fn targets_in(&self, block: BlockId) -> Vec<TargetRef> {
        if !self.is_covered(block) {
            return vec![self.targets.reach_block(block, false)];
        }
        let Ok(b) = self.program().block(block) else {
            return vec![];
        };
        if b.successors.len() > 1 {
            let covered = self.covered_branches.get(&block);
            let uncovered: Vec<TargetRef> = (0..b.successors.len())
                .filter(|i| covered.map_or(true, |c| !c.contains(i)))
                .map(|i| self.targets.cover_branch(block, i))
                .collect();
            if !uncovered.is_empty() {
                return uncovered;
            }
        }
        vec![self.targets.reach_block(block, true)]
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        codegraph::CodeGraphDistance,
        program::{InstructionKind, Operand, ProgramBuilder},
        state::{ExecutionState, StateId},
        target::{Target, TargetCache, TargetCalculator},
    };

    #[test]
    fn can_find_the_nearest_uncovered_branch() -> anyhow::Result<()> {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", 0)?;
        let entry = builder.add_block(main)?;
        let left = builder.add_block(main)?;
        let right = builder.add_block(main)?;
        builder.push(entry, InstructionKind::Branch {
            cond:      Operand::constant(1, 1),
            then:      left,
            otherwise: right,
        })?;
        builder.push(left, InstructionKind::Return { value: None })?;
        builder.push(right, InstructionKind::Return { value: None })?;
        let program = Rc::new(builder.build()?);

        let graph = Rc::new(CodeGraphDistance::new(program.clone()));
        let cache = Rc::new(TargetCache::new());
        let mut calculator = TargetCalculator::new(graph, cache);

        let branch = program.block(entry)?.first();
        let mut state = ExecutionState::new(StateId(0), main, branch, vec![]);
        assert!(calculator.update(&state));
        assert!(!calculator.update(&state));

        state.prev_pc = branch;
        state.pc = program.block(left)?.first();
        assert!(calculator.update(&state));

        state.pc = branch;
        state.prev_pc = branch;
        let targets = calculator.calculate(&state);
        assert_eq!(targets.len(), 1);
        let target = targets.first().map(|t| t.target().clone());
        assert_eq!(target, Some(Target::CoverBranch { block: entry, branch: 1 }));

        assert!(!calculator.is_function_covered(main));
        state.pc = program.block(right)?.first();
        assert!(calculator.update(&state));
        assert!(calculator.is_function_covered(main));
        assert!(calculator.calculate(&state).is_empty());

        Ok(())
    }
}
