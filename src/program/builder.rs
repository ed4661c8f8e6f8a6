//! This module contains the [`ProgramBuilder`], through which front ends hand
//! programs to the engine.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::program::{Error, Result},
    program::{
        Block,
        BlockId,
        BlockKind,
        Callee,
        Function,
        FunctionId,
        Global,
        GlobalId,
        Instruction,
        InstructionId,
        InstructionKind,
        Operand,
        Program,
        SourceLocation,
    },
};

/// A block that is still under construction.
#[derive(Clone, Debug)]
struct BlockDraft {
    function:     FunctionId,
    instructions: Vec<(InstructionKind, Option<SourceLocation>)>,
}

/// A function that is still under construction.
#[derive(Clone, Debug)]
struct FunctionDraft {
    name:        String,
    params:      u32,
    source_file: Option<String>,
    blocks:      Vec<BlockId>,
}

/// Incrementally constructs a [`Program`], validating it on
/// [`ProgramBuilder::build`].
///
/// The first block added to a function is its entry block.
#[derive(Clone, Debug, Default)]
pub struct ProgramBuilder {
    functions: Vec<FunctionDraft>,
    blocks:    Vec<BlockDraft>,
    globals:   Vec<Global>,
    names:     FxHashMap<String, FunctionId>,
}

impl ProgramBuilder {
    /// Creates an empty program builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a function called `name` taking `params` arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a function called `name` already exists.
    pub fn declare_function(&mut self, name: &str, params: u32) -> Result<FunctionId> {
        if self.names.contains_key(name) {
            return Err(Error::DuplicateFunction {
                name: name.to_string(),
            });
        }
        let id = FunctionId(u32::try_from(self.functions.len()).unwrap_or(u32::MAX));
        self.functions.push(FunctionDraft {
            name: name.to_string(),
            params,
            source_file: None,
            blocks: Vec::new(),
        });
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Records the source file that `function` was compiled from.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `function` does not exist.
    pub fn set_source_file(&mut self, function: FunctionId, file: &str) -> Result<()> {
        let draft = self
            .functions
            .get_mut(function.0 as usize)
            .ok_or(Error::NoSuchFunction { id: function })?;
        draft.source_file = Some(file.to_string());
        Ok(())
    }

    /// Adds a new, empty block to `function`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `function` does not exist.
    pub fn add_block(&mut self, function: FunctionId) -> Result<BlockId> {
        let id = BlockId(u32::try_from(self.blocks.len()).unwrap_or(u32::MAX));
        let draft = self
            .functions
            .get_mut(function.0 as usize)
            .ok_or(Error::NoSuchFunction { id: function })?;
        draft.blocks.push(id);
        self.blocks.push(BlockDraft {
            function,
            instructions: Vec::new(),
        });
        Ok(id)
    }

    /// Appends an instruction without a source location to `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `block` does not exist.
    pub fn push(&mut self, block: BlockId, kind: InstructionKind) -> Result<()> {
        self.push_at(block, kind, None)
    }

    /// Appends an instruction at `location` to `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `block` does not exist.
    pub fn push_at(
        &mut self,
        block: BlockId,
        kind: InstructionKind,
        location: Option<SourceLocation>,
    ) -> Result<()> {
        let draft = self
            .blocks
            .get_mut(block.0 as usize)
            .ok_or(Error::NoSuchBlock { id: block })?;
        draft.instructions.push((kind, location));
        Ok(())
    }

    /// Adds a global variable of `size` bytes.
    ///
    /// Bytes not covered by `initializer` start out as zero.
    pub fn add_global(
        &mut self,
        name: &str,
        size: u64,
        initializer: Option<Vec<u8>>,
        read_only: bool,
    ) -> GlobalId {
        let id = GlobalId(u32::try_from(self.globals.len()).unwrap_or(u32::MAX));
        self.globals.push(Global {
            id,
            name: name.to_string(),
            size,
            initializer,
            read_only,
        });
        id
    }

    /// Validates the program and computes its derived structure.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the program is malformed.
    pub fn build(self) -> Result<Program> {
        self.validate()?;

        // Functions whose address is taken may be the target of any indirect
        // call.
        let mut address_taken: Vec<FunctionId> = self
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .flat_map(|(kind, _)| kind.operands().into_iter().cloned().collect::<Vec<_>>())
            .filter_map(|op| match op {
                Operand::Function(f) => Some(f),
                _ => None,
            })
            .collect();
        address_taken.sort();
        address_taken.dedup();

        let mut positions = Vec::new();
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for (index, draft) in self.blocks.into_iter().enumerate() {
            let id = BlockId(u32::try_from(index).unwrap_or(u32::MAX));
            let mut callees = Vec::new();
            let mut instructions = Vec::with_capacity(draft.instructions.len());
            for (position, (kind, location)) in draft.instructions.into_iter().enumerate() {
                if let InstructionKind::Call { callee, .. } = &kind {
                    match callee {
                        Callee::Direct(f) => callees.push(*f),
                        Callee::Indirect(Operand::Function(f)) => callees.push(*f),
                        Callee::Indirect(_) => callees.extend(address_taken.iter().copied()),
                    }
                }
                let instruction_id =
                    InstructionId(u32::try_from(positions.len()).unwrap_or(u32::MAX));
                positions.push((id, position));
                instructions.push(Instruction {
                    id: instruction_id,
                    block: id,
                    kind,
                    location,
                });
            }

            let terminator = &instructions[instructions.len() - 1].kind;
            let successors = terminator.targets();
            let kind = if !callees.is_empty()
                || instructions
                    .iter()
                    .any(|i| matches!(i.kind, InstructionKind::Call { .. }))
            {
                callees.sort();
                callees.dedup();
                BlockKind::Call { callees }
            } else if matches!(terminator, InstructionKind::Return { .. }) {
                BlockKind::Return
            } else {
                BlockKind::Base
            };

            blocks.push(Block {
                id,
                function: draft.function,
                instructions,
                successors,
                predecessors: Vec::new(),
                kind,
            });
        }

        let edges: Vec<(BlockId, BlockId)> = blocks
            .iter()
            .flat_map(|b| b.successors.iter().map(move |s| (b.id, *s)))
            .collect();
        for (from, to) in edges {
            blocks[to.0 as usize].predecessors.push(from);
        }

        let mut call_sites: FxHashMap<FunctionId, Vec<BlockId>> = FxHashMap::default();
        for block in &blocks {
            for callee in block.callees() {
                call_sites.entry(*callee).or_default().push(block.id);
            }
        }

        let functions = self
            .functions
            .into_iter()
            .enumerate()
            .map(|(index, draft)| {
                let id = FunctionId(u32::try_from(index).unwrap_or(u32::MAX));
                let return_blocks = draft
                    .blocks
                    .iter()
                    .copied()
                    .filter(|b| {
                        matches!(
                            blocks[b.0 as usize].terminator().kind,
                            InstructionKind::Return { .. }
                        )
                    })
                    .collect();
                let call_blocks = draft
                    .blocks
                    .iter()
                    .copied()
                    .filter(|b| blocks[b.0 as usize].is_call())
                    .collect();
                Function {
                    id,
                    name: draft.name,
                    params: draft.params,
                    source_file: draft.source_file,
                    blocks: draft.blocks,
                    return_blocks,
                    call_blocks,
                }
            })
            .collect();

        Ok(Program {
            functions,
            blocks,
            globals: self.globals,
            by_name: self.names,
            call_sites,
            positions,
        })
    }

    fn validate(&self) -> Result<()> {
        let function_count = self.functions.len();
        let global_count = self.globals.len();

        for function in &self.functions {
            if function.blocks.is_empty() {
                return Err(Error::EmptyFunction {
                    name: function.name.clone(),
                });
            }
        }

        for (index, block) in self.blocks.iter().enumerate() {
            let id = BlockId(u32::try_from(index).unwrap_or(u32::MAX));
            let Some(((last, _), rest)) = block.instructions.split_last() else {
                return Err(Error::MissingTerminator { id });
            };
            if !last.is_terminator() {
                return Err(Error::MissingTerminator { id });
            }
            if rest.iter().any(|(kind, _)| kind.is_terminator()) {
                return Err(Error::MisplacedTerminator { id });
            }

            for target in last.targets() {
                let target_block = self
                    .blocks
                    .get(target.0 as usize)
                    .ok_or(Error::NoSuchBlock { id: target })?;
                if target_block.function != block.function {
                    return Err(Error::CrossFunctionEdge { id, target });
                }
            }

            let mut referenced = FxHashSet::default();
            for (kind, _) in &block.instructions {
                if let InstructionKind::Call {
                    callee: Callee::Direct(f),
                    ..
                } = kind
                {
                    referenced.insert(*f);
                }
                for operand in kind.operands() {
                    match operand {
                        Operand::Function(f) => {
                            referenced.insert(*f);
                        }
                        Operand::Global(g) if g.0 as usize >= global_count => {
                            return Err(Error::NoSuchGlobal { index: g.0 });
                        }
                        _ => {}
                    }
                }
            }
            if let Some(missing) = referenced.iter().find(|f| f.0 as usize >= function_count) {
                return Err(Error::NoSuchFunction { id: *missing });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        error::program::Error,
        program::{BlockKind, InstructionKind, Operand, ProgramBuilder},
    };

    #[test]
    fn rejects_blocks_without_terminators() -> anyhow::Result<()> {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", 0)?;
        let entry = builder.add_block(main)?;
        builder.push(
            entry,
            InstructionKind::Assume {
                cond: Operand::constant(1, 1),
            },
        )?;

        assert_eq!(
            builder.build().err(),
            Some(Error::MissingTerminator { id: entry })
        );
        Ok(())
    }

    #[test]
    fn rejects_edges_between_functions() -> anyhow::Result<()> {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", 0)?;
        let other = builder.declare_function("other", 0)?;
        let entry = builder.add_block(main)?;
        let foreign = builder.add_block(other)?;
        builder.push(entry, InstructionKind::Jump { target: foreign })?;
        builder.push(foreign, InstructionKind::Unreachable)?;

        assert_eq!(
            builder.build().err(),
            Some(Error::CrossFunctionEdge {
                id:     entry,
                target: foreign,
            })
        );
        Ok(())
    }

    #[test]
    fn computes_predecessors_and_kinds() -> anyhow::Result<()> {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", 1)?;
        let a = builder.add_block(main)?;
        let b = builder.add_block(main)?;
        let c = builder.add_block(main)?;
        builder.push(
            a,
            InstructionKind::Branch {
                cond:      Operand::Argument(0),
                then:      b,
                otherwise: c,
            },
        )?;
        builder.push(b, InstructionKind::Jump { target: c })?;
        builder.push(c, InstructionKind::Return { value: None })?;

        let program = builder.build()?;
        assert_eq!(program.block(a)?.successors, vec![b, c]);
        assert_eq!(program.block(c)?.predecessors, vec![a, b]);
        assert_eq!(program.block(c)?.kind, BlockKind::Return);
        assert_eq!(program.function(main)?.return_blocks, vec![c]);
        assert_eq!(program.function(main)?.entry(), a);

        Ok(())
    }
}
