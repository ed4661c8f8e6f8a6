//! This module contains the control-flow-graph representation of the programs
//! that the engine explores.
//!
//! Programs are produced by a front end through the [`ProgramBuilder`], which
//! validates their structure. Once built, a [`Program`] is immutable, and every
//! block and instruction has a stable global index.

pub mod builder;

use std::fmt::{Display, Formatter};

pub use builder::ProgramBuilder;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    constant::{FUNCTION_ADDRESS_BASE, FUNCTION_ADDRESS_STRIDE},
    error::program::{Error, Result},
    expr::{BinaryOp, CompareOp, Width},
};

/// The identity of a function.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

/// The stable global index of a basic block.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// The stable global index of an instruction.
///
/// The instructions of a block have consecutive indices.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct InstructionId(pub u32);

/// A function-local virtual register.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Register(pub u32);

/// The identity of a global variable.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl Display for FunctionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// A position in the program's source code.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file:   String,
    pub line:   u32,
    pub column: u32,
}

impl SourceLocation {
    /// Constructs a new source location.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A value consumed by an instruction.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// The current value of a register.
    Register(Register),

    /// A constant of the given width.
    Constant { value: u64, width: Width },

    /// An argument of the current function.
    Argument(u32),

    /// The address of a global variable.
    Global(GlobalId),

    /// The address of a function.
    Function(FunctionId),

    /// The null pointer.
    Null,
}

impl Operand {
    /// Constructs a constant operand.
    #[must_use]
    pub fn constant(value: u64, width: Width) -> Self {
        Self::Constant { value, width }
    }
}

impl From<Register> for Operand {
    fn from(value: Register) -> Self {
        Self::Register(value)
    }
}

/// The conversions between integer widths.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum CastKind {
    ZExt,
    SExt,
    Trunc,
}

/// The function invoked by a call.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Callee {
    /// A statically known function.
    Direct(FunctionId),

    /// The function whose address is the value of the operand.
    Indirect(Operand),
}

/// The operations that instructions perform.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum InstructionKind {
    Binary {
        dest: Register,
        op:   BinaryOp,
        lhs:  Operand,
        rhs:  Operand,
    },
    Compare {
        dest: Register,
        op:   CompareOp,
        lhs:  Operand,
        rhs:  Operand,
    },
    Cast {
        dest:  Register,
        kind:  CastKind,
        value: Operand,
        width: Width,
    },
    Select {
        dest:      Register,
        cond:      Operand,
        then:      Operand,
        otherwise: Operand,
    },

    /// Allocates `size` bytes in the current stack frame.
    Alloca {
        dest:      Register,
        size:      Operand,
        alignment: u64,
    },

    /// Allocates `size` bytes on the heap. The result may be null.
    Malloc { dest: Register, size: Operand },

    /// Releases a heap allocation.
    Free { pointer: Operand },

    /// Loads `width` bits from `pointer`.
    Load {
        dest:    Register,
        pointer: Operand,
        width:   Width,
    },

    /// Stores `value` at `pointer`.
    Store { pointer: Operand, value: Operand },

    /// Computes `pointer + offset * scale`.
    PtrAdd {
        dest:    Register,
        pointer: Operand,
        offset:  Operand,
        scale:   u64,
    },

    /// Replaces the contents of the object that `pointer` points into with
    /// fresh symbolic input named after `name`.
    MakeSymbolic { pointer: Operand, name: String },

    /// Constrains the path to those on which `cond` holds.
    Assume { cond: Operand },

    /// Reports an error if `cond` can fail to hold.
    Assert { cond: Operand, message: String },

    Call {
        dest:   Option<Register>,
        callee: Callee,
        args:   Vec<Operand>,
    },
    Return { value: Option<Operand> },
    Branch {
        cond:      Operand,
        then:      BlockId,
        otherwise: BlockId,
    },
    Jump { target: BlockId },
    Switch {
        value:   Operand,
        cases:   Vec<(u64, BlockId)>,
        default: BlockId,
    },
    Unreachable,
    Abort { message: String },
}

impl InstructionKind {
    /// Checks whether the instruction ends a block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Return { .. }
                | Self::Branch { .. }
                | Self::Jump { .. }
                | Self::Switch { .. }
                | Self::Unreachable
                | Self::Abort { .. }
        )
    }

    /// Gets the blocks that the instruction can transfer control to, in
    /// terminator order and without duplicates.
    #[must_use]
    pub fn targets(&self) -> Vec<BlockId> {
        let mut targets = match self {
            Self::Branch {
                then, otherwise, ..
            } => vec![*then, *otherwise],
            Self::Jump { target } => vec![*target],
            Self::Switch { cases, default, .. } => cases
                .iter()
                .map(|(_, b)| *b)
                .chain(std::iter::once(*default))
                .collect(),
            _ => vec![],
        };
        let mut seen = Vec::with_capacity(targets.len());
        targets.retain(|b| {
            if seen.contains(b) {
                false
            } else {
                seen.push(*b);
                true
            }
        });
        targets
    }

    /// Gets the operands that the instruction reads.
    #[must_use]
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Self::Binary { lhs, rhs, .. } | Self::Compare { lhs, rhs, .. } => vec![lhs, rhs],
            Self::Cast { value, .. } => vec![value],
            Self::Select {
                cond,
                then,
                otherwise,
                ..
            } => vec![cond, then, otherwise],
            Self::Alloca { size, .. } | Self::Malloc { size, .. } => vec![size],
            Self::Free { pointer } | Self::Load { pointer, .. } => vec![pointer],
            Self::Store { pointer, value } => vec![pointer, value],
            Self::PtrAdd {
                pointer, offset, ..
            } => vec![pointer, offset],
            Self::MakeSymbolic { pointer, .. } => vec![pointer],
            Self::Assume { cond } | Self::Assert { cond, .. } | Self::Branch { cond, .. } => {
                vec![cond]
            }
            Self::Call { callee, args, .. } => {
                let mut ops: Vec<&Operand> = args.iter().collect();
                if let Callee::Indirect(op) = callee {
                    ops.push(op);
                }
                ops
            }
            Self::Return { value } => value.iter().collect(),
            Self::Switch { value, .. } => vec![value],
            Self::Jump { .. } | Self::Unreachable | Self::Abort { .. } => vec![],
        }
    }
}

/// A single instruction along with its position in the program.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id:       InstructionId,
    pub block:    BlockId,
    pub kind:     InstructionKind,
    pub location: Option<SourceLocation>,
}

/// How a block participates in the call graph.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BlockKind {
    /// A block that neither calls nor returns.
    Base,

    /// A block that contains calls, with every function they may invoke.
    Call { callees: Vec<FunctionId> },

    /// A block that returns from its function.
    Return,
}

/// A basic block.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id:           BlockId,
    pub function:     FunctionId,
    pub instructions: Vec<Instruction>,
    pub successors:   Vec<BlockId>,
    pub predecessors: Vec<BlockId>,
    pub kind:         BlockKind,
}

impl Block {
    /// Gets the first instruction of the block.
    #[must_use]
    pub fn first(&self) -> InstructionId {
        self.instructions[0].id
    }

    /// Gets the terminator of the block.
    #[must_use]
    pub fn terminator(&self) -> &Instruction {
        &self.instructions[self.instructions.len() - 1]
    }

    /// Checks whether the block contains a call.
    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self.kind, BlockKind::Call { .. })
    }

    /// Checks whether the block returns from its function.
    #[must_use]
    pub fn is_return(&self) -> bool {
        matches!(self.kind, BlockKind::Return)
    }

    /// Gets the functions called from this block.
    #[must_use]
    pub fn callees(&self) -> &[FunctionId] {
        match &self.kind {
            BlockKind::Call { callees } => callees,
            _ => &[],
        }
    }
}

/// A function.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id:            FunctionId,
    pub name:          String,
    pub params:        u32,
    pub source_file:   Option<String>,
    pub blocks:        Vec<BlockId>,
    pub return_blocks: Vec<BlockId>,
    pub call_blocks:   Vec<BlockId>,
}

impl Function {
    /// Gets the block at which execution of the function starts.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.blocks[0]
    }
}

/// A global variable.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub id:          GlobalId,
    pub name:        String,
    pub size:        u64,
    pub initializer: Option<Vec<u8>>,
    pub read_only:   bool,
}

/// A finalized, validated program.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Program {
    functions:  Vec<Function>,
    blocks:     Vec<Block>,
    globals:    Vec<Global>,
    by_name:    FxHashMap<String, FunctionId>,
    call_sites: FxHashMap<FunctionId, Vec<BlockId>>,
    positions:  Vec<(BlockId, usize)>,
}

impl Program {
    /// Gets every function in the program.
    #[must_use]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Gets every block in the program, indexed by [`BlockId`].
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Gets every global variable in the program.
    #[must_use]
    pub fn globals(&self) -> &[Global] {
        &self.globals
    }

    /// Gets the function with the provided `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if there is no such function.
    pub fn function(&self, id: FunctionId) -> Result<&Function> {
        self.functions
            .get(id.0 as usize)
            .ok_or(Error::NoSuchFunction { id })
    }

    /// Gets the function with the provided `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if there is no such function.
    pub fn function_by_name(&self, name: &str) -> Result<&Function> {
        let id = self
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownFunction {
                name: name.to_string(),
            })?;
        self.function(id)
    }

    /// Gets the block with the provided `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if there is no such block.
    pub fn block(&self, id: BlockId) -> Result<&Block> {
        self.blocks
            .get(id.0 as usize)
            .ok_or(Error::NoSuchBlock { id })
    }

    /// Gets the global with the provided `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if there is no such global.
    pub fn global(&self, id: GlobalId) -> Result<&Global> {
        self.globals
            .get(id.0 as usize)
            .ok_or(Error::NoSuchGlobal { index: id.0 })
    }

    /// Gets the instruction with the provided `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if there is no such instruction.
    pub fn instruction(&self, id: InstructionId) -> Result<&Instruction> {
        let (block, index) = self
            .positions
            .get(id.0 as usize)
            .copied()
            .ok_or(Error::NoSuchInstruction { id })?;
        Ok(&self.block(block)?.instructions[index])
    }

    /// Gets the instruction that follows `id` in its block, if `id` is not a
    /// terminator.
    #[must_use]
    pub fn next_instruction(&self, id: InstructionId) -> Option<InstructionId> {
        let instruction = self.instruction(id).ok()?;
        if instruction.kind.is_terminator() {
            None
        } else {
            Some(InstructionId(id.0 + 1))
        }
    }

    /// Gets the number of instructions in the program.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.positions.len()
    }

    /// Iterates over every instruction in the program.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    /// Gets the call blocks that may invoke `function`.
    #[must_use]
    pub fn call_sites(&self, function: FunctionId) -> &[BlockId] {
        self.call_sites.get(&function).map_or(&[], Vec::as_slice)
    }

    /// Gets the functions called by `function`.
    #[must_use]
    pub fn callees(&self, function: FunctionId) -> Vec<FunctionId> {
        let Ok(f) = self.function(function) else {
            return vec![];
        };
        let mut callees: Vec<FunctionId> = f
            .call_blocks
            .iter()
            .filter_map(|b| self.block(*b).ok())
            .flat_map(|b| b.callees().iter().copied())
            .collect();
        callees.sort();
        callees.dedup();
        callees
    }

    /// Gets the functions that call `function`.
    #[must_use]
    pub fn callers(&self, function: FunctionId) -> Vec<FunctionId> {
        let mut callers: Vec<FunctionId> = self
            .call_sites(function)
            .iter()
            .filter_map(|b| self.block(*b).ok())
            .map(|b| b.function)
            .collect();
        callers.sort();
        callers.dedup();
        callers
    }

    /// Gets the address at which `function` is placed.
    #[must_use]
    pub fn function_address(&self, function: FunctionId) -> u64 {
        FUNCTION_ADDRESS_BASE + u64::from(function.0) * FUNCTION_ADDRESS_STRIDE
    }

    /// Gets the function placed at `address`, if any.
    #[must_use]
    pub fn function_at(&self, address: u64) -> Option<FunctionId> {
        let offset = address.checked_sub(FUNCTION_ADDRESS_BASE)?;
        if offset % FUNCTION_ADDRESS_STRIDE != 0 {
            return None;
        }
        let index = u32::try_from(offset / FUNCTION_ADDRESS_STRIDE).ok()?;
        (index as usize)
            .lt(&self.functions.len())
            .then_some(FunctionId(index))
    }
}

#[cfg(test)]
mod test {
    use crate::{
        expr::BinaryOp,
        program::{InstructionKind, Operand, ProgramBuilder, Register},
    };

    #[test]
    fn can_look_up_functions_and_instructions() -> anyhow::Result<()> {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", 0)?;
        let helper = builder.declare_function("helper", 1)?;

        let entry = builder.add_block(main)?;
        builder.push(
            entry,
            InstructionKind::Call {
                dest:   Some(Register(0)),
                callee: crate::program::Callee::Direct(helper),
                args:   vec![Operand::constant(1, 32)],
            },
        )?;
        builder.push(entry, InstructionKind::Return { value: None })?;

        let body = builder.add_block(helper)?;
        builder.push(
            body,
            InstructionKind::Binary {
                dest: Register(0),
                op:   BinaryOp::Add,
                lhs:  Operand::Argument(0),
                rhs:  Operand::constant(1, 32),
            },
        )?;
        builder.push(
            body,
            InstructionKind::Return {
                value: Some(Operand::Register(Register(0))),
            },
        )?;

        let program = builder.build()?;
        assert_eq!(program.function_by_name("helper")?.id, helper);
        assert_eq!(program.callees(main), vec![helper]);
        assert_eq!(program.callers(helper), vec![main]);

        let first = program.block(body)?.first();
        let next = program
            .next_instruction(first)
            .ok_or_else(|| anyhow::anyhow!("expected a next instruction"))?;
        assert!(program.instruction(next)?.kind.is_terminator());
        assert_eq!(program.next_instruction(next), None);

        let address = program.function_address(helper);
        assert_eq!(program.function_at(address), Some(helper));
        assert_eq!(program.function_at(address + 1), None);

        Ok(())
    }
}
