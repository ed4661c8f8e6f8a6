//! This module contains the call stack of an execution state.

use crate::{
    error::execution::{Error, Result},
    expr::ExprRef,
    memory::MemoryObjectId,
    program::{BlockId, FunctionId, InstructionId, Register},
};

/// A single activation of a function.
///
/// Frames are cloned whenever their state is, so all of their contents are
/// persistent.
#[derive(Clone, Debug)]
pub struct StackFrame {
    /// The function being executed.
    pub function: FunctionId,

    /// The call instruction that created the frame, absent for the entry
    /// function.
    pub caller: Option<InstructionId>,

    /// The current values of the function's registers.
    pub registers: imbl::OrdMap<Register, ExprRef>,

    /// The arguments that the function was called with.
    pub arguments: Vec<ExprRef>,

    /// The stack objects allocated by this activation, released on return.
    pub allocas: Vec<MemoryObjectId>,

    /// The number of times each block was left while this frame was active.
    pub multilevel: imbl::OrdMap<BlockId, u64>,
}

impl StackFrame {
    #[must_use]
    pub fn new(function: FunctionId, caller: Option<InstructionId>, arguments: Vec<ExprRef>) -> Self {
        Self {
            function,
            caller,
            registers: imbl::OrdMap::new(),
            arguments,
            allocas: Vec::new(),
            multilevel: imbl::OrdMap::new(),
        }
    }

    /// Reads the value of `register`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the register has not been written.
    pub fn read(&self, register: Register) -> Result<ExprRef> {
        self.registers
            .get(&register)
            .cloned()
            .ok_or(Error::UndefinedRegister { register })
    }

    pub fn write(&mut self, register: Register, value: ExprRef) {
        self.registers.insert(register, value);
    }

    /// Gets the argument at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the function was given fewer arguments.
    pub fn argument(&self, index: u32) -> Result<ExprRef> {
        self.arguments
            .get(index as usize)
            .cloned()
            .ok_or(Error::NoSuchArgument {
                index,
                available: self.arguments.len(),
            })
    }

    /// Gets the number of times `block` was left in this frame.
    #[must_use]
    pub fn visits(&self, block: BlockId) -> u64 {
        self.multilevel.get(&block).copied().unwrap_or(0)
    }
}

/// The call stack of an execution state.
#[derive(Clone, Debug, Default)]
pub struct Stack {
    frames: Vec<StackFrame>,

    /// The number of active frames of each function.
    calls: imbl::OrdMap<FunctionId, u64>,
}

impl Stack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&mut self, frame: StackFrame) {
        *self.calls.entry(frame.function).or_insert(0) += 1;
        self.frames.push(frame);
    }

    /// Removes the innermost frame.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is empty.
    pub fn pop_frame(&mut self) -> Result<StackFrame> {
        let frame = self.frames.pop().ok_or(Error::NoCurrentFrame)?;
        if let Some(count) = self.calls.get_mut(&frame.function) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.calls.remove(&frame.function);
            }
        }
        Ok(frame)
    }

    /// Gets the innermost frame.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is empty.
    pub fn top(&self) -> Result<&StackFrame> {
        self.frames.last().ok_or(Error::NoCurrentFrame)
    }

    /// Gets the innermost frame mutably.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is empty.
    pub fn top_mut(&mut self) -> Result<&mut StackFrame> {
        self.frames.last_mut().ok_or(Error::NoCurrentFrame)
    }

    /// Gets the frames from the outermost to the innermost.
    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Gets the number of active frames of `function`.
    #[must_use]
    pub fn calls(&self, function: FunctionId) -> u64 {
        self.calls.get(&function).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        error::execution::Error,
        program::{FunctionId, Register},
        state::{Stack, StackFrame},
    };

    #[test]
    fn tracks_active_calls_per_function() -> anyhow::Result<()> {
        let mut stack = Stack::new();
        stack.push_frame(StackFrame::new(FunctionId(0), None, vec![]));
        stack.push_frame(StackFrame::new(FunctionId(1), None, vec![]));
        stack.push_frame(StackFrame::new(FunctionId(1), None, vec![]));
        assert_eq!(stack.calls(FunctionId(1)), 2);

        stack.pop_frame()?;
        assert_eq!(stack.calls(FunctionId(1)), 1);
        assert_eq!(stack.top()?.function, FunctionId(1));

        stack.pop_frame()?;
        stack.pop_frame()?;
        assert_eq!(stack.calls(FunctionId(0)), 0);
        assert!(matches!(stack.pop_frame(), Err(Error::NoCurrentFrame)));

        Ok(())
    }

    #[test]
    fn unwritten_registers_are_errors() {
        let frame = StackFrame::new(FunctionId(0), None, vec![]);
        assert_eq!(
            frame.read(Register(3)),
            Err(Error::UndefinedRegister {
                register: Register(3),
            })
        );
    }
}
