//! This module contains the semantics of each instruction.

use tracing::trace;

use crate::{
    constant::BOOL_WIDTH_BITS,
    error::{
        container::Locatable,
        execution::{Error, Result},
        program::Error as ProgramError,
    },
    executor::{memory::Access, Executor, HaltReason, StateTerminationType},
    expr::{mask, ArraySource, CompareOp, ExprRef},
    program::{BlockId, Callee, CastKind, FunctionId, Instruction, InstructionKind, Operand},
    state::{BranchEvent, ExecutionState, StackFrame, SymbolicObject},
    target::{GuidanceKind, ReachWithError},
};

impl Executor {
    /// Executes the instruction at the `pc` of `state`.
    pub(super) fn execute_step(&mut self, state: &mut ExecutionState) {
        let program = self.program.clone();
        let id = state.pc;
        let instruction = match program.instruction(id) {
            Ok(instruction) => instruction,
            Err(error) => {
                self.terminate_on_execution_error(state, Error::from(error).locate(id));
                return;
            }
        };

        state.prev_pc = id;
        if !instruction.kind.is_terminator() {
            let Some(next) = program.next_instruction(id) else {
                self.terminate_on_execution_error(state, Error::InvalidStep.locate(id));
                return;
            };
            state.pc = next;
        }
        state.stepped_instructions += 1;
        self.stats.instructions += 1;
        trace!(state = %state.id, instruction = id.0, kind = ?instruction.kind, "Executing instruction");

        if let Err(error) = self.execute_instruction(state, instruction) {
            self.terminate_on_execution_error(state, error.locate(id));
        }
    }

    /// Evaluates `operand` in the current frame of `state`.
    fn operand(&self, state: &ExecutionState, operand: &Operand) -> Result<ExprRef> {
        match operand {
            Operand::Register(register) => state.frame()?.read(*register),
            Operand::Constant { value, width } => Ok(self.builder.constant(*value, *width)),
            Operand::Argument(index) => state.frame()?.argument(*index),
            Operand::Global(global) => self
                .globals
                .get(global)
                .map(|object| object.address().clone())
                .ok_or_else(|| ProgramError::NoSuchGlobal { index: global.0 }.into()),
            Operand::Function(function) => {
                Ok(self.builder.pointer(self.program.function_address(*function)))
            }
            Operand::Null => Ok(self.builder.pointer(0)),
        }
    }

    fn boolean(&self, state: &ExecutionState, operand: &Operand) -> Result<ExprRef> {
        let value = self.operand(state, operand)?;
        if value.width() == BOOL_WIDTH_BITS {
            Ok(value)
        } else {
            Err(Error::NotBoolean {
                width: value.width(),
            })
        }
    }

    fn operand_pair(&self, state: &ExecutionState, lhs: &Operand, rhs: &Operand) -> Result<(ExprRef, ExprRef)> {
        let lhs = self.operand(state, lhs)?;
        let rhs = self.operand(state, rhs)?;
        if lhs.width() != rhs.width() {
            return Err(Error::WidthMismatch {
                lhs: lhs.width(),
                rhs: rhs.width(),
            });
        }
        Ok((lhs, rhs))
    }

    #[allow(clippy::too_many_lines)]
    fn execute_instruction(&mut self, state: &mut ExecutionState, instruction: &Instruction) -> Result<()> {
        match &instruction.kind {
            InstructionKind::Binary { dest, op, lhs, rhs } => {
                let (lhs, rhs) = self.operand_pair(state, lhs, rhs)?;
                if op.is_division() {
                    let non_zero = self.builder.not(&self.builder.is_zero(&rhs));
                    let split = self.fork(state, &non_zero, true)?;
                    self.continue_on(state, split.false_state, |this, s| {
                        this.terminate_on_error(
                            s,
                            StateTerminationType::ReportError,
                            ReachWithError::None,
                            "divide by zero",
                        );
                        Ok(())
                    });
                    if split.true_state.is_none() {
                        return Ok(());
                    }
                }
                let value = self.builder.binary(*op, &lhs, &rhs);
                state.frame_mut()?.write(*dest, value);
            }
            InstructionKind::Compare { dest, op, lhs, rhs } => {
                let (lhs, rhs) = self.operand_pair(state, lhs, rhs)?;
                if self.check_null_after_deref(state, *op, &lhs, &rhs) {
                    return Ok(());
                }
                let value = self.builder.compare(*op, &lhs, &rhs);
                state.frame_mut()?.write(*dest, value);
            }
            InstructionKind::Cast {
                dest,
                kind,
                value,
                width,
            } => {
                let value = self.operand(state, value)?;
                let from = value.width();
                let result = match kind {
                    CastKind::ZExt if *width >= from => self.builder.zext(&value, *width),
                    CastKind::SExt if *width >= from => self.builder.sext(&value, *width),
                    CastKind::Trunc if *width <= from => self.builder.trunc(&value, *width),
                    _ => return Err(Error::InvalidCast { from, to: *width }),
                };
                state.frame_mut()?.write(*dest, result);
            }
            InstructionKind::Select {
                dest,
                cond,
                then,
                otherwise,
            } => {
                let cond = self.boolean(state, cond)?;
                let (then, otherwise) = self.operand_pair(state, then, otherwise)?;
                let value = self.builder.select(&cond, &then, &otherwise);
                state.frame_mut()?.write(*dest, value);
            }
            InstructionKind::Alloca {
                dest,
                size,
                alignment,
            } => {
                let size = self.operand(state, size)?;
                self.execute_alloc(state, instruction.id, *dest, &size, true, *alignment)?;
            }
            InstructionKind::Malloc { dest, size } => {
                let size = self.operand(state, size)?;
                self.execute_alloc(state, instruction.id, *dest, &size, false, 0)?;
            }
            InstructionKind::Free { pointer } => {
                let pointer = self.operand(state, pointer)?;
                self.execute_free(state, &pointer)?;
            }
            InstructionKind::Load {
                dest,
                pointer,
                width,
            } => {
                let pointer = self.operand(state, pointer)?;
                let access = Access::Read {
                    dest:  *dest,
                    width: *width,
                };
                self.execute_memory_operation(state, instruction.id, &pointer, &access)?;
            }
            InstructionKind::Store { pointer, value } => {
                let pointer = self.operand(state, pointer)?;
                let value = self.operand(state, value)?;
                let access = Access::Write { value };
                self.execute_memory_operation(state, instruction.id, &pointer, &access)?;
            }
            InstructionKind::PtrAdd {
                dest,
                pointer,
                offset,
                scale,
            } => {
                let pointer = self.operand(state, pointer)?;
                let offset = self.operand(state, offset)?;
                let width = pointer.width();
                let offset = match offset.width() {
                    w if w < width => self.builder.sext(&offset, width),
                    w if w > width => self.builder.trunc(&offset, width),
                    _ => offset,
                };
                let scaled = self.builder.mul(&offset, &self.builder.constant(*scale, width));
                let value = self.builder.add(&pointer, &scaled);
                state.frame_mut()?.write(*dest, value);
            }
            InstructionKind::MakeSymbolic { pointer, name } => {
                let pointer = self.operand(state, pointer)?;
                self.make_symbolic(state, &pointer, name)?;
            }
            InstructionKind::Assume { cond } => {
                let cond = self.boolean(state, cond)?;
                if self.solver.must_be_false(&state.constraints, &cond)? {
                    self.terminate_on_error(
                        state,
                        StateTerminationType::User,
                        ReachWithError::None,
                        "invalid assume call (provably false)",
                    );
                } else {
                    state.add_constraint(cond);
                }
            }
            InstructionKind::Assert { cond, message } => {
                let cond = self.boolean(state, cond)?;
                let split = self.fork(state, &cond, true)?;
                self.continue_on(state, split.false_state, |this, s| {
                    this.terminate_on_error(
                        s,
                        StateTerminationType::Assert,
                        ReachWithError::None,
                        format!("assertion failed: {message}"),
                    );
                    Ok(())
                });
            }
            InstructionKind::Call { callee, args, .. } => {
                let args = args
                    .iter()
                    .map(|a| self.operand(state, a))
                    .collect::<Result<Vec<_>>>()?;
                self.execute_call(state, instruction, callee, args)?;
            }
            InstructionKind::Return { value } => {
                let value = value.as_ref().map(|v| self.operand(state, v)).transpose()?;
                self.execute_return(state, value)?;
            }
            InstructionKind::Branch {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.boolean(state, cond)?;
                if let Some(value) = cond.as_constant() {
                    let target = if value == 0 { *otherwise } else { *then };
                    return self.transfer(state, instruction, target);
                }
                let split = self.fork_branch(state, &cond, *then, *otherwise)?;
                for (id, target) in [(split.true_state, *then), (split.false_state, *otherwise)] {
                    self.continue_on(state, id, |this, s| this.take_branch(s, instruction, target));
                }
            }
            InstructionKind::Jump { target } => self.transfer(state, instruction, *target)?,
            InstructionKind::Switch {
                value,
                cases,
                default,
            } => {
                let value = self.operand(state, value)?;
                self.execute_switch(state, instruction, &value, cases, *default)?;
            }
            InstructionKind::Unreachable => self.terminate_on_error(
                state,
                StateTerminationType::Execution,
                ReachWithError::None,
                "reached \"unreachable\" instruction",
            ),
            InstructionKind::Abort { message } => self.terminate_on_error(
                state,
                StateTerminationType::Abort,
                ReachWithError::None,
                format!("abort: {message}"),
            ),
        }
        Ok(())
    }

    /// Checks whether `state` compares a pointer it has already dereferenced
    /// with null, confirming a trace that predicts it.
    ///
    /// Returns `true` if the state was ended.
    fn check_null_after_deref(
        &mut self,
        state: &mut ExecutionState,
        op: CompareOp,
        lhs: &ExprRef,
        rhs: &ExprRef,
    ) -> bool {
        if self.config.guidance != GuidanceKind::ErrorGuidance
            || !state.is_targeted
            || !matches!(op, CompareOp::Eq | CompareOp::Ne)
            || lhs.width() != self.context.pointer_width()
        {
            return false;
        }
        let compares_dereferenced = |value: &ExprRef, other: &ExprRef| {
            other.as_constant() == Some(0) && state.dereferenced.contains(value)
        };
        if !compares_dereferenced(lhs, rhs) && !compares_dereferenced(rhs, lhs) {
            return false;
        }
        let Some(targeted) = self.targeted.as_mut() else {
            return false;
        };
        if targeted.report_true_positive(state, ReachWithError::NullCheckAfterDerefException) {
            self.terminate_with_bug(
                state,
                StateTerminationType::ReportError,
                "memory error: null check after dereference".to_string(),
            );
            return true;
        }
        state.error = ReachWithError::None;
        false
    }

    fn make_symbolic(&mut self, state: &mut ExecutionState, pointer: &ExprRef, name: &str) -> Result<()> {
        let resolved = state.address_space.resolve_one(
            &self.builder,
            &self.solver,
            &state.constraints,
            pointer,
        )?;
        let Some(pair) = resolved else {
            self.terminate_on_error(
                state,
                StateTerminationType::User,
                ReachWithError::None,
                "invalid pointer passed to make_symbolic",
            );
            return Ok(());
        };
        let size = pair
            .object
            .concrete_size()
            .ok_or(Error::SymbolicMakeSymbolicSize)?;
        let array = self
            .builder
            .create_array(name, size, ArraySource::MakeSymbolic);
        state
            .address_space
            .get_writeable(pair.object.id())?
            .reset(array.clone());
        let failure = self.bind_seed_inputs(state, &array);
        state.symbolics.push_back(SymbolicObject {
            object: pair.object,
            array,
        });
        if let Some(message) = failure {
            self.terminate_on_error(state, StateTerminationType::User, ReachWithError::None, message);
        }
        Ok(())
    }

    fn execute_call(
        &mut self,
        state: &mut ExecutionState,
        instruction: &Instruction,
        callee: &Callee,
        args: Vec<ExprRef>,
    ) -> Result<()> {
        let target = match callee {
            Callee::Direct(function) => return self.call_function(state, instruction, *function, args),
            Callee::Indirect(operand) => self.operand(state, operand)?,
        };

        if let Some(address) = target.as_constant() {
            match self.program.function_at(address) {
                Some(function) => return self.call_function(state, instruction, function, args),
                None => {
                    self.terminate_on_error(
                        state,
                        StateTerminationType::UnreachableCall,
                        ReachWithError::None,
                        "call to invalid function pointer",
                    );
                    return Ok(());
                }
            }
        }

        let callees = self.program.block(instruction.block)?.callees().to_vec();
        let width = target.width();
        let mut conds: Vec<ExprRef> = callees
            .iter()
            .map(|f| {
                let address = self.builder.constant(self.program.function_address(*f), width);
                self.builder.eq(&target, &address)
            })
            .collect();
        let misses: Vec<ExprRef> = conds.iter().map(|c| self.builder.not(c)).collect();
        conds.push(self.builder.and_all(&misses));

        let mut blocks = callees
            .iter()
            .map(|f| Ok(Some(self.program.function(*f)?.entry())))
            .collect::<Result<Vec<_>>>()?;
        blocks.push(None);

        let states = self.branch(state, &conds, &blocks)?;
        for (index, id) in states.into_iter().enumerate() {
            match callees.get(index) {
                Some(function) => {
                    let args = args.clone();
                    self.continue_on(state, id, |this, s| {
                        this.call_function(s, instruction, *function, args)
                    });
                }
                None => self.continue_on(state, id, |this, s| {
                    this.terminate_on_error(
                        s,
                        StateTerminationType::UnreachableCall,
                        ReachWithError::None,
                        "call to invalid function pointer",
                    );
                    Ok(())
                }),
            }
        }
        Ok(())
    }

    fn call_function(
        &mut self,
        state: &mut ExecutionState,
        instruction: &Instruction,
        function: FunctionId,
        args: Vec<ExprRef>,
    ) -> Result<()> {
        if self.config.max_stack_frames != 0 && state.stack.len() >= self.config.max_stack_frames {
            self.terminate_early(
                state,
                StateTerminationType::OutOfStackMemory,
                "max stack frames exceeded",
                Some(HaltReason::MaxStackFrames),
            );
            return Ok(());
        }

        let program = self.program.clone();
        let callee = program.function(function)?;
        let expected = callee.params as usize;
        if args.len() != expected {
            return Err(Error::ArgumentCountMismatch {
                function,
                expected,
                actual: args.len(),
            });
        }
        let entry = program.block(callee.entry())?;
        state
            .stack
            .push_frame(StackFrame::new(function, Some(instruction.id), args));
        state.pc = entry.first();
        trace!(state = %state.id, function = %callee.name, "Entering function");
        Ok(())
    }

    fn execute_return(&mut self, state: &mut ExecutionState, value: Option<ExprRef>) -> Result<()> {
        let Some(caller) = state.frame()?.caller else {
            self.terminate_on_exit(state);
            return Ok(());
        };

        let frame = state.stack.pop_frame()?;
        for object in &frame.allocas {
            state.address_space.unbind_object(*object);
        }

        let program = self.program.clone();
        let call = program.instruction(caller)?;
        if let (InstructionKind::Call { dest: Some(dest), .. }, Some(value)) = (&call.kind, value) {
            state.frame_mut()?.write(*dest, value);
        }
        state.pc = program.next_instruction(caller).ok_or(Error::InvalidStep)?;
        Ok(())
    }

    fn execute_switch(
        &mut self,
        state: &mut ExecutionState,
        instruction: &Instruction,
        value: &ExprRef,
        cases: &[(u64, BlockId)],
        default: BlockId,
    ) -> Result<()> {
        if let Some(concrete) = value.as_constant() {
            let value_mask = mask(value.width());
            let target = cases
                .iter()
                .find(|(case, _)| case & value_mask == concrete)
                .map_or(default, |(_, block)| *block);
            return self.transfer(state, instruction, target);
        }

        let mut targets: Vec<(BlockId, ExprRef)> = Vec::new();
        let mut misses = Vec::new();
        for (case, block) in cases {
            let matches = self
                .builder
                .eq(value, &self.builder.constant(*case, value.width()));
            misses.push(self.builder.not(&matches));
            match targets.iter_mut().find(|(b, _)| b == block) {
                Some((_, cond)) => *cond = self.builder.or(cond, &matches),
                None => targets.push((*block, matches)),
            }
        }
        let otherwise = self.builder.and_all(&misses);
        match targets.iter_mut().find(|(b, _)| *b == default) {
            Some((_, cond)) => *cond = self.builder.or(cond, &otherwise),
            None => targets.push((default, otherwise)),
        }

        let conds: Vec<ExprRef> = targets.iter().map(|(_, c)| c.clone()).collect();
        let blocks: Vec<Option<BlockId>> = targets.iter().map(|(b, _)| Some(*b)).collect();
        let states = self.branch(state, &conds, &blocks)?;
        for ((target, _), id) in targets.iter().zip(states) {
            let target = *target;
            self.continue_on(state, id, |this, s| this.take_branch(s, instruction, target));
        }
        Ok(())
    }

    /// Records that `state` took the branch of `instruction` to `target`, and
    /// moves it there.
    fn take_branch(&mut self, state: &mut ExecutionState, instruction: &Instruction, target: BlockId) -> Result<()> {
        state.branch_trace.push_back(BranchEvent {
            instruction: instruction.id,
            taken:       target,
        });
        self.transfer(state, instruction, target)
    }

    /// Moves `state` from the block of `instruction` to the start of `target`.
    fn transfer(&mut self, state: &mut ExecutionState, instruction: &Instruction, target: BlockId) -> Result<()> {
        let first = self.program.block(target)?.first();
        state.record_transfer(instruction.block, target)?;
        state.pc = first;
        Ok(())
    }
}
