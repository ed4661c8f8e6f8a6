//! This module contains the ways in which the executor ends states, and the
//! test cases and bug reports that are produced when it does.

use tracing::{debug, info, warn};

use crate::{
    error::execution::LocatedError,
    executor::{Executor, HaltReason, StateTerminationType},
    report::{BugReport, TestCase},
    state::ExecutionState,
    target::{GuidanceKind, ReachWithError},
};

impl Executor {
    /// Removes `state` from the run at the end of the current step.
    pub(super) fn terminate_state(&mut self, state: &mut ExecutionState, kind: StateTerminationType) {
        debug!(state = %state.id, %kind, "Terminating state");
        *self.stats.terminations.entry(kind).or_default() += 1;
        self.objects.remove_state(state.id);
    }

    /// Ends `state` after its path returned from the entry function.
    pub(super) fn terminate_on_exit(&mut self, state: &mut ExecutionState) {
        self.emit_test(state, StateTerminationType::Exit, None);
        self.terminate_state(state, StateTerminationType::Exit);
    }

    /// Ends `state` before its path is complete.
    ///
    /// When a `reason` is given and the state is directed by traces, the
    /// confidence those traces lose is attributed to the reason.
    pub(super) fn terminate_early(
        &mut self,
        state: &mut ExecutionState,
        kind: StateTerminationType,
        message: impl Into<String>,
        reason: Option<HaltReason>,
    ) {
        if let Some(reason) = reason {
            if state.is_targeted {
                for halts in &mut self.halts {
                    halts.subtract_confidences_from(&state.target_forest, reason);
                }
            }
        }

        let produce_test = match kind {
            StateTerminationType::SolverError => false,
            StateTerminationType::Interrupted => self.config.dump_states_on_halt,
            _ => true,
        };
        if produce_test {
            self.emit_test(state, kind, Some(message.into()));
        }
        self.terminate_state(state, kind);
    }

    /// Records that `state` failed with `error`, confirming the traces that
    /// predicted it.
    ///
    /// Returns `true` if some trace was confirmed.
    pub(super) fn report_target_error(&mut self, state: &mut ExecutionState, error: ReachWithError) -> bool {
        if error == ReachWithError::None || self.config.guidance != GuidanceKind::ErrorGuidance {
            state.error = error;
            return false;
        }
        let Some(targeted) = self.targeted.as_mut() else {
            state.error = error;
            return false;
        };
        if targeted.report_true_positive(state, error) {
            return true;
        }
        targeted.report_false_negative(state, error);
        false
    }

    /// Ends `state` with an error committed by the program, reporting it once
    /// per instruction and kind unless every error is to be emitted.
    pub(super) fn terminate_with_bug(
        &mut self,
        state: &mut ExecutionState,
        kind: StateTerminationType,
        message: String,
    ) {
        let instruction = state.prev_pc;
        if self.config.emit_all_errors || self.emitted.insert((instruction, kind)) {
            info!(state = %state.id, %kind, instruction = instruction.0, "{message}");
            let mut bug = BugReport::new(&self.program, state, kind, message.clone(), instruction);
            bug.trace_id = state
                .target_forest
                .targets()
                .iter()
                .filter(|t| t.is_reported() && t.is_that_error(state.error))
                .find_map(|t| t.trace_id().map(ToString::to_string));
            bug.test = self.emit_test(state, kind, Some(message));
            self.bugs.push(bug);
        }

        if self.config.exit_on_error_types.contains(&kind) {
            self.halt = Some(HaltReason::ErrorOnWhichShouldExit);
        }
        self.terminate_state(state, kind);
    }

    /// Ends `state` with an error committed by the program, after reporting
    /// `error` to the traces.
    pub(super) fn terminate_on_error(
        &mut self,
        state: &mut ExecutionState,
        kind: StateTerminationType,
        error: ReachWithError,
        message: impl Into<String>,
    ) {
        self.report_target_error(state, error);
        self.terminate_with_bug(state, kind, message.into());
    }

    /// Ends `state` because it could not be interpreted.
    pub(super) fn terminate_on_execution_error(&mut self, state: &mut ExecutionState, error: LocatedError) {
        if error.payload.is_solver_failure() {
            warn!(state = %state.id, %error, "Solver failure ends state");
            self.terminate_early(
                state,
                StateTerminationType::SolverError,
                error.payload.to_string(),
                Some(HaltReason::MaxSolverTime),
            );
            return;
        }
        let message = error.payload.to_string();
        self.errors.add(error);
        self.terminate_with_bug(state, StateTerminationType::Execution, message);
    }

    /// Produces a test case for the path of `state`, returning its index.
    pub(super) fn emit_test(
        &mut self,
        state: &ExecutionState,
        kind: StateTerminationType,
        message: Option<String>,
    ) -> Option<usize> {
        let id = self.tests.len();
        match TestCase::generate(id, state, kind, message, &self.solver, self.context) {
            Ok(test) => {
                self.tests.push(test);
                if self.config.max_tests != 0 && self.tests.len() >= self.config.max_tests {
                    self.halt = Some(HaltReason::MaxTests);
                }
                Some(id)
            }
            Err(error) => {
                warn!(state = %state.id, %error, "Unable to generate a test case");
                None
            }
        }
    }
}
