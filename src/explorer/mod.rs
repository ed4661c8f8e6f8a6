//! This module contains the definition of the explorer itself.

pub mod state;

use std::rc::Rc;

use crate::{
    error,
    executor,
    executor::Executor,
    explorer::state::State,
    expr::Context,
    program::{FunctionId, Program},
    report::ExecutionResult,
    seed::Seed,
    solver::{EnumerationSolver, Solver},
    target::spec::TraceSpec,
    watchdog::DynWatchdog,
};

/// Creates a new explorer wrapping the provided `program`, answering its
/// queries with the built-in [`EnumerationSolver`].
#[must_use]
pub fn new(
    program: Program,
    config: executor::Config,
    context: Context,
    watchdog: DynWatchdog,
) -> Explorer<state::HasProgram> {
    let state = state::HasProgram {
        config,
        context,
        solver: Box::new(EnumerationSolver::new()),
        traces: Vec::new(),
        seeds: Vec::new(),
        watchdog,
    };
    let program = Rc::new(program);
    Explorer { program, state }
}

/// The entry point to the engine, the `Explorer` is responsible for taking a
/// program from the user and returning what its exploration found.
///
/// # Enforcing Valid State Transitions
///
/// The explorer enforces that only correct state transitions can occur through
/// use of structs that implement the exact state required by it at any given
/// point.
///
/// There is the [`Self::state`] function that provides access to the state data
/// of whichever state the explorer is currently in.
#[derive(Debug)]
pub struct Explorer<S: State> {
    /// The program that is being explored.
    program: Rc<Program>,

    /// The internal state of the explorer.
    state: S,
}

/// The operations available in all states.
impl<S: State> Explorer<S> {
    /// Gets a reference to the program being explored.
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Gets an immutable reference to the current state of the explorer.
    #[must_use]
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Moves the explorer into the state `NS` created by applying `transform`
    /// to its current state.
    fn transform_state<NS: State>(
        self,
        transform: impl FnOnce(&Rc<Program>, S) -> error::Result<NS>,
    ) -> error::Result<Explorer<NS>> {
        let state = transform(&self.program, self.state)?;
        let program = self.program;

        Ok(Explorer { program, state })
    }
}

/// A type that allows the user to easily name the initial state of the
/// explorer.
pub type InitialExplorer = Explorer<state::HasProgram>;

/// Operations available on a newly-created explorer.
impl Explorer<state::HasProgram> {
    /// Answers queries with `solver` instead of the built-in one.
    #[must_use]
    pub fn with_solver(mut self, solver: Box<dyn Solver>) -> Self {
        self.state.solver = solver;
        self
    }

    /// Directs the exploration towards the errors predicted by `traces`.
    ///
    /// The traces are only followed when the configured guidance is
    /// [`crate::target::GuidanceKind::ErrorGuidance`].
    #[must_use]
    pub fn with_traces(mut self, traces: Vec<TraceSpec>) -> Self {
        self.state.traces = traces;
        self
    }

    /// Replays the inputs of `seeds` before exploring the rest of the
    /// program.
    #[must_use]
    pub fn with_seeds(mut self, seeds: Vec<Seed>) -> Self {
        self.state.seeds = seeds;
        self
    }

    /// Runs the whole exploration from the function named `entry`,
    /// performing all the intermediate steps automatically.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any step in the process fails.
    pub fn explore(self, entry: &str) -> error::Result<ExecutionResult> {
        let entry = self.program.function_by_name(entry)?.id;
        let explorer = self.prepare_executor()?;
        let explorer = explorer.execute(entry)?;

        Ok(explorer.into_result())
    }

    /// Validates the traces and constructs the executor.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if one of the traces cannot be turned into targets, or
    /// one of the seeds is malformed.
    pub fn prepare_executor(self) -> error::Result<Explorer<state::ExecutorReady>> {
        for trace in &self.state.traces {
            trace.validate()?;
        }
        for seed in &self.state.seeds {
            seed.validate()?;
        }
        self.transform_state(|program, old_state| {
            let executor = Executor::new(
                program.clone(),
                old_state.config,
                old_state.context,
                old_state.solver,
                old_state.watchdog,
            )
            .with_traces(old_state.traces)
            .with_seeds(old_state.seeds);
            Ok(state::ExecutorReady { executor })
        })
    }
}

/// Operations available on an explorer whose executor is ready to run.
impl Explorer<state::ExecutorReady> {
    /// Gets the functions that the configured traces start in, which are the
    /// natural entry points of an error-guided run.
    #[must_use]
    pub fn trace_entries(&self) -> Vec<FunctionId> {
        self.state.executor.trace_entries()
    }

    /// Explores the program symbolically, starting from `entry`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the exploration cannot be started from `entry`.
    pub fn execute(self, entry: FunctionId) -> error::Result<Explorer<state::ExplorationComplete>> {
        self.transform_state(|_, mut old_state| {
            let result = old_state.executor.run(entry)?;
            let executor = old_state.executor;
            Ok(state::ExplorationComplete { executor, result })
        })
    }
}

/// Operations available on an explorer that has finished exploring.
impl Explorer<state::ExplorationComplete> {
    /// Gets the executor once it has completed the exploration.
    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.state.executor
    }

    /// Gets what the exploration found.
    #[must_use]
    pub fn result(&self) -> &ExecutionResult {
        &self.state.result
    }

    /// Consumes the explorer, returning what the exploration found.
    #[must_use]
    pub fn into_result(self) -> ExecutionResult {
        self.state.result
    }
}
