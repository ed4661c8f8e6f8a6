//! This module contains the state tracking functionality for the explorer.

use std::fmt::Debug;

use derivative::Derivative;

use crate::{
    executor,
    executor::Executor,
    expr::Context,
    report::ExecutionResult,
    seed::Seed,
    solver::Solver,
    target::spec::TraceSpec,
    watchdog::DynWatchdog,
};

/// A marker trait that says that the type implementing it is an explorer
/// state.
///
/// Explorer states can be transitioned between as part of the
/// [`crate::explorer::Explorer`] state machine, and are intended to enforce
/// that correct state transitions take place.
pub trait State
where
    Self: Debug + Sized,
{
}

/// The initial state for the explorer.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct HasProgram {
    /// The executor configuration.
    pub config: executor::Config,

    /// The pointer width and byte order of the explored program.
    pub context: Context,

    /// The decision procedure that answers the executor's queries.
    #[derivative(Debug = "ignore")]
    pub solver: Box<dyn Solver>,

    /// The traces that direct an error-guided run.
    pub traces: Vec<TraceSpec>,

    /// The inputs replayed before the rest of the exploration.
    pub seeds: Vec<Seed>,

    /// The watchdog that is monitoring the progress of the explorer.
    pub watchdog: DynWatchdog,
}
impl State for HasProgram {}

/// The explorer has prepared the executor to explore the program.
#[derive(Debug)]
pub struct ExecutorReady {
    /// The executor that will explore the program.
    pub executor: Executor,
}
impl State for ExecutorReady {}

/// The explorer has finished exploring the program.
#[derive(Debug)]
pub struct ExplorationComplete {
    /// The executor that explored the program.
    pub executor: Executor,

    /// What the exploration found.
    pub result: ExecutionResult,
}
impl State for ExplorationComplete {}
