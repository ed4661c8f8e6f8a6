//! This module contains the configuration for the [`super::Executor`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    constant::{
        DEFAULT_DUMP_STATES_ON_HALT,
        DEFAULT_EMIT_ALL_ERRORS,
        DEFAULT_MAX_CYCLES,
        DEFAULT_MAX_CYCLES_BEFORE_STUCK,
        DEFAULT_MAX_DEPTH,
        DEFAULT_MAX_FORKS,
        DEFAULT_MAX_INSTRUCTIONS,
        DEFAULT_MAX_MEMORY,
        DEFAULT_MAX_STACK_FRAMES,
        DEFAULT_MAX_STEPPED_INSTRUCTIONS,
        DEFAULT_MAX_TESTS,
        DEFAULT_SOLVER_TIMEOUT,
    },
    executor::StateTerminationType,
    memory,
    searcher::SearcherKind,
    seed,
    target::GuidanceKind,
};

/// The configuration for an exploration run.
///
/// Every budget that takes a count treats zero as "no bound".
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// The time that each solver query may take.
    ///
    /// Defaults to [`DEFAULT_SOLVER_TIMEOUT`].
    pub solver_timeout: Duration,

    /// The wall-clock time after which the run halts, if any.
    pub max_time: Option<Duration>,

    /// The number of instructions, across all states, after which the run
    /// halts.
    ///
    /// Defaults to [`DEFAULT_MAX_INSTRUCTIONS`].
    pub max_instructions: u64,

    /// The number of instructions a single state may execute before it is
    /// terminated.
    ///
    /// Defaults to [`DEFAULT_MAX_STEPPED_INSTRUCTIONS`].
    pub max_stepped_instructions: u64,

    /// The number of forks after which no more forks are made. States carry
    /// on along a single side of each condition.
    ///
    /// Defaults to [`DEFAULT_MAX_FORKS`].
    pub max_forks: u64,

    /// The fork depth beyond which states are terminated.
    ///
    /// Defaults to [`DEFAULT_MAX_DEPTH`].
    pub max_depth: u64,

    /// The number of call frames beyond which a state is terminated.
    ///
    /// Defaults to [`DEFAULT_MAX_STACK_FRAMES`].
    pub max_stack_frames: usize,

    /// The number of bytes of live objects above which states are killed.
    ///
    /// Defaults to [`DEFAULT_MAX_MEMORY`].
    pub max_memory: u64,

    /// The number of test cases after which the run halts.
    ///
    /// Defaults to [`DEFAULT_MAX_TESTS`].
    pub max_tests: usize,

    /// The number of revisits of a block beyond which a state is terminated.
    ///
    /// Defaults to [`DEFAULT_MAX_CYCLES`].
    pub max_cycles: u32,

    /// The number of revisits of a block beyond which a state that keeps
    /// forking is considered stuck.
    ///
    /// Defaults to [`DEFAULT_MAX_CYCLES_BEFORE_STUCK`].
    pub max_cycles_before_stuck: u32,

    /// The searcher that picks the state to step.
    pub searcher: SearcherKind,

    /// What directs the exploration.
    pub guidance: GuidanceKind,

    /// The configuration of the memory model.
    pub memory: memory::Config,

    /// How seeds are matched with symbolic objects.
    pub seeding: seed::Config,

    /// Whether every error is reported, rather than the first error at each
    /// instruction.
    ///
    /// Defaults to [`DEFAULT_EMIT_ALL_ERRORS`].
    pub emit_all_errors: bool,

    /// Whether states remaining when the run halts produce test cases.
    ///
    /// Defaults to [`DEFAULT_DUMP_STATES_ON_HALT`].
    pub dump_states_on_halt: bool,

    /// The kinds of termination that halt the whole run when a state ends
    /// with them.
    pub exit_on_error_types: Vec<StateTerminationType>,
}

impl Config {
    /// Sets the `solver_timeout` config parameter to `value`.
    #[must_use]
    pub fn with_solver_timeout(mut self, value: Duration) -> Self {
        self.solver_timeout = value;
        self
    }

    /// Sets the `max_time` config parameter to `value`.
    #[must_use]
    pub fn with_max_time(mut self, value: Duration) -> Self {
        self.max_time = Some(value);
        self
    }

    /// Sets the `max_instructions` config parameter to `value`.
    #[must_use]
    pub fn with_max_instructions(mut self, value: u64) -> Self {
        self.max_instructions = value;
        self
    }

    /// Sets the `max_stepped_instructions` config parameter to `value`.
    #[must_use]
    pub fn with_max_stepped_instructions(mut self, value: u64) -> Self {
        self.max_stepped_instructions = value;
        self
    }

    /// Sets the `max_forks` config parameter to `value`.
    #[must_use]
    pub fn with_max_forks(mut self, value: u64) -> Self {
        self.max_forks = value;
        self
    }

    /// Sets the `max_depth` config parameter to `value`.
    #[must_use]
    pub fn with_max_depth(mut self, value: u64) -> Self {
        self.max_depth = value;
        self
    }

    /// Sets the `max_stack_frames` config parameter to `value`.
    #[must_use]
    pub fn with_max_stack_frames(mut self, value: usize) -> Self {
        self.max_stack_frames = value;
        self
    }

    /// Sets the `max_memory` config parameter to `value`.
    #[must_use]
    pub fn with_max_memory(mut self, value: u64) -> Self {
        self.max_memory = value;
        self
    }

    /// Sets the `max_tests` config parameter to `value`.
    #[must_use]
    pub fn with_max_tests(mut self, value: usize) -> Self {
        self.max_tests = value;
        self
    }

    /// Sets the `max_cycles` config parameter to `value`.
    #[must_use]
    pub fn with_max_cycles(mut self, value: u32) -> Self {
        self.max_cycles = value;
        self
    }

    /// Sets the `max_cycles_before_stuck` config parameter to `value`.
    #[must_use]
    pub fn with_max_cycles_before_stuck(mut self, value: u32) -> Self {
        self.max_cycles_before_stuck = value;
        self
    }

    #[must_use]
    pub fn with_searcher(mut self, value: SearcherKind) -> Self {
        self.searcher = value;
        self
    }

    #[must_use]
    pub fn with_guidance(mut self, value: GuidanceKind) -> Self {
        self.guidance = value;
        self
    }

    #[must_use]
    pub fn with_memory(mut self, value: memory::Config) -> Self {
        self.memory = value;
        self
    }

    #[must_use]
    pub fn with_seeding(mut self, value: seed::Config) -> Self {
        self.seeding = value;
        self
    }

    /// Sets whether every error is reported.
    #[must_use]
    pub fn with_emit_all_errors(mut self, value: bool) -> Self {
        self.emit_all_errors = value;
        self
    }

    /// Sets whether states remaining at the halt produce test cases.
    #[must_use]
    pub fn with_dump_states_on_halt(mut self, value: bool) -> Self {
        self.dump_states_on_halt = value;
        self
    }

    /// Sets the kinds of termination that halt the run.
    #[must_use]
    pub fn with_exit_on_error_types(mut self, value: Vec<StateTerminationType>) -> Self {
        self.exit_on_error_types = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let solver_timeout = DEFAULT_SOLVER_TIMEOUT;
        let max_time = None;
        let max_instructions = DEFAULT_MAX_INSTRUCTIONS;
        let max_stepped_instructions = DEFAULT_MAX_STEPPED_INSTRUCTIONS;
        let max_forks = DEFAULT_MAX_FORKS;
        let max_depth = DEFAULT_MAX_DEPTH;
        let max_stack_frames = DEFAULT_MAX_STACK_FRAMES;
        let max_memory = DEFAULT_MAX_MEMORY;
        let max_tests = DEFAULT_MAX_TESTS;
        let max_cycles = DEFAULT_MAX_CYCLES;
        let max_cycles_before_stuck = DEFAULT_MAX_CYCLES_BEFORE_STUCK;
        let searcher = SearcherKind::default();
        let guidance = GuidanceKind::default();
        let memory = memory::Config::default();
        let seeding = seed::Config::default();
        let emit_all_errors = DEFAULT_EMIT_ALL_ERRORS;
        let dump_states_on_halt = DEFAULT_DUMP_STATES_ON_HALT;
        let exit_on_error_types = Vec::new();
        Self {
            solver_timeout,
            max_time,
            max_instructions,
            max_stepped_instructions,
            max_forks,
            max_depth,
            max_stack_frames,
            max_memory,
            max_tests,
            max_cycles,
            max_cycles_before_stuck,
            searcher,
            guidance,
            memory,
            seeding,
            emit_all_errors,
            dump_states_on_halt,
            exit_on_error_types,
        }
    }
}
