//! This module contains the [`Executor`], which interprets the program over
//! symbolic inputs and explores its paths.
//!
//! # How it Works
//!
//! The executor runs a loop modelled on a virtual machine's fetch-execute
//! cycle, except that there are many machines at once: one
//! [`ExecutionState`] per path. Each iteration asks the searcher for a state,
//! executes that state's next instruction, and publishes the states that the
//! step created or finished to the target subsystem and the searcher.
//!
//! Instructions whose outcome depends on symbolic values fork the state, so
//! that every feasible outcome is followed by some state. States end when
//! their path returns from the entry function, when the program commits an
//! error on the path, or when a budget runs out. Each ending produces test
//! inputs for the path and, for errors, a bug report.
//!
//! The run halts when no states remain, when every trace that directs the run
//! has been confirmed, when a global budget runs out, or when the watchdog
//! asks it to.

pub mod config;
mod fork;
mod instruction;
mod memory;
mod seeding;
mod termination;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
    rc::Rc,
    time::Instant,
};

pub use config::Config;
pub use fork::StatePair;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    codegraph::CodeGraphDistance,
    error::{
        self,
        container::Locatable,
        execution::{Errors, Result},
    },
    expr::{ArraySource, Context, ExprBuilder},
    memory::{AllocSite, MemoryManager, MemoryObject, ObjectFlags, ObjectState},
    program::{Function, FunctionId, GlobalId, InstructionId, Program},
    report::{BugReport, ExecutionResult, Statistics, TestCase},
    seed::{Seed, SeedInfo},
    searcher::{ObjectManager, Searcher, Subscriber},
    solver::{Solver, TimingSolver},
    state::{ExecutionState, StateId, SymbolicObject},
    target::{
        spec::TraceSpec,
        DistanceCalculator,
        FalsePositive,
        GuidanceKind,
        ReachWithError,
        TargetCache,
        TargetManager,
        TargetedExecutionManager,
        TargetedHaltsOnTraces,
        WeightResult,
    },
    watchdog::DynWatchdog,
};

/// The reasons for which a run can stop.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum HaltReason {
    MaxTime,
    MaxInstructions,
    MaxSteppedInstructions,
    MaxMemory,
    MaxForks,
    MaxCycles,
    MaxDepth,
    MaxStackFrames,
    MaxSolverTime,
    MaxTests,
    CovCheck,
    NoMoreStates,
    Interrupt,
    ReachedTarget,
    ErrorOnWhichShouldExit,

    /// Every seed was replayed and no other paths were to be explored.
    SeedsReplayed,
}

impl Display for HaltReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The ways in which a state can end.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum StateTerminationType {
    /// The path returned from the entry function.
    Exit,

    /// The engine stopped following the path.
    EarlyAlgorithm,

    /// The program asked for the path to be abandoned.
    EarlyUser,

    /// The run halted while the path was still live.
    Interrupted,
    MaxDepth,
    OutOfMemory,
    OutOfStackMemory,

    /// The solver could not answer a query on the path.
    SolverError,

    /// An invalid pointer was dereferenced.
    Ptr,

    /// A read-only object was written to.
    ReadOnly,

    /// An invalid pointer was freed.
    Free,
    Abort,
    Assert,

    /// An indirect call went to something other than a function.
    UnreachableCall,

    /// The program could not be interpreted on the path.
    Execution,

    /// The program misused an engine intrinsic.
    User,

    /// The program committed an error it reported itself, such as a division
    /// by zero.
    ReportError,
}

impl StateTerminationType {
    /// Checks whether the termination is an error committed by the program.
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::Ptr
                | Self::ReadOnly
                | Self::Free
                | Self::Abort
                | Self::Assert
                | Self::UnreachableCall
                | Self::Execution
                | Self::User
                | Self::ReportError
        )
    }

    /// Checks whether the engine gave up on the path before it ended.
    #[must_use]
    pub fn is_early(self) -> bool {
        matches!(
            self,
            Self::EarlyAlgorithm
                | Self::EarlyUser
                | Self::Interrupted
                | Self::MaxDepth
                | Self::OutOfMemory
                | Self::OutOfStackMemory
                | Self::SolverError
        )
    }
}

impl Display for StateTerminationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The symbolic executor.
#[derive(Debug)]
pub struct Executor {
    program:  Rc<Program>,
    config:   Config,
    context:  Context,
    builder:  Rc<ExprBuilder>,
    solver:   TimingSolver,
    memory:   MemoryManager,
    distance: Rc<DistanceCalculator>,
    targets:  Rc<TargetCache>,
    traces:   Vec<TraceSpec>,
    seeds:    Vec<Rc<Seed>>,

    /// A watchdog that gets polled at intervals to check whether the run needs
    /// to stop.
    watchdog: DynWatchdog,

    objects:        ObjectManager,
    searcher:       Box<dyn Searcher>,
    target_manager: TargetManager,
    targeted:       Option<TargetedExecutionManager>,
    halts:          Vec<TargetedHaltsOnTraces>,
    expected:       BTreeSet<String>,
    globals:        BTreeMap<GlobalId, Rc<MemoryObject>>,

    tests:   Vec<TestCase>,
    bugs:    Vec<BugReport>,
    emitted: BTreeSet<(InstructionId, StateTerminationType)>,
    errors:  Errors,
    stats:   Statistics,

    halt:            Option<HaltReason>,
    at_memory_limit: bool,
    started:         Instant,

    /// Whether states carrying seeds are still stepped ahead of the others.
    seeding:     bool,
    last_seeded: Option<StateId>,
}

impl Executor {
    /// Constructs an executor for `program` that answers queries with
    /// `solver`.
    #[must_use]
    pub fn new(
        program: Rc<Program>,
        config: Config,
        context: Context,
        solver: Box<dyn Solver>,
        watchdog: DynWatchdog,
    ) -> Self {
        let builder = Rc::new(ExprBuilder::new(context));
        let solver = TimingSolver::new(solver, builder.clone(), config.solver_timeout);
        let memory = MemoryManager::new(builder.clone());
        let graph = Rc::new(CodeGraphDistance::new(program.clone()));
        let distance = Rc::new(DistanceCalculator::new(graph));
        let targets = Rc::new(TargetCache::new());
        let searcher = config.searcher.build(distance.clone());
        let target_manager = TargetManager::new(
            config.guidance,
            config.max_cycles_before_stuck,
            distance.clone(),
            targets.clone(),
        );

        Self {
            program,
            config,
            context,
            builder,
            solver,
            memory,
            distance,
            targets,
            traces: Vec::new(),
            seeds: Vec::new(),
            watchdog,
            objects: ObjectManager::new(),
            searcher,
            target_manager,
            targeted: None,
            halts: Vec::new(),
            expected: BTreeSet::new(),
            globals: BTreeMap::new(),
            tests: Vec::new(),
            bugs: Vec::new(),
            emitted: BTreeSet::new(),
            errors: Errors::default(),
            stats: Statistics::default(),
            halt: None,
            at_memory_limit: false,
            started: Instant::now(),
            seeding: false,
            last_seeded: None,
        }
    }

    /// Sets the traces that direct error-guided runs.
    #[must_use]
    pub fn with_traces(mut self, traces: Vec<TraceSpec>) -> Self {
        self.traces = traces;
        self
    }

    /// Sets the seeds whose inputs are replayed before the rest of the
    /// exploration.
    #[must_use]
    pub fn with_seeds(mut self, seeds: Vec<Seed>) -> Self {
        self.seeds = seeds.into_iter().map(Rc::new).collect();
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn program(&self) -> &Rc<Program> {
        &self.program
    }

    #[must_use]
    pub fn builder(&self) -> &Rc<ExprBuilder> {
        &self.builder
    }

    /// Gets the functions that the traces start in.
    #[must_use]
    pub fn trace_entries(&self) -> Vec<FunctionId> {
        let mut manager = TargetedExecutionManager::new(self.distance.clone(), self.targets.clone());
        manager.prepare_targets(&self.traces).into_keys().collect()
    }

    /// Explores the program from `entry`.
    ///
    /// The arguments of `entry` are symbolic, as are the contents of anything
    /// the program makes symbolic.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `entry` is not a function of the program or its
    /// initial state cannot be set up. Errors on individual paths end those
    /// paths and are reported in the result instead.
    pub fn run(&mut self, entry: FunctionId) -> error::Result<ExecutionResult> {
        self.reset();
        let program = self.program.clone();
        let function = program.function(entry)?;
        let first = program.block(function.entry())?.first();
        let mut initial = self.initial_state(function).locate(first)?;
        info!(
            function = %function.name,
            searcher = self.searcher.name(),
            seeds = self.seeds.len(),
            "Starting exploration"
        );

        let id = initial.id;
        let failure = self.bind_seed_arguments(&mut initial);
        self.objects.add_state(initial);
        self.publish();
        if let Some(message) = failure {
            if let Some(mut state) = self.objects.take_state(id) {
                self.terminate_on_error(
                    &mut state,
                    StateTerminationType::User,
                    ReachWithError::None,
                    message,
                );
                self.objects.restore_state(state);
            }
            self.publish();
        }

        let halt = self.explore();
        info!(reason = %halt, "Halting exploration");
        let false_positives = self.drain(halt);

        Ok(self.finish(entry, halt, false_positives))
    }

    fn reset(&mut self) {
        self.objects = ObjectManager::new();
        self.searcher = self.config.searcher.build(self.distance.clone());
        self.target_manager = TargetManager::new(
            self.config.guidance,
            self.config.max_cycles_before_stuck,
            self.distance.clone(),
            self.targets.clone(),
        );
        self.targeted = None;
        self.halts.clear();
        self.expected.clear();
        self.globals.clear();
        self.tests.clear();
        self.bugs.clear();
        self.emitted.clear();
        self.errors = Errors::default();
        self.stats = Statistics::default();
        self.halt = None;
        self.at_memory_limit = false;
        self.started = Instant::now();
        self.seeding = !self.seeds.is_empty();
        self.last_seeded = None;
    }

    fn initial_state(&mut self, function: &Function) -> Result<ExecutionState> {
        let first = self.program.block(function.entry())?.first();
        let id = self.objects.next_state_id();
        let mut state = ExecutionState::new(id, function.id, first, vec![]);
        state.seeds = self.seeds.iter().cloned().map(SeedInfo::new).collect();

        let program = self.program.clone();
        for global in program.globals() {
            let object = self.memory.allocate_concrete(
                global.size,
                0,
                ObjectFlags::global(),
                AllocSite::Global(global.id),
                &global.name,
            );
            let source = match &global.initializer {
                Some(values) => ArraySource::Constant {
                    values: values.as_slice().into(),
                },
                None => ArraySource::Zeroed,
            };
            let root = self.builder.create_array(&global.name, global.size, source);
            let mut contents = ObjectState::new(object.id(), root);
            contents.set_read_only(global.read_only);
            state.address_space.bind_object(object.clone(), contents);
            self.globals.insert(global.id, object);
        }

        let width = self.context.pointer_width();
        let bytes = self.context.pointer_bytes();
        let mut arguments = Vec::new();
        for index in 0..function.params {
            let name = format!("arg{index}");
            let flags = ObjectFlags {
                is_user_specified: true,
                ..ObjectFlags::default()
            };
            let object = self
                .memory
                .allocate_concrete(bytes, bytes, flags, AllocSite::Argument(index), &name);
            let array = self
                .builder
                .create_array(&name, bytes, ArraySource::Argument { index });
            let contents = ObjectState::new(object.id(), array.clone());
            arguments.push(contents.read(&self.builder, &self.builder.pointer(0), width)?);
            state.symbolics.push_back(SymbolicObject { object, array });
        }
        state.frame_mut()?.arguments = arguments;

        if self.config.guidance == GuidanceKind::ErrorGuidance {
            let mut manager = TargetedExecutionManager::new(self.distance.clone(), self.targets.clone());
            let forests = manager.prepare_targets(&self.traces);
            if let Some(forest) = forests.get(&function.id) {
                self.halts.push(TargetedHaltsOnTraces::new(forest));
                self.expected = forest
                    .leafs()
                    .iter()
                    .flat_map(|(set, _)| set.targets().to_vec())
                    .filter_map(|t| t.trace_id().map(ToString::to_string))
                    .collect();
                state.target_forest = forest.clone();
                state.set_targets(forest.targets().into_iter().collect());
                state.set_targeted(true);
            }
            self.targeted = Some(manager);
        }

        Ok(state)
    }

    /// Runs the exploration loop until the run halts.
    fn explore(&mut self) -> HaltReason {
        let poll_interval = self.watchdog.poll_every().max(1);
        let mut counter: usize = 0;

        loop {
            // If we have been told to stop, stop.
            if counter % poll_interval == 0 && self.watchdog.should_stop() {
                return HaltReason::Interrupt;
            }
            counter += 1;

            if let Some(reason) = self.halt.or_else(|| self.exhausted_budget()) {
                return reason;
            }
            self.check_memory_usage();

            let seeded = if self.seeding {
                self.next_seeded_state()
            } else {
                None
            };
            if seeded.is_none() && self.config.seeding.only_seed && !self.seeds.is_empty() {
                return HaltReason::SeedsReplayed;
            }
            let Some(id) = seeded.or_else(|| self.searcher.select(self.objects.states())) else {
                return HaltReason::NoMoreStates;
            };
            self.step_state(id);
            self.publish();

            if let Some(reason) = self.halt {
                return reason;
            }
            if self.all_traces_reported() {
                return HaltReason::ReachedTarget;
            }
        }
    }

    fn exhausted_budget(&self) -> Option<HaltReason> {
        let config = &self.config;
        if config.max_time.is_some_and(|max| self.started.elapsed() >= max) {
            return Some(HaltReason::MaxTime);
        }
        if config.max_instructions != 0 && self.stats.instructions >= config.max_instructions {
            return Some(HaltReason::MaxInstructions);
        }
        if config.max_tests != 0 && self.tests.len() >= config.max_tests {
            return Some(HaltReason::MaxTests);
        }
        None
    }

    fn all_traces_reported(&self) -> bool {
        let Some(targeted) = &self.targeted else {
            return false;
        };
        !self.expected.is_empty()
            && self
                .expected
                .iter()
                .all(|id| targeted.reported_traces().contains(id))
    }

    /// Kills states when live objects exceed the memory budget, starting with
    /// those that have not covered new code.
    fn check_memory_usage(&mut self) {
        if self.config.max_memory == 0 {
            return;
        }
        let used = self.memory.live_bytes();
        self.at_memory_limit = used > self.config.max_memory;
        if !self.at_memory_limit {
            return;
        }

        let count = self.objects.len() as u64;
        let keep = count.saturating_mul(self.config.max_memory) / used.max(1);
        let to_kill = usize::try_from(count.saturating_sub(keep).max(1)).unwrap_or(usize::MAX);
        let mut victims: Vec<StateId> = self
            .objects
            .states()
            .values()
            .filter(|s| !s.covered_new)
            .map(|s| s.id)
            .collect();
        if victims.len() < to_kill {
            victims.extend(
                self.objects
                    .states()
                    .values()
                    .filter(|s| s.covered_new)
                    .map(|s| s.id),
            );
        }
        victims.truncate(to_kill);
        debug!(used, killed = victims.len(), "Memory limit exceeded");

        for id in victims {
            let Some(mut state) = self.objects.take_state(id) else {
                continue;
            };
            self.terminate_early(
                &mut state,
                StateTerminationType::OutOfMemory,
                "memory limit exceeded",
                Some(HaltReason::MaxMemory),
            );
            self.objects.restore_state(state);
        }
        self.publish();
    }

    /// Steps the state `id` by one instruction.
    fn step_state(&mut self, id: StateId) {
        let Some(mut state) = self.objects.take_state(id) else {
            return;
        };
        self.objects.set_current(Some(id));
        self.target_manager.pull_global(&mut state);

        if self.config.guidance == GuidanceKind::ErrorGuidance
            && state.is_targeted
            && state.targets.is_empty()
        {
            self.terminate_early(
                &mut state,
                StateTerminationType::EarlyAlgorithm,
                "state missed all its targets",
                None,
            );
        } else {
            self.execute_step(&mut state);
        }
        self.objects.restore_state(state);

        let local: Vec<StateId> = std::iter::once(id)
            .chain(self.objects.added().iter().copied())
            .filter(|s| !self.objects.is_removed(*s))
            .collect();
        for id in local {
            let Some(mut state) = self.objects.take_state(id) else {
                continue;
            };
            self.after_step(&mut state);
            self.objects.restore_state(state);
        }
    }

    /// Records the coverage of a state that has just moved, and ends it if it
    /// has run out of its own budgets.
    fn after_step(&mut self, state: &mut ExecutionState) {
        if !state.seeds.is_empty() {
            self.patch_seeds(state);
        }
        if self.target_manager.calculator_mut().update(state) {
            state.covered_new = true;
            state.instructions_since_cov_new = 0;
        } else {
            state.instructions_since_cov_new += 1;
        }

        let config = &self.config;
        if config.max_stepped_instructions != 0
            && state.stepped_instructions >= config.max_stepped_instructions
        {
            self.terminate_early(
                state,
                StateTerminationType::EarlyAlgorithm,
                "max-stepped-instructions exceeded",
                Some(HaltReason::MaxSteppedInstructions),
            );
        } else if config.max_cycles != 0 && state.is_cycled(&self.program, config.max_cycles) {
            self.terminate_early(
                state,
                StateTerminationType::EarlyAlgorithm,
                "max-cycles exceeded",
                Some(HaltReason::MaxCycles),
            );
        } else if self.config.guidance == GuidanceKind::ErrorGuidance {
            self.check_reachable_targets(state);
        }
    }

    /// Ends `state` if it stands at the end of a trace that only asks for its
    /// final location to be reached.
    fn check_reachable_targets(&mut self, state: &mut ExecutionState) {
        let asks_reachable = state
            .targets
            .iter()
            .any(|t| t.is_that_error(ReachWithError::Reachable));
        if !asks_reachable {
            return;
        }
        let Some(targeted) = self.targeted.as_mut() else {
            return;
        };
        if targeted.report_true_positive(state, ReachWithError::Reachable) {
            self.emit_test(state, StateTerminationType::EarlyAlgorithm, Some("reached target".into()));
            self.terminate_state(state, StateTerminationType::EarlyAlgorithm);
        } else {
            state.error = ReachWithError::None;
        }
    }

    /// Publishes the changes of the step to the target subsystem and then to
    /// the searcher.
    fn publish(&mut self) {
        self.stats.states += self.objects.added().len() as u64;
        let mut subscribers: Vec<&mut dyn Subscriber> = vec![&mut self.target_manager];
        if let Some(targeted) = self.targeted.as_mut() {
            subscribers.push(targeted);
        }
        self.objects.publish(&mut subscribers, self.searcher.as_mut());
    }

    /// Ends every remaining state after the run halted for `reason`, and
    /// reports the traces that were not confirmed.
    fn drain(&mut self, reason: HaltReason) -> Vec<FalsePositive> {
        let can_reach_some_target = self.objects.states().values().any(|s| {
            s.targets
                .iter()
                .any(|t| self.target_manager.distance(s, t).result != WeightResult::Miss)
        });

        let remaining: Vec<StateId> = self.objects.states().keys().copied().collect();
        for id in remaining {
            let Some(mut state) = self.objects.take_state(id) else {
                continue;
            };
            self.terminate_early(
                &mut state,
                StateTerminationType::Interrupted,
                format!("execution halting: {reason}"),
                Some(reason),
            );
            self.objects.restore_state(state);
        }
        self.publish();

        self.halts
            .iter()
            .flat_map(|h| h.report_false_positives(can_reach_some_target))
            .collect()
    }

    fn finish(
        &mut self,
        entry: FunctionId,
        halt_reason: HaltReason,
        false_positives: Vec<FalsePositive>,
    ) -> ExecutionResult {
        let mut stats = self.stats.clone();
        stats.solver = self.solver.stats();
        let true_positives = self
            .targeted
            .as_ref()
            .map(|t| t.true_positives().to_vec())
            .unwrap_or_default();
        ExecutionResult {
            entry,
            halt_reason,
            tests: std::mem::take(&mut self.tests),
            bugs: std::mem::take(&mut self.bugs),
            true_positives,
            false_positives,
            stats,
            errors: std::mem::take(&mut self.errors),
        }
    }
}
