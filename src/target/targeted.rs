//! This module contains the [`TargetedExecutionManager`], which drives
//! error-guided exploration from a trace specification, and the
//! [`TargetedHaltsOnTraces`] that accounts for the traces that were never
//! confirmed.

use std::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    constant::{MAX_CONFIDENCE, MIN_CONFIDENCE, VERY_CONFIDENT},
    executor::HaltReason,
    program::{BlockId, FunctionId, Program},
    searcher::{States, StatesEvent, Subscriber},
    state::ExecutionState,
    target::{
        forest::TargetToStates,
        manager,
        spec::{LocationSpec, TraceSpec},
        DistanceCalculator,
        ReachWithError,
        Target,
        TargetCache,
        TargetForest,
        TargetsSet,
        WeightResult,
    },
};

/// A trace whose error was reproduced.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TruePositive {
    pub trace_id: String,
    pub error:    ReachWithError,

    /// Whether the trace only asked for its final location to be reachable.
    pub reachable: bool,
}

/// A trace whose error was not reproduced, with the engine's confidence that
/// the error cannot occur.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FalsePositive {
    pub trace_id:   String,
    pub errors:     Vec<ReachWithError>,
    pub confidence: f64,

    /// The halt reason that cost the most confidence.
    pub reason: HaltReason,

    /// The option that should be raised to gain confidence.
    pub hint: String,
}

/// Turns trace specifications into target forests and records the traces
/// that states confirm.
#[derive(Debug)]
pub struct TargetedExecutionManager {
    distance:        Rc<DistanceCalculator>,
    targets:         Rc<TargetCache>,
    broken_traces:   BTreeSet<String>,
    reported_traces: BTreeSet<String>,
    true_positives:  Vec<TruePositive>,
}

impl TargetedExecutionManager {
    #[must_use]
    pub fn new(distance: Rc<DistanceCalculator>, targets: Rc<TargetCache>) -> Self {
        Self {
            distance,
            targets,
            broken_traces: BTreeSet::new(),
            reported_traces: BTreeSet::new(),
            true_positives: Vec::new(),
        }
    }

    fn program(&self) -> &Program {
        self.distance.graph().program()
    }

    /// Gets the identifiers of the traces that could not be mapped onto the
    /// program.
    #[must_use]
    pub fn broken_traces(&self) -> &BTreeSet<String> {
        &self.broken_traces
    }

    /// Gets the identifiers of the traces that have been confirmed.
    #[must_use]
    pub fn reported_traces(&self) -> &BTreeSet<String> {
        &self.reported_traces
    }

    #[must_use]
    pub fn true_positives(&self) -> &[TruePositive] {
        &self.true_positives
    }

    fn blocks_of(&self, location: &LocationSpec) -> BTreeSet<BlockId> {
        let program = self.program();
        program
            .functions()
            .iter()
            .filter(|f| {
                f.source_file.as_ref().map_or(true, |file| location.is_inside_file(file))
            })
            .flat_map(|f| f.blocks.iter())
            .filter_map(|b| program.block(*b).ok())
            .filter(|b| location.is_inside_block(b))
            .map(|b| b.id)
            .collect()
    }

    /// Maps the locations of `trace` onto blocks.
    ///
    /// Locations that match no block are dropped, unless it is the final
    /// location, in which case the trace cannot be followed at all.
    fn resolve_locations(
        &self,
        trace: &TraceSpec,
        blocks: &BTreeMap<LocationSpec, BTreeSet<BlockId>>,
    ) -> Option<Vec<(LocationSpec, BTreeSet<BlockId>)>> {
        let mut resolved = Vec::new();
        for (index, location) in trace.locations.iter().enumerate() {
            match blocks.get(location).filter(|b| !b.is_empty()) {
                Some(found) => resolved.push((location.clone(), found.clone())),
                None if index + 1 == trace.locations.len() => {
                    warn!(
                        "Trace {} is malformed! {} at location {location}, so skipping this trace.",
                        trace.id,
                        ReachWithError::errors_string(&trace.errors)
                    );
                    return None;
                }
                None => warn!(trace = %trace.id, %location, "Location matches no code and is skipped"),
            }
        }
        Some(resolved)
    }

    fn resolve_entry_function(&self, resolved: &[(LocationSpec, BTreeSet<BlockId>)]) -> Option<FunctionId> {
        let (_, blocks) = resolved.first()?;
        let block = blocks.first()?;
        Some(self.program().block(*block).ok()?.function)
    }

    /// Builds one target forest per entry function from `traces`.
    ///
    /// Every location but the last of a trace becomes a set of block targets,
    /// and the last becomes a set of error targets. Traces that cannot be
    /// mapped are recorded as broken.
    pub fn prepare_targets(&mut self, traces: &[TraceSpec]) -> BTreeMap<FunctionId, TargetForest> {
        let blocks: BTreeMap<LocationSpec, BTreeSet<BlockId>> = traces
            .iter()
            .flat_map(|t| t.locations.iter())
            .map(|l| (l.clone(), self.blocks_of(l)))
            .collect();

        let mut forests: BTreeMap<FunctionId, TargetForest> = BTreeMap::new();
        for trace in traces {
            let Some(resolved) = self.resolve_locations(trace, &blocks) else {
                self.broken_traces.insert(trace.id.clone());
                continue;
            };
            let Some(entry) = self.resolve_entry_function(&resolved) else {
                warn!(
                    "Trace {} is malformed! Can't resolve entry function, so skipping this trace.",
                    trace.id
                );
                self.broken_traces.insert(trace.id.clone());
                continue;
            };

            let last = resolved.len() - 1;
            let sets: Vec<TargetsSet> = resolved
                .iter()
                .enumerate()
                .map(|(index, (location, blocks))| {
                    TargetsSet::new(blocks.iter().map(|block| {
                        if index == last {
                            self.targets.reproduce_error(
                                trace.errors.clone(),
                                trace.id.clone(),
                                location.error_location(),
                                *block,
                            )
                        } else {
                            self.targets.reach_block(*block, false)
                        }
                    }))
                })
                .collect();
            forests
                .entry(entry)
                .or_insert_with(|| TargetForest::with_entry(Some(entry)))
                .add_trace(&sets);
        }
        forests
    }

    /// Reports that `state` failed with `error` where no trace expected it.
    pub fn report_false_negative(&self, state: &ExecutionState, error: ReachWithError) {
        let location = self
            .program()
            .instruction(state.prev_pc)
            .ok()
            .and_then(|i| i.location.as_ref())
            .map_or_else(|| "unknown location".to_string(), ToString::to_string);
        warn!("100.00% {error} False Negative at: {location}");
    }

    /// Records that `state` failed with `error`, confirming every trace whose
    /// final target the state is at.
    ///
    /// Returns `true` if some trace was confirmed.
    pub fn report_true_positive(&mut self, state: &mut ExecutionState, error: ReachWithError) -> bool {
        state.error = error;
        let mut reported = false;
        for target in state.target_forest.targets() {
            let Some(id) = target.trace_id() else {
                continue;
            };
            if !target.is_that_error(error)
                || self.broken_traces.contains(id)
                || self.reported_traces.contains(id)
            {
                continue;
            }
            if manager::is_reached_target(self.program(), state, &target) != Some(WeightResult::Done) {
                continue;
            }

            let reachable = target.is_that_error(ReachWithError::Reachable);
            if reachable {
                info!("100.00% {error} Reachable at trace {id}");
            } else {
                info!("100.00% {error} True Positive at trace {id}");
            }
            target.set_reported(true);
            self.reported_traces.insert(id.to_string());
            self.true_positives.push(TruePositive {
                trace_id: id.to_string(),
                error,
                reachable,
            });
            reported = true;
        }
        reported
    }

    /// Divides the confidence of each trace among the touched states that can
    /// still reach it.
    pub fn update(&mut self, states: &mut States, event: &StatesEvent) {
        let local = event.local_states();
        let mut reachable = TargetToStates::new();
        for id in &local {
            let Some(state) = states.get(id) else {
                continue;
            };
            for target in &state.targets {
                let distance = manager::distance_with(&self.distance, state, target);
                if distance.result != WeightResult::Miss {
                    reachable.entry(target.clone()).or_default().insert(*id);
                }
            }
        }
        for id in &local {
            if let Some(state) = states.get_mut(id) {
                state.target_forest.divide_confidence_by_states(&reachable);
            }
        }
    }
}

impl Subscriber for TargetedExecutionManager {
    fn update(&mut self, states: &mut States, event: &StatesEvent) {
        TargetedExecutionManager::update(self, states, event);
    }
}

/// Accumulates, for every trace of a forest, the confidence lost to each
/// reason that states were halted for.
#[derive(Clone, Debug, Default)]
pub struct TargetedHaltsOnTraces {
    traces: BTreeMap<TargetsSet, BTreeMap<HaltReason, f64>>,
}

impl TargetedHaltsOnTraces {
    /// Starts accounting for the traces of `forest`.
    #[must_use]
    pub fn new(forest: &TargetForest) -> Self {
        let traces = forest
            .leafs()
            .into_iter()
            .map(|(set, _)| (set, BTreeMap::new()))
            .collect();
        Self { traces }
    }

    /// Adds the confidence left in the traces of `forest` to what was lost to
    /// `reason`.
    pub fn subtract_confidences_from(&mut self, forest: &TargetForest, reason: HaltReason) {
        for (set, confidence) in forest.leafs() {
            let Some(reasons) = self.traces.get_mut(&set) else {
                continue;
            };
            *reasons.entry(reason).or_insert(MIN_CONFIDENCE) += confidence;
        }
    }

    fn total_and_top_contributor(reasons: &BTreeMap<HaltReason, f64>) -> (f64, HaltReason) {
        let mut confidence = MAX_CONFIDENCE;
        let mut top = (MIN_CONFIDENCE, HaltReason::MaxTime);
        for (reason, lost) in reasons {
            if *lost > top.0 {
                top = (*lost, *reason);
            }
            confidence -= lost;
        }
        (confidence, top.1)
    }

    /// Reports every trace that no state confirmed.
    ///
    /// When some state could still reach a target, the confidence is capped
    /// below "very confident".
    pub fn report_false_positives(&self, can_reach_some_target: bool) -> Vec<FalsePositive> {
        let mut reports = Vec::new();
        for (set, reasons) in &self.traces {
            let error_targets = || set.targets().iter().filter(|t| t.should_fail_on_this_target());
            if error_targets().any(|t| t.is_reported()) {
                continue;
            }
            let Some(target) = error_targets().next() else {
                continue;
            };
            let Target::ReproduceError { errors, id, .. } = target.target() else {
                continue;
            };

            let (mut confidence, mut reason) = Self::total_and_top_contributor(reasons);
            if can_reach_some_target && confidence >= VERY_CONFIDENT {
                confidence = VERY_CONFIDENT;
                reason = HaltReason::MaxTime;
            }
            let hint = option_to_raise(reason);
            warn!(
                "{confidence:.2}% {} False Positive at trace {id}, increase {hint} to be more confident",
                ReachWithError::errors_string(errors)
            );
            target.set_reported(true);
            reports.push(FalsePositive {
                trace_id: id.clone(),
                errors: errors.clone(),
                confidence,
                reason,
                hint: hint.to_string(),
            });
        }
        reports
    }
}

/// Gets the name of the budget to raise when `reason` cost confidence.
#[must_use]
pub fn option_to_raise(reason: HaltReason) -> &'static str {
    match reason {
        HaltReason::MaxSolverTime => "max-solver-time",
        HaltReason::MaxStackFrames => "max-stack-frames",
        HaltReason::MaxTests => "max-tests",
        HaltReason::MaxInstructions => "max-instructions",
        HaltReason::MaxSteppedInstructions => "max-stepped-instructions",
        HaltReason::MaxCycles => "max-cycles",
        HaltReason::MaxForks => "max-forks",
        HaltReason::CovCheck => "cov-check",
        HaltReason::MaxDepth => "max-depth",
        _ => "max-time",
    }
}
