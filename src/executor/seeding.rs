//! This module contains the replay of seeds by the executor.
//!
//! Until every seed has been followed to the end of its path, the executor
//! steps the states that carry seeds in turn, ahead of whatever the searcher
//! would pick. Each seed gives values to the arrays of its state as they are
//! created, and those values decide which side of a fork the seed goes to.

use tracing::{debug, info, warn};

use crate::{
    executor::Executor,
    expr::{Array, ExprRef},
    state::{ExecutionState, StateId},
};

impl Executor {
    /// Binds the contents of `array` from the next input of every seed of
    /// `state`.
    ///
    /// Returns the reason the state has to end if some seed cannot provide
    /// the contents.
    pub(super) fn bind_seed_inputs(&self, state: &mut ExecutionState, array: &Array) -> Option<String> {
        let config = &self.config.seeding;
        let size = usize::try_from(array.size()).unwrap_or(usize::MAX);
        for info in &mut state.seeds {
            let input = info
                .next_input(array.name(), config.named_seed_matching)
                .map(|o| (o.name.clone(), o.bytes.clone()));
            let Some((name, mut bytes)) = input else {
                if config.zero_seed_extension {
                    info.assignment.bind(array.id(), vec![0; size]);
                } else if !config.allow_seed_extension {
                    return Some("ran out of inputs during seeding".to_string());
                }
                continue;
            };

            let len = bytes.len();
            if (len < size && !config.allow_seed_extension) || (len > size && !config.allow_seed_truncation) {
                return Some(format!(
                    "replace size mismatch: {name}[{len}] vs {}[{size}]",
                    array.name()
                ));
            }
            bytes.resize(size, 0);
            info.assignment.bind(array.id(), bytes);
        }
        None
    }

    /// Binds the arguments of the initial state from the seeds.
    pub(super) fn bind_seed_arguments(&self, state: &mut ExecutionState) -> Option<String> {
        let arrays: Vec<_> = state.symbolics.iter().map(|s| s.array.clone()).collect();
        arrays.iter().find_map(|a| self.bind_seed_inputs(state, a))
    }

    /// Gets the side of `cond` that every seed of `state` takes, if they all
    /// agree.
    pub(super) fn seeded_side(state: &ExecutionState, cond: &ExprRef) -> Option<bool> {
        let mut sides = state.seeds.iter().map(|s| s.assignment.holds(cond));
        let first = sides.next()?;
        sides.all(|s| s == first).then_some(first)
    }

    /// Repairs the seeds of `state` that the constraints added since they were
    /// last checked rule out, by replacing their values with a model of the
    /// path.
    ///
    /// Seeds for which no model can be found are dropped.
    pub(super) fn patch_seeds(&self, state: &mut ExecutionState) {
        let total = state.constraints.len();
        let constraints = &state.constraints;
        let mut patched = 0;
        state.seeds.retain_mut(|info| {
            let fresh = constraints.iter().skip(info.checked);
            let holds = info.checked >= total || info.assignment.satisfies_all(fresh);
            info.checked = total;
            if holds {
                return true;
            }
            match self.solver.get_initial_values(constraints, &constraints.arrays()) {
                Ok(model) => {
                    for (array, bytes) in model.iter() {
                        info.assignment.bind(*array, bytes.clone());
                    }
                    patched += 1;
                    true
                }
                Err(error) => {
                    warn!(seed = %info.seed().id, %error, "Dropping seed that cannot be patched");
                    false
                }
            }
        });
        if patched > 0 {
            warn!(state = %state.id, patched, "Patched seeds that the path rules out");
        }
    }

    /// Picks the next state that carries seeds, going round the live states in
    /// order of identity.
    ///
    /// Returns [`None`] once no state carries a seed, which ends the seeding
    /// phase.
    pub(super) fn next_seeded_state(&mut self) -> Option<StateId> {
        let states = self.objects.states();
        let from = StateId(self.last_seeded.map_or(0, |id| id.0.saturating_add(1)));
        let next = states
            .range(from..)
            .chain(states.range(..from))
            .find(|(_, s)| !s.seeds.is_empty())
            .map(|(id, _)| *id);
        match next {
            Some(id) => {
                debug!(state = %id, "Replaying seeds");
                self.last_seeded = Some(id);
            }
            None => {
                info!("Seeding done");
                self.seeding = false;
            }
        }
        next
    }
}
