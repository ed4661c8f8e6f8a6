//! This module contains the hooks through which a client can stop a run of
//! the executor from the outside.
//!
//! # Polling
//!
//! A stop request is only noticed between instructions, and only on every
//! [`Watchdog::poll_every`]th step. A step that is waiting on the solver ends
//! when its query times out, so the latency of a stop is bounded by the
//! solver timeout plus the polling interval.

use std::{
    fmt::Debug,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::constant::DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;

/// A shared, dynamically dispatched [`Watchdog`].
pub type DynWatchdog = Rc<dyn Watchdog>;

/// Decides whether a run should be interrupted.
///
/// When it answers `true`, the executor halts with
/// [`crate::executor::HaltReason::Interrupt`]. The states that are still live
/// are terminated as interrupted and their confidence is released, so the
/// returned result remains complete.
pub trait Watchdog: Debug {
    /// Checks whether the run should stop now.
    #[must_use]
    fn should_stop(&self) -> bool;

    /// Gets the number of executed steps between two calls to
    /// [`Self::should_stop`].
    #[must_use]
    fn poll_every(&self) -> usize;
}

/// A watchdog that never interrupts a run. Runs are then bounded by the
/// budgets in the executor's configuration alone.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LazyWatchdog;

impl LazyWatchdog {
    #[must_use]
    pub fn in_rc(self) -> DynWatchdog {
        Rc::new(self)
    }
}

impl Watchdog for LazyWatchdog {
    fn should_stop(&self) -> bool {
        false
    }

    fn poll_every(&self) -> usize {
        usize::MAX
    }
}

/// A watchdog backed by a shared flag, which can be raised from another
/// thread or from a signal handler to interrupt the run.
#[derive(Clone, Debug)]
pub struct FlagWatchdog {
    stop:  Arc<AtomicBool>,
    every: usize,
}

impl FlagWatchdog {
    /// Creates a watchdog that stops the run once `stop` is set, checking it
    /// every [`DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS`] steps.
    #[must_use]
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        Self {
            stop,
            every: DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS,
        }
    }

    /// Checks the flag every `steps` steps instead. Zero is treated as one.
    #[must_use]
    pub fn polling_every(mut self, steps: usize) -> Self {
        self.every = steps.max(1);
        self
    }

    #[must_use]
    pub fn in_rc(self) -> DynWatchdog {
        Rc::new(self)
    }
}

impl Watchdog for FlagWatchdog {
    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn poll_every(&self) -> usize {
        self.every
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use crate::watchdog::{FlagWatchdog, LazyWatchdog};

    #[test]
    fn can_stop_through_the_shared_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let watchdog = FlagWatchdog::new(flag.clone()).polling_every(0).in_rc();
        assert_eq!(watchdog.poll_every(), 1);
        assert!(!watchdog.should_stop());

        flag.store(true, Ordering::Relaxed);
        assert!(watchdog.should_stop());
    }

    #[test]
    fn lazy_watchdog_never_stops() {
        let watchdog = LazyWatchdog.in_rc();
        assert!(!watchdog.should_stop());
        assert_eq!(watchdog.poll_every(), usize::MAX);
    }
}
