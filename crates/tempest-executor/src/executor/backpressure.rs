//! Watermark-driven backpressure coordination with the worker.
//!
//! Wires the receive queue's watermark callbacks to the executor-scoped
//! backpressure flag and the worker's backpressure trigger. Transitions are
//! edge-triggered: the worker is notified only when the flag actually flips,
//! never on repeated crossings in the same direction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::queue::WatermarkObserver;
use crate::worker::BackpressureTrigger;

/// Flips the executor's backpressure flag on watermark crossings.
pub struct BackpressureCoordinator {
    flag: Arc<AtomicBool>,
    trigger: BackpressureTrigger,
    executor: String,
}

impl BackpressureCoordinator {
    /// Creates a coordinator around the executor's shared flag.
    #[must_use]
    pub fn new(flag: Arc<AtomicBool>, trigger: BackpressureTrigger, executor: impl Into<String>) -> Self {
        Self {
            flag,
            trigger,
            executor: executor.into(),
        }
    }
}

impl WatermarkObserver for BackpressureCoordinator {
    fn high_water_mark(&self) {
        if self
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            debug!(executor = %self.executor, "congested, backpressure on");
            self.trigger.notify();
        }
    }

    fn low_water_mark(&self) {
        if self
            .flag
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            debug!(executor = %self.executor, "drained, backpressure off");
            self.trigger.notify();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_notifies_only_on_transitions() {
        let flag = Arc::new(AtomicBool::new(false));
        let trigger = BackpressureTrigger::new();
        let coordinator =
            BackpressureCoordinator::new(Arc::clone(&flag), trigger.clone(), "test[1 1]");

        coordinator.high_water_mark();
        assert!(flag.load(Ordering::Acquire));
        assert!(trigger.wait(Duration::from_millis(1)));

        // Repeated high crossings do not notify again.
        coordinator.high_water_mark();
        assert!(!trigger.wait(Duration::from_millis(1)));

        coordinator.low_water_mark();
        assert!(!flag.load(Ordering::Acquire));
        assert!(trigger.wait(Duration::from_millis(1)));

        coordinator.low_water_mark();
        assert!(!trigger.wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_flag_tracks_last_crossing_direction() {
        let flag = Arc::new(AtomicBool::new(false));
        let coordinator = BackpressureCoordinator::new(
            Arc::clone(&flag),
            BackpressureTrigger::new(),
            "test[1 1]",
        );

        for _ in 0..3 {
            coordinator.high_water_mark();
            assert!(flag.load(Ordering::Acquire));
            coordinator.low_water_mark();
            assert!(!flag.load(Ordering::Acquire));
        }
    }
}
