//! Executor-level throughput counters.
//!
//! Counters are written only by the event-handler thread; other threads read
//! consistent copies via [`ExecutorStats::snapshot`]. Emitted/transferred
//! counts are exact. Executed/acked/failed counts are sampled the way the
//! runtime's stats have always been sampled: every `1/rate`-th event is
//! counted with weight `1/rate`.

use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::tuple::{ComponentId, StreamId};

/// Point-in-time copy of an executor's counters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Tuples emitted per stream.
    pub emitted: FxHashMap<StreamId, u64>,
    /// Tuple transfers (one per destination task) per stream.
    pub transferred: FxHashMap<StreamId, u64>,
    /// Sampled executed counts per `(source component, stream)`.
    pub executed: FxHashMap<(ComponentId, StreamId), u64>,
    /// Sampled ack counts per `(source component, stream)`.
    pub acked: FxHashMap<(ComponentId, StreamId), u64>,
    /// Sampled fail counts per `(source component, stream)`.
    pub failed: FxHashMap<(ComponentId, StreamId), u64>,
}

#[derive(Default)]
struct StatsInner {
    snapshot: StatsSnapshot,
    sample_counter: u64,
}

/// Counter accumulator of one executor.
pub struct ExecutorStats {
    inner: Mutex<StatsInner>,
    sample_period: u64,
}

impl ExecutorStats {
    /// Creates an accumulator sampling executed/acked/failed events at
    /// `sample_rate` (a fraction in `(0, 1]`).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(sample_rate: f64) -> Self {
        let sample_period = if sample_rate > 0.0 {
            (1.0 / sample_rate).round().max(1.0) as u64
        } else {
            u64::MAX
        };
        Self {
            inner: Mutex::new(StatsInner::default()),
            sample_period,
        }
    }

    /// Records one emit on `stream`.
    pub fn record_emit(&self, stream: &str) {
        let mut inner = self.inner.lock();
        *inner
            .snapshot
            .emitted
            .entry(stream.to_owned())
            .or_default() += 1;
    }

    /// Records `count` transfers on `stream`.
    pub fn record_transfers(&self, stream: &str, count: u64) {
        let mut inner = self.inner.lock();
        *inner
            .snapshot
            .transferred
            .entry(stream.to_owned())
            .or_default() += count;
    }

    /// Records one executed tuple from `(component, stream)`, sampled.
    pub fn record_executed(&self, component: &str, stream: &str) {
        self.record_sampled(component, stream, Kind::Executed);
    }

    /// Records one acked tuple from `(component, stream)`, sampled.
    pub fn record_acked(&self, component: &str, stream: &str) {
        self.record_sampled(component, stream, Kind::Acked);
    }

    /// Records one failed tuple from `(component, stream)`, sampled.
    pub fn record_failed(&self, component: &str, stream: &str) {
        self.record_sampled(component, stream, Kind::Failed);
    }

    fn record_sampled(&self, component: &str, stream: &str, kind: Kind) {
        let mut inner = self.inner.lock();
        inner.sample_counter += 1;
        if inner.sample_counter % self.sample_period != 0 {
            return;
        }
        let key = (component.to_owned(), stream.to_owned());
        let weight = self.sample_period;
        let map = match kind {
            Kind::Executed => &mut inner.snapshot.executed,
            Kind::Acked => &mut inner.snapshot.acked,
            Kind::Failed => &mut inner.snapshot.failed,
        };
        *map.entry(key).or_default() += weight;
    }

    /// Returns a consistent copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().snapshot.clone()
    }
}

enum Kind {
    Executed,
    Acked,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_transfer_counts_are_exact() {
        let stats = ExecutorStats::new(0.05);
        for _ in 0..7 {
            stats.record_emit("default");
        }
        stats.record_transfers("default", 3);

        let snap = stats.snapshot();
        assert_eq!(snap.emitted.get("default"), Some(&7));
        assert_eq!(snap.transferred.get("default"), Some(&3));
    }

    #[test]
    fn test_sampled_counts_approximate_totals() {
        let stats = ExecutorStats::new(0.05);
        for _ in 0..2000 {
            stats.record_executed("src", "default");
        }
        let snap = stats.snapshot();
        assert_eq!(snap.executed.get(&("src".to_owned(), "default".to_owned())), Some(&2000));
    }

    #[test]
    fn test_full_rate_counts_everything() {
        let stats = ExecutorStats::new(1.0);
        for _ in 0..5 {
            stats.record_acked("src", "default");
        }
        let snap = stats.snapshot();
        assert_eq!(snap.acked.get(&("src".to_owned(), "default".to_owned())), Some(&5));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let stats = ExecutorStats::new(1.0);
        stats.record_emit("s");
        let snap = stats.snapshot();
        stats.record_emit("s");
        assert_eq!(snap.emitted.get("s"), Some(&1));
        assert_eq!(stats.snapshot().emitted.get("s"), Some(&2));
    }
}
