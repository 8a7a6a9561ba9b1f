//! Executor error kinds and rate-limited error reporting.
//!
//! Errors escaping the event loop are mapped by the loop runner onto the
//! worker's suicide function. User-logic errors are first reported through
//! the cluster state, throttled per window; only when the throttle is
//! exceeded does the error escalate out of the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::component::UserError;
use crate::config::ConfigError;
use crate::queue::QueueError;
use crate::topology::TopologyError;
use crate::tuple::TaskId;
use crate::worker::{ClusterState, ClusterStateError};

/// Errors raised by the executor core.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// User spout/bolt callback failed.
    #[error("user logic error in {component}[{task}]: {source}")]
    UserLogic {
        /// Component the logic belongs to.
        component: String,
        /// Task whose callback failed.
        task: TaskId,
        /// The user error.
        #[source]
        source: UserError,
    },

    /// A queue operation was interrupted by shutdown.
    #[error(transparent)]
    QueueInterrupted(#[from] QueueError),

    /// Construction-time configuration problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// Cluster-state access failed.
    #[error(transparent)]
    ClusterState(#[from] ClusterStateError),

    /// Unrecoverable internal failure.
    #[error("fatal executor error: {0}")]
    Fatal(String),
}

impl From<ConfigError> for ExecError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<TopologyError> for ExecError {
    fn from(e: TopologyError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<crate::grouping::GroupingError> for ExecError {
    fn from(e: crate::grouping::GroupingError) -> Self {
        Self::Config(e.to_string())
    }
}

struct ReportWindow {
    started: Instant,
    reported: u64,
}

/// Reports task errors to cluster state, at most `max_per_interval` per
/// throttle window.
pub struct ErrorReporter {
    cluster_state: Arc<dyn ClusterState>,
    topology_id: String,
    component_id: String,
    host: String,
    port: u16,
    max_per_interval: u64,
    interval: Duration,
    window: Mutex<ReportWindow>,
}

impl ErrorReporter {
    /// Creates a reporter for one executor.
    #[must_use]
    pub fn new(
        cluster_state: Arc<dyn ClusterState>,
        topology_id: impl Into<String>,
        component_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        max_per_interval: u64,
        interval: Duration,
    ) -> Self {
        Self {
            cluster_state,
            topology_id: topology_id.into(),
            component_id: component_id.into(),
            host: host.into(),
            port,
            max_per_interval,
            interval,
            window: Mutex::new(ReportWindow {
                started: Instant::now(),
                reported: 0,
            }),
        }
    }

    /// Reports `error` for `task`.
    ///
    /// Returns false when the throttle window is exhausted, in which case the
    /// caller escalates instead of continuing.
    pub fn report(&self, task: TaskId, error: &str) -> bool {
        {
            let mut window = self.window.lock();
            if window.started.elapsed() >= self.interval {
                window.started = Instant::now();
                window.reported = 0;
            }
            if window.reported >= self.max_per_interval {
                warn!(
                    component = %self.component_id,
                    task = %task,
                    "error report throttle exceeded"
                );
                return false;
            }
            window.reported += 1;
        }

        if let Err(e) = self.cluster_state.report_error(
            &self.topology_id,
            &self.component_id,
            task,
            &self.host,
            self.port,
            error,
        ) {
            warn!(component = %self.component_id, error = %e, "failed to report task error");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingState {
        reports: AtomicUsize,
        hosts: Mutex<Vec<String>>,
    }

    impl ClusterState for Arc<RecordingState> {
        fn report_error(
            &self,
            _topology_id: &str,
            _component_id: &str,
            _task_id: TaskId,
            host: &str,
            _port: u16,
            _error: &str,
        ) -> Result<(), ClusterStateError> {
            self.reports.fetch_add(1, Ordering::SeqCst);
            self.hosts.lock().push(host.to_owned());
            Ok(())
        }
    }

    fn recording() -> (Arc<RecordingState>, ErrorReporter) {
        let state = Arc::new(RecordingState {
            reports: AtomicUsize::new(0),
            hosts: Mutex::new(Vec::new()),
        });
        let reporter = ErrorReporter::new(
            Arc::new(Arc::clone(&state)),
            "topo",
            "comp",
            "",
            6700,
            3,
            Duration::from_secs(60),
        );
        (state, reporter)
    }

    #[test]
    fn test_reports_until_throttled() {
        let (state, reporter) = recording();
        for _ in 0..3 {
            assert!(reporter.report(TaskId(1), "boom"));
        }
        assert!(!reporter.report(TaskId(1), "boom"));
        assert_eq!(state.reports.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_window_reset_restores_budget() {
        let state = Arc::new(RecordingState {
            reports: AtomicUsize::new(0),
            hosts: Mutex::new(Vec::new()),
        });
        let reporter = ErrorReporter::new(
            Arc::new(Arc::clone(&state)),
            "topo",
            "comp",
            "",
            6700,
            1,
            Duration::from_millis(20),
        );

        assert!(reporter.report(TaskId(1), "a"));
        assert!(!reporter.report(TaskId(1), "b"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(reporter.report(TaskId(1), "c"));
        assert_eq!(state.reports.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_host_is_reported_verbatim() {
        let (state, reporter) = recording();
        assert!(reporter.report(TaskId(2), "x"));
        assert_eq!(state.hosts.lock().as_slice(), &[String::new()]);
    }
}
