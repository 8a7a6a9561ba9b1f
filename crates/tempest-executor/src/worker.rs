//! The worker-side surface an executor is constructed against.
//!
//! [`WorkerHandle`] replaces a string-keyed worker-data bag with typed slots:
//! the shared atomics every executor reads, the static task placement map,
//! the worker-supplied hand-off and abort functions, the shared timer, and
//! the cluster-state client used for error reporting.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use fxhash::{FxHashMap, FxHashSet};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::debug;

use crate::component::DebugOptions;
use crate::config::TopologyConfig;
use crate::grouping::LoadMap;
use crate::timer::Timer;
use crate::topology::WorkerTopology;
use crate::tuple::{ComponentId, TaskId, Tuple};

/// Network identity of a worker process.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkerAddress {
    /// Hostname; may be empty when lookup failed.
    pub host: String,
    /// Listen port.
    pub port: u16,
}

impl WorkerAddress {
    /// Creates an address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Best-effort hostname of this worker.
///
/// Lookup failure yields the empty string rather than an error; reporters
/// must tolerate empty hosts.
#[must_use]
pub fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_default()
}

/// Worker-supplied hand-off for tuples destined to tasks on this worker.
pub type TransferFn = Arc<dyn Fn(TaskId, Tuple) + Send + Sync>;

/// Aborts the worker process on a fatal executor error.
pub type SuicideFn = Arc<dyn Fn() + Send + Sync>;

/// Errors from the cluster-state client.
#[derive(Debug, thiserror::Error)]
pub enum ClusterStateError {
    /// The state store could not be reached or rejected the write.
    #[error("cluster state unavailable: {0}")]
    Unavailable(String),
}

/// Cluster-state client used to record task errors.
pub trait ClusterState: Send + Sync {
    /// Records `error` for `(topology_id, component_id, task_id, host, port)`.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterStateError`] when the write cannot be performed.
    fn report_error(
        &self,
        topology_id: &str,
        component_id: &str,
        task_id: TaskId,
        host: &str,
        port: u16,
        error: &str,
    ) -> Result<(), ClusterStateError>;
}

/// Cluster-state client that only logs, for local mode and tests.
#[derive(Debug, Default)]
pub struct NoopClusterState;

impl ClusterState for NoopClusterState {
    fn report_error(
        &self,
        topology_id: &str,
        component_id: &str,
        task_id: TaskId,
        _host: &str,
        _port: u16,
        error: &str,
    ) -> Result<(), ClusterStateError> {
        debug!(topology_id, component_id, task = %task_id, error, "task error");
        Ok(())
    }
}

struct TriggerInner {
    pending: Mutex<bool>,
    signal: Condvar,
}

/// Handle the backpressure coordinator notifies on every flag transition.
///
/// The worker's backpressure thread blocks in [`wait`](Self::wait); executors
/// call [`notify`](Self::notify) from watermark callbacks.
#[derive(Clone)]
pub struct BackpressureTrigger {
    inner: Arc<TriggerInner>,
}

impl Default for BackpressureTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl BackpressureTrigger {
    /// Creates an unsignaled trigger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TriggerInner {
                pending: Mutex::new(false),
                signal: Condvar::new(),
            }),
        }
    }

    /// Signals the worker backpressure thread.
    pub fn notify(&self) {
        let mut pending = self.inner.pending.lock();
        *pending = true;
        self.inner.signal.notify_all();
    }

    /// Waits up to `timeout` for a signal, consuming it. Returns whether a
    /// signal arrived.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut pending = self.inner.pending.lock();
        if !*pending {
            self.inner.signal.wait_for(&mut pending, timeout);
        }
        std::mem::take(&mut pending)
    }
}

/// Typed view of the worker an executor runs inside.
#[derive(Clone)]
pub struct WorkerHandle {
    /// Id of the running topology.
    pub topology_id: String,
    /// Static topology metadata.
    pub topology: Arc<WorkerTopology>,
    /// Worker-global options.
    pub config: TopologyConfig,
    /// This worker's address.
    pub address: WorkerAddress,
    /// True while the topology is activated.
    pub topology_active: Arc<AtomicBool>,
    /// True while spouts must hold back emission.
    pub throttle_on: Arc<AtomicBool>,
    /// Event-logger sampling controls, keyed by component id (or the
    /// topology id for the topology-wide entry).
    pub component_debug: Arc<RwLock<FxHashMap<ComponentId, DebugOptions>>>,
    /// Static task placement.
    pub task_to_worker: Arc<FxHashMap<TaskId, WorkerAddress>>,
    /// Dynamic downstream load feedback.
    pub load: Arc<RwLock<LoadMap>>,
    /// Hand-off for tuples destined to tasks hosted on this worker.
    pub transfer_fn: TransferFn,
    /// Aborts the worker on fatal errors.
    pub suicide_fn: SuicideFn,
    /// Worker-wide recurring-job scheduler.
    pub user_timer: Arc<Timer>,
    /// Handle the backpressure coordinator notifies.
    pub backpressure_trigger: BackpressureTrigger,
    /// Cluster-state client for error reporting.
    pub cluster_state: Arc<dyn ClusterState>,
}

impl WorkerHandle {
    /// Starts building a handle around `topology`.
    #[must_use]
    pub fn builder(topology_id: impl Into<String>, topology: Arc<WorkerTopology>) -> WorkerHandleBuilder {
        WorkerHandleBuilder {
            topology_id: topology_id.into(),
            topology,
            config: TopologyConfig::new(),
            address: WorkerAddress::new(hostname(), 6700),
            task_to_worker: FxHashMap::default(),
            transfer_fn: None,
            suicide_fn: None,
            cluster_state: None,
        }
    }

    /// Tasks placed on this worker.
    #[must_use]
    pub fn local_tasks(&self) -> FxHashSet<TaskId> {
        self.task_to_worker
            .iter()
            .filter(|(_, address)| **address == self.address)
            .map(|(task, _)| *task)
            .collect()
    }
}

/// Builder for [`WorkerHandle`] with local-mode defaults.
pub struct WorkerHandleBuilder {
    topology_id: String,
    topology: Arc<WorkerTopology>,
    config: TopologyConfig,
    address: WorkerAddress,
    task_to_worker: FxHashMap<TaskId, WorkerAddress>,
    transfer_fn: Option<TransferFn>,
    suicide_fn: Option<SuicideFn>,
    cluster_state: Option<Arc<dyn ClusterState>>,
}

impl WorkerHandleBuilder {
    /// Sets the worker-global options.
    #[must_use]
    pub fn config(mut self, config: TopologyConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets this worker's address.
    #[must_use]
    pub fn address(mut self, address: WorkerAddress) -> Self {
        self.address = address;
        self
    }

    /// Sets the static task placement map.
    #[must_use]
    pub fn task_to_worker(mut self, map: FxHashMap<TaskId, WorkerAddress>) -> Self {
        self.task_to_worker = map;
        self
    }

    /// Sets the local tuple hand-off.
    #[must_use]
    pub fn transfer_fn(mut self, f: TransferFn) -> Self {
        self.transfer_fn = Some(f);
        self
    }

    /// Sets the worker abort function.
    #[must_use]
    pub fn suicide_fn(mut self, f: SuicideFn) -> Self {
        self.suicide_fn = Some(f);
        self
    }

    /// Sets the cluster-state client.
    #[must_use]
    pub fn cluster_state(mut self, state: Arc<dyn ClusterState>) -> Self {
        self.cluster_state = Some(state);
        self
    }

    /// Finalizes the handle. Tasks without an explicit placement are placed
    /// on this worker.
    #[must_use]
    pub fn build(self) -> WorkerHandle {
        let mut task_to_worker = self.task_to_worker;
        for task in self.topology.task_to_component().keys() {
            task_to_worker
                .entry(*task)
                .or_insert_with(|| self.address.clone());
        }

        WorkerHandle {
            topology_id: self.topology_id,
            topology: self.topology,
            config: self.config,
            address: self.address,
            topology_active: Arc::new(AtomicBool::new(true)),
            throttle_on: Arc::new(AtomicBool::new(false)),
            component_debug: Arc::new(RwLock::new(FxHashMap::default())),
            task_to_worker: Arc::new(task_to_worker),
            load: Arc::new(RwLock::new(LoadMap::new())),
            transfer_fn: self.transfer_fn.unwrap_or_else(|| Arc::new(|_, _| {})),
            suicide_fn: self.suicide_fn.unwrap_or_else(|| Arc::new(|| {})),
            user_timer: Arc::new(Timer::new("user-timer")),
            backpressure_trigger: BackpressureTrigger::new(),
            cluster_state: self
                .cluster_state
                .unwrap_or_else(|| Arc::new(NoopClusterState)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::noop_bolt_spec;
    use std::thread;

    #[test]
    fn test_trigger_notify_then_wait() {
        let trigger = BackpressureTrigger::new();
        trigger.notify();
        assert!(trigger.wait(Duration::from_millis(1)));
        // Signal was consumed.
        assert!(!trigger.wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_trigger_wakes_waiter() {
        let trigger = BackpressureTrigger::new();
        let waiter = {
            let trigger = trigger.clone();
            thread::spawn(move || trigger.wait(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(10));
        trigger.notify();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_builder_places_unmapped_tasks_locally() {
        let topology = Arc::new(
            WorkerTopology::builder()
                .component("b", noop_bolt_spec(), vec![TaskId(1), TaskId(2)])
                .build()
                .unwrap(),
        );
        let remote = WorkerAddress::new("other", 6701);
        let mut placement = FxHashMap::default();
        placement.insert(TaskId(2), remote.clone());

        let worker = WorkerHandle::builder("topo-1", topology)
            .address(WorkerAddress::new("here", 6700))
            .task_to_worker(placement)
            .build();

        assert_eq!(worker.task_to_worker.get(&TaskId(2)), Some(&remote));
        assert_eq!(
            worker.task_to_worker.get(&TaskId(1)),
            Some(&WorkerAddress::new("here", 6700))
        );
        assert!(worker.local_tasks().contains(&TaskId(1)));
        assert!(!worker.local_tasks().contains(&TaskId(2)));
    }
}
