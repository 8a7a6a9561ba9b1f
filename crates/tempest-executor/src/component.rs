//! User-facing component logic surface.
//!
//! User code plugs into an executor as either a [`Spout`] or a [`Bolt`],
//! wrapped in the [`ComponentLogic`] sum so the event handler can dispatch on
//! the kind. Callbacks are fallible: a returned error is routed through the
//! executor's error reporter and may terminate the worker.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::TopologyConfig;
use crate::executor::bolt::BoltCollector;
use crate::executor::spout::SpoutCollector;
use crate::metrics::{Metric, MetricRegistry};
use crate::topology::ComponentKind;
use crate::tuple::{ComponentId, TaskId, Tuple, Value};

/// Error raised by user logic.
pub type UserError = Box<dyn std::error::Error + Send + Sync>;

/// Per-component event-logger sampling controls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugOptions {
    /// Whether sampled tuples flow to the event-logger stream.
    pub enable: bool,
    /// Percentage of tuples sampled, in `[0, 100]`.
    pub sampling_pct: f64,
}

/// Context handed to user logic at open/prepare time.
pub struct TaskContext {
    /// The task hosting this logic instance.
    pub task_id: TaskId,
    /// The component this task belongs to.
    pub component_id: ComponentId,
    /// The component's effective (normalized) configuration.
    pub config: Arc<TopologyConfig>,
    metrics: Arc<Mutex<MetricRegistry>>,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        component_id: ComponentId,
        config: Arc<TopologyConfig>,
        metrics: Arc<Mutex<MetricRegistry>>,
    ) -> Self {
        Self {
            task_id,
            component_id,
            config,
            metrics,
        }
    }

    /// Registers a metric collected every `interval_secs` for this task.
    ///
    /// Registrations must happen before the executor schedules its metrics
    /// ticks, i.e. inside `open`/`prepare`.
    pub fn register_metric(&self, interval_secs: u64, name: impl Into<String>, metric: Box<dyn Metric>) {
        self.metrics
            .lock()
            .register(interval_secs, self.task_id, name, metric);
    }
}

/// A tuple source.
///
/// `next_tuple` is called by the executor's event loop whenever the topology
/// is active, throttling is off, and the pending-message budget allows.
pub trait Spout: Send {
    /// Called once before any other callback.
    ///
    /// # Errors
    ///
    /// An error aborts executor startup.
    fn open(&mut self, ctx: &TaskContext) -> Result<(), UserError> {
        let _ = ctx;
        Ok(())
    }

    /// Emits the next tuple(s), if any are available.
    ///
    /// # Errors
    ///
    /// Errors are reported and may terminate the worker.
    fn next_tuple(&mut self, collector: &mut SpoutCollector<'_>) -> Result<(), UserError>;

    /// A previously emitted message id completed successfully.
    ///
    /// # Errors
    ///
    /// Errors are reported and may terminate the worker.
    fn ack(&mut self, message_id: &Value) -> Result<(), UserError> {
        let _ = message_id;
        Ok(())
    }

    /// A previously emitted message id failed or timed out.
    ///
    /// # Errors
    ///
    /// Errors are reported and may terminate the worker.
    fn fail(&mut self, message_id: &Value) -> Result<(), UserError> {
        let _ = message_id;
        Ok(())
    }

    /// Called once during shutdown.
    fn close(&mut self) {}
}

/// A tuple transformer.
pub trait Bolt: Send {
    /// Called once before any other callback.
    ///
    /// # Errors
    ///
    /// An error aborts executor startup.
    fn prepare(&mut self, ctx: &TaskContext) -> Result<(), UserError> {
        let _ = ctx;
        Ok(())
    }

    /// Processes one input tuple. The bolt acks or fails explicitly through
    /// the collector; the executor never acks on its behalf.
    ///
    /// # Errors
    ///
    /// Errors are reported and may terminate the worker.
    fn execute(&mut self, tuple: &Tuple, collector: &mut BoltCollector<'_>) -> Result<(), UserError>;

    /// Called once during shutdown.
    fn close(&mut self) {}
}

/// User logic of one task, tagged by component kind.
pub enum ComponentLogic {
    /// Spout logic.
    Spout(Box<dyn Spout>),
    /// Bolt logic.
    Bolt(Box<dyn Bolt>),
}

impl ComponentLogic {
    /// The kind tag of this logic.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Spout(_) => ComponentKind::Spout,
            Self::Bolt(_) => ComponentKind::Bolt,
        }
    }
}

/// Factory instantiating user logic, called once per task.
pub type ComponentLogicFactory = Arc<dyn Fn() -> ComponentLogic + Send + Sync>;
