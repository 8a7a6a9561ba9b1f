//! Task-registered metrics and their tick-driven collection.
//!
//! User logic registers [`Metric`]s at named intervals during open/prepare.
//! The executor schedules one metrics-tick job per distinct interval; on each
//! tick it collects the registered metrics of the addressed task into
//! [`DataPoint`]s and forwards them on the metrics stream together with a
//! [`TaskInfo`] header.

use std::collections::BTreeMap;

use fxhash::FxHashMap;

use crate::tuple::{ComponentId, TaskId, Value};

/// A metric owned by user logic, drained on every metrics tick.
pub trait Metric: Send {
    /// Returns the value accumulated since the last call and resets it.
    /// `None` suppresses the data point.
    fn value_and_reset(&mut self) -> Option<Value>;
}

/// Monotonic counter metric.
#[derive(Debug, Default)]
pub struct CountMetric {
    count: i64,
}

impl CountMetric {
    /// Creates a zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one.
    pub fn incr(&mut self) {
        self.count += 1;
    }

    /// Adds `by`.
    pub fn incr_by(&mut self, by: i64) {
        self.count += by;
    }
}

impl Metric for CountMetric {
    fn value_and_reset(&mut self) -> Option<Value> {
        let value = self.count;
        self.count = 0;
        Some(Value::Int(value))
    }
}

/// One named metric value collected at a tick.
#[derive(Clone, Debug, PartialEq)]
pub struct DataPoint {
    /// Registration name of the metric.
    pub name: String,
    /// The collected value.
    pub value: Value,
}

impl DataPoint {
    /// Renders the data point as a tuple field value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_owned(), Value::Str(self.name.clone()));
        map.insert("value".to_owned(), self.value.clone());
        Value::Map(map)
    }
}

/// Identity header accompanying a batch of data points.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskInfo {
    /// Hostname of the worker; may be empty when lookup failed.
    pub host: String,
    /// Worker port.
    pub port: u16,
    /// Component the metrics belong to.
    pub component_id: ComponentId,
    /// Task the metrics belong to.
    pub task_id: TaskId,
    /// Collection wall time, seconds since the epoch.
    pub timestamp_secs: u64,
    /// Collection interval the metrics were registered at.
    pub interval_secs: u64,
}

impl TaskInfo {
    /// Renders the header as a tuple field value.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("host".to_owned(), Value::Str(self.host.clone()));
        map.insert("port".to_owned(), Value::Int(i64::from(self.port)));
        map.insert(
            "component_id".to_owned(),
            Value::Str(self.component_id.clone()),
        );
        map.insert("task_id".to_owned(), Value::Int(i64::from(self.task_id.0)));
        map.insert(
            "timestamp_secs".to_owned(),
            Value::Int(self.timestamp_secs as i64),
        );
        map.insert(
            "interval_secs".to_owned(),
            Value::Int(self.interval_secs as i64),
        );
        Value::Map(map)
    }
}

/// Registered metrics, `interval -> task -> name -> metric`.
#[derive(Default)]
pub struct MetricRegistry {
    by_interval: FxHashMap<u64, FxHashMap<TaskId, FxHashMap<String, Box<dyn Metric>>>>,
}

impl MetricRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `metric` under `name` for `task` at `interval_secs`.
    pub fn register(
        &mut self,
        interval_secs: u64,
        task: TaskId,
        name: impl Into<String>,
        metric: Box<dyn Metric>,
    ) {
        self.by_interval
            .entry(interval_secs)
            .or_default()
            .entry(task)
            .or_default()
            .insert(name.into(), metric);
    }

    /// Distinct intervals with at least one registration, ascending.
    #[must_use]
    pub fn intervals(&self) -> Vec<u64> {
        let mut intervals: Vec<u64> = self.by_interval.keys().copied().collect();
        intervals.sort_unstable();
        intervals
    }

    /// Drains the metrics of `(interval_secs, task)` into data points,
    /// excluding metrics that yielded no value.
    #[must_use]
    pub fn collect(&mut self, interval_secs: u64, task: TaskId) -> Vec<DataPoint> {
        let Some(metrics) = self
            .by_interval
            .get_mut(&interval_secs)
            .and_then(|tasks| tasks.get_mut(&task))
        else {
            return Vec::new();
        };

        let mut points: Vec<DataPoint> = metrics
            .iter_mut()
            .filter_map(|(name, metric)| {
                metric.value_and_reset().map(|value| DataPoint {
                    name: name.clone(),
                    value,
                })
            })
            .collect();
        points.sort_by(|a, b| a.name.cmp(&b.name));
        points
    }
}
