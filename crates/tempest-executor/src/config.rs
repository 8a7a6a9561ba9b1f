//! Topology options and per-component configuration normalization.
//!
//! Options are string-keyed JSON values, worker-global by default. A component
//! may override only the keys in [`COMPONENT_OVERRIDABLE`]; everything else in
//! its JSON option blob is discarded during normalization, so for every
//! non-overridable key the effective value always equals the topology value.

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Log every received tuple before dispatch.
pub const DEBUG: &str = "topology.debug";

/// Maximum unacked tuple trees per spout task.
pub const MAX_SPOUT_PENDING: &str = "topology.max.spout.pending";

/// Upper bound on component parallelism.
pub const MAX_TASK_PARALLELISM: &str = "topology.max.task.parallelism";

/// Transactional topology identifier.
pub const TRANSACTIONAL_ID: &str = "topology.transactional.id";

/// System tick interval in seconds; absent disables ticks.
pub const TICK_TUPLE_FREQ_SECS: &str = "topology.tick.tuple.freq.secs";

/// Sleep duration of the sleeping spout wait strategy.
pub const SLEEP_SPOUT_WAIT_STRATEGY_TIME_MS: &str = "topology.sleep.spout.wait.strategy.time.ms";

/// Spout wait strategy selector.
pub const SPOUT_WAIT_STRATEGY: &str = "topology.spout.wait.strategy";

/// Window length for windowed bolts, in tuples.
pub const BOLTS_WINDOW_LENGTH_COUNT: &str = "topology.bolts.window.length.count";

/// Window length for windowed bolts, in milliseconds.
pub const BOLTS_WINDOW_LENGTH_DURATION_MS: &str = "topology.bolts.window.length.duration.ms";

/// Sliding interval for windowed bolts, in tuples.
pub const BOLTS_SLIDING_INTERVAL_COUNT: &str = "topology.bolts.sliding.interval.count";

/// Sliding interval for windowed bolts, in milliseconds.
pub const BOLTS_SLIDING_INTERVAL_DURATION_MS: &str = "topology.bolts.sliding.interval.duration.ms";

/// Field carrying the event timestamp for windowed bolts.
pub const BOLTS_TUPLE_TIMESTAMP_FIELD_NAME: &str = "topology.bolts.tuple.timestamp.field.name";

/// Maximum out-of-orderness of tuple timestamps, in milliseconds.
pub const BOLTS_TUPLE_TIMESTAMP_MAX_LAG_MS: &str = "topology.bolts.tuple.timestamp.max.lag.ms";

/// Field carrying the message id for windowed bolts.
pub const BOLTS_MESSAGE_ID_FIELD_NAME: &str = "topology.bolts.message.id.field.name";

/// State provider implementation for stateful bolts.
pub const STATE_PROVIDER: &str = "topology.state.provider";

/// Options handed to the state provider.
pub const STATE_PROVIDER_CONFIG: &str = "topology.state.provider.config";

/// Stream receiving tuples that arrive after their window closed.
pub const BOLTS_LATE_TUPLE_STREAM: &str = "topology.bolts.late.tuple.stream";

/// Capacity of the executor's outbound transfer queue, in events.
pub const EXECUTOR_SEND_BUFFER_SIZE: &str = "topology.executor.send.buffer.size";

/// Capacity of the executor's receive queue, in events.
pub const EXECUTOR_RECEIVE_BUFFER_SIZE: &str = "topology.executor.receive.buffer.size";

/// Bounded wait of the consumer on an empty queue, in milliseconds.
pub const QUEUE_WAIT_TIMEOUT_MILLIS: &str = "topology.disruptor.wait.timeout.millis";

/// Publisher-side batch size before events become visible.
pub const QUEUE_BATCH_SIZE: &str = "topology.disruptor.batch.size";

/// Maximum age of a partially-filled publisher batch, in milliseconds.
pub const QUEUE_BATCH_TIMEOUT_MILLIS: &str = "topology.disruptor.batch.timeout.millis";

/// Master switch for watermark-driven backpressure.
pub const BACKPRESSURE_ENABLE: &str = "topology.backpressure.enable";

/// High watermark as a fraction of receive-queue capacity.
pub const BACKPRESSURE_HIGH_WATERMARK: &str = "backpressure.disruptor.high.watermark";

/// Low watermark as a fraction of receive-queue capacity.
pub const BACKPRESSURE_LOW_WATERMARK: &str = "backpressure.disruptor.low.watermark";

/// Whether message timeouts (and therefore spout ticks) are in effect.
pub const ENABLE_MESSAGE_TIMEOUTS: &str = "topology.enable.message.timeouts";

/// Seconds before an unacked tuple tree is failed.
pub const MESSAGE_TIMEOUT_SECS: &str = "topology.message.timeout.secs";

/// Maximum task errors reported to cluster state per throttle window.
pub const MAX_ERROR_REPORT_PER_INTERVAL: &str = "topology.max.error.report.per.interval";

/// Length of the error-report throttle window, in seconds.
pub const ERROR_THROTTLE_INTERVAL_SECS: &str = "topology.error.throttle.interval.secs";

/// Number of event-logger tasks in the topology.
pub const EVENTLOGGER_EXECUTORS: &str = "topology.eventlogger.executors";

/// Fraction of executed/acked/failed events sampled into stats.
pub const STATS_SAMPLE_RATE: &str = "topology.stats.sample.rate";

/// Keys a component JSON blob may override; all other keys are worker-global.
pub const COMPONENT_OVERRIDABLE: &[&str] = &[
    DEBUG,
    MAX_SPOUT_PENDING,
    MAX_TASK_PARALLELISM,
    TRANSACTIONAL_ID,
    TICK_TUPLE_FREQ_SECS,
    SLEEP_SPOUT_WAIT_STRATEGY_TIME_MS,
    SPOUT_WAIT_STRATEGY,
    BOLTS_WINDOW_LENGTH_COUNT,
    BOLTS_WINDOW_LENGTH_DURATION_MS,
    BOLTS_SLIDING_INTERVAL_COUNT,
    BOLTS_SLIDING_INTERVAL_DURATION_MS,
    BOLTS_TUPLE_TIMESTAMP_FIELD_NAME,
    BOLTS_TUPLE_TIMESTAMP_MAX_LAG_MS,
    BOLTS_MESSAGE_ID_FIELD_NAME,
    STATE_PROVIDER,
    STATE_PROVIDER_CONFIG,
    BOLTS_LATE_TUPLE_STREAM,
];

/// Errors raised while parsing or normalizing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The component option blob is not valid JSON.
    #[error("invalid component config JSON: {0}")]
    InvalidComponentJson(#[from] serde_json::Error),

    /// The component option blob is valid JSON but not an object.
    #[error("component config must be a JSON object, got {0}")]
    NotAnObject(String),
}

/// String-keyed topology option map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopologyConfig(FxHashMap<String, JsonValue>);

impl TopologyConfig {
    /// Creates an empty option map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Sets `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Returns `key` as a bool, or `default` when absent or mistyped.
    #[must_use]
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(JsonValue::as_bool).unwrap_or(default)
    }

    /// Returns `key` as an unsigned integer.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(JsonValue::as_u64)
    }

    /// Returns `key` as an unsigned integer, or `default` when absent.
    #[must_use]
    pub fn get_u64_or(&self, key: &str, default: u64) -> u64 {
        self.get_u64(key).unwrap_or(default)
    }

    /// Returns `key` as a float, or `default` when absent.
    #[must_use]
    pub fn get_f64_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(JsonValue::as_f64).unwrap_or(default)
    }

    /// Returns `key` as a string slice.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(JsonValue::as_str)
    }

    /// Number of options present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no options are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(key, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }
}

/// Computes a component's effective configuration.
///
/// The component blob is parsed, stripped of every key outside
/// [`COMPONENT_OVERRIDABLE`], and overlaid on the topology options (component
/// wins). Normalizing an already-normalized configuration is a no-op.
///
/// # Errors
///
/// Returns [`ConfigError`] when the blob is not a JSON object.
pub fn normalized_component_config(
    topology: &TopologyConfig,
    json_conf: Option<&str>,
) -> Result<TopologyConfig, ConfigError> {
    let mut effective = topology.clone();
    let Some(blob) = json_conf else {
        return Ok(effective);
    };

    let parsed: JsonValue = serde_json::from_str(blob)?;
    let JsonValue::Object(component) = parsed else {
        return Err(ConfigError::NotAnObject(parsed.to_string()));
    };

    for (key, value) in component {
        if COMPONENT_OVERRIDABLE.contains(&key.as_str()) {
            effective.set(key, value);
        }
    }
    Ok(effective)
}
