//! Tuples, field values, and addressed delivery.
//!
//! A [`Tuple`] is the unit of data flowing between tasks on a named stream.
//! Inside a worker, tuples travel wrapped in an [`AddressedTuple`] that names
//! the destination task (or [`TupleDest::Broadcast`] for every task of the
//! receiving executor).
//!
//! Tuples with the same `(source_task, source_stream)` pair are observed by
//! consumers in publication order.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A numbered instance of a component within the topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub i32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Synthetic source task id for system-originated tuples (ticks, metrics).
pub const SYSTEM_TASK_ID: TaskId = TaskId(-1);

/// Logical stream identifier.
pub type StreamId = String;

/// Component identifier within the topology.
pub type ComponentId = String;

/// Stream carrying system-originated periodic tick tuples.
pub const TICK_STREAM_ID: &str = "__tick";

/// Stream carrying per-interval metrics tick tuples.
pub const METRICS_TICK_STREAM_ID: &str = "__metrics_tick";

/// Stream carrying collected metric data points to metric consumers.
pub const METRICS_STREAM_ID: &str = "__metrics";

/// System stream used for lifecycle notices such as task startup.
pub const SYSTEM_STREAM_ID: &str = "__system";

/// Stream carrying sampled tuples to event-logger tasks.
pub const EVENTLOGGER_STREAM_ID: &str = "__eventlogger";

/// Stream on which ACK trackers confirm fully-processed tuple trees.
pub const ACKER_ACK_STREAM_ID: &str = "__ack_ack";

/// Stream on which ACK trackers report failed tuple trees.
pub const ACKER_FAIL_STREAM_ID: &str = "__ack_fail";

/// Returns true for system-reserved component and stream ids.
#[must_use]
pub fn is_system_id(id: &str) -> bool {
    id.starts_with("__")
}

/// A single tuple field value.
///
/// Float values hash by bit pattern, so fields groupings over floats are
/// deterministic but treat `0.0` and `-0.0` as distinct keys.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean field.
    Bool(bool),
    /// Signed integer field.
    Int(i64),
    /// Floating-point field.
    Float(f64),
    /// String field.
    Str(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// String-keyed map of values.
    Map(BTreeMap<String, Value>),
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => state.write_u8(0),
            Self::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            Self::Int(i) => {
                state.write_u8(2);
                i.hash(state);
            }
            Self::Float(v) => {
                state.write_u8(3);
                v.to_bits().hash(state);
            }
            Self::Str(s) => {
                state.write_u8(4);
                s.hash(state);
            }
            Self::List(items) => {
                state.write_u8(5);
                for item in items {
                    item.hash(state);
                }
            }
            Self::Map(entries) => {
                state.write_u8(6);
                for (k, v) in entries {
                    k.hash(state);
                    v.hash(state);
                }
            }
        }
    }
}

impl Value {
    /// Returns the integer payload, if this value is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the string payload, if this value is a `Str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Ordered field values of one tuple.
pub type Values = Vec<Value>;

/// A typed record flowing between tasks on a named stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Tuple {
    /// Task that produced this tuple.
    pub source_task: TaskId,
    /// Stream the tuple was emitted on.
    pub source_stream: StreamId,
    /// Field values, positionally matching the stream's declared fields.
    pub values: Values,
    /// Runtime anchor id for pending-message tracking, if anchored.
    pub message_id: Option<u64>,
}

impl Tuple {
    /// Creates an unanchored tuple.
    #[must_use]
    pub fn new(source_task: TaskId, source_stream: impl Into<StreamId>, values: Values) -> Self {
        Self {
            source_task,
            source_stream: source_stream.into(),
            values,
            message_id: None,
        }
    }

    /// Returns field `index` as an integer, if present and integral.
    #[must_use]
    pub fn int(&self, index: usize) -> Option<i64> {
        self.values.get(index).and_then(Value::as_int)
    }
}

/// Delivery destination of an [`AddressedTuple`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TupleDest {
    /// Deliver to one task of the receiving executor.
    Task(TaskId),
    /// Deliver to every task of the receiving executor, ascending task order.
    Broadcast,
}

/// A tuple paired with its in-worker destination.
#[derive(Clone, Debug, PartialEq)]
pub struct AddressedTuple {
    /// Destination task or broadcast marker.
    pub dest: TupleDest,
    /// The payload tuple.
    pub tuple: Tuple,
}

impl AddressedTuple {
    /// Creates an addressed tuple for a single destination task.
    #[must_use]
    pub fn to_task(dest: TaskId, tuple: Tuple) -> Self {
        Self {
            dest: TupleDest::Task(dest),
            tuple,
        }
    }

    /// Creates a broadcast addressed tuple.
    #[must_use]
    pub fn broadcast(tuple: Tuple) -> Self {
        Self {
            dest: TupleDest::Broadcast,
            tuple,
        }
    }
}

/// One receive-queue event: a batch of addressed tuples.
pub type TupleBatch = Vec<AddressedTuple>;
