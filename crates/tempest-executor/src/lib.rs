//! # Tempest Executor
//!
//! The executor core of the Tempest distributed stream-processing runtime.
//! An executor hosts the tasks of one component (a *spout* source or a
//! *bolt* transformer) inside a worker process: it pulls inbound tuple
//! batches from a bounded receive queue, invokes the user logic, routes
//! outbound tuples through compiled stream groupings, and coordinates
//! backpressure with the worker.
//!
//! This crate provides:
//! - **Queues**: bounded batching MPSC/SPSC queues with edge-triggered
//!   watermark callbacks
//! - **Groupings**: compiled shuffle/fields/all/global/direct/custom stream
//!   groupings with optional load awareness
//! - **Executor**: the shared lifecycle and event loop, specialized for
//!   spouts and bolts
//! - **Transfer**: staging and per-worker batching of outbound tuples
//!
//! ## Example
//!
//! ```rust,ignore
//! use tempest_executor::{Executor, ExecutorId, WorkerHandle};
//!
//! let worker = WorkerHandle::builder("topology-1", topology).build();
//! let handle = Executor::new(&worker, ExecutorId::new(1, 4))?.start()?;
//! // ... worker dispatcher publishes into handle.receive_queue() ...
//! handle.shutdown();
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Unsafe is confined to the queue ring storage.
#![allow(unsafe_code)]

pub mod component;
pub mod config;
pub mod executor;
pub mod grouping;
pub mod metrics;
pub mod queue;
pub mod stats;
pub mod task;
pub mod timer;
pub mod topology;
pub mod transfer;
pub mod tuple;
pub mod worker;

pub use executor::error::ExecError;
pub use executor::{Executor, ExecutorContext, ExecutorHandle};
pub use topology::{ComponentKind, ExecutorId, WorkerTopology};
pub use tuple::{AddressedTuple, TaskId, Tuple, TupleDest, Value};
pub use worker::{WorkerAddress, WorkerHandle};

/// Result type for tempest-executor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for tempest-executor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Queue errors.
    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Topology assembly errors.
    #[error("topology error: {0}")]
    Topology(#[from] topology::TopologyError),

    /// Grouper compilation errors.
    #[error("grouping error: {0}")]
    Grouping(#[from] grouping::GroupingError),

    /// Cluster-state errors.
    #[error("cluster state error: {0}")]
    ClusterState(#[from] worker::ClusterStateError),

    /// Executor lifecycle errors.
    #[error("executor error: {0}")]
    Executor(#[from] ExecError),
}
