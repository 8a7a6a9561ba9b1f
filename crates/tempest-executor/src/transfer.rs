//! Outbound tuple routing from an executor to its worker.
//!
//! [`ExecutorTransfer`] accepts `(destination task, tuple)` pairs from any
//! thread into a staging buffer. A dedicated drain loop resolves each
//! destination through the worker's static placement map: tuples for tasks on
//! this worker are handed straight to the worker's `transfer_fn`, remote
//! tuples are packed into per-worker batches and published to the
//! single-producer transfer queue the worker transport consumes.
//!
//! Tuples for the same destination keep their staging order. Stopping the
//! loop drains whatever is still staged before exiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fxhash::FxHashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::queue::BatchQueue;
use crate::tuple::{TaskId, Tuple};
use crate::worker::{TransferFn, WorkerAddress};

/// One transfer-queue event: remote tuples grouped by destination worker.
pub type TransferBatch = Vec<(WorkerAddress, Tuple)>;

/// Stages outbound tuples and drains them toward the worker.
pub struct ExecutorTransfer {
    name: String,
    staging: Mutex<Vec<(TaskId, Tuple)>>,
    staged: Condvar,
    stop: AtomicBool,
    task_to_worker: Arc<FxHashMap<TaskId, WorkerAddress>>,
    local_address: WorkerAddress,
    transfer_fn: TransferFn,
    transfer_queue: Arc<BatchQueue<TransferBatch>>,
}

impl ExecutorTransfer {
    /// Creates the transfer stage for one executor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        task_to_worker: Arc<FxHashMap<TaskId, WorkerAddress>>,
        local_address: WorkerAddress,
        transfer_fn: TransferFn,
        transfer_queue: Arc<BatchQueue<TransferBatch>>,
    ) -> Self {
        Self {
            name: name.into(),
            staging: Mutex::new(Vec::new()),
            staged: Condvar::new(),
            stop: AtomicBool::new(false),
            task_to_worker,
            local_address,
            transfer_fn,
            transfer_queue,
        }
    }

    /// Thread name of the drain loop.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The queue the worker transport consumes.
    #[must_use]
    pub fn queue(&self) -> &Arc<BatchQueue<TransferBatch>> {
        &self.transfer_queue
    }

    /// Stages one tuple for `dest`. Callable from any thread.
    pub fn transfer(&self, dest: TaskId, tuple: Tuple) {
        self.staging.lock().push((dest, tuple));
        self.staged.notify_one();
    }

    /// Drains the staging buffer once. Returns the number of staged tuples
    /// taken (dropped tuples included).
    pub fn drain_once(&self) -> usize {
        let staged = std::mem::take(&mut *self.staging.lock());
        if staged.is_empty() {
            return 0;
        }
        let count = staged.len();

        // Per-address batches; relative order within an address follows
        // staging order.
        let mut batches: FxHashMap<WorkerAddress, TransferBatch> = FxHashMap::default();
        let mut address_order: Vec<WorkerAddress> = Vec::new();
        for (dest, tuple) in staged {
            match self.task_to_worker.get(&dest) {
                None => {
                    warn!(task = %dest, "tuple for unknown destination task, dropping");
                }
                Some(address) if *address == self.local_address => {
                    (*self.transfer_fn)(dest, tuple);
                }
                Some(address) => {
                    let batch = batches.entry(address.clone()).or_insert_with(|| {
                        address_order.push(address.clone());
                        TransferBatch::new()
                    });
                    batch.push((address.clone(), tuple));
                }
            }
        }

        for address in address_order {
            let batch = batches.remove(&address).expect("batch exists");
            if self.transfer_queue.publish(batch).is_err() {
                debug!(transfer = %self.name, "transfer queue shut down, dropping batch");
            }
        }
        count
    }

    /// Runs the drain loop until [`stop`](Self::stop), then drains what
    /// remains and flushes the queue.
    pub fn run_loop(&self) {
        debug!(transfer = %self.name, "transfer loop started");
        loop {
            if self.drain_once() == 0 {
                if self.stop.load(Ordering::Acquire) {
                    break;
                }
                let mut staging = self.staging.lock();
                if staging.is_empty() && !self.stop.load(Ordering::Acquire) {
                    self.staged
                        .wait_for(&mut staging, Duration::from_millis(10));
                }
            }
        }
        self.drain_once();
        let _ = self.transfer_queue.flush();
        debug!(transfer = %self.name, "transfer loop stopped");
    }

    /// Signals the drain loop to drain remaining tuples and exit.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.staged.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueConfig;
    use crate::tuple::Value;
    use std::thread;

    fn remote_address() -> WorkerAddress {
        WorkerAddress::new("remote", 6701)
    }

    fn transfer_fixture(
        local_tasks: &[i32],
        remote_tasks: &[i32],
        transfer_fn: TransferFn,
    ) -> ExecutorTransfer {
        let mut placement = FxHashMap::default();
        for &t in local_tasks {
            placement.insert(TaskId(t), WorkerAddress::new("here", 6700));
        }
        for &t in remote_tasks {
            placement.insert(TaskId(t), remote_address());
        }
        ExecutorTransfer::new(
            "test-transfer",
            Arc::new(placement),
            WorkerAddress::new("here", 6700),
            transfer_fn,
            Arc::new(BatchQueue::new(
                "test-send",
                QueueConfig {
                    capacity: 64,
                    batch_size: 1,
                    ..QueueConfig::default()
                },
            )),
        )
    }

    fn tuple(n: i64) -> Tuple {
        Tuple::new(TaskId(1), "default", vec![Value::Int(n)])
    }

    #[test]
    fn test_local_tuples_take_the_worker_handoff() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let transfer_fn: TransferFn = {
            let delivered = Arc::clone(&delivered);
            Arc::new(move |dest, tuple| delivered.lock().push((dest, tuple)))
        };
        let transfer = transfer_fixture(&[5], &[], transfer_fn);

        transfer.transfer(TaskId(5), tuple(1));
        transfer.transfer(TaskId(5), tuple(2));
        assert_eq!(transfer.drain_once(), 2);

        let delivered = delivered.lock();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].1.int(0), Some(1));
        assert_eq!(delivered[1].1.int(0), Some(2));
    }

    #[test]
    fn test_remote_tuples_batch_per_worker_in_order() {
        let transfer = transfer_fixture(&[], &[7], Arc::new(|_, _| {}));
        for n in 0..5 {
            transfer.transfer(TaskId(7), tuple(n));
        }
        transfer.drain_once();

        let mut batches = Vec::new();
        transfer.queue().consume(|batch, _, _| batches.push(batch));
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.len(), 5);
        for (n, (address, t)) in batch.iter().enumerate() {
            assert_eq!(*address, remote_address());
            assert_eq!(t.int(0), Some(n as i64));
        }
    }

    #[test]
    fn test_unknown_destination_dropped() {
        let transfer = transfer_fixture(&[], &[], Arc::new(|_, _| {}));
        transfer.transfer(TaskId(42), tuple(1));
        assert_eq!(transfer.drain_once(), 1);

        let mut batches = Vec::new();
        transfer.queue().consume(|batch, _, _| batches.push(batch));
        assert!(batches.is_empty());
    }

    #[test]
    fn test_stop_drains_remaining_staged_tuples() {
        let transfer = Arc::new(transfer_fixture(&[], &[7], Arc::new(|_, _| {})));
        let loop_thread = {
            let transfer = Arc::clone(&transfer);
            thread::spawn(move || transfer.run_loop())
        };

        for n in 0..3 {
            transfer.transfer(TaskId(7), tuple(n));
        }
        transfer.stop();
        loop_thread.join().unwrap();

        let mut total = 0;
        transfer.queue().consume(|batch, _, _| total += batch.len());
        assert_eq!(total, 3);
    }
}
