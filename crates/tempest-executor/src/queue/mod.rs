//! Bounded batching queues connecting an executor to its worker.
//!
//! A [`BatchQueue`] is a bounded FIFO with the delivery contract the executor
//! core needs:
//!
//! - **Batched visibility** — publishers accumulate up to `batch_size` events
//!   (or `batch_timeout`) before events become visible to the consumer.
//! - **Blocking publish** — a publisher blocks on a full ring according to the
//!   configured [`WaitStrategy`]; shutdown interrupts the wait.
//! - **Single consumer** — `consume` walks visible events in FIFO order,
//!   handing each to the handler with its sequence number and an
//!   end-of-batch flag, and waits at most `wait_timeout` on an empty queue.
//! - **Edge-triggered watermarks** — crossing the high mark upward fires
//!   `high_water_mark()` once; crossing the low mark downward fires
//!   `low_water_mark()` once.
//!
//! The receive queue runs in multi-producer mode (worker dispatcher, timer
//! jobs, tests); the transfer queue is single-producer (the transfer drain
//! loop). Both modes serialize publishers behind the same lock — the mode is
//! recorded for diagnostics and documents the intended discipline.

mod ring;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

pub use ring::{CachePadded, RingBuffer};

/// Observer of queue depth crossing the configured watermarks.
///
/// Callbacks run on the thread that crossed the mark and must be brief.
pub trait WatermarkObserver: Send + Sync {
    /// Depth crossed the high mark going up.
    fn high_water_mark(&self);
    /// Depth crossed the low mark going down.
    fn low_water_mark(&self);
}

/// How a publisher waits on a full ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Spin without yielding; lowest latency, burns a core.
    Spin,
    /// Spin with thread yields.
    SpinYield,
    /// Park on a condvar with periodic shutdown checks.
    #[default]
    Park,
}

/// Declared producer discipline of a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerMode {
    /// Exactly one publishing thread.
    Single,
    /// Any number of publishing threads.
    Multi,
}

/// Sizing and timing of a [`BatchQueue`].
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Ring capacity in events (rounded up to a power of two).
    pub capacity: usize,
    /// Events accumulated before a publisher batch becomes visible.
    pub batch_size: usize,
    /// Maximum age of a partially-filled publisher batch.
    pub batch_timeout: Duration,
    /// Bound on the consumer's wait when the queue is empty.
    pub wait_timeout: Duration,
    /// Declared producer discipline.
    pub producer_mode: ProducerMode,
    /// Full-ring wait strategy for publishers.
    pub wait_strategy: WaitStrategy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            batch_size: 100,
            batch_timeout: Duration::from_millis(1),
            wait_timeout: Duration::from_millis(1000),
            producer_mode: ProducerMode::Multi,
            wait_strategy: WaitStrategy::Park,
        }
    }
}

/// Errors surfaced by queue operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue shut down while the operation was blocked or about to block.
    #[error("queue interrupted by shutdown")]
    Interrupted,
}

struct Publisher<E> {
    pending: VecDeque<E>,
    deadline: Option<Instant>,
}

struct WatermarkState {
    observer: Option<Box<dyn WatermarkObserver>>,
    high: usize,
    low: usize,
    above: bool,
}

/// Bounded multi-producer single-consumer queue with batched visibility and
/// watermark callbacks.
pub struct BatchQueue<E> {
    name: String,
    config: QueueConfig,
    /// Effective batch size, clamped so a full publisher batch always fits
    /// into an empty ring (a consumer-side flush must never block on itself).
    batch_size: usize,
    ring: RingBuffer<E>,
    publisher: Mutex<Publisher<E>>,
    /// Paired with `publisher`; signaled by the consumer after draining.
    not_full: Condvar,
    consumer: Mutex<()>,
    /// Paired with `consumer`; signaled by publishers after a flush.
    not_empty: Condvar,
    /// Visible plus pending events.
    depth: AtomicUsize,
    sequence: AtomicU64,
    shutdown: AtomicBool,
    watermark: Mutex<WatermarkState>,
    has_observer: AtomicBool,
}

impl<E> BatchQueue<E> {
    /// Creates a queue.
    #[must_use]
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        let name = name.into();
        debug!(
            queue = %name,
            capacity = config.capacity,
            mode = ?config.producer_mode,
            "created batch queue"
        );
        let ring = RingBuffer::new(config.capacity);
        let batch_size = config.batch_size.clamp(1, ring.capacity() / 2);
        Self {
            ring,
            batch_size,
            publisher: Mutex::new(Publisher {
                pending: VecDeque::new(),
                deadline: None,
            }),
            not_full: Condvar::new(),
            consumer: Mutex::new(()),
            not_empty: Condvar::new(),
            depth: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            watermark: Mutex::new(WatermarkState {
                observer: None,
                high: usize::MAX,
                low: 0,
                above: false,
            }),
            has_observer: AtomicBool::new(false),
            name,
            config,
        }
    }

    /// Queue name, used in logs and thread names.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ring capacity in events.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Snapshot of visible plus pending events.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Publishes one event.
    ///
    /// The event joins the publisher batch and becomes visible once the batch
    /// fills, its timeout passes, or the consumer goes idle. Blocks when the
    /// ring is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Interrupted`] if the queue shuts down before the
    /// event is handed over.
    pub fn publish(&self, event: E) -> Result<(), QueueError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(QueueError::Interrupted);
        }
        let mut guard = self.publisher.lock();
        guard.pending.push_back(event);
        self.depth.fetch_add(1, Ordering::Release);

        let due = guard
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if guard.pending.len() >= self.batch_size || due {
            self.flush_locked(&mut guard)?;
        } else if guard.deadline.is_none() {
            guard.deadline = Some(Instant::now() + self.config.batch_timeout);
        }
        drop(guard);

        self.check_high_watermark();
        Ok(())
    }

    /// Makes any pending publisher batch visible immediately.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Interrupted`] if shutdown interrupts a blocked
    /// hand-over.
    pub fn flush(&self) -> Result<(), QueueError> {
        let mut guard = self.publisher.lock();
        if guard.pending.is_empty() {
            return Ok(());
        }
        self.flush_locked(&mut guard)
    }

    /// Moves pending events into the ring, blocking per the wait strategy
    /// while the ring is full.
    ///
    /// A rejected event goes back to the front of the pending buffer before
    /// the wait, so whichever thread flushes next preserves order.
    fn flush_locked(&self, guard: &mut MutexGuard<'_, Publisher<E>>) -> Result<(), QueueError> {
        let mut pushed_any = false;
        while let Some(event) = guard.pending.pop_front() {
            if let Err(back) = self.ring.push(event) {
                guard.pending.push_front(back);
                if self.shutdown.load(Ordering::Acquire) {
                    if pushed_any {
                        self.not_empty.notify_one();
                    }
                    return Err(QueueError::Interrupted);
                }
                if pushed_any {
                    // Let the consumer see what fits so it can make room.
                    self.not_empty.notify_one();
                }
                match self.config.wait_strategy {
                    WaitStrategy::Spin => std::hint::spin_loop(),
                    WaitStrategy::SpinYield => std::thread::yield_now(),
                    WaitStrategy::Park => {
                        self.not_full.wait_for(guard, Duration::from_millis(10));
                    }
                }
            } else {
                pushed_any = true;
            }
        }
        guard.deadline = None;
        if pushed_any {
            self.not_empty.notify_one();
        }
        Ok(())
    }

    /// Consumes visible events in FIFO order.
    ///
    /// Invokes `handler(event, sequence, end_of_batch)` for each drained
    /// event. When nothing is visible, forces the publisher batch out, and if
    /// still empty waits up to `wait_timeout` before returning. Returns the
    /// number of events handled.
    ///
    /// Must only be called from the single consumer thread.
    pub fn consume<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(E, u64, bool),
    {
        let mut drained = self.drain(&mut handler);
        if drained > 0 {
            return drained;
        }

        // The consumer is idle; pending events need not age to batch_timeout.
        {
            let mut guard = self.publisher.lock();
            if !guard.pending.is_empty() {
                let _ = self.flush_locked(&mut guard);
            }
        }
        drained = self.drain(&mut handler);
        if drained > 0 || self.shutdown.load(Ordering::Acquire) {
            return drained;
        }

        let mut idle = self.consumer.lock();
        if self.ring.is_empty() && !self.shutdown.load(Ordering::Acquire) {
            self.not_empty.wait_for(&mut idle, self.config.wait_timeout);
        }
        drop(idle);
        self.drain(&mut handler)
    }

    /// Non-blocking [`consume`](Self::consume): drains what is visible
    /// (flushing the publisher batch when nothing is) and returns without
    /// waiting. Used by spout event loops so emission stays serviced.
    ///
    /// Must only be called from the single consumer thread.
    pub fn try_consume<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(E, u64, bool),
    {
        let drained = self.drain(&mut handler);
        if drained > 0 {
            return drained;
        }
        {
            let mut guard = self.publisher.lock();
            if !guard.pending.is_empty() {
                let _ = self.flush_locked(&mut guard);
            }
        }
        self.drain(&mut handler)
    }

    fn drain<F>(&self, handler: &mut F) -> usize
    where
        F: FnMut(E, u64, bool),
    {
        let available = self.ring.len();
        if available == 0 {
            return 0;
        }
        for i in 0..available {
            let Some(event) = self.ring.pop() else { break };
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            self.depth.fetch_sub(1, Ordering::Release);
            handler(event, sequence, i == available - 1);
        }
        self.not_full.notify_all();
        self.check_low_watermark();
        available
    }

    /// Registers the watermark observer with fractional marks in `(0, 1]`.
    ///
    /// The high mark is `ceil(capacity * high_frac)` events, the low mark
    /// `floor(capacity * low_frac)`. Replaces any previous observer and
    /// resets the crossing state.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn register_watermark_observer(
        &self,
        high_frac: f64,
        low_frac: f64,
        observer: Box<dyn WatermarkObserver>,
    ) {
        let capacity = self.capacity() as f64;
        let mut state = self.watermark.lock();
        state.high = (capacity * high_frac).ceil().max(1.0) as usize;
        state.low = (capacity * low_frac).floor() as usize;
        state.above = false;
        state.observer = Some(observer);
        self.has_observer.store(true, Ordering::Release);
    }

    /// Deregisters the watermark observer.
    pub fn clear_watermark_observer(&self) {
        let mut state = self.watermark.lock();
        state.observer = None;
        state.above = false;
        self.has_observer.store(false, Ordering::Release);
    }

    fn check_high_watermark(&self) {
        if !self.has_observer.load(Ordering::Acquire) {
            return;
        }
        let depth = self.depth.load(Ordering::Acquire);
        let mut state = self.watermark.lock();
        if !state.above && depth >= state.high {
            state.above = true;
            if let Some(observer) = &state.observer {
                observer.high_water_mark();
            }
        }
    }

    fn check_low_watermark(&self) {
        if !self.has_observer.load(Ordering::Acquire) {
            return;
        }
        let depth = self.depth.load(Ordering::Acquire);
        let mut state = self.watermark.lock();
        if state.above && depth <= state.low {
            state.above = false;
            if let Some(observer) = &state.observer {
                observer.low_water_mark();
            }
        }
    }

    /// Shuts the queue down: wakes blocked publishers and the consumer, and
    /// makes whatever pending events still fit visible.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        {
            let mut guard = self.publisher.lock();
            while let Some(event) = guard.pending.pop_front() {
                if let Err(back) = self.ring.push(event) {
                    guard.pending.push_front(back);
                    break;
                }
            }
        }
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// True once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}
