//! Worker-wide recurring job scheduler.
//!
//! One [`Timer`] thread serves every executor of a worker, firing
//! [`RecurringJob`]s at their configured intervals. A job never has more than
//! one outstanding firing: if running a job overruns its next deadline, the
//! missed slots are skipped and the next deadline is computed from the
//! current time.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// A job fired repeatedly by the [`Timer`].
pub trait RecurringJob: Send {
    /// Runs one firing on the timer thread.
    fn run(&mut self);
}

impl<F: FnMut() + Send> RecurringJob for F {
    fn run(&mut self) {
        self();
    }
}

/// Handle to a scheduled job; cancel to stop future firings.
#[derive(Clone, Debug)]
pub struct JobHandle {
    cancelled: Arc<AtomicBool>,
}

impl JobHandle {
    /// Cancels the job. Already-started firings complete.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct Scheduled {
    deadline: Instant,
    /// Tie-breaker keeping heap order total.
    seq: u64,
    interval: Duration,
    cancelled: Arc<AtomicBool>,
    job: Box<dyn RecurringJob>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

struct TimerShared {
    queue: Mutex<BinaryHeap<Reverse<Scheduled>>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    seq: AtomicU64,
}

/// Single-threaded recurring scheduler.
pub struct Timer {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

impl Timer {
    /// Creates a timer and starts its thread.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        });

        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_timer(&shared))
                .expect("failed to spawn timer thread")
        };

        Self {
            shared,
            thread: Mutex::new(Some(thread)),
            name,
        }
    }

    /// Schedules `job` to fire after `initial_delay`, then every `interval`.
    pub fn schedule_recurring(
        &self,
        initial_delay: Duration,
        interval: Duration,
        job: Box<dyn RecurringJob>,
    ) -> JobHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let scheduled = Scheduled {
            deadline: Instant::now() + initial_delay,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            interval,
            cancelled: Arc::clone(&cancelled),
            job,
        };
        self.shared.queue.lock().push(Reverse(scheduled));
        self.shared.wakeup.notify_one();
        JobHandle { cancelled }
    }

    /// Stops the timer thread, dropping all scheduled jobs.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        debug!(timer = %self.name, "timer stopped");
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_timer(shared: &TimerShared) {
    loop {
        let mut due = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                let now = Instant::now();
                match queue.peek() {
                    None => {
                        shared.wakeup.wait_for(&mut queue, Duration::from_millis(100));
                    }
                    Some(Reverse(next)) if next.deadline > now => {
                        let sleep = next.deadline - now;
                        shared.wakeup.wait_for(&mut queue, sleep);
                    }
                    Some(_) => break queue.pop().expect("peeked entry").0,
                }
            }
        };

        if due.cancelled.load(Ordering::Acquire) {
            continue;
        }
        // Run outside the queue lock so schedule/cancel never wait on a job.
        due.job.run();

        let now = Instant::now();
        let mut next = due.deadline + due.interval;
        if next <= now {
            // Overran one or more slots; skip them rather than bursting.
            next = now + due.interval;
        }
        due.deadline = next;
        if !due.cancelled.load(Ordering::Acquire) {
            shared.queue.lock().push(Reverse(due));
        }
    }
}
