//! Spout specialization of the event handler.
//!
//! A spout has no inbound data tuples: its event loop services metrics
//! ticks, system ticks (which drive the pending-message timeout scan), and
//! ack/fail notices from the tracker streams. Emission happens from
//! [`spout_cycle`], which calls the user's `next_tuple` whenever the
//! topology is active, throttling is off, and the pending budget allows,
//! sleeping per the configured wait strategy when nothing was emitted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fxhash::FxHashMap;
use rand::rngs::SmallRng;
use rand::Rng;
use tracing::debug;

use crate::component::ComponentLogic;
use crate::config::{
    TopologyConfig, ENABLE_MESSAGE_TIMEOUTS, MAX_SPOUT_PENDING, MESSAGE_TIMEOUT_SECS,
    SLEEP_SPOUT_WAIT_STRATEGY_TIME_MS,
};
use crate::executor::error::ExecError;
use crate::executor::{handle_user_error, EventLoop, ExecutorContext, KindState};
use crate::task::Task;
use crate::tuple::{
    StreamId, TaskId, Tuple, Value, Values, ACKER_ACK_STREAM_ID, ACKER_FAIL_STREAM_ID,
    METRICS_TICK_STREAM_ID, TICK_STREAM_ID,
};

/// An emitted message awaiting its ack or fail.
pub(crate) struct PendingMessage {
    task_id: TaskId,
    message_id: Value,
    stream: StreamId,
    enqueued: Instant,
}

/// Spout-owned executor state.
pub(crate) struct SpoutState {
    /// Per-executor pending budget (configured per task, scaled by task
    /// count). `None` disables the gate.
    max_pending: Option<usize>,
    /// Sleep of the sleeping wait strategy.
    wait_sleep: Duration,
    /// Message timeout; `None` when timeouts are disabled.
    message_timeout: Option<Duration>,
    /// In-flight messages keyed by their runtime anchor id.
    pending: FxHashMap<i64, PendingMessage>,
}

impl SpoutState {
    pub(crate) fn from_conf(conf: &TopologyConfig, task_count: usize) -> Self {
        Self {
            max_pending: conf
                .get_u64(MAX_SPOUT_PENDING)
                .map(|per_task| per_task as usize * task_count),
            wait_sleep: Duration::from_millis(
                conf.get_u64_or(SLEEP_SPOUT_WAIT_STRATEGY_TIME_MS, 1),
            ),
            message_timeout: conf
                .get_bool(ENABLE_MESSAGE_TIMEOUTS, true)
                .then(|| Duration::from_secs(conf.get_u64_or(MESSAGE_TIMEOUT_SECS, 30))),
            pending: FxHashMap::default(),
        }
    }

}

/// Emit surface handed to `Spout::next_tuple`.
pub struct SpoutCollector<'a> {
    pub(crate) ctx: &'a ExecutorContext,
    pub(crate) task: &'a Task,
    pub(crate) rng: &'a mut SmallRng,
    pub(crate) state: &'a mut SpoutState,
    pub(crate) emitted: usize,
}

impl SpoutCollector<'_> {
    /// Emits `(stream, values)` and returns the destination task ids.
    ///
    /// With a `message_id`, the emission is anchored: a runtime anchor id is
    /// stamped on the tuple and the message joins the pending map until its
    /// ack or fail arrives (or the timeout scan fails it).
    pub fn emit(
        &mut self,
        stream: &str,
        values: Values,
        message_id: Option<Value>,
    ) -> Vec<TaskId> {
        self.ctx
            .send_to_event_logger(self.task, &values, message_id.as_ref(), self.rng);
        self.emitted += 1;

        let root = message_id.as_ref().map(|_| self.rng.gen::<i64>());
        let out = self
            .task
            .emit_tuple(self.ctx, stream, values, None, root.map(|r| r as u64));
        if let (Some(root), Some(message_id)) = (root, message_id) {
            if !out.is_empty() {
                self.state.pending.insert(
                    root,
                    PendingMessage {
                        task_id: self.task.task_id(),
                        message_id,
                        stream: stream.to_owned(),
                        enqueued: Instant::now(),
                    },
                );
            }
        }
        out.to_vec()
    }
}

enum Completion {
    Ack,
    Fail,
}

pub(crate) fn tuple_action(
    ev: &mut EventLoop,
    task_id: TaskId,
    tuple: &Tuple,
) -> Result<(), ExecError> {
    match tuple.source_stream.as_str() {
        METRICS_TICK_STREAM_ID => {
            let task = ev.tasks.get(&task_id).expect("destination checked");
            ev.ctx.metrics_tick(task, tuple);
            Ok(())
        }
        TICK_STREAM_ID => scan_timeouts(ev),
        ACKER_ACK_STREAM_ID => complete(ev, tuple, Completion::Ack),
        ACKER_FAIL_STREAM_ID => complete(ev, tuple, Completion::Fail),
        other => {
            debug!(stream = other, "spout ignoring tuple");
            Ok(())
        }
    }
}

/// Fails every pending message older than the message timeout.
///
/// Age-based, so the per-task broadcast deliveries of one tick are
/// idempotent.
fn scan_timeouts(ev: &mut EventLoop) -> Result<(), ExecError> {
    let ctx = Arc::clone(&ev.ctx);
    let expired: Vec<PendingMessage> = {
        let KindState::Spout(state) = &mut ev.kind_state else {
            return Err(ExecError::Fatal("tick scan on non-spout executor".into()));
        };
        let Some(timeout) = state.message_timeout else {
            return Ok(());
        };
        let roots: Vec<i64> = state
            .pending
            .iter()
            .filter(|(_, message)| message.enqueued.elapsed() >= timeout)
            .map(|(root, _)| *root)
            .collect();
        roots
            .into_iter()
            .filter_map(|root| state.pending.remove(&root))
            .collect()
    };

    for message in expired {
        debug!(task = %message.task_id, stream = %message.stream, "message timed out");
        deliver_completion(ev, &ctx, message, &Completion::Fail)?;
    }
    Ok(())
}

fn complete(ev: &mut EventLoop, tuple: &Tuple, completion: Completion) -> Result<(), ExecError> {
    let ctx = Arc::clone(&ev.ctx);
    let Some(root) = tuple.int(0) else {
        debug!(stream = %tuple.source_stream, "completion without anchor id, ignoring");
        return Ok(());
    };
    let message = {
        let KindState::Spout(state) = &mut ev.kind_state else {
            return Err(ExecError::Fatal("completion on non-spout executor".into()));
        };
        state.pending.remove(&root)
    };
    // Absent means a late completion for an already timed-out message.
    let Some(message) = message else {
        return Ok(());
    };
    deliver_completion(ev, &ctx, message, &completion)
}

fn deliver_completion(
    ev: &mut EventLoop,
    ctx: &ExecutorContext,
    message: PendingMessage,
    completion: &Completion,
) -> Result<(), ExecError> {
    let Some(task) = ev.tasks.get(&message.task_id) else {
        return Ok(());
    };
    let result = {
        let mut logic = task.logic().borrow_mut();
        let ComponentLogic::Spout(spout) = &mut *logic else {
            return Err(ExecError::Fatal("spout executor holds bolt logic".into()));
        };
        match completion {
            Completion::Ack => spout.ack(&message.message_id),
            Completion::Fail => spout.fail(&message.message_id),
        }
    };

    match result {
        Ok(()) => {
            match completion {
                Completion::Ack => ctx.stats.record_acked(&ctx.component_id, &message.stream),
                Completion::Fail => ctx.stats.record_failed(&ctx.component_id, &message.stream),
            }
            Ok(())
        }
        Err(err) => handle_user_error(&ev.reporter, &ctx.component_id, message.task_id, err),
    }
}

/// One emission round: `next_tuple` per task under the activity, throttle,
/// and pending gates; sleeps when nothing was emitted.
pub(crate) fn spout_cycle(ev: &mut EventLoop) -> Result<(), ExecError> {
    use std::sync::atomic::Ordering;

    let ctx = Arc::clone(&ev.ctx);
    let active = ev.topology_active.load(Ordering::Acquire);
    let throttled = ev.throttle_on.load(Ordering::Acquire);

    let KindState::Spout(state) = &mut ev.kind_state else {
        return Err(ExecError::Fatal("spout cycle on non-spout executor".into()));
    };

    if !active {
        std::thread::sleep(Duration::from_millis(100));
        return Ok(());
    }
    let over_budget = state
        .max_pending
        .is_some_and(|max| state.pending.len() >= max);
    if throttled || over_budget {
        std::thread::sleep(state.wait_sleep);
        return Ok(());
    }

    let rng = &mut ev.rng;
    let tasks = &ev.tasks;
    let mut emitted = 0;
    for i in 0..ctx.task_ids.len() {
        let task_id = ctx.task_ids[i];
        let task = tasks.get(&task_id).expect("task exists");
        let result = {
            let mut logic = task.logic().borrow_mut();
            let ComponentLogic::Spout(spout) = &mut *logic else {
                return Err(ExecError::Fatal("spout executor holds bolt logic".into()));
            };
            let mut collector = SpoutCollector {
                ctx: &ctx,
                task,
                rng: &mut *rng,
                state: &mut *state,
                emitted: 0,
            };
            let result = spout.next_tuple(&mut collector);
            emitted += collector.emitted;
            result
        };
        if let Err(err) = result {
            handle_user_error(&ev.reporter, &ctx.component_id, task_id, err)?;
        }
    }

    if emitted == 0 {
        std::thread::sleep(state.wait_sleep);
    }
    Ok(())
}
