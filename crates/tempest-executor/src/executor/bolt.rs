//! Bolt specialization of the event handler.
//!
//! A bolt executor feeds every inbound tuple to the user's `execute`:
//! metrics ticks are diverted to metric collection, system ticks are
//! delivered as ordinary tuples (with tick stats recorded on the way), and
//! everything else is user data. The bolt acks or fails explicitly through
//! its [`BoltCollector`]; the core never acks on its behalf.

use std::sync::Arc;

use rand::rngs::SmallRng;
use tracing::debug;

use crate::component::ComponentLogic;
use crate::executor::error::ExecError;
use crate::executor::{handle_user_error, source_component, EventLoop, ExecutorContext};
use crate::task::Task;
use crate::tuple::{TaskId, Tuple, Values, METRICS_TICK_STREAM_ID};

/// Emit/ack/fail surface handed to `Bolt::execute`.
pub struct BoltCollector<'a> {
    pub(crate) ctx: &'a ExecutorContext,
    pub(crate) task: &'a Task,
    pub(crate) rng: &'a mut SmallRng,
}

impl BoltCollector<'_> {
    /// Emits `(stream, values)` and returns the destination task ids.
    pub fn emit(&mut self, stream: &str, values: Values) -> Vec<TaskId> {
        self.ctx
            .send_to_event_logger(self.task, &values, None, self.rng);
        self.task.emit(self.ctx, stream, values).to_vec()
    }

    /// Emits on a direct stream to an emitter-chosen destination.
    pub fn emit_direct(&mut self, dest: TaskId, stream: &str, values: Values) -> Vec<TaskId> {
        self.ctx
            .send_to_event_logger(self.task, &values, None, self.rng);
        self.task.emit_direct(self.ctx, dest, stream, values).to_vec()
    }

    /// Acknowledges an input tuple.
    pub fn ack(&mut self, tuple: &Tuple) {
        let source = source_component(self.ctx, tuple);
        self.ctx.stats.record_acked(&source, &tuple.source_stream);
        debug!(task = %self.task.task_id(), stream = %tuple.source_stream, "acked");
    }

    /// Fails an input tuple.
    pub fn fail(&mut self, tuple: &Tuple) {
        let source = source_component(self.ctx, tuple);
        self.ctx.stats.record_failed(&source, &tuple.source_stream);
        debug!(task = %self.task.task_id(), stream = %tuple.source_stream, "failed");
    }
}

pub(crate) fn tuple_action(
    ev: &mut EventLoop,
    task_id: TaskId,
    tuple: &Tuple,
) -> Result<(), ExecError> {
    if tuple.source_stream == METRICS_TICK_STREAM_ID {
        let task = ev.tasks.get(&task_id).expect("destination checked");
        ev.ctx.metrics_tick(task, tuple);
        return Ok(());
    }

    // System ticks and user data both reach execute; ticks just carry the
    // system source in the stats key.
    let ctx = Arc::clone(&ev.ctx);
    let task = ev.tasks.get(&task_id).expect("destination checked");
    let rng = &mut ev.rng;

    let result = {
        let mut logic = task.logic().borrow_mut();
        let ComponentLogic::Bolt(bolt) = &mut *logic else {
            return Err(ExecError::Fatal(format!(
                "task {task_id} of bolt executor holds spout logic"
            )));
        };
        let mut collector = BoltCollector {
            ctx: &ctx,
            task,
            rng,
        };
        bolt.execute(tuple, &mut collector)
    };

    match result {
        Ok(()) => {
            let source = source_component(&ctx, tuple);
            ctx.stats.record_executed(&source, &tuple.source_stream);
            Ok(())
        }
        Err(err) => handle_user_error(&ev.reporter, &ctx.component_id, task_id, err),
    }
}
