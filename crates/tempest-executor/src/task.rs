//! Per-task binding of user logic to the executor.
//!
//! A [`Task`] couples one task id with the user-logic instance created for it
//! and knows how to stamp outgoing tuples and resolve their destinations.
//! Methods take the owning [`ExecutorContext`] explicitly rather than holding
//! a back-reference; the `task_id -> Task` map is immutable once the executor
//! is constructed.

use std::cell::RefCell;

use tracing::warn;

use crate::component::{ComponentLogic, TaskContext};
use crate::executor::ExecutorContext;
use crate::grouping::{ChosenTasks, StreamTargets};
use crate::tuple::{ComponentId, StreamId, TaskId, Tuple, Value, Values, SYSTEM_STREAM_ID};

/// One task of an executor.
pub struct Task {
    task_id: TaskId,
    component_id: ComponentId,
    /// User logic; only the event-handler thread borrows it.
    logic: RefCell<ComponentLogic>,
    context: TaskContext,
}

impl Task {
    /// Creates the task, instantiates its user logic, and announces the task
    /// on the system stream so trackers learn of it before any user code
    /// runs.
    pub(crate) fn new(ctx: &ExecutorContext, task_id: TaskId) -> Self {
        let spec = ctx
            .topology
            .component(&ctx.component_id)
            .expect("executor component exists in topology");
        let task = Self {
            task_id,
            component_id: ctx.component_id.clone(),
            logic: RefCell::new((*spec.logic)()),
            context: TaskContext::new(
                task_id,
                ctx.component_id.clone(),
                ctx.conf.clone(),
                ctx.metrics.clone(),
            ),
        };
        ctx.send_unanchored(&task, SYSTEM_STREAM_ID, vec![Value::from("startup")]);
        task
    }

    /// The task id.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// The owning component id.
    #[must_use]
    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// Context handed to the user logic at open/prepare.
    #[must_use]
    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub(crate) fn logic(&self) -> &RefCell<ComponentLogic> {
        &self.logic
    }

    /// Stamps an outgoing tuple with this task as its source.
    #[must_use]
    pub fn make_tuple(
        &self,
        stream: impl Into<StreamId>,
        values: Values,
        message_id: Option<u64>,
    ) -> Tuple {
        Tuple {
            source_task: self.task_id,
            source_stream: stream.into(),
            values,
            message_id,
        }
    }

    /// Resolves the destination tasks of `(stream, values)` across every
    /// subscribing component, flattened in component-declaration order.
    ///
    /// An undeclared stream is logged and resolves to no destinations; a
    /// declared stream with no subscribers resolves silently to none.
    #[must_use]
    pub fn outgoing_tasks(
        &self,
        ctx: &ExecutorContext,
        stream: &str,
        values: &Values,
        direct_dest: Option<TaskId>,
    ) -> ChosenTasks {
        match ctx.groupers.targets(stream) {
            StreamTargets::Unknown => {
                warn!(
                    component = %self.component_id,
                    stream,
                    "emit on undeclared stream, dropping"
                );
                ChosenTasks::new()
            }
            StreamTargets::NoSubscribers => ChosenTasks::new(),
            StreamTargets::Subscribers(entries) => {
                let load = ctx.load.read();
                let mut chosen = ChosenTasks::new();
                for (_, grouper) in entries {
                    chosen.extend(grouper.choose(values, direct_dest, Some(&*load)));
                }
                chosen
            }
        }
    }

    /// Emits `(stream, values)` unanchored: resolves destinations, hands one
    /// copy per destination to the transfer layer, and updates stats.
    pub fn emit(&self, ctx: &ExecutorContext, stream: &str, values: Values) -> ChosenTasks {
        self.emit_tuple(ctx, stream, values, None, None)
    }

    /// [`emit`](Self::emit) with an emitter-chosen destination for direct
    /// streams.
    pub fn emit_direct(
        &self,
        ctx: &ExecutorContext,
        dest: TaskId,
        stream: &str,
        values: Values,
    ) -> ChosenTasks {
        self.emit_tuple(ctx, stream, values, Some(dest), None)
    }

    pub(crate) fn emit_tuple(
        &self,
        ctx: &ExecutorContext,
        stream: &str,
        values: Values,
        direct_dest: Option<TaskId>,
        message_id: Option<u64>,
    ) -> ChosenTasks {
        let out = self.outgoing_tasks(ctx, stream, &values, direct_dest);
        ctx.stats.record_emit(stream);
        if out.is_empty() {
            return out;
        }
        let tuple = self.make_tuple(stream, values, message_id);
        for &dest in &out {
            ctx.transfer.transfer(dest, tuple.clone());
        }
        ctx.stats.record_transfers(stream, out.len() as u64);
        out
    }
}
