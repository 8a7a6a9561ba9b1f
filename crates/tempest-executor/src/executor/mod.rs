//! Executor lifecycle, event loop, and shared event handling.
//!
//! An [`Executor`] hosts the tasks of one component inside a worker. It is
//! constructed against a [`WorkerHandle`], computing its identity, effective
//! configuration, compiled groupers, queues, stats, and error reporter up
//! front; tasks (and their user logic) are created exactly once during
//! construction and the `task -> Task` map never changes afterwards.
//!
//! [`Executor::start`] opens the user logic, registers backpressure, spawns
//! the transfer drain thread and the event-handler thread, and schedules
//! tick jobs. The returned [`ExecutorHandle`] shuts everything down in
//! order: tick jobs first, then the event loop (which closes user logic),
//! then the transfer drain.
//!
//! ```text
//!  receive_queue ──► event handler ──► user logic ──► Task::emit
//!       ▲                                                  │
//!       │ ticks (timer thread)                    grouper  ▼
//!   tick jobs                               ExecutorTransfer ──► transfer_queue
//! ```

pub mod backpressure;
pub mod bolt;
pub mod error;
pub mod spout;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use crate::component::{DebugOptions, UserError};
use crate::config::{
    normalized_component_config, TopologyConfig, BACKPRESSURE_ENABLE,
    BACKPRESSURE_HIGH_WATERMARK, BACKPRESSURE_LOW_WATERMARK, DEBUG, ENABLE_MESSAGE_TIMEOUTS,
    ERROR_THROTTLE_INTERVAL_SECS, EVENTLOGGER_EXECUTORS, EXECUTOR_RECEIVE_BUFFER_SIZE,
    EXECUTOR_SEND_BUFFER_SIZE, MAX_ERROR_REPORT_PER_INTERVAL, QUEUE_BATCH_SIZE,
    QUEUE_BATCH_TIMEOUT_MILLIS, QUEUE_WAIT_TIMEOUT_MILLIS, STATS_SAMPLE_RATE,
    TICK_TUPLE_FREQ_SECS,
};
use crate::grouping::{GrouperRegistry, LoadMap};
use crate::metrics::{MetricRegistry, TaskInfo};
use crate::queue::{BatchQueue, ProducerMode, QueueConfig};
use crate::stats::{ExecutorStats, StatsSnapshot};
use crate::task::Task;
use crate::timer::{JobHandle, RecurringJob, Timer};
use crate::topology::{ComponentKind, ExecutorId, WorkerTopology};
use crate::transfer::{ExecutorTransfer, TransferBatch};
use crate::tuple::{
    is_system_id, AddressedTuple, ComponentId, TaskId, Tuple, TupleBatch, TupleDest, Value,
    Values, EVENTLOGGER_STREAM_ID, METRICS_STREAM_ID, METRICS_TICK_STREAM_ID, SYSTEM_TASK_ID,
    TICK_STREAM_ID,
};
use crate::worker::WorkerHandle;

use self::backpressure::BackpressureCoordinator;
use self::error::{ErrorReporter, ExecError};
use self::spout::SpoutState;

/// Immutable context shared by the event loop, tasks, and collectors.
pub struct ExecutorContext {
    /// This executor's task-id range.
    pub executor_id: ExecutorId,
    /// The hosted component.
    pub component_id: ComponentId,
    /// Spout or bolt.
    pub kind: ComponentKind,
    /// Task ids of the range, ascending (broadcast order).
    pub task_ids: Vec<TaskId>,
    /// Id of the running topology.
    pub topology_id: String,
    /// Static topology metadata.
    pub topology: Arc<WorkerTopology>,
    /// Effective (normalized) component configuration.
    pub conf: Arc<TopologyConfig>,
    /// Compiled outbound groupers.
    pub groupers: GrouperRegistry,
    /// Outbound transfer stage.
    pub transfer: Arc<ExecutorTransfer>,
    /// Throughput counters.
    pub stats: Arc<ExecutorStats>,
    /// Task-registered metrics.
    pub metrics: Arc<Mutex<MetricRegistry>>,
    /// Dynamic downstream load feedback.
    pub load: Arc<RwLock<LoadMap>>,
    /// Event-logger sampling controls.
    pub component_debug: Arc<RwLock<FxHashMap<ComponentId, DebugOptions>>>,
    /// Log every inbound tuple before dispatch.
    pub is_debug: bool,
    /// Whether the topology runs any event-logger tasks.
    pub has_event_loggers: bool,
    /// Worker hostname; may be empty.
    pub host: String,
    /// Worker port.
    pub port: u16,
}

impl ExecutorContext {
    /// Builds an outgoing tuple from `task` and sends it to every resolved
    /// destination, without anchoring.
    pub fn send_unanchored(&self, task: &Task, stream: &str, values: Values) {
        task.emit(self, stream, values);
    }

    /// Forwards a sampled copy of `values` to the event-logger stream when
    /// debug sampling is enabled for this component (or topology-wide).
    pub fn send_to_event_logger(
        &self,
        task: &Task,
        values: &Values,
        message_id: Option<&Value>,
        rng: &mut SmallRng,
    ) {
        if !self.has_event_loggers {
            return;
        }
        let options = {
            let debug_map = self.component_debug.read();
            debug_map
                .get(&self.component_id)
                .or_else(|| debug_map.get(&self.topology_id))
                .copied()
        };
        let sampling_pct = options
            .filter(|options| options.enable)
            .map_or(0.0, |options| options.sampling_pct);
        if sampling_pct > 0.0 && rng.gen::<f64>() * 100.0 < sampling_pct {
            self.send_unanchored(
                task,
                EVENTLOGGER_STREAM_ID,
                vec![
                    Value::Str(self.component_id.clone()),
                    message_id.cloned().unwrap_or(Value::Null),
                    Value::Int(wall_time_ms()),
                    Value::List(values.clone()),
                ],
            );
        }
    }

    /// Collects the metrics registered for `(interval, task)` and forwards
    /// them on the metrics stream. No registrations, no emission.
    pub fn metrics_tick(&self, task: &Task, tuple: &Tuple) {
        let Some(interval) = tuple.int(0).and_then(|i| u64::try_from(i).ok()) else {
            warn!(tuple = ?tuple, "metrics tick without interval field");
            return;
        };
        let points = self.metrics.lock().collect(interval, task.task_id());
        if points.is_empty() {
            return;
        }
        let info = TaskInfo {
            host: self.host.clone(),
            port: self.port,
            component_id: self.component_id.clone(),
            task_id: task.task_id(),
            timestamp_secs: wall_time_secs(),
            interval_secs: interval,
        };
        let data_points = Value::List(points.iter().map(|p| p.to_value()).collect());
        self.send_unanchored(task, METRICS_STREAM_ID, vec![info.to_value(), data_points]);
    }
}

/// Component id a tuple originated from; system tuples map to `__system`.
pub(crate) fn source_component(ctx: &ExecutorContext, tuple: &Tuple) -> String {
    ctx.topology
        .task_to_component()
        .get(&tuple.source_task)
        .cloned()
        .unwrap_or_else(|| "__system".to_owned())
}

/// Reports a user-logic error; escalates out of the loop once the report
/// throttle is exhausted.
pub(crate) fn handle_user_error(
    reporter: &ErrorReporter,
    component: &str,
    task: TaskId,
    err: UserError,
) -> Result<(), ExecError> {
    error!(component, task = %task, error = %err, "user logic error");
    if reporter.report(task, &err.to_string()) {
        Ok(())
    } else {
        Err(ExecError::UserLogic {
            component: component.to_owned(),
            task,
            source: err,
        })
    }
}

fn wall_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn wall_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Specialized per-kind state of the event loop.
pub(crate) enum KindState {
    /// Spout executor state.
    Spout(SpoutState),
    /// Bolt executors carry no extra state.
    Bolt,
}

/// The event-handler loop; owned by its thread after start.
pub(crate) struct EventLoop {
    pub(crate) ctx: Arc<ExecutorContext>,
    pub(crate) tasks: FxHashMap<TaskId, Task>,
    pub(crate) kind_state: KindState,
    pub(crate) rng: SmallRng,
    pub(crate) reporter: Arc<ErrorReporter>,
    pub(crate) receive_queue: Arc<BatchQueue<TupleBatch>>,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) open_or_prepare_was_called: Arc<AtomicBool>,
    pub(crate) topology_active: Arc<AtomicBool>,
    pub(crate) throttle_on: Arc<AtomicBool>,
    pub(crate) user_timer: Arc<Timer>,
    pub(crate) jobs: Arc<Mutex<Vec<JobHandle>>>,
}

impl EventLoop {
    pub(crate) fn run(&mut self) -> Result<(), ExecError> {
        self.open_all()?;
        self.open_or_prepare_was_called
            .store(true, Ordering::Release);
        self.setup_metrics();

        while !self.shutdown.load(Ordering::Acquire) {
            self.poll()?;
            if matches!(self.kind_state, KindState::Spout(_)) {
                spout::spout_cycle(self)?;
            }
        }

        self.close_all();
        Ok(())
    }

    /// Drains one receive-queue round. Bolts block up to the queue's wait
    /// timeout; spouts poll without blocking so `next_tuple` stays serviced.
    fn poll(&mut self) -> Result<(), ExecError> {
        let queue = Arc::clone(&self.receive_queue);
        let blocking = matches!(self.kind_state, KindState::Bolt);
        let mut failure: Option<ExecError> = None;
        let handler = |batch: TupleBatch, _sequence: u64, _end_of_batch: bool| {
            if failure.is_some() {
                return;
            }
            if let Err(err) = self.handle_batch(batch) {
                failure = Some(err);
            }
        };
        if blocking {
            queue.consume(handler);
        } else {
            queue.try_consume(handler);
        }
        failure.map_or(Ok(()), Err)
    }

    /// Walks one batch in publication order and dispatches each tuple.
    fn handle_batch(&mut self, batch: TupleBatch) -> Result<(), ExecError> {
        for addressed in batch {
            if self.ctx.is_debug {
                info!(dest = ?addressed.dest, tuple = ?addressed.tuple, "processing received tuple");
            }
            match addressed.dest {
                TupleDest::Task(task_id) => self.tuple_action(task_id, &addressed.tuple)?,
                TupleDest::Broadcast => {
                    for i in 0..self.ctx.task_ids.len() {
                        let task_id = self.ctx.task_ids[i];
                        self.tuple_action(task_id, &addressed.tuple)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn tuple_action(&mut self, task_id: TaskId, tuple: &Tuple) -> Result<(), ExecError> {
        if !self.tasks.contains_key(&task_id) {
            warn!(task = %task_id, executor = %self.ctx.executor_id, "tuple for unknown task, dropping");
            return Ok(());
        }
        match self.kind_state {
            KindState::Bolt => bolt::tuple_action(self, task_id, tuple),
            KindState::Spout(_) => spout::tuple_action(self, task_id, tuple),
        }
    }

    fn open_all(&mut self) -> Result<(), ExecError> {
        for i in 0..self.ctx.task_ids.len() {
            let task_id = self.ctx.task_ids[i];
            let task = self.tasks.get(&task_id).expect("task exists");
            let result = match &mut *task.logic().borrow_mut() {
                crate::component::ComponentLogic::Spout(spout) => spout.open(task.context()),
                crate::component::ComponentLogic::Bolt(bolt) => bolt.prepare(task.context()),
            };
            if let Err(source) = result {
                return Err(ExecError::UserLogic {
                    component: self.ctx.component_id.clone(),
                    task: task_id,
                    source,
                });
            }
        }
        debug!(component = %self.ctx.component_id, "opened user logic");
        Ok(())
    }

    fn close_all(&mut self) {
        for task in self.tasks.values() {
            match &mut *task.logic().borrow_mut() {
                crate::component::ComponentLogic::Spout(spout) => spout.close(),
                crate::component::ComponentLogic::Bolt(bolt) => bolt.close(),
            }
        }
        debug!(component = %self.ctx.component_id, "closed user logic");
    }

    /// Schedules one metrics-tick job per registered interval. Runs after
    /// open/prepare so registrations made there are seen.
    fn setup_metrics(&self) {
        for interval in self.ctx.metrics.lock().intervals() {
            let job = tick_publisher(
                Arc::clone(&self.receive_queue),
                METRICS_TICK_STREAM_ID,
                interval,
            );
            let period = Duration::from_secs(interval);
            let handle = self
                .user_timer
                .schedule_recurring(period, period, Box::new(job));
            self.jobs.lock().push(handle);
        }
    }
}

/// Recurring job publishing broadcast tick tuples into a receive queue.
#[allow(clippy::cast_possible_wrap)]
fn tick_publisher(
    queue: Arc<BatchQueue<TupleBatch>>,
    stream: &'static str,
    interval_secs: u64,
) -> impl RecurringJob {
    move || {
        let tuple = Tuple::new(SYSTEM_TASK_ID, stream, vec![Value::Int(interval_secs as i64)]);
        if queue.publish(vec![AddressedTuple::broadcast(tuple)]).is_err() {
            debug!(stream, "tick publish after queue shutdown");
        }
    }
}

fn receive_queue_config(conf: &TopologyConfig) -> QueueConfig {
    QueueConfig {
        capacity: conf.get_u64_or(EXECUTOR_RECEIVE_BUFFER_SIZE, 1024) as usize,
        batch_size: conf.get_u64_or(QUEUE_BATCH_SIZE, 100) as usize,
        batch_timeout: Duration::from_millis(conf.get_u64_or(QUEUE_BATCH_TIMEOUT_MILLIS, 1)),
        wait_timeout: Duration::from_millis(conf.get_u64_or(QUEUE_WAIT_TIMEOUT_MILLIS, 1000)),
        producer_mode: ProducerMode::Multi,
        ..QueueConfig::default()
    }
}

fn send_queue_config(conf: &TopologyConfig) -> QueueConfig {
    QueueConfig {
        capacity: conf.get_u64_or(EXECUTOR_SEND_BUFFER_SIZE, 1024) as usize,
        // The drain loop already hands over per-worker batches.
        batch_size: 1,
        batch_timeout: Duration::from_millis(conf.get_u64_or(QUEUE_BATCH_TIMEOUT_MILLIS, 1)),
        wait_timeout: Duration::from_millis(conf.get_u64_or(QUEUE_WAIT_TIMEOUT_MILLIS, 1000)),
        producer_mode: ProducerMode::Single,
        ..QueueConfig::default()
    }
}

/// A constructed-but-not-yet-started executor.
pub struct Executor {
    worker: WorkerHandle,
    ctx: Arc<ExecutorContext>,
    receive_queue: Arc<BatchQueue<TupleBatch>>,
    tasks: FxHashMap<TaskId, Task>,
    reporter: Arc<ErrorReporter>,
    backpressure: Arc<AtomicBool>,
    open_or_prepare_was_called: Arc<AtomicBool>,
    kind: ComponentKind,
}

impl Executor {
    /// Builds the executor for `executor_id` against `worker`.
    ///
    /// Creates both queues, compiles groupers, normalizes the component
    /// configuration, and instantiates every task (emitting each task's
    /// startup notice).
    ///
    /// # Errors
    ///
    /// Fails on invalid executor ranges, malformed component configuration,
    /// grouper compilation problems, or user-logic/kind mismatches.
    pub fn new(worker: &WorkerHandle, executor_id: ExecutorId) -> Result<Self, ExecError> {
        let topology = Arc::clone(&worker.topology);
        let component_id = topology.executor_component(executor_id)?.to_owned();
        let spec = topology
            .component(&component_id)
            .expect("component validated by executor_component");
        let kind = spec.kind;
        let conf = Arc::new(normalized_component_config(
            &worker.config,
            spec.json_conf.as_deref(),
        )?);
        let task_ids = executor_id.task_ids();
        let name = format!("{component_id}-executor{executor_id}");

        let receive_queue = Arc::new(BatchQueue::new(
            format!("{name}-receive"),
            receive_queue_config(&conf),
        ));
        let transfer_queue = Arc::new(BatchQueue::new(
            format!("{name}-send"),
            send_queue_config(&conf),
        ));
        let transfer = Arc::new(ExecutorTransfer::new(
            format!("{name}-transfer"),
            Arc::clone(&worker.task_to_worker),
            worker.address.clone(),
            Arc::clone(&worker.transfer_fn),
            transfer_queue,
        ));
        let groupers = GrouperRegistry::build(&topology, &component_id, &worker.local_tasks())?;
        let host = worker.address.host.clone();

        let ctx = Arc::new(ExecutorContext {
            executor_id,
            component_id: component_id.clone(),
            kind,
            task_ids: task_ids.clone(),
            topology_id: worker.topology_id.clone(),
            topology,
            conf: Arc::clone(&conf),
            groupers,
            transfer,
            stats: Arc::new(ExecutorStats::new(conf.get_f64_or(STATS_SAMPLE_RATE, 0.05))),
            metrics: Arc::new(Mutex::new(MetricRegistry::new())),
            load: Arc::clone(&worker.load),
            component_debug: Arc::clone(&worker.component_debug),
            is_debug: conf.get_bool(DEBUG, false),
            has_event_loggers: conf.get_u64_or(EVENTLOGGER_EXECUTORS, 0) > 0,
            host: host.clone(),
            port: worker.address.port,
        });

        let reporter = Arc::new(ErrorReporter::new(
            Arc::clone(&worker.cluster_state),
            &worker.topology_id,
            &component_id,
            host,
            worker.address.port,
            conf.get_u64_or(MAX_ERROR_REPORT_PER_INTERVAL, 5),
            Duration::from_secs(conf.get_u64_or(ERROR_THROTTLE_INTERVAL_SECS, 10)),
        ));

        let mut tasks = FxHashMap::default();
        for &task_id in &task_ids {
            let task = Task::new(&ctx, task_id);
            if task.logic().borrow().kind() != kind {
                return Err(ExecError::Config(format!(
                    "component {component_id} is a {kind} but its factory produced other logic"
                )));
            }
            tasks.insert(task_id, task);
        }
        info!(component = %component_id, executor = %executor_id, kind = %kind, "created executor");

        Ok(Self {
            worker: worker.clone(),
            ctx,
            receive_queue,
            tasks,
            reporter,
            backpressure: Arc::new(AtomicBool::new(false)),
            open_or_prepare_was_called: Arc::new(AtomicBool::new(false)),
            kind,
        })
    }

    /// Shared context (queues, groupers, stats).
    #[must_use]
    pub fn context(&self) -> &Arc<ExecutorContext> {
        &self.ctx
    }

    /// Inbound queue the worker dispatcher publishes to.
    #[must_use]
    pub fn receive_queue(&self) -> Arc<BatchQueue<TupleBatch>> {
        Arc::clone(&self.receive_queue)
    }

    /// Outbound queue the worker transport consumes.
    #[must_use]
    pub fn transfer_queue(&self) -> Arc<BatchQueue<TransferBatch>> {
        Arc::clone(self.ctx.transfer.queue())
    }

    /// Opens user logic, wires backpressure, starts both loops, and
    /// schedules ticks.
    ///
    /// # Errors
    ///
    /// Fails when the loop threads cannot be spawned.
    pub fn start(self) -> Result<ExecutorHandle, ExecError> {
        let Self {
            worker,
            ctx,
            receive_queue,
            tasks,
            reporter,
            backpressure,
            open_or_prepare_was_called,
            kind,
        } = self;
        info!(component = %ctx.component_id, executor = %ctx.executor_id, "loading executor tasks");

        if ctx.conf.get_bool(BACKPRESSURE_ENABLE, false) {
            receive_queue.register_watermark_observer(
                ctx.conf.get_f64_or(BACKPRESSURE_HIGH_WATERMARK, 0.9),
                ctx.conf.get_f64_or(BACKPRESSURE_LOW_WATERMARK, 0.4),
                Box::new(BackpressureCoordinator::new(
                    Arc::clone(&backpressure),
                    worker.backpressure_trigger.clone(),
                    format!("{}:{}", ctx.component_id, ctx.executor_id),
                )),
            );
        }

        let transfer_thread = {
            let transfer = Arc::clone(&ctx.transfer);
            thread::Builder::new()
                .name(transfer.name().to_owned())
                .spawn(move || transfer.run_loop())
                .map_err(|e| ExecError::Fatal(format!("failed to spawn transfer thread: {e}")))?
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let jobs = Arc::new(Mutex::new(Vec::new()));
        if let Some(handle) = schedule_system_tick(&worker, &ctx, &receive_queue, kind) {
            jobs.lock().push(handle);
        }

        let kind_state = match kind {
            ComponentKind::Spout => {
                KindState::Spout(SpoutState::from_conf(&ctx.conf, ctx.task_ids.len()))
            }
            ComponentKind::Bolt => KindState::Bolt,
        };
        let mut event_loop = EventLoop {
            ctx: Arc::clone(&ctx),
            tasks,
            kind_state,
            rng: SmallRng::from_entropy(),
            reporter: Arc::clone(&reporter),
            receive_queue: Arc::clone(&receive_queue),
            shutdown: Arc::clone(&shutdown),
            open_or_prepare_was_called,
            topology_active: Arc::clone(&worker.topology_active),
            throttle_on: Arc::clone(&worker.throttle_on),
            user_timer: Arc::clone(&worker.user_timer),
            jobs: Arc::clone(&jobs),
        };

        let event_thread = {
            let ctx = Arc::clone(&ctx);
            let reporter = Arc::clone(&reporter);
            let suicide = Arc::clone(&worker.suicide_fn);
            thread::Builder::new()
                .name(format!("{}-executor{}", ctx.component_id, ctx.executor_id))
                .spawn(move || match event_loop.run() {
                    Ok(()) => {}
                    Err(ExecError::QueueInterrupted(_)) => {
                        info!(component = %ctx.component_id, "event loop interrupted by shutdown");
                    }
                    Err(err) => {
                        error!(
                            component = %ctx.component_id,
                            executor = %ctx.executor_id,
                            error = %err,
                            "executor died"
                        );
                        reporter.report(ctx.task_ids[0], &err.to_string());
                        (*suicide)();
                    }
                })
                .map_err(|e| ExecError::Fatal(format!("failed to spawn event thread: {e}")))?
        };

        info!(component = %ctx.component_id, executor = %ctx.executor_id, "finished loading executor");
        Ok(ExecutorHandle {
            ctx,
            receive_queue,
            backpressure,
            jobs,
            shutdown,
            event_thread: Some(event_thread),
            transfer_thread: Some(transfer_thread),
        })
    }
}

/// Schedules the system-tick job unless ticks are suppressed for this
/// executor (system components; spouts with message timeouts disabled).
fn schedule_system_tick(
    worker: &WorkerHandle,
    ctx: &Arc<ExecutorContext>,
    receive_queue: &Arc<BatchQueue<TupleBatch>>,
    kind: ComponentKind,
) -> Option<JobHandle> {
    let freq = ctx.conf.get_u64(TICK_TUPLE_FREQ_SECS).filter(|f| *f > 0)?;
    let timeouts_enabled = ctx.conf.get_bool(ENABLE_MESSAGE_TIMEOUTS, true);
    if is_system_id(&ctx.component_id) || (kind == ComponentKind::Spout && !timeouts_enabled) {
        info!(component = %ctx.component_id, executor = %ctx.executor_id, "ticks disabled for executor");
        return None;
    }
    let job = tick_publisher(Arc::clone(receive_queue), TICK_STREAM_ID, freq);
    let period = Duration::from_secs(freq);
    Some(
        worker
            .user_timer
            .schedule_recurring(period, period, Box::new(job)),
    )
}

/// Running executor; shuts down (in order) when dropped or on
/// [`shutdown`](Self::shutdown).
pub struct ExecutorHandle {
    ctx: Arc<ExecutorContext>,
    receive_queue: Arc<BatchQueue<TupleBatch>>,
    backpressure: Arc<AtomicBool>,
    jobs: Arc<Mutex<Vec<JobHandle>>>,
    shutdown: Arc<AtomicBool>,
    event_thread: Option<JoinHandle<()>>,
    transfer_thread: Option<JoinHandle<()>>,
}

impl ExecutorHandle {
    /// Inbound queue the worker dispatcher publishes to.
    #[must_use]
    pub fn receive_queue(&self) -> Arc<BatchQueue<TupleBatch>> {
        Arc::clone(&self.receive_queue)
    }

    /// Outbound queue the worker transport consumes.
    #[must_use]
    pub fn transfer_queue(&self) -> Arc<BatchQueue<TransferBatch>> {
        Arc::clone(self.ctx.transfer.queue())
    }

    /// Shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<ExecutorContext> {
        &self.ctx
    }

    /// Whether the backpressure flag is currently raised.
    #[must_use]
    pub fn backpressure_active(&self) -> bool {
        self.backpressure.load(Ordering::Acquire)
    }

    /// Snapshot of the executor's counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Cancels tick jobs, stops both loops in order, and joins their
    /// threads. User logic is closed on the event-handler thread; staged
    /// transfers are flushed before the drain thread exits.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.event_thread.is_none() && self.transfer_thread.is_none() {
            return;
        }
        info!(component = %self.ctx.component_id, executor = %self.ctx.executor_id, "shutting down executor");
        for job in self.jobs.lock().drain(..) {
            job.cancel();
        }
        self.shutdown.store(true, Ordering::Release);
        self.receive_queue.shutdown();
        if let Some(thread) = self.event_thread.take() {
            let _ = thread.join();
        }
        self.ctx.transfer.stop();
        if let Some(thread) = self.transfer_thread.take() {
            let _ = thread.join();
        }
        self.ctx.transfer.queue().shutdown();
        self.receive_queue.clear_watermark_observer();
        info!(component = %self.ctx.component_id, executor = %self.ctx.executor_id, "executor shut down");
    }
}

impl Drop for ExecutorHandle {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
