//! End-to-end executor tests: dispatch, routing, ticks, backpressure,
//! spout acking, and failure escalation.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fxhash::FxHasher;
use parking_lot::Mutex;

use tempest_executor::component::{
    Bolt, ComponentLogic, ComponentLogicFactory, DebugOptions, Spout, TaskContext, UserError,
};
use tempest_executor::config::{self, TopologyConfig};
use tempest_executor::executor::backpressure::BackpressureCoordinator;
use tempest_executor::executor::bolt::BoltCollector;
use tempest_executor::executor::spout::SpoutCollector;
use tempest_executor::metrics::CountMetric;
use tempest_executor::queue::{BatchQueue, QueueConfig};
use tempest_executor::topology::{ComponentKind, ComponentSpec, GroupingSpec};
use tempest_executor::tuple::{
    AddressedTuple, TaskId, Tuple, Value, ACKER_ACK_STREAM_ID, EVENTLOGGER_STREAM_ID,
    METRICS_STREAM_ID, METRICS_TICK_STREAM_ID, SYSTEM_STREAM_ID, SYSTEM_TASK_ID, TICK_STREAM_ID,
};
use tempest_executor::worker::BackpressureTrigger;
use tempest_executor::{Executor, ExecutorId, WorkerAddress, WorkerHandle, WorkerTopology};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

type TransferLog = Arc<Mutex<Vec<(TaskId, Tuple)>>>;
type ExecLog = Arc<Mutex<Vec<(i32, String, i64)>>>;

fn await_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

fn fast_config() -> TopologyConfig {
    TopologyConfig::new()
        .with(config::QUEUE_BATCH_SIZE, 1)
        .with(config::QUEUE_WAIT_TIMEOUT_MILLIS, 20)
}

fn spec(
    kind: ComponentKind,
    streams: &[(&str, &[&str])],
    logic: ComponentLogicFactory,
) -> ComponentSpec {
    ComponentSpec {
        kind,
        streams: streams
            .iter()
            .map(|(stream, fields)| {
                (
                    (*stream).to_owned(),
                    fields.iter().map(|f| (*f).to_owned()).collect(),
                )
            })
            .collect(),
        json_conf: None,
        logic,
    }
}

fn recording_worker(
    topology: WorkerTopology,
    conf: TopologyConfig,
) -> (WorkerHandle, TransferLog) {
    let log: TransferLog = Arc::default();
    let transfer_log = Arc::clone(&log);
    let worker = WorkerHandle::builder("topo-test", Arc::new(topology))
        .config(conf)
        .address(WorkerAddress::new("local", 6700))
        .transfer_fn(Arc::new(move |task, tuple| {
            transfer_log.lock().push((task, tuple));
        }))
        .build();
    (worker, log)
}

/// Bolt recording `(task, stream, field0)` for every executed tuple.
struct RecordingBolt {
    task_id: i32,
    log: ExecLog,
}

impl Bolt for RecordingBolt {
    fn prepare(&mut self, ctx: &TaskContext) -> Result<(), UserError> {
        self.task_id = ctx.task_id.0;
        Ok(())
    }

    fn execute(&mut self, tuple: &Tuple, _collector: &mut BoltCollector<'_>) -> Result<(), UserError> {
        self.log.lock().push((
            self.task_id,
            tuple.source_stream.clone(),
            tuple.int(0).unwrap_or(-1),
        ));
        Ok(())
    }
}

fn recording_bolt_factory(log: &ExecLog) -> ComponentLogicFactory {
    let log = Arc::clone(log);
    Arc::new(move || {
        ComponentLogic::Bolt(Box::new(RecordingBolt {
            task_id: -1,
            log: Arc::clone(&log),
        }))
    })
}

/// Bolt re-emitting field 0 and field 1 on a configured stream.
struct RelayBolt {
    stream: &'static str,
}

impl Bolt for RelayBolt {
    fn execute(&mut self, tuple: &Tuple, collector: &mut BoltCollector<'_>) -> Result<(), UserError> {
        collector.emit(self.stream, tuple.values.clone());
        Ok(())
    }
}

fn relay_factory(stream: &'static str) -> ComponentLogicFactory {
    Arc::new(move || ComponentLogic::Bolt(Box::new(RelayBolt { stream })))
}

struct NoopSpout;

impl Spout for NoopSpout {
    fn next_tuple(&mut self, _collector: &mut SpoutCollector<'_>) -> Result<(), UserError> {
        Ok(())
    }
}

fn noop_spout_factory() -> ComponentLogicFactory {
    Arc::new(|| ComponentLogic::Spout(Box::new(NoopSpout)))
}

fn data_tuple(n: i64) -> Tuple {
    Tuple::new(TaskId(90), "data", vec![Value::Int(n)])
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[test]
fn test_broadcast_delivers_to_every_task_in_ascending_order() {
    let log: ExecLog = Arc::default();
    let topology = WorkerTopology::builder()
        .component(
            "record",
            spec(ComponentKind::Bolt, &[], recording_bolt_factory(&log)),
            vec![TaskId(3), TaskId(4), TaskId(5)],
        )
        .build()
        .unwrap();
    let (worker, _) = recording_worker(topology, fast_config());

    let handle = Executor::new(&worker, ExecutorId::new(3, 5))
        .unwrap()
        .start()
        .unwrap();
    handle
        .receive_queue()
        .publish(vec![AddressedTuple::broadcast(data_tuple(42))])
        .unwrap();

    assert!(await_until(Duration::from_secs(2), || log.lock().len() == 3));
    let entries = log.lock().clone();
    assert_eq!(
        entries,
        vec![
            (3, "data".to_owned(), 42),
            (4, "data".to_owned(), 42),
            (5, "data".to_owned(), 42),
        ]
    );
    handle.shutdown();
}

#[test]
fn test_addressed_tuple_invokes_action_exactly_once() {
    let log: ExecLog = Arc::default();
    let topology = WorkerTopology::builder()
        .component(
            "record",
            spec(ComponentKind::Bolt, &[], recording_bolt_factory(&log)),
            vec![TaskId(3), TaskId(4), TaskId(5)],
        )
        .build()
        .unwrap();
    let (worker, _) = recording_worker(topology, fast_config());

    let handle = Executor::new(&worker, ExecutorId::new(3, 5))
        .unwrap()
        .start()
        .unwrap();
    handle
        .receive_queue()
        .publish(vec![AddressedTuple::to_task(TaskId(4), data_tuple(7))])
        .unwrap();

    assert!(await_until(Duration::from_secs(2), || !log.lock().is_empty()));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(log.lock().clone(), vec![(4, "data".to_owned(), 7)]);
    handle.shutdown();
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

fn relay_topology() -> WorkerTopology {
    WorkerTopology::builder()
        .component(
            "relay",
            spec(
                ComponentKind::Bolt,
                &[("hits", &["user", "seq"]), ("orphan", &[])],
                relay_factory("hits"),
            ),
            vec![TaskId(1)],
        )
        .component(
            "sink",
            spec(ComponentKind::Bolt, &[], noop_bolt_factory()),
            vec![TaskId(10), TaskId(11), TaskId(12), TaskId(13)],
        )
        .subscribe(
            "sink",
            "relay",
            "hits",
            GroupingSpec::Fields(vec!["user".to_owned()]),
        )
        .build()
        .unwrap()
}

struct SilentBolt;

impl Bolt for SilentBolt {
    fn execute(&mut self, _t: &Tuple, _c: &mut BoltCollector<'_>) -> Result<(), UserError> {
        Ok(())
    }
}

fn noop_bolt_factory() -> ComponentLogicFactory {
    Arc::new(|| ComponentLogic::Bolt(Box::new(SilentBolt)))
}

#[test]
fn test_fields_grouping_routes_same_key_to_same_task_in_order() {
    let (worker, transfers) = recording_worker(relay_topology(), fast_config());
    let handle = Executor::new(&worker, ExecutorId::new(1, 1))
        .unwrap()
        .start()
        .unwrap();

    let queue = handle.receive_queue();
    for seq in 0..10 {
        queue
            .publish(vec![AddressedTuple::to_task(
                TaskId(1),
                Tuple::new(TaskId(90), "data", vec![Value::from("a"), Value::Int(seq)]),
            )])
            .unwrap();
    }

    let expected = {
        let mut hasher = FxHasher::default();
        Value::from("a").hash(&mut hasher);
        TaskId(10 + i32::try_from(hasher.finish() % 4).unwrap())
    };
    assert!(await_until(Duration::from_secs(2), || {
        transfers.lock().iter().filter(|(_, t)| t.source_stream == "hits").count() == 10
    }));

    let transfers = transfers.lock();
    let hits: Vec<_> = transfers
        .iter()
        .filter(|(_, t)| t.source_stream == "hits")
        .collect();
    for (n, (dest, tuple)) in hits.iter().enumerate() {
        assert_eq!(*dest, expected, "key 'a' must always pick {expected}");
        assert_eq!(tuple.int(1), Some(n as i64), "per-destination order");
    }
    handle.shutdown();
}

#[test]
fn test_stream_without_subscribers_transfers_nothing() {
    let topology = WorkerTopology::builder()
        .component(
            "relay",
            spec(
                ComponentKind::Bolt,
                &[("orphan", &["user", "seq"])],
                relay_factory("orphan"),
            ),
            vec![TaskId(1)],
        )
        .build()
        .unwrap();
    let (worker, transfers) = recording_worker(topology, fast_config());
    let handle = Executor::new(&worker, ExecutorId::new(1, 1))
        .unwrap()
        .start()
        .unwrap();

    handle
        .receive_queue()
        .publish(vec![AddressedTuple::to_task(
            TaskId(1),
            Tuple::new(TaskId(90), "data", vec![Value::from("x"), Value::Int(0)]),
        )])
        .unwrap();

    assert!(await_until(Duration::from_secs(2), || {
        handle.stats().emitted.get("orphan").copied().unwrap_or(0) > 0
    }));
    assert!(transfers.lock().iter().all(|(_, t)| t.source_stream != "orphan"));
    assert!(handle.stats().transferred.get("orphan").is_none());
    handle.shutdown();
}

// ---------------------------------------------------------------------------
// Startup notice
// ---------------------------------------------------------------------------

#[test]
fn test_task_creation_emits_one_startup_notice_before_user_code() {
    let topology = WorkerTopology::builder()
        .component(
            "feed",
            spec(ComponentKind::Spout, &[], noop_spout_factory()),
            vec![TaskId(7)],
        )
        .component(
            "tracker",
            spec(ComponentKind::Bolt, &[], noop_bolt_factory()),
            vec![TaskId(2)],
        )
        .subscribe("tracker", "feed", SYSTEM_STREAM_ID, GroupingSpec::All)
        .build()
        .unwrap();
    let (worker, transfers) = recording_worker(topology, fast_config());

    // Construction alone must announce the task; the executor never starts.
    let executor = Executor::new(&worker, ExecutorId::new(7, 7)).unwrap();
    executor.context().transfer.drain_once();

    let transfers = transfers.lock();
    assert_eq!(transfers.len(), 1);
    let (dest, tuple) = &transfers[0];
    assert_eq!(*dest, TaskId(2));
    assert_eq!(tuple.source_task, TaskId(7));
    assert_eq!(tuple.source_stream, SYSTEM_STREAM_ID);
    assert_eq!(tuple.values, vec![Value::from("startup")]);
}

// ---------------------------------------------------------------------------
// Metrics ticks
// ---------------------------------------------------------------------------

struct MeteredBolt {
    interval: u64,
}

impl Bolt for MeteredBolt {
    fn prepare(&mut self, ctx: &TaskContext) -> Result<(), UserError> {
        ctx.register_metric(self.interval, "executed", Box::new(CountMetric::new()));
        Ok(())
    }

    fn execute(&mut self, _t: &Tuple, _c: &mut BoltCollector<'_>) -> Result<(), UserError> {
        Ok(())
    }
}

fn metrics_topology(logic: ComponentLogicFactory) -> WorkerTopology {
    WorkerTopology::builder()
        .component(
            "meter",
            spec(
                ComponentKind::Bolt,
                &[(METRICS_STREAM_ID, &["info", "points"])],
                logic,
            ),
            vec![TaskId(1)],
        )
        .component(
            "consumer",
            spec(ComponentKind::Bolt, &[], noop_bolt_factory()),
            vec![TaskId(9)],
        )
        .subscribe("consumer", "meter", METRICS_STREAM_ID, GroupingSpec::All)
        .build()
        .unwrap()
}

fn metrics_tick(interval: i64) -> AddressedTuple {
    AddressedTuple::broadcast(Tuple::new(
        SYSTEM_TASK_ID,
        METRICS_TICK_STREAM_ID,
        vec![Value::Int(interval)],
    ))
}

#[test]
fn test_metrics_tick_without_registrations_emits_nothing() {
    let (worker, transfers) = recording_worker(metrics_topology(noop_bolt_factory()), fast_config());
    let handle = Executor::new(&worker, ExecutorId::new(1, 1))
        .unwrap()
        .start()
        .unwrap();

    handle.receive_queue().publish(vec![metrics_tick(60)]).unwrap();
    std::thread::sleep(Duration::from_millis(150));
    assert!(transfers.lock().is_empty());
    handle.shutdown();
}

#[test]
fn test_metrics_tick_collects_registered_metrics() {
    let factory: ComponentLogicFactory =
        Arc::new(|| ComponentLogic::Bolt(Box::new(MeteredBolt { interval: 60 })));
    let (worker, transfers) = recording_worker(metrics_topology(factory), fast_config());
    let handle = Executor::new(&worker, ExecutorId::new(1, 1))
        .unwrap()
        .start()
        .unwrap();

    handle.receive_queue().publish(vec![metrics_tick(60)]).unwrap();
    assert!(await_until(Duration::from_secs(2), || !transfers.lock().is_empty()));

    let transfers = transfers.lock();
    let (dest, tuple) = &transfers[0];
    assert_eq!(*dest, TaskId(9));
    assert_eq!(tuple.source_stream, METRICS_STREAM_ID);
    assert_eq!(tuple.values.len(), 2);
    let Value::List(points) = &tuple.values[1] else {
        panic!("expected data point list");
    };
    assert_eq!(points.len(), 1);
    handle.shutdown();
}

// ---------------------------------------------------------------------------
// Backpressure transitions
// ---------------------------------------------------------------------------

#[test]
fn test_backpressure_transitions_fire_one_notification_each() {
    let queue: BatchQueue<u32> = BatchQueue::new(
        "recv",
        QueueConfig {
            capacity: 1024,
            batch_size: 1,
            ..QueueConfig::default()
        },
    );
    let flag = Arc::new(AtomicBool::new(false));
    let trigger = BackpressureTrigger::new();
    queue.register_watermark_observer(
        0.8,
        0.2,
        Box::new(BackpressureCoordinator::new(
            Arc::clone(&flag),
            trigger.clone(),
            "record:[1 1]",
        )),
    );

    for i in 0..820 {
        queue.publish(i).unwrap();
    }
    assert!(flag.load(Ordering::Acquire));
    assert!(trigger.wait(Duration::from_millis(10)), "one notify on raise");
    assert!(!trigger.wait(Duration::from_millis(10)), "no duplicate notify");

    queue.consume(|_, _, _| {});
    assert!(!flag.load(Ordering::Acquire));
    assert!(trigger.wait(Duration::from_millis(10)), "one notify on clear");
    assert!(!trigger.wait(Duration::from_millis(10)));
}

// ---------------------------------------------------------------------------
// Spout emission, acking, pending budget
// ---------------------------------------------------------------------------

/// Spout emitting anchored sequence numbers; records acked message ids.
struct SequenceSpout {
    next: i64,
    limit: i64,
    acked: Arc<Mutex<Vec<Value>>>,
}

impl Spout for SequenceSpout {
    fn next_tuple(&mut self, collector: &mut SpoutCollector<'_>) -> Result<(), UserError> {
        if self.next < self.limit {
            let n = self.next;
            self.next += 1;
            collector.emit("out", vec![Value::Int(n)], Some(Value::Int(n)));
        }
        Ok(())
    }

    fn ack(&mut self, message_id: &Value) -> Result<(), UserError> {
        self.acked.lock().push(message_id.clone());
        Ok(())
    }
}

fn spout_topology(factory: ComponentLogicFactory) -> WorkerTopology {
    WorkerTopology::builder()
        .component(
            "numbers",
            spec(ComponentKind::Spout, &[("out", &["n"])], factory),
            vec![TaskId(1)],
        )
        .component(
            "sink",
            spec(ComponentKind::Bolt, &[], noop_bolt_factory()),
            vec![TaskId(5)],
        )
        .subscribe("sink", "numbers", "out", GroupingSpec::Shuffle)
        .build()
        .unwrap()
}

#[test]
fn test_spout_emission_is_anchored_and_acked() {
    let acked = Arc::new(Mutex::new(Vec::new()));
    let factory: ComponentLogicFactory = {
        let acked = Arc::clone(&acked);
        Arc::new(move || {
            ComponentLogic::Spout(Box::new(SequenceSpout {
                next: 0,
                limit: 1,
                acked: Arc::clone(&acked),
            }))
        })
    };
    let (worker, transfers) = recording_worker(spout_topology(factory), fast_config());
    let handle = Executor::new(&worker, ExecutorId::new(1, 1))
        .unwrap()
        .start()
        .unwrap();

    assert!(await_until(Duration::from_secs(2), || {
        transfers.lock().iter().any(|(_, t)| t.source_stream == "out")
    }));
    let root = {
        let transfers = transfers.lock();
        let (dest, tuple) = transfers
            .iter()
            .find(|(_, t)| t.source_stream == "out")
            .unwrap();
        assert_eq!(*dest, TaskId(5));
        #[allow(clippy::cast_possible_wrap)]
        {
            tuple.message_id.expect("anchored emission") as i64
        }
    };

    handle
        .receive_queue()
        .publish(vec![AddressedTuple::to_task(
            TaskId(1),
            Tuple::new(TaskId(80), ACKER_ACK_STREAM_ID, vec![Value::Int(root)]),
        )])
        .unwrap();

    assert!(await_until(Duration::from_secs(2), || !acked.lock().is_empty()));
    assert_eq!(acked.lock().clone(), vec![Value::Int(0)]);
    handle.shutdown();
}

#[test]
fn test_max_spout_pending_gates_emission_until_ack() {
    let acked = Arc::new(Mutex::new(Vec::new()));
    let factory: ComponentLogicFactory = {
        let acked = Arc::clone(&acked);
        Arc::new(move || {
            ComponentLogic::Spout(Box::new(SequenceSpout {
                next: 0,
                limit: i64::MAX,
                acked: Arc::clone(&acked),
            }))
        })
    };
    let conf = fast_config().with(config::MAX_SPOUT_PENDING, 1);
    let (worker, transfers) = recording_worker(spout_topology(factory), conf);
    let handle = Executor::new(&worker, ExecutorId::new(1, 1))
        .unwrap()
        .start()
        .unwrap();

    let out_count =
        |log: &TransferLog| log.lock().iter().filter(|(_, t)| t.source_stream == "out").count();

    assert!(await_until(Duration::from_secs(2), || out_count(&transfers) == 1));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(out_count(&transfers), 1, "pending budget of one holds emission");

    let root = {
        let transfers = transfers.lock();
        let (_, tuple) = transfers
            .iter()
            .find(|(_, t)| t.source_stream == "out")
            .unwrap();
        #[allow(clippy::cast_possible_wrap)]
        {
            tuple.message_id.unwrap() as i64
        }
    };
    handle
        .receive_queue()
        .publish(vec![AddressedTuple::to_task(
            TaskId(1),
            Tuple::new(TaskId(80), ACKER_ACK_STREAM_ID, vec![Value::Int(root)]),
        )])
        .unwrap();

    assert!(await_until(Duration::from_secs(2), || out_count(&transfers) >= 2));
    handle.shutdown();
}

// ---------------------------------------------------------------------------
// Ticks
// ---------------------------------------------------------------------------

#[test]
fn test_system_ticks_reach_the_bolt_at_the_configured_cadence() {
    let log: ExecLog = Arc::default();
    let topology = WorkerTopology::builder()
        .component(
            "record",
            spec(ComponentKind::Bolt, &[], recording_bolt_factory(&log)),
            vec![TaskId(1)],
        )
        .build()
        .unwrap();
    let conf = fast_config().with(config::TICK_TUPLE_FREQ_SECS, 1);
    let (worker, _) = recording_worker(topology, conf);
    let handle = Executor::new(&worker, ExecutorId::new(1, 1))
        .unwrap()
        .start()
        .unwrap();

    std::thread::sleep(Duration::from_millis(2300));
    handle.shutdown();

    let ticks: Vec<_> = log
        .lock()
        .iter()
        .filter(|(_, stream, _)| stream == TICK_STREAM_ID)
        .map(|(_, _, interval)| *interval)
        .collect();
    assert!((1..=3).contains(&ticks.len()), "saw {} ticks", ticks.len());
    assert!(ticks.iter().all(|&i| i == 1), "tick field carries the interval");
}

// ---------------------------------------------------------------------------
// Event logger sampling
// ---------------------------------------------------------------------------

#[test]
fn test_event_logger_receives_sampled_emissions() {
    let topology = WorkerTopology::builder()
        .component(
            "relay",
            spec(
                ComponentKind::Bolt,
                &[
                    ("hits", &["user", "seq"]),
                    (EVENTLOGGER_STREAM_ID, &["component", "message_id", "ts", "values"]),
                ],
                relay_factory("hits"),
            ),
            vec![TaskId(1)],
        )
        .component(
            "logger",
            spec(ComponentKind::Bolt, &[], noop_bolt_factory()),
            vec![TaskId(8)],
        )
        .component(
            "sink",
            spec(ComponentKind::Bolt, &[], noop_bolt_factory()),
            vec![TaskId(5)],
        )
        .subscribe("logger", "relay", EVENTLOGGER_STREAM_ID, GroupingSpec::All)
        .subscribe("sink", "relay", "hits", GroupingSpec::Shuffle)
        .build()
        .unwrap();
    let conf = fast_config().with(config::EVENTLOGGER_EXECUTORS, 1);
    let (worker, transfers) = recording_worker(topology, conf);
    worker.component_debug.write().insert(
        "relay".to_owned(),
        DebugOptions {
            enable: true,
            sampling_pct: 100.0,
        },
    );

    let handle = Executor::new(&worker, ExecutorId::new(1, 1))
        .unwrap()
        .start()
        .unwrap();
    handle
        .receive_queue()
        .publish(vec![AddressedTuple::to_task(
            TaskId(1),
            Tuple::new(TaskId(90), "data", vec![Value::from("a"), Value::Int(1)]),
        )])
        .unwrap();

    assert!(await_until(Duration::from_secs(2), || {
        transfers
            .lock()
            .iter()
            .any(|(_, t)| t.source_stream == EVENTLOGGER_STREAM_ID)
    }));
    let transfers = transfers.lock();
    let (dest, logged) = transfers
        .iter()
        .find(|(_, t)| t.source_stream == EVENTLOGGER_STREAM_ID)
        .unwrap();
    assert_eq!(*dest, TaskId(8));
    assert_eq!(logged.values[0], Value::from("relay"));
    assert_eq!(logged.values[1], Value::Null);
    handle.shutdown();
}

// ---------------------------------------------------------------------------
// Failure escalation and shutdown
// ---------------------------------------------------------------------------

struct FailingBolt;

impl Bolt for FailingBolt {
    fn execute(&mut self, _t: &Tuple, _c: &mut BoltCollector<'_>) -> Result<(), UserError> {
        Err("boom".into())
    }
}

#[test]
fn test_repeated_user_errors_escalate_to_suicide() {
    let topology = WorkerTopology::builder()
        .component(
            "bad",
            spec(
                ComponentKind::Bolt,
                &[],
                Arc::new(|| ComponentLogic::Bolt(Box::new(FailingBolt))),
            ),
            vec![TaskId(1)],
        )
        .build()
        .unwrap();
    let conf = fast_config()
        .with(config::MAX_ERROR_REPORT_PER_INTERVAL, 1)
        .with(config::ERROR_THROTTLE_INTERVAL_SECS, 60);
    let suicided = Arc::new(AtomicBool::new(false));
    let worker = {
        let suicided = Arc::clone(&suicided);
        WorkerHandle::builder("topo-test", Arc::new(topology))
            .config(conf)
            .address(WorkerAddress::new("local", 6700))
            .suicide_fn(Arc::new(move || suicided.store(true, Ordering::Release)))
            .build()
    };

    let handle = Executor::new(&worker, ExecutorId::new(1, 1))
        .unwrap()
        .start()
        .unwrap();
    let queue = handle.receive_queue();
    for n in 0..3 {
        queue
            .publish(vec![AddressedTuple::to_task(TaskId(1), data_tuple(n))])
            .unwrap();
    }

    assert!(await_until(Duration::from_secs(2), || {
        suicided.load(Ordering::Acquire)
    }));
    handle.shutdown();
}

struct ClosingBolt {
    closed: Arc<AtomicUsize>,
}

impl Bolt for ClosingBolt {
    fn execute(&mut self, _t: &Tuple, _c: &mut BoltCollector<'_>) -> Result<(), UserError> {
        Ok(())
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_shutdown_closes_every_task_logic() {
    let closed = Arc::new(AtomicUsize::new(0));
    let factory: ComponentLogicFactory = {
        let closed = Arc::clone(&closed);
        Arc::new(move || {
            ComponentLogic::Bolt(Box::new(ClosingBolt {
                closed: Arc::clone(&closed),
            }))
        })
    };
    let topology = WorkerTopology::builder()
        .component(
            "quiet",
            spec(ComponentKind::Bolt, &[], factory),
            vec![TaskId(1), TaskId(2)],
        )
        .build()
        .unwrap();
    let (worker, _) = recording_worker(topology, fast_config());

    let handle = Executor::new(&worker, ExecutorId::new(1, 2))
        .unwrap()
        .start()
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    handle.shutdown();

    assert_eq!(closed.load(Ordering::SeqCst), 2);
}
