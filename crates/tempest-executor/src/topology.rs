//! Static topology metadata visible to a worker.
//!
//! [`WorkerTopology`] answers the questions an executor asks at construction
//! time: which component owns a task id, which tasks a component expands to,
//! which downstream components subscribe to each of its streams and with what
//! grouping, and what fields each stream declares. The structure is built once
//! by the worker bootstrap and is immutable afterwards.

use std::fmt;
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::component::ComponentLogicFactory;
use crate::grouping::CustomGrouping;
use crate::tuple::{ComponentId, StreamId, TaskId, SYSTEM_STREAM_ID};

/// Whether a component sources tuples or transforms them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    /// Tuple source driven by `next_tuple`.
    Spout,
    /// Tuple transformer driven by `execute`.
    Bolt,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spout => write!(f, "spout"),
            Self::Bolt => write!(f, "bolt"),
        }
    }
}

/// Factory producing a fresh custom grouping instance per compiled grouper.
pub type CustomGrouperFactory = Arc<dyn Fn() -> Box<dyn CustomGrouping> + Send + Sync>;

/// Declared grouping between a stream and one subscribing component.
#[derive(Clone)]
pub enum GroupingSpec {
    /// Round-robin across downstream tasks; load-aware when feedback exists.
    Shuffle,
    /// Hash of the named field values modulo downstream task count.
    Fields(Vec<String>),
    /// Every downstream task receives the tuple.
    All,
    /// Always the lowest downstream task id.
    Global,
    /// Declared "none"; behaves exactly like shuffle.
    NoneGrouping,
    /// Destination task supplied by the emitter.
    Direct,
    /// Prefer downstream tasks hosted on the emitting worker, else shuffle.
    LocalOrShuffle,
    /// User-supplied grouping function.
    Custom(CustomGrouperFactory),
}

impl fmt::Debug for GroupingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shuffle => write!(f, "Shuffle"),
            Self::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            Self::All => write!(f, "All"),
            Self::Global => write!(f, "Global"),
            Self::NoneGrouping => write!(f, "NoneGrouping"),
            Self::Direct => write!(f, "Direct"),
            Self::LocalOrShuffle => write!(f, "LocalOrShuffle"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Declaration of one component: kind, output streams, options, user logic.
#[derive(Clone)]
pub struct ComponentSpec {
    /// Spout or bolt.
    pub kind: ComponentKind,
    /// Declared output streams with their field names, in declaration order.
    pub streams: Vec<(StreamId, Vec<String>)>,
    /// JSON-encoded component-level option blob, if any.
    pub json_conf: Option<String>,
    /// Factory instantiating the user logic, once per task.
    pub logic: ComponentLogicFactory,
}

impl fmt::Debug for ComponentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSpec")
            .field("kind", &self.kind)
            .field("streams", &self.streams)
            .field("json_conf", &self.json_conf)
            .finish_non_exhaustive()
    }
}

/// Identity of one executor: an inclusive range of task ids.
///
/// All ids in the range belong to one component. `task_ids()` yields the
/// range in ascending order, which is also the broadcast delivery order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExecutorId {
    /// First task id of the range.
    pub first: i32,
    /// Last task id of the range (inclusive).
    pub last: i32,
}

impl ExecutorId {
    /// Creates an executor id covering `[first, last]`.
    #[must_use]
    pub fn new(first: i32, last: i32) -> Self {
        Self { first, last }
    }

    /// Expands the range into ascending task ids.
    #[must_use]
    pub fn task_ids(&self) -> Vec<TaskId> {
        (self.first..=self.last).map(TaskId).collect()
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.first, self.last)
    }
}

/// Errors raised while assembling a [`WorkerTopology`].
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// A subscription or task assignment references an unknown component.
    #[error("unknown component {0}")]
    UnknownComponent(ComponentId),

    /// A subscription references a stream the source never declared.
    #[error("component {component} declares no stream {stream}")]
    UnknownStream {
        /// Source component of the subscription.
        component: ComponentId,
        /// The undeclared stream.
        stream: StreamId,
    },

    /// The same task id was assigned to more than one component.
    #[error("task {0} assigned twice")]
    DuplicateTask(TaskId),

    /// An executor range is empty or spans more than one component.
    #[error("invalid executor range {0}: {1}")]
    InvalidExecutor(ExecutorId, String),
}

/// One subscription edge: `(source component, stream) -> grouping`.
#[derive(Debug, Clone)]
struct Subscription {
    source: ComponentId,
    stream: StreamId,
    grouping: GroupingSpec,
}

/// Immutable topology view shared by every executor of a worker.
pub struct WorkerTopology {
    components: Vec<(ComponentId, ComponentSpec)>,
    tasks_by_component: FxHashMap<ComponentId, Vec<TaskId>>,
    task_to_component: FxHashMap<TaskId, ComponentId>,
    /// `source component -> stream -> [(downstream component, grouping)]`,
    /// downstream entries in component-declaration order.
    targets: FxHashMap<ComponentId, FxHashMap<StreamId, Vec<(ComponentId, GroupingSpec)>>>,
}

impl fmt::Debug for WorkerTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerTopology")
            .field("components", &self.components.len())
            .field("tasks", &self.task_to_component.len())
            .finish_non_exhaustive()
    }
}

impl WorkerTopology {
    /// Starts building a topology.
    #[must_use]
    pub fn builder() -> WorkerTopologyBuilder {
        WorkerTopologyBuilder::default()
    }

    /// Returns the declaration of `component`.
    #[must_use]
    pub fn component(&self, component: &str) -> Option<&ComponentSpec> {
        self.components
            .iter()
            .find(|(id, _)| id == component)
            .map(|(_, spec)| spec)
    }

    /// Returns the component owning `task`.
    #[must_use]
    pub fn component_of(&self, task: TaskId) -> Option<&str> {
        self.task_to_component.get(&task).map(String::as_str)
    }

    /// Returns the ascending task ids of `component`.
    #[must_use]
    pub fn tasks_of(&self, component: &str) -> &[TaskId] {
        self.tasks_by_component
            .get(component)
            .map_or(&[], Vec::as_slice)
    }

    /// Returns the subscribers of `(component, stream)` in declaration order.
    #[must_use]
    pub fn targets_of(&self, component: &str, stream: &str) -> &[(ComponentId, GroupingSpec)] {
        self.targets
            .get(component)
            .and_then(|streams| streams.get(stream))
            .map_or(&[], Vec::as_slice)
    }

    /// Returns the declared field names of `(component, stream)`.
    #[must_use]
    pub fn output_fields(&self, component: &str, stream: &str) -> Option<&[String]> {
        self.component(component)?
            .streams
            .iter()
            .find(|(s, _)| s == stream)
            .map(|(_, fields)| fields.as_slice())
    }

    /// Returns the full `task -> component` map.
    #[must_use]
    pub fn task_to_component(&self) -> &FxHashMap<TaskId, ComponentId> {
        &self.task_to_component
    }

    /// Validates that `executor_id` is non-empty and single-component, and
    /// returns that component id.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidExecutor`] for empty ranges or ranges
    /// spanning component boundaries.
    pub fn executor_component(&self, executor_id: ExecutorId) -> Result<&str, TopologyError> {
        let ids = executor_id.task_ids();
        let Some(&first) = ids.first() else {
            return Err(TopologyError::InvalidExecutor(
                executor_id,
                "empty task range".into(),
            ));
        };
        let component = self.component_of(first).ok_or_else(|| {
            TopologyError::InvalidExecutor(executor_id, format!("unassigned task {first}"))
        })?;
        for &task in &ids[1..] {
            if self.component_of(task) != Some(component) {
                return Err(TopologyError::InvalidExecutor(
                    executor_id,
                    format!("task {task} belongs to a different component"),
                ));
            }
        }
        Ok(component)
    }
}

/// Builder assembling a [`WorkerTopology`].
#[derive(Default)]
pub struct WorkerTopologyBuilder {
    components: Vec<(ComponentId, ComponentSpec)>,
    assignments: Vec<(ComponentId, Vec<TaskId>)>,
    subscriptions: Vec<(ComponentId, Subscription)>,
}

impl WorkerTopologyBuilder {
    /// Declares a component with its task assignment.
    #[must_use]
    pub fn component(
        mut self,
        id: impl Into<ComponentId>,
        spec: ComponentSpec,
        tasks: Vec<TaskId>,
    ) -> Self {
        let id = id.into();
        self.components.push((id.clone(), spec));
        self.assignments.push((id, tasks));
        self
    }

    /// Subscribes `downstream` to `(source, stream)` with `grouping`.
    #[must_use]
    pub fn subscribe(
        mut self,
        downstream: impl Into<ComponentId>,
        source: impl Into<ComponentId>,
        stream: impl Into<StreamId>,
        grouping: GroupingSpec,
    ) -> Self {
        self.subscriptions.push((
            downstream.into(),
            Subscription {
                source: source.into(),
                stream: stream.into(),
                grouping,
            },
        ));
        self
    }

    /// Finalizes the topology.
    ///
    /// Every component implicitly declares the `__system` stream; explicit
    /// declarations are left untouched.
    ///
    /// # Errors
    ///
    /// Returns a [`TopologyError`] for duplicate task assignments or
    /// subscriptions referencing unknown components or streams.
    pub fn build(mut self) -> Result<WorkerTopology, TopologyError> {
        for (_, spec) in &mut self.components {
            if !spec.streams.iter().any(|(s, _)| s == SYSTEM_STREAM_ID) {
                spec.streams
                    .push((SYSTEM_STREAM_ID.to_owned(), vec!["event".to_owned()]));
            }
        }

        let mut tasks_by_component: FxHashMap<ComponentId, Vec<TaskId>> = FxHashMap::default();
        let mut task_to_component: FxHashMap<TaskId, ComponentId> = FxHashMap::default();
        for (component, tasks) in self.assignments {
            if !self.components.iter().any(|(id, _)| *id == component) {
                return Err(TopologyError::UnknownComponent(component));
            }
            for task in &tasks {
                if task_to_component.insert(*task, component.clone()).is_some() {
                    return Err(TopologyError::DuplicateTask(*task));
                }
            }
            let entry = tasks_by_component.entry(component).or_default();
            entry.extend(tasks);
            entry.sort_unstable();
        }

        for (downstream_id, sub) in &self.subscriptions {
            if !self.components.iter().any(|(id, _)| id == downstream_id) {
                return Err(TopologyError::UnknownComponent(downstream_id.clone()));
            }
            let source_spec = self
                .components
                .iter()
                .find(|(id, _)| *id == sub.source)
                .map(|(_, spec)| spec)
                .ok_or_else(|| TopologyError::UnknownComponent(sub.source.clone()))?;
            if !source_spec.streams.iter().any(|(s, _)| *s == sub.stream) {
                return Err(TopologyError::UnknownStream {
                    component: sub.source.clone(),
                    stream: sub.stream.clone(),
                });
            }
        }

        // Invert subscriptions into per-source target lists, walking
        // components in declaration order so flattened grouper output follows
        // component-declaration order.
        let mut targets: FxHashMap<ComponentId, FxHashMap<StreamId, Vec<(ComponentId, GroupingSpec)>>> =
            FxHashMap::default();
        for (downstream_id, _) in &self.components {
            for (_, sub) in self
                .subscriptions
                .iter()
                .filter(|(d, _)| d == downstream_id)
            {
                targets
                    .entry(sub.source.clone())
                    .or_default()
                    .entry(sub.stream.clone())
                    .or_default()
                    .push((downstream_id.clone(), sub.grouping.clone()));
            }
        }

        Ok(WorkerTopology {
            components: self.components,
            tasks_by_component,
            task_to_component,
            targets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentLogic;
    use crate::testutil::noop_bolt_spec;

    fn bolt_spec(streams: Vec<(&str, Vec<&str>)>) -> ComponentSpec {
        let mut spec = noop_bolt_spec();
        spec.streams = streams
            .into_iter()
            .map(|(s, fields)| {
                (
                    s.to_owned(),
                    fields.into_iter().map(str::to_owned).collect(),
                )
            })
            .collect();
        spec
    }

    #[test]
    fn test_executor_id_expansion() {
        assert_eq!(
            ExecutorId::new(3, 5).task_ids(),
            vec![TaskId(3), TaskId(4), TaskId(5)]
        );
        assert_eq!(ExecutorId::new(7, 7).task_ids(), vec![TaskId(7)]);
        assert_eq!(format!("{}", ExecutorId::new(3, 5)), "[3 5]");
    }

    #[test]
    fn test_lookup_surfaces() {
        let topo = WorkerTopology::builder()
            .component(
                "words",
                bolt_spec(vec![("default", vec!["word"])]),
                vec![TaskId(1), TaskId(2)],
            )
            .component(
                "counts",
                bolt_spec(vec![("default", vec!["word", "count"])]),
                vec![TaskId(3)],
            )
            .subscribe("counts", "words", "default", GroupingSpec::Shuffle)
            .build()
            .unwrap();

        assert_eq!(topo.component_of(TaskId(2)), Some("words"));
        assert_eq!(topo.tasks_of("words"), &[TaskId(1), TaskId(2)]);
        let targets = topo.targets_of("words", "default");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].0, "counts");
        assert_eq!(
            topo.output_fields("counts", "default"),
            Some(&["word".to_owned(), "count".to_owned()][..])
        );
    }

    #[test]
    fn test_system_stream_implicitly_declared() {
        let topo = WorkerTopology::builder()
            .component("words", bolt_spec(vec![("default", vec!["word"])]), vec![TaskId(1)])
            .build()
            .unwrap();
        assert!(topo.output_fields("words", SYSTEM_STREAM_ID).is_some());
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let err = WorkerTopology::builder()
            .component("a", bolt_spec(vec![]), vec![TaskId(1)])
            .component("b", bolt_spec(vec![]), vec![TaskId(1)])
            .build()
            .unwrap_err();
        assert!(matches!(err, TopologyError::DuplicateTask(TaskId(1))));
    }

    #[test]
    fn test_subscription_to_unknown_stream_rejected() {
        let err = WorkerTopology::builder()
            .component("a", bolt_spec(vec![("default", vec![])]), vec![TaskId(1)])
            .component("b", bolt_spec(vec![]), vec![TaskId(2)])
            .subscribe("b", "a", "missing", GroupingSpec::Shuffle)
            .build()
            .unwrap_err();
        assert!(matches!(err, TopologyError::UnknownStream { .. }));
    }

    #[test]
    fn test_executor_component_validation() {
        let topo = WorkerTopology::builder()
            .component("a", bolt_spec(vec![]), vec![TaskId(1), TaskId(2)])
            .component("b", bolt_spec(vec![]), vec![TaskId(3)])
            .build()
            .unwrap();

        assert_eq!(topo.executor_component(ExecutorId::new(1, 2)).unwrap(), "a");
        assert!(topo.executor_component(ExecutorId::new(2, 3)).is_err());
        assert!(topo.executor_component(ExecutorId::new(9, 9)).is_err());
    }

    #[test]
    fn test_component_logic_factory_runs_per_task() {
        let spec = noop_bolt_spec();
        match ((*spec.logic)(), (*spec.logic)()) {
            (ComponentLogic::Bolt(_), ComponentLogic::Bolt(_)) => {}
            _ => panic!("expected bolt logic"),
        }
    }
}
