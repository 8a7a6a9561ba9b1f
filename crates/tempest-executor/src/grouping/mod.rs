//! Compiled stream groupings.
//!
//! A [`Grouper`] maps `(stream, values)` to the downstream task ids that
//! should receive a tuple. Groupers are compiled once per executor from the
//! declarative [`GroupingSpec`](crate::topology::GroupingSpec)s of the
//! topology and are immutable afterwards; round-robin cursors live in
//! atomics so compiled groupers can be shared by reference.
//!
//! The declarative `NoneGrouping` and `LocalOrShuffle` kinds compile down to
//! shuffle groupers — none is shuffle by definition, and local-or-shuffle
//! resolves its preference at compile time because task placement is static.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use fxhash::{FxHashMap, FxHashSet, FxHasher};
use parking_lot::Mutex;
use smallvec::{smallvec, SmallVec};
use tracing::warn;

use crate::topology::{GroupingSpec, WorkerTopology};
use crate::tuple::{ComponentId, StreamId, TaskId, Value, Values};

/// Downstream task ids chosen for one tuple.
pub type ChosenTasks = SmallVec<[TaskId; 4]>;

/// Dynamic load feedback, `task -> load in [0, 1]`.
#[derive(Clone, Debug, Default)]
pub struct LoadMap(FxHashMap<TaskId, f64>);

impl LoadMap {
    /// Creates an empty load map (all tasks idle).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the load of `task`.
    pub fn set(&mut self, task: TaskId, load: f64) {
        self.0.insert(task, load.clamp(0.0, 1.0));
    }

    /// Returns the load of `task`, zero when unreported.
    #[must_use]
    pub fn get(&self, task: TaskId) -> f64 {
        self.0.get(&task).copied().unwrap_or(0.0)
    }
}

/// User-supplied grouping function, optionally load-aware.
pub trait CustomGrouping: Send {
    /// Called once at compile time with the ascending downstream task ids.
    fn prepare(&mut self, out_tasks: &[TaskId]);

    /// Chooses destination tasks for one tuple.
    fn choose(&mut self, values: &Values, load: Option<&LoadMap>) -> Vec<TaskId>;
}

/// Errors raised while compiling groupers.
#[derive(Debug, thiserror::Error)]
pub enum GroupingError {
    /// A fields grouping names a field the stream does not declare.
    #[error("stream {stream} declares no field {field}")]
    UnknownField {
        /// Stream the grouping was declared on.
        stream: StreamId,
        /// The missing field.
        field: String,
    },

    /// A subscribing component has no tasks assigned.
    #[error("component {0} has no tasks")]
    NoTasks(ComponentId),
}

/// A compiled grouping function for one `(stream, downstream component)`.
pub enum Grouper {
    /// Round-robin over the downstream tasks; with load feedback, the less
    /// loaded of two consecutive candidates wins.
    Shuffle {
        /// Downstream task ids, ascending.
        tasks: Vec<TaskId>,
        /// Round-robin cursor.
        cursor: AtomicUsize,
    },
    /// Hash of selected field values modulo the downstream task count.
    Fields {
        /// Positions of the grouped fields in the stream's declared fields.
        indices: Vec<usize>,
        /// Downstream task ids, ascending.
        tasks: Vec<TaskId>,
    },
    /// Every downstream task.
    All {
        /// Downstream task ids, ascending.
        tasks: Vec<TaskId>,
    },
    /// Always the lowest downstream task id.
    Global {
        /// The lowest downstream task id.
        task: TaskId,
    },
    /// Destination supplied by the emitter; membership is validated.
    Direct {
        /// Downstream task ids, ascending.
        tasks: Vec<TaskId>,
    },
    /// User-supplied grouping.
    Custom {
        /// The user grouping, serialized behind a lock.
        inner: Mutex<Box<dyn CustomGrouping>>,
    },
}

impl fmt::Debug for Grouper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shuffle { tasks, .. } => f.debug_tuple("Shuffle").field(tasks).finish(),
            Self::Fields { indices, tasks } => f
                .debug_struct("Fields")
                .field("indices", indices)
                .field("tasks", tasks)
                .finish(),
            Self::All { tasks } => f.debug_tuple("All").field(tasks).finish(),
            Self::Global { task } => f.debug_tuple("Global").field(task).finish(),
            Self::Direct { tasks } => f.debug_tuple("Direct").field(tasks).finish(),
            Self::Custom { .. } => write!(f, "Custom(..)"),
        }
    }
}

impl Grouper {
    /// Chooses destination tasks for one tuple.
    ///
    /// `direct_dest` is the emitter-supplied destination for direct streams;
    /// other kinds ignore it. An invalid direct destination yields no tasks.
    pub fn choose(
        &self,
        values: &Values,
        direct_dest: Option<TaskId>,
        load: Option<&LoadMap>,
    ) -> ChosenTasks {
        match self {
            Self::Shuffle { tasks, cursor } => {
                let first = tasks[cursor.fetch_add(1, Ordering::Relaxed) % tasks.len()];
                match load {
                    None => smallvec![first],
                    Some(map) => {
                        let second = tasks[cursor.fetch_add(1, Ordering::Relaxed) % tasks.len()];
                        if map.get(second) < map.get(first) {
                            smallvec![second]
                        } else {
                            smallvec![first]
                        }
                    }
                }
            }
            Self::Fields { indices, tasks } => {
                let mut hasher = FxHasher::default();
                for &index in indices {
                    values.get(index).unwrap_or(&Value::Null).hash(&mut hasher);
                }
                let slot = (hasher.finish() % tasks.len() as u64) as usize;
                smallvec![tasks[slot]]
            }
            Self::All { tasks } => tasks.iter().copied().collect(),
            Self::Global { task } => smallvec![*task],
            Self::Direct { tasks } => match direct_dest {
                Some(dest) if tasks.binary_search(&dest).is_ok() => smallvec![dest],
                Some(dest) => {
                    warn!(task = %dest, "direct emit to task outside downstream set, dropping");
                    SmallVec::new()
                }
                None => {
                    warn!("direct stream emitted without a destination, dropping");
                    SmallVec::new()
                }
            },
            Self::Custom { inner } => inner.lock().choose(values, load).into_iter().collect(),
        }
    }
}

/// Compiled groupers of one executor, `stream -> component -> grouper`.
///
/// A declared stream with no subscribers is recorded as `None`, which
/// short-circuits emission; a `Some` entry is never empty.
#[derive(Debug)]
pub struct GrouperRegistry {
    streams: FxHashMap<StreamId, Option<Vec<(ComponentId, Grouper)>>>,
}

/// Resolution of a stream against a [`GrouperRegistry`].
pub enum StreamTargets<'a> {
    /// The stream was never declared by this component.
    Unknown,
    /// Declared, but nothing subscribes to it.
    NoSubscribers,
    /// Subscribing components in declaration order.
    Subscribers(&'a [(ComponentId, Grouper)]),
}

impl GrouperRegistry {
    /// Compiles the outbound groupers of `component`.
    ///
    /// `local_tasks` is the set of tasks hosted on this worker, consulted by
    /// local-or-shuffle groupings.
    ///
    /// # Errors
    ///
    /// Returns [`GroupingError`] for fields groupings over undeclared fields
    /// or subscribers without tasks.
    pub fn build(
        topology: &WorkerTopology,
        component: &str,
        local_tasks: &FxHashSet<TaskId>,
    ) -> Result<Self, GroupingError> {
        let mut streams = FxHashMap::default();
        let Some(spec) = topology.component(component) else {
            return Ok(Self { streams });
        };

        for (stream, fields) in &spec.streams {
            let targets = topology.targets_of(component, stream);
            if targets.is_empty() {
                streams.insert(stream.clone(), None);
                continue;
            }
            let mut compiled = Vec::with_capacity(targets.len());
            for (downstream, grouping) in targets {
                let out_tasks = topology.tasks_of(downstream);
                if out_tasks.is_empty() {
                    return Err(GroupingError::NoTasks(downstream.clone()));
                }
                compiled.push((
                    downstream.clone(),
                    compile(grouping, stream, fields, out_tasks, local_tasks)?,
                ));
            }
            streams.insert(stream.clone(), Some(compiled));
        }
        Ok(Self { streams })
    }

    /// Resolves `stream` to its subscribers.
    #[must_use]
    pub fn targets(&self, stream: &str) -> StreamTargets<'_> {
        match self.streams.get(stream) {
            None => StreamTargets::Unknown,
            Some(None) => StreamTargets::NoSubscribers,
            Some(Some(entries)) => StreamTargets::Subscribers(entries),
        }
    }
}

fn compile(
    grouping: &GroupingSpec,
    stream: &str,
    stream_fields: &[String],
    out_tasks: &[TaskId],
    local_tasks: &FxHashSet<TaskId>,
) -> Result<Grouper, GroupingError> {
    let tasks = out_tasks.to_vec();
    Ok(match grouping {
        GroupingSpec::Shuffle | GroupingSpec::NoneGrouping => Grouper::Shuffle {
            tasks,
            cursor: AtomicUsize::new(0),
        },
        GroupingSpec::LocalOrShuffle => {
            let local: Vec<TaskId> = tasks
                .iter()
                .copied()
                .filter(|t| local_tasks.contains(t))
                .collect();
            Grouper::Shuffle {
                tasks: if local.is_empty() { tasks } else { local },
                cursor: AtomicUsize::new(0),
            }
        }
        GroupingSpec::Fields(names) => {
            let mut indices = Vec::with_capacity(names.len());
            for name in names {
                let index = stream_fields.iter().position(|f| f == name).ok_or_else(|| {
                    GroupingError::UnknownField {
                        stream: stream.to_owned(),
                        field: name.clone(),
                    }
                })?;
                indices.push(index);
            }
            Grouper::Fields { indices, tasks }
        }
        GroupingSpec::All => Grouper::All { tasks },
        GroupingSpec::Global => Grouper::Global { task: tasks[0] },
        GroupingSpec::Direct => Grouper::Direct { tasks },
        GroupingSpec::Custom(factory) => {
            let mut custom = (**factory)();
            custom.prepare(&tasks);
            Grouper::Custom {
                inner: Mutex::new(custom),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::noop_bolt_spec;
    use crate::topology::WorkerTopology;
    use fxhash::hash64;

    fn ids(raw: &[i32]) -> Vec<TaskId> {
        raw.iter().copied().map(TaskId).collect()
    }

    fn shuffle(tasks: &[i32]) -> Grouper {
        Grouper::Shuffle {
            tasks: ids(tasks),
            cursor: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_shuffle_round_robin() {
        let grouper = shuffle(&[1, 2, 3]);
        let picks: Vec<TaskId> = (0..6)
            .map(|_| grouper.choose(&vec![], None, None)[0])
            .collect();
        assert_eq!(picks, ids(&[1, 2, 3, 1, 2, 3]));
    }

    #[test]
    fn test_shuffle_biases_away_from_loaded_tasks() {
        let grouper = shuffle(&[1, 2]);
        let mut load = LoadMap::new();
        load.set(TaskId(1), 0.9);

        for _ in 0..8 {
            assert_eq!(grouper.choose(&vec![], None, Some(&load))[0], TaskId(2));
        }
    }

    #[test]
    fn test_fields_grouping_is_deterministic() {
        let grouper = Grouper::Fields {
            indices: vec![0],
            tasks: ids(&[10, 11, 12, 13]),
        };
        let values = vec![Value::from("a"), Value::Int(1)];

        let expected = {
            let mut hasher = FxHasher::default();
            Value::from("a").hash(&mut hasher);
            TaskId(10 + (hasher.finish() % 4) as i32)
        };
        for extra in 0..20 {
            let values_again = vec![Value::from("a"), Value::Int(extra)];
            assert_eq!(grouper.choose(&values_again, None, None)[0], expected);
        }
        assert_eq!(grouper.choose(&values, None, None)[0], expected);
    }

    #[test]
    fn test_fields_grouping_missing_field_hashes_null() {
        let grouper = Grouper::Fields {
            indices: vec![5],
            tasks: ids(&[1, 2]),
        };
        let a = grouper.choose(&vec![Value::Int(1)], None, None);
        let b = grouper.choose(&vec![Value::Int(2)], None, None);
        assert_eq!(a, b);
        assert_eq!(hash64(&Value::Null) % 2, u64::from(a[0].0 != 1));
    }

    #[test]
    fn test_all_and_global() {
        let all = Grouper::All { tasks: ids(&[4, 5, 6]) };
        assert_eq!(all.choose(&vec![], None, None).to_vec(), ids(&[4, 5, 6]));

        let global = Grouper::Global { task: TaskId(4) };
        assert_eq!(global.choose(&vec![], None, None).to_vec(), ids(&[4]));
    }

    #[test]
    fn test_direct_validates_membership() {
        let grouper = Grouper::Direct { tasks: ids(&[7, 8]) };
        assert_eq!(
            grouper.choose(&vec![], Some(TaskId(8)), None).to_vec(),
            ids(&[8])
        );
        assert!(grouper.choose(&vec![], Some(TaskId(9)), None).is_empty());
        assert!(grouper.choose(&vec![], None, None).is_empty());
    }

    #[test]
    fn test_custom_grouping_prepared_and_consulted() {
        struct FirstTask {
            tasks: Vec<TaskId>,
        }
        impl CustomGrouping for FirstTask {
            fn prepare(&mut self, out_tasks: &[TaskId]) {
                self.tasks = out_tasks.to_vec();
            }
            fn choose(&mut self, _values: &Values, _load: Option<&LoadMap>) -> Vec<TaskId> {
                vec![self.tasks[0]]
            }
        }

        let mut custom = FirstTask { tasks: vec![] };
        custom.prepare(&ids(&[3, 4]));
        let grouper = Grouper::Custom {
            inner: Mutex::new(Box::new(custom)),
        };
        assert_eq!(grouper.choose(&vec![], None, None).to_vec(), ids(&[3]));
    }

    fn test_topology() -> WorkerTopology {
        let mut src = noop_bolt_spec();
        src.streams = vec![
            ("hits".to_owned(), vec!["user".to_owned()]),
            ("orphan".to_owned(), vec![]),
        ];
        WorkerTopology::builder()
            .component("src", src, ids(&[1]))
            .component("dst", noop_bolt_spec(), ids(&[10, 11, 12, 13]))
            .subscribe("dst", "src", "hits", GroupingSpec::Fields(vec!["user".to_owned()]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_registry_marks_subscriberless_streams() {
        let topo = test_topology();
        let registry = GrouperRegistry::build(&topo, "src", &FxHashSet::default()).unwrap();

        assert!(matches!(registry.targets("hits"), StreamTargets::Subscribers(_)));
        assert!(matches!(registry.targets("orphan"), StreamTargets::NoSubscribers));
        assert!(matches!(registry.targets("missing"), StreamTargets::Unknown));
    }

    #[test]
    fn test_registry_rejects_unknown_grouping_field() {
        let mut src = noop_bolt_spec();
        src.streams = vec![("hits".to_owned(), vec!["user".to_owned()])];
        let topo = WorkerTopology::builder()
            .component("src", src, ids(&[1]))
            .component("dst", noop_bolt_spec(), ids(&[2]))
            .subscribe("dst", "src", "hits", GroupingSpec::Fields(vec!["nope".to_owned()]))
            .build()
            .unwrap();

        let err = GrouperRegistry::build(&topo, "src", &FxHashSet::default()).unwrap_err();
        assert!(matches!(err, GroupingError::UnknownField { .. }));
    }

    #[test]
    fn test_local_or_shuffle_prefers_local_tasks() {
        let mut src = noop_bolt_spec();
        src.streams = vec![("hits".to_owned(), vec![])];
        let topo = WorkerTopology::builder()
            .component("src", src, ids(&[1]))
            .component("dst", noop_bolt_spec(), ids(&[10, 11, 12]))
            .subscribe("dst", "src", "hits", GroupingSpec::LocalOrShuffle)
            .build()
            .unwrap();

        let local: FxHashSet<TaskId> = [TaskId(11)].into_iter().collect();
        let registry = GrouperRegistry::build(&topo, "src", &local).unwrap();
        let StreamTargets::Subscribers(entries) = registry.targets("hits") else {
            panic!("expected subscribers");
        };
        for _ in 0..5 {
            assert_eq!(entries[0].1.choose(&vec![], None, None)[0], TaskId(11));
        }
    }
}
