use crate::{exclusion, tasks, TaskId};
use rustc_hash::FxHashMap;
use std::collections::hash_map;

/// One task, as found in a [task dump][crate::taskdump].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskRecord {
    /// The task's identity.
    pub id: TaskId,
    /// The task's full block in the dump, header included.
    pub trace: String,
}

/// Split a task dump into one record per task.
///
/// Blocks without a frame tree, and blocks whose header carries no task id,
/// are skipped.
pub fn parse(dump: &str) -> impl Iterator<Item = TaskRecord> + '_ {
    dump.split("\n\n").filter_map(|block| {
        let (header, body) = block.split_once('\n')?;
        if body.trim().is_empty() {
            return None;
        }
        let id = match parse_header(header) {
            Some(id) => id,
            None => {
                tracing::trace!(header, "skipping task block without an id");
                return None;
            }
        };
        Some(TaskRecord {
            id,
            trace: block.trim_end().to_owned(),
        })
    })
}

fn parse_header(header: &str) -> Option<TaskId> {
    header
        .trim()
        .strip_prefix("task ")?
        .strip_suffix(':')?
        .parse()
        .ok()
}

/// The body of a record's trace, without its header line.
fn body(trace: &str) -> &str {
    trace.split_once('\n').map_or("", |(_, body)| body.trim())
}

/// The set of interesting tasks alive at one instant, keyed by [`TaskId`].
///
/// Tasks matched by an [exclusion rule](crate::exclusion::RULES) are never
/// part of a snapshot.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    tasks: FxHashMap<TaskId, String>,
}

impl Snapshot {
    /// Capture the interesting tasks alive right now.
    pub fn take() -> Self {
        Self::from_dump(&tasks::dump())
    }

    /// Build a snapshot from the text of a task dump.
    pub fn from_dump(dump: &str) -> Self {
        Self::from_records(parse(dump))
    }

    /// Build a snapshot from task records, dropping excluded tasks.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = TaskRecord>,
    {
        let tasks = records
            .into_iter()
            .filter(|record| match exclusion::matching(body(&record.trace)) {
                Some(rule) => {
                    tracing::trace!(id = %record.id, reason = rule.reason, "excluding task");
                    false
                }
                None => true,
            })
            .map(|record| (record.id, record.trace))
            .collect();
        Self { tasks }
    }

    /// The number of tasks in this snapshot.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no interesting task was alive.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether the task with the given id is part of this snapshot.
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// The trace of the task with the given id.
    pub fn trace(&self, id: TaskId) -> Option<&str> {
        self.tasks.get(&id).map(String::as_str)
    }

    /// The ids of the tasks in this snapshot, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.keys().copied()
    }

    /// The `(id, trace)` pairs of this snapshot, in no particular order.
    pub fn iter(&self) -> Iter<'_> {
        Iter(self.tasks.iter())
    }

    /// Traces of tasks in this snapshot whose id is absent from `baseline`,
    /// in no particular order.
    pub fn leaked_since(&self, baseline: &Snapshot) -> Vec<&str> {
        self.iter()
            .filter(|(id, _)| !baseline.contains(*id))
            .map(|(_, trace)| trace)
            .collect()
    }

    /// Drop the tasks whose trace body contains any of `patterns`.
    pub(crate) fn without(mut self, patterns: &[String]) -> Self {
        if !patterns.is_empty() {
            self.tasks.retain(|_, trace| {
                let body = body(trace);
                !patterns.iter().any(|pattern| body.contains(pattern.as_str()))
            });
        }
        self
    }
}

/// An iterator over the `(id, trace)` pairs of a [`Snapshot`].
pub struct Iter<'a>(hash_map::Iter<'a, TaskId, String>);

impl<'a> Iterator for Iter<'a> {
    type Item = (TaskId, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(id, trace)| (*id, trace.as_str()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = (TaskId, &'a str);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
