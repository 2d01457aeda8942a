use crate::frame::{Frame, Observed};
use dashmap::DashSet;
use once_cell::sync::Lazy;
use rustc_hash::FxHasher;
use std::{
    fmt::{self, Write},
    hash::BuildHasherDefault,
    num::ParseIntError,
    ptr::NonNull,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

/// The identity of a task.
///
/// Ids are assigned from a process-wide counter when a task is first polled,
/// and are never reused.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for TaskId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(TaskId)
    }
}

#[derive(Hash, Eq, PartialEq)]
#[repr(transparent)]
struct Task(NonNull<Frame>);

unsafe impl Send for Task {}
unsafe impl Sync for Task {}

static TASKS: Lazy<DashSet<Task, BuildHasherDefault<FxHasher>>> = Lazy::new(DashSet::default);

/// Register a given root frame as a task.
///
/// The frame must call [`deregister`] before it is freed.
pub(crate) fn register(root_frame: NonNull<Frame>) {
    let unique = TASKS.insert(Task(root_frame));
    debug_assert!(unique);
}

/// De-register a given root frame as a task.
pub(crate) fn deregister(root_frame: NonNull<Frame>) {
    TASKS.remove(&Task(root_frame));
}

/// Render every live task as a `task <id>:` header followed by its frame
/// tree. Tasks are separated by a blank line.
pub(crate) fn dump() -> String {
    let mut dump = String::new();
    for task in TASKS.iter() {
        if !dump.is_empty() {
            dump.push('\n');
        }
        // writing to a `String` is infallible
        let _ = task.dump(&mut dump);
    }
    dump
}

impl Task {
    fn dump<W: Write>(&self, w: &mut W) -> fmt::Result {
        // SAFETY: the registry's read guard is held by the caller, and a root
        // frame deregisters itself before it is freed.
        let frame = unsafe { self.0.as_ref() };

        let id = match frame.task_id() {
            Some(id) => id,
            None => return Ok(()),
        };

        writeln!(w, "task {}:", id)?;
        match frame.observe() {
            Observed::Idle(_guard) => unsafe {
                // SAFETY: the tree is locked, or is being polled by this very
                // thread.
                frame.fmt_tree(w)
            },
            Observed::Polling => {
                writeln!(w, "╼ {}", frame.location())?;
                writeln!(w, "  └┈ [POLLING]")
            }
            Observed::Poisoned => {
                writeln!(w, "╼ {}", frame.location())?;
                writeln!(w, "  └┈ [POISONED]")
            }
        }
    }
}
