use crate::cell::{thread_local, Cell, UnsafeCell};
use crate::sync::{Mutex, MutexGuard, TryLockError};
use crate::tasks::{self, TaskId};
use crate::Location;
use std::fmt::{self, Write};
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::PoisonError;

thread_local! {
    /// The [`Frame`] of the currently-executing [framed future](crate::Framed), if any.
    static ACTIVE_FRAME: Cell<Option<NonNull<Frame>>> = Cell::new(None);
}

/// Metadata about the invocation of a [framed future](crate::Framed).
pub(crate) struct Frame {
    /// The source location of the framed future.
    location: Location,

    /// Whether this frame is a task, a sub-frame of one, or not yet polled.
    kind: Kind,

    /// Pointers to the sub-frames of this frame.
    ///
    /// Only accessed while the lock of this frame's root is held.
    children: UnsafeCell<Vec<NonNull<Frame>>>,

    _pinned: PhantomPinned,
}

enum Kind {
    /// The frame has not yet been polled.
    Uninitialized,

    /// The frame sits at the top of its execution tree and is registered as
    /// a task. The mutex is held for the duration of every poll.
    Root { id: TaskId, mutex: Mutex<()> },

    /// The frame was first polled from within `parent`.
    Node { parent: NonNull<Frame> },
}

// SAFETY: the raw pointers held by a frame are only dereferenced by the
// thread that holds the lock of the frame's root, or by the thread that is
// currently polling the root.
unsafe impl Send for Frame {}
unsafe impl Sync for Frame {}

/// The state of a task's frame tree as observed by a task dump.
pub(crate) enum Observed<'a> {
    /// The tree is quiescent and may be walked.
    Idle(Option<MutexGuard<'a, ()>>),
    /// The task is being polled on another thread.
    Polling,
    /// A poll of the task panicked; its tree is in an unknown state.
    Poisoned,
}

impl Frame {
    /// Construct a new, uninitialized frame for the given location.
    pub(crate) fn new(location: Location) -> Self {
        Self {
            location,
            kind: Kind::Uninitialized,
            children: UnsafeCell::new(Vec::new()),
            _pinned: PhantomPinned,
        }
    }

    pub(crate) fn location(&self) -> &Location {
        &self.location
    }

    /// The id of the task rooted at this frame, if this frame is a root.
    pub(crate) fn task_id(&self) -> Option<TaskId> {
        match self.kind {
            Kind::Root { id, .. } => Some(id),
            _ => None,
        }
    }

    pub(crate) fn is_uninitialized(&self) -> bool {
        matches!(self.kind, Kind::Uninitialized)
    }

    /// Link this frame into the tree of the active frame, or, absent an active
    /// frame, register it as a new task.
    ///
    /// SAFETY: must be called at most once, and only on a pinned frame.
    unsafe fn initialize_unchecked(self: Pin<&mut Self>) {
        let this = self.get_unchecked_mut();
        let me = NonNull::from(&*this);
        match ACTIVE_FRAME.with(Cell::get) {
            Some(parent) => {
                this.kind = Kind::Node { parent };
                // SAFETY: the parent is being polled on this thread, so its
                // root's lock is held by this thread.
                parent
                    .as_ref()
                    .children
                    .with_mut(|children| (*children).push(me));
            }
            None => {
                this.kind = Kind::Root {
                    id: TaskId::next(),
                    mutex: Mutex::new(()),
                };
                tasks::register(me);
            }
        }
    }

    /// Run `f` using this frame as the active frame.
    ///
    /// Initializes the frame on first use. If this frame is a root, its lock
    /// is held while `f` runs.
    pub(crate) fn in_scope<F, R>(mut self: Pin<&mut Self>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        if self.is_uninitialized() {
            // SAFETY: `self` is pinned, and an initialized frame never
            // returns to `Uninitialized`.
            unsafe { self.as_mut().initialize_unchecked() };
        }

        let frame: &Frame = self.into_ref().get_ref();

        let _lock = match &frame.kind {
            Kind::Root { mutex, .. } => {
                Some(mutex.lock().unwrap_or_else(PoisonError::into_inner))
            }
            _ => None,
        };

        let previous = ACTIVE_FRAME.with(|active| active.replace(Some(NonNull::from(frame))));
        let _restore = crate::defer(move || ACTIVE_FRAME.with(|active| active.set(previous)));

        f()
    }

    /// Observe the frame tree rooted at this frame without blocking.
    pub(crate) fn observe(&self) -> Observed<'_> {
        let mutex = match &self.kind {
            Kind::Root { mutex, .. } => mutex,
            _ => return Observed::Idle(None),
        };

        // the active task is mid-poll on this very thread, and already holds
        // its own lock
        if Self::active_root() == Some(NonNull::from(self)) {
            return Observed::Idle(None);
        }

        match mutex.try_lock() {
            Ok(guard) => Observed::Idle(Some(guard)),
            Err(TryLockError::WouldBlock) => Observed::Polling,
            Err(TryLockError::Poisoned(..)) => Observed::Poisoned,
        }
    }

    /// The root of the active frame on this thread, if any.
    fn active_root() -> Option<NonNull<Frame>> {
        let mut frame = ACTIVE_FRAME.with(Cell::get)?;
        // SAFETY: every ancestor of the active frame is being polled on this
        // thread, and so outlives this call.
        unsafe {
            while let Kind::Node { parent } = frame.as_ref().kind {
                frame = parent;
            }
        }
        Some(frame)
    }

    /// Write this frame and its descendants as an indented tree.
    ///
    /// SAFETY: the tree must be quiescent; see [`Frame::observe`].
    pub(crate) unsafe fn fmt_tree<W: Write>(&self, w: &mut W) -> fmt::Result {
        writeln!(w, "╼ {}", self.location)?;
        self.fmt_children(w, "  ")
    }

    unsafe fn fmt_children<W: Write>(&self, w: &mut W, prefix: &str) -> fmt::Result {
        self.children.with(|children| {
            let children = &*children;
            for (i, child) in children.iter().enumerate() {
                let is_last = i + 1 == children.len();
                let (branch, indent) = if is_last {
                    ("└╼", "   ")
                } else {
                    ("├╼", "│  ")
                };
                let child = child.as_ref();
                writeln!(w, "{prefix}{branch} {}", child.location)?;
                child.fmt_children(w, &format!("{prefix}{indent}"))?;
            }
            Ok(())
        })
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let me = NonNull::from(&*self);
        match self.kind {
            Kind::Uninitialized => {}
            Kind::Root { .. } => tasks::deregister(me),
            // SAFETY: a sub-frame is only dropped from within its parent,
            // whose root's lock is held by this thread.
            Kind::Node { parent } => unsafe {
                parent
                    .as_ref()
                    .children
                    .with_mut(|children| (*children).retain(|child| *child != me));
            },
        }
    }
}
