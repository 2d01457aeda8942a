//! Detect async tasks leaked by tests.
//!
//! A task is the outermost [framed](framed) future of a call tree: annotate
//! your async functions with `#[async_leaktest::framed]`, and every spawned
//! future that starts in one of them is tracked while it is alive.
//!
//! A test takes a [`Snapshot`] of the live tasks before its body runs, and
//! afterwards waits for every task started since then to finish. Tasks still
//! alive after a grace period of five seconds are reported as leaks.
//!
//! # Example
//! ```rust
//! use std::sync::mpsc;
//! use std::time::Duration;
//! use tokio::sync::oneshot;
//!
//! #[async_leaktest::framed]
//! async fn serve(started: mpsc::Sender<()>, shutdown: oneshot::Receiver<()>) {
//!     let _ = started.send(());
//!     let _ = shutdown.await;
//! }
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let mut failures = Vec::new();
//! let checker = async_leaktest::begin().grace_period(Duration::from_millis(200));
//!
//! let (started_tx, started) = mpsc::channel();
//! let (tx, rx) = oneshot::channel();
//! runtime.spawn(serve(started_tx, rx));
//! started.recv().unwrap();
//! // forgot to `tx.send(())`
//!
//! checker.verify(&mut failures);
//! assert!(failures[0].starts_with("Leaked task: task "));
//! assert!(failures[0].contains("serve at "));
//! # drop(tx);
//! ```
//!
//! Inside a test, the [`leaktest`] guard fails the test on drop:
//! ```rust
//! #[test]
//! fn no_leaks() {
//!     let _guard = async_leaktest::leaktest();
//!     // ... test body ...
//! }
//! ```

extern crate self as async_leaktest;

pub(crate) mod detector;
pub mod exclusion;
pub(crate) mod frame;
pub(crate) mod framed;
#[doc(hidden)]
pub mod location;
pub(crate) mod report;
pub(crate) mod snapshot;
pub(crate) mod tasks;

pub use detector::{
    begin, check, leaktest, Checker, Guard, DEFAULT_GRACE_PERIOD, DEFAULT_POLL_INTERVAL,
};
pub use framed::Framed;
pub use location::Location;
pub use report::{Fail, Leaked, Reporter};
pub use snapshot::{parse, Iter, Snapshot, TaskRecord};
pub use tasks::TaskId;

/// Include the annotated async function in task dumps and leak reports.
///
/// This, for instance:
/// ```
/// # async fn bar() {}
/// # async fn baz() {}
/// #[async_leaktest::framed]
/// async fn foo() {
///     bar().await;
///     baz().await;
/// }
/// ```
/// ...expands, roughly, to:
/// ```
/// # async fn bar() {}
/// # async fn baz() {}
/// async fn foo() {
///     async_leaktest::location!().frame(async move {
///         bar().await;
///         baz().await;
///     }).await
/// }
/// ```
pub use async_leaktest_attributes::framed;

/// Produces a human-readable dump of every live task.
///
/// Each task is rendered as a `task <id>:` header followed by its tree of
/// frames; tasks are separated by a blank line. Tasks being polled on another
/// thread are rendered with only their outermost frame, marked
/// `[POLLING]`.
pub fn taskdump() -> String {
    tasks::dump()
}

/// Capture the interesting tasks alive right now; see [`Snapshot::take`].
pub fn snapshot() -> Snapshot {
    Snapshot::take()
}

static_assertions::assert_impl_all!(Snapshot: Send, Sync);
static_assertions::assert_impl_all!(Checker: Send, Sync);
static_assertions::assert_impl_all!(Framed<std::future::Ready<()>>: Send, Sync);
static_assertions::assert_not_impl_any!(Framed<std::future::Ready<()>>: Unpin);

pub(crate) mod sync {
    #[cfg(loom)]
    pub(crate) use loom::sync::{Mutex, MutexGuard};

    #[cfg(not(loom))]
    pub(crate) use std::sync::{Mutex, MutexGuard};

    pub(crate) use std::sync::TryLockError;
}

pub(crate) mod cell {
    #[cfg(loom)]
    pub(crate) use loom::{cell::Cell, thread_local};

    #[cfg(not(loom))]
    pub(crate) use std::{cell::Cell, thread_local};

    #[cfg(loom)]
    pub(crate) use loom::cell::UnsafeCell;

    #[cfg(not(loom))]
    #[derive(Debug)]
    #[repr(transparent)]
    pub(crate) struct UnsafeCell<T>(std::cell::UnsafeCell<T>);

    #[cfg(not(loom))]
    impl<T> UnsafeCell<T> {
        pub(crate) fn new(data: T) -> UnsafeCell<T> {
            UnsafeCell(std::cell::UnsafeCell::new(data))
        }

        pub(crate) fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
            f(self.0.get())
        }

        pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
            f(self.0.get())
        }
    }
}

pub(crate) fn defer<F: FnOnce()>(f: F) -> impl Drop {
    struct Defer<F: FnOnce()>(Option<F>);

    impl<F: FnOnce()> Drop for Defer<F> {
        fn drop(&mut self) {
            if let Some(f) = self.0.take() {
                f();
            }
        }
    }

    Defer(Some(f))
}
