use crate::{Leaked, Reporter, Snapshot};
use std::any::Any;
use std::panic::{self, UnwindSafe};
use std::time::{Duration, Instant};

/// How long tasks are given to wind down before they are reported.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long to wait between successive checks within the grace period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Take a baseline [`Snapshot`] of the tasks alive right now, to be checked
/// against once the test body has run.
///
/// ```
/// let checker = async_leaktest::begin();
/// // ... test body ...
/// checker.verify(&mut async_leaktest::Fail);
/// ```
pub fn begin() -> Checker {
    Checker::new(Snapshot::take())
}

/// Fail the current test if it leaks tasks.
///
/// The returned guard verifies on drop, on every exit path of the enclosing
/// scope.
pub fn leaktest() -> Guard<crate::Fail> {
    begin().guard(crate::Fail)
}

/// Run `body` and check it for leaked tasks, with the default policy.
///
/// See [`Checker::run`].
pub fn check<R, F, T>(reporter: &mut R, body: F) -> std::thread::Result<T>
where
    R: Reporter + ?Sized,
    F: FnOnce() -> T + UnwindSafe,
{
    begin().run(reporter, body)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

/// A baseline of tasks, and the policy for checking later task sets against
/// it.
#[derive(Clone, Debug)]
pub struct Checker {
    baseline: Snapshot,
    grace_period: Duration,
    poll_interval: Duration,
    ignored: Vec<String>,
}

impl Checker {
    /// Check against the given baseline with the default policy.
    pub fn new(baseline: Snapshot) -> Self {
        Self {
            baseline,
            grace_period: DEFAULT_GRACE_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            ignored: Vec::new(),
        }
    }

    /// How long leaked tasks are given to finish. Defaults to
    /// [`DEFAULT_GRACE_PERIOD`]. `Duration::MAX` waits forever.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// How long to sleep between checks. Defaults to
    /// [`DEFAULT_POLL_INTERVAL`].
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Never report tasks whose trace contains `pattern`, in addition to the
    /// built-in [exclusion rules](crate::exclusion::RULES).
    pub fn ignore(mut self, pattern: impl Into<String>) -> Self {
        self.ignored.push(pattern.into());
        self
    }

    /// When to give up, or `None` if the grace period is too long to
    /// represent.
    fn deadline(&self) -> Option<Instant> {
        Instant::now().checked_add(self.grace_period)
    }

    /// The tasks alive now that are absent from the baseline.
    fn leaked(&self) -> Option<Leaked> {
        let current = Snapshot::take().without(&self.ignored);
        let leaked = current.leaked_since(&self.baseline);
        if leaked.is_empty() {
            None
        } else {
            Some(Leaked::new(leaked.into_iter().map(str::to_owned).collect()))
        }
    }

    /// Wait for every task started since the baseline to finish.
    ///
    /// Re-checks every poll interval until no new task remains or the grace
    /// period elapses, sleeping the calling thread in between.
    pub fn check(&self) -> Result<(), Leaked> {
        let deadline = self.deadline();
        let mut attempt = 1u32;
        loop {
            let leaked = match self.leaked() {
                None => return Ok(()),
                Some(leaked) => leaked,
            };
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                return Err(self.give_up(leaked, attempt));
            }
            tracing::debug!(attempt, leaked = leaked.len(), "tasks still running");
            std::thread::sleep(self.poll_interval);
            attempt += 1;
        }
    }

    /// Like [`Checker::check`], but sleeps with [`tokio::time::sleep`], so that
    /// a runtime driven by the calling thread keeps making progress.
    #[cfg(feature = "tokio")]
    #[async_leaktest_attributes::framed]
    pub async fn check_async(&self) -> Result<(), Leaked> {
        let deadline = self.deadline();
        let mut attempt = 1u32;
        loop {
            let leaked = match self.leaked() {
                None => return Ok(()),
                Some(leaked) => leaked,
            };
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                return Err(self.give_up(leaked, attempt));
            }
            tracing::debug!(attempt, leaked = leaked.len(), "tasks still running");
            tokio::time::sleep(self.poll_interval).await;
            attempt += 1;
        }
    }

    fn give_up(&self, leaked: Leaked, attempts: u32) -> Leaked {
        tracing::warn!(
            leaked = leaked.len(),
            attempts,
            grace_period = ?self.grace_period,
            "tasks leaked"
        );
        leaked
    }

    /// Check for leaks and report them to `reporter`.
    ///
    /// Never panics on its own; whether a report fails the test is up to
    /// `reporter`.
    pub fn verify<R: Reporter + ?Sized>(self, reporter: &mut R) {
        if let Err(leaked) = self.check() {
            reporter.error(&leaked.to_string());
        }
    }

    /// Run `body`, then verify.
    ///
    /// A panic in `body` is caught, so that the check always runs, and is
    /// handed back to the caller rather than resumed.
    pub fn run<R, F, T>(self, reporter: &mut R, body: F) -> std::thread::Result<T>
    where
        R: Reporter + ?Sized,
        F: FnOnce() -> T + UnwindSafe,
    {
        let outcome = panic::catch_unwind(body);
        if let Err(payload) = &outcome {
            tracing::debug!(
                panic = panic_message(&**payload),
                "test body panicked; checking for leaks anyway"
            );
        }
        self.verify(reporter);
        outcome
    }

    /// Verify when the returned guard is dropped.
    pub fn guard<R: Reporter>(self, reporter: R) -> Guard<R> {
        Guard {
            checker: Some(self),
            reporter,
        }
    }
}

/// Verifies its [`Checker`] when dropped, including while unwinding.
#[must_use = "the check runs when the guard is dropped"]
pub struct Guard<R: Reporter> {
    checker: Option<Checker>,
    reporter: R,
}

impl<R: Reporter> Guard<R> {
    /// Verify now, rather than on drop.
    pub fn verify(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(checker) = self.checker.take() {
            if std::thread::panicking() {
                tracing::debug!("test body panicked; checking for leaks anyway");
            }
            checker.verify(&mut self.reporter);
        }
    }
}

impl<R: Reporter> Drop for Guard<R> {
    fn drop(&mut self) {
        self.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskRecord;

    fn phantom(id: u64) -> TaskRecord {
        TaskRecord {
            id: id.to_string().parse().unwrap(),
            trace: format!("task {}:\n╼ app::phantom at src/app.rs:1:1", id),
        }
    }

    #[test]
    fn nothing_new_passes_immediately() {
        let checker = Checker::new(Snapshot::take()).grace_period(Duration::from_secs(60));
        let start = Instant::now();
        assert_eq!(checker.check(), Ok(()));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn baseline_tasks_that_finished_are_not_leaks() {
        // tasks that exist only in the baseline never show up in a diff
        let baseline = Snapshot::from_records(vec![phantom(u64::MAX), phantom(u64::MAX - 1)]);
        let checker = Checker::new(baseline).grace_period(Duration::ZERO);
        let mut reports = Vec::new();
        checker.verify(&mut reports);
        assert!(reports.is_empty(), "{:?}", reports);
    }

    #[test]
    fn unbounded_grace_period_does_not_overflow() {
        let checker = Checker::new(Snapshot::take()).grace_period(Duration::MAX);
        assert_eq!(checker.deadline(), None);
        assert_eq!(checker.check(), Ok(()));
    }

    #[test]
    fn panic_message_of_common_payloads() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom");
        let payload = panic::catch_unwind(|| panic!("{}", 7)).unwrap_err();
        assert_eq!(panic_message(&*payload), "7");
    }
}
