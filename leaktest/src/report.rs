use std::fmt::Write;

/// Tasks that outlived the grace period.
///
/// Displays as one `Leaked task: <trace>` block per task, in trace order,
/// each followed by a blank line. This is the `Leaked goroutine: <trace>`
/// format of Go's leaktest, with the unit renamed.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{}", render(.traces))]
pub struct Leaked {
    traces: Vec<String>,
}

impl Leaked {
    /// Sorts `traces` by their text.
    pub(crate) fn new(mut traces: Vec<String>) -> Self {
        traces.sort();
        Self { traces }
    }

    /// The traces of the leaked tasks, sorted.
    pub fn traces(&self) -> &[String] {
        &self.traces
    }

    /// The number of leaked tasks.
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// Whether no task leaked. Never true for a reported `Leaked`.
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

fn render(traces: &[String]) -> String {
    let mut report = String::new();
    for trace in traces {
        // writing to a `String` is infallible
        let _ = write!(report, "Leaked task: {}\n\n", trace);
    }
    report
}

/// Records test failures without halting the test.
pub trait Reporter {
    /// Record that the current test failed with `message`.
    fn error(&mut self, message: &str);
}

impl<F: FnMut(&str)> Reporter for F {
    fn error(&mut self, message: &str) {
        self(message)
    }
}

impl Reporter for Vec<String> {
    fn error(&mut self, message: &str) {
        self.push(message.to_owned());
    }
}

/// Fails the test by panicking with the report.
///
/// If the thread is already panicking, the report is written to stderr
/// instead: a second panic would abort the process.
#[derive(Copy, Clone, Debug, Default)]
pub struct Fail;

impl Reporter for Fail {
    fn error(&mut self, message: &str) {
        if std::thread::panicking() {
            eprintln!("{}", message);
        } else {
            panic!("{}", message);
        }
    }
}
