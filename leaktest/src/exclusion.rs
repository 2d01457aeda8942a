//! Tasks that are never reported as leaks.
//!
//! The rules below match tasks that belong to the test harness, to runtime
//! internals, to well-known background services, or to this crate itself.
//! They are checked against the body of each task's trace (the frame tree,
//! without the `task <id>:` header).
//!
//! Only `#[framed]` futures produce frames. Rules naming harness or runtime
//! functions, such as `test::run_tests`, `test::test_main`,
//! `std::rt::lang_start` or `tokio::runtime::scheduler::`, only match when
//! those functions run inside a framed future; harness threads themselves
//! are never introspected.

/// A predicate over a task's trace body.
#[derive(Copy, Clone, Debug)]
pub struct Rule {
    /// Why tasks matching this rule are not considered leaks.
    pub reason: &'static str,
    matcher: Matcher,
}

#[derive(Copy, Clone, Debug)]
enum Matcher {
    /// The outermost frame of the body begins with the pattern.
    Prefix(&'static str),
    /// The body contains any of the patterns.
    Contains(&'static [&'static str]),
    /// The function path of some frame of the body begins with the pattern.
    /// Generic arguments naming the pattern do not count.
    Frame(&'static str),
    /// The body contains the pattern, and `gate` holds for this build.
    Gated {
        gate: fn() -> bool,
        pattern: &'static str,
    },
}

impl Rule {
    /// Whether `body` is matched by this rule.
    pub fn matches(&self, body: &str) -> bool {
        match self.matcher {
            Matcher::Prefix(prefix) => body
                .trim_start_matches('╼')
                .trim_start()
                .starts_with(prefix),
            Matcher::Contains(patterns) => patterns.iter().any(|p| body.contains(p)),
            Matcher::Frame(prefix) => frame_paths(body).any(|path| path.starts_with(prefix)),
            Matcher::Gated { gate, pattern } => gate() && body.contains(pattern),
        }
    }
}

/// The text of each frame line of `body`, after its tree drawing.
fn frame_paths(body: &str) -> impl Iterator<Item = &str> {
    body.lines().filter_map(|line| {
        let line = line.trim_start_matches(|c| matches!(c, ' ' | '│' | '├' | '└'));
        line.strip_prefix('╼').map(str::trim_start)
    })
}

const fn contains(reason: &'static str, patterns: &'static [&'static str]) -> Rule {
    Rule {
        reason,
        matcher: Matcher::Contains(patterns),
    }
}

fn under_miri() -> bool {
    cfg!(miri)
}

/// The built-in exclusion rules.
pub static RULES: &[Rule] = &[
    Rule {
        reason: "test runner dispatch",
        matcher: Matcher::Prefix("test::run_tests"),
    },
    contains(
        "HTTP keep-alive connection loop",
        &[
            "::read_loop",
            "::write_loop",
            "hyper::proto::h1::dispatch",
            "hyper::proto::h2::client::conn_task",
        ],
    ),
    contains(
        "lazily-initialized error reporting client",
        &[
            "sentry_core::client::Client::capture_event",
            "sentry::transports",
        ],
    ),
    Rule {
        reason: "parallel test scaffolding under miri",
        matcher: Matcher::Gated {
            gate: under_miri,
            pattern: "test::run_test_in_spawned_subprocess",
        },
    },
    contains(
        "test harness main and runner",
        &[
            "test::test_main",
            "test::run_test_in_process",
            "std::rt::lang_start",
        ],
    ),
    contains(
        "runtime-created helper",
        &["tokio::runtime::blocking::pool"],
    ),
    Rule {
        reason: "leak checker",
        matcher: Matcher::Frame(concat!(env!("CARGO_CRATE_NAME"), "::")),
    },
    contains(
        "background housekeeping",
        &["tokio::runtime::time::", "background_thread"],
    ),
    contains("signal handling", &["tokio::signal::", "signal_hook::"]),
    contains(
        "runtime-internal scheduling",
        &["tokio::runtime::scheduler::"],
    ),
    contains("opaque task state", &["[POISONED]"]),
    contains("profiler", &["pprof::", "console_subscriber::"]),
];

/// The first built-in rule matching `body`, if any.
pub fn matching(body: &str) -> Option<&'static Rule> {
    RULES.iter().find(|rule| rule.matches(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(frames: &[&str]) -> String {
        let mut body = format!("╼ {} at src/lib.rs:1:1\n", frames[0]);
        for frame in &frames[1..] {
            body.push_str(&format!("  └╼ {} at src/lib.rs:2:1\n", frame));
        }
        body
    }

    #[test]
    fn every_rule_excludes_its_frames() {
        let excluded = [
            tree(&["test::run_tests_console", "app::work"]),
            tree(&["app::conn", "hyper_client::Conn::read_loop"]),
            tree(&["app::conn", "hyper_client::Conn::write_loop"]),
            tree(&["hyper::proto::h1::dispatch::Dispatcher::poll"]),
            tree(&["hyper::proto::h2::client::conn_task"]),
            tree(&["app::report", "sentry_core::client::Client::capture_event"]),
            tree(&["sentry::transports::tokio_thread::worker"]),
            tree(&["test::test_main", "app::work"]),
            tree(&["test::run_test_in_process"]),
            tree(&["std::rt::lang_start", "app::main"]),
            tree(&["tokio::runtime::blocking::pool::Spawner::spawn"]),
            tree(&["async_leaktest::detector::check_async"]),
            tree(&["app::work", "async_leaktest::detector::Checker::check_async"]),
            tree(&["tokio::runtime::time::Driver::park"]),
            tree(&["jemalloc::background_thread"]),
            tree(&["tokio::signal::unix::signal_with_handle"]),
            tree(&["signal_hook::iterator::forever"]),
            tree(&["tokio::runtime::scheduler::multi_thread::worker::run"]),
            "╼ app::work at src/lib.rs:1:1\n  └┈ [POISONED]\n".to_owned(),
            tree(&["pprof::profiler::ProfilerGuard::new"]),
            tree(&["console_subscriber::aggregator::Aggregator::run"]),
        ];

        for body in &excluded {
            assert!(matching(body).is_some(), "not excluded:\n{}", body);
        }
    }

    #[test]
    fn miri_rule_is_gated() {
        let body = tree(&["test::run_test_in_spawned_subprocess"]);
        assert_eq!(matching(&body).is_some(), cfg!(miri));
    }

    #[test]
    fn runner_rule_is_a_prefix_match() {
        assert!(matching(&tree(&["app::work", "test::run_tests_console"])).is_none());
    }

    #[test]
    fn leak_checker_rule_matches_frame_paths_only() {
        let generic = tree(&["app::worker<async_leaktest::report::Fail>"]);
        assert!(matching(&generic).is_none());
        let nested = tree(&["app::work", "app::run<async_leaktest::Framed<app::Job>>"]);
        assert!(matching(&nested).is_none());
    }

    #[test]
    fn ordinary_tasks_are_kept() {
        let body = tree(&["app::server::accept", "app::server::handle"]);
        assert!(matching(&body).is_none());
        assert!(matching("╼ app::work at src/lib.rs:1:1\n  └┈ [POLLING]\n").is_none());
    }
}
