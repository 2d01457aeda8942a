#![allow(unused_imports, dead_code)]

use std::{future::Future, sync::mpsc, task::Poll, time::Duration};

pub(crate) fn model<F>(f: F)
where
    F: Fn() + Sync + Send + 'static,
{
    #[cfg(not(loom))]
    f();
    #[cfg(loom)]
    loom::model(f);
}

pub(crate) mod thread {
    #[cfg(not(loom))]
    pub(crate) use std::thread::{spawn, yield_now};

    #[cfg(loom)]
    pub(crate) use loom::thread::{spawn, yield_now};
}

/// Drive `f` to completion on the current thread.
pub fn run<F: Future>(f: F) -> <F as Future>::Output {
    use std::task::Context;
    let mut f = Box::pin(f);
    let waker = futures::task::noop_waker();
    let mut cx = Context::from_waker(&waker);
    loop {
        match f.as_mut().poll(&mut cx) {
            Poll::Ready(v) => return v,
            Poll::Pending => thread::yield_now(),
        }
    }
}

/// Normalize the parts of a task dump that vary between runs.
pub fn strip(str: impl AsRef<str>) -> String {
    let position = regex::Regex::new(r":\d+:\d+").unwrap();
    let id = regex::Regex::new(r"task \d+:").unwrap();
    let str = position.replace_all(str.as_ref(), ":LINE:COL");
    id.replace_all(&str, "task ID:").to_string()
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_time()
        .build()
        .unwrap()
}

/// A signal that a spawned task has been polled at least once.
pub fn started() -> (mpsc::Sender<()>, Started) {
    let (tx, rx) = mpsc::channel();
    (tx, Started(rx))
}

pub struct Started(mpsc::Receiver<()>);

impl Started {
    pub fn wait(self) {
        self.0
            .recv_timeout(Duration::from_secs(10))
            .expect("task never started");
    }
}

pub fn defer<F: FnOnce()>(f: F) -> impl Drop {
    Defer(Some(f))
}

struct Defer<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}
