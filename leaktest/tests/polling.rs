/// A test that a task dump never blocks on a task that is being polled on
/// another thread, and that such a task still counts towards a snapshot.
mod util;
use async_leaktest::framed;
use std::sync::{Arc, Barrier};

#[test]
fn polling() {
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let handle = {
        let (entered, release) = (entered.clone(), release.clone());
        std::thread::spawn(move || util::run(busy(entered, release)))
    };

    entered.wait();
    pretty_assertions::assert_str_eq!(
        util::strip(async_leaktest::taskdump()),
        "\
task ID:
╼ polling::busy at leaktest/tests/polling.rs:LINE:COL
  └┈ [POLLING]
"
    );
    assert_eq!(async_leaktest::snapshot().len(), 1);

    release.wait();
    handle.join().unwrap();
    assert!(async_leaktest::snapshot().is_empty());
}

#[framed]
async fn busy(entered: Arc<Barrier>, release: Arc<Barrier>) {
    entered.wait();
    release.wait();
}
