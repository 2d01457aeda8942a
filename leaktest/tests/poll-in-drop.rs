/// A test that a future framed and polled from inside a drop guard joins the
/// frame tree of the task being dropped.
mod util;
use async_leaktest::framed;
use std::any::Any;

#[test]
fn poll_in_drop() {
    util::model(|| {
        let on_drop = util::defer(|| util::run(inner()));
        util::run(outer(Box::new(on_drop)));
        assert_eq!(async_leaktest::taskdump(), "");
    });
}

#[framed]
async fn outer(guard: Box<dyn Any>) {
    let _guard = guard;
}

#[framed]
async fn inner() {
    let dump = async_leaktest::taskdump();
    pretty_assertions::assert_str_eq!(
        util::strip(dump),
        "\
task ID:
╼ poll_in_drop::outer at leaktest/tests/poll-in-drop.rs:LINE:COL
  └╼ poll_in_drop::inner at leaktest/tests/poll-in-drop.rs:LINE:COL
"
    );
}
