/// A test that the async check keeps a current-thread runtime running while
/// it waits for tasks to wind down.
use async_leaktest::framed;
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test]
async fn check_async() {
    let checker = async_leaktest::begin();
    let (started_tx, started) = oneshot::channel();
    tokio::spawn(winds_down(started_tx));
    started.await.unwrap();
    assert_eq!(checker.check_async().await, Ok(()));

    let checker = async_leaktest::begin().grace_period(Duration::from_millis(200));
    let (started_tx, started) = oneshot::channel();
    tokio::spawn(blocks_forever(started_tx));
    started.await.unwrap();
    let leaked = checker.check_async().await.unwrap_err();
    assert_eq!(leaked.len(), 1);
    assert!(leaked.traces()[0].contains("check_async::blocks_forever at "));
}

#[framed]
async fn winds_down(started: oneshot::Sender<()>) {
    let _ = started.send(());
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[framed]
async fn blocks_forever(started: oneshot::Sender<()>) {
    let _ = started.send(());
    std::future::pending::<()>().await;
}
