mod common;

use std::time::Duration;

use checkup_core::models::Snapshot;
use checkup_daemon::http::WsSettings;
use common::{ServerOptions, TestServer, updates};
use futures_util::{Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

fn short_timeouts() -> WsSettings {
    WsSettings {
        pong_wait: Duration::from_millis(600),
        ping_period: Duration::from_millis(200),
        write_wait: Duration::from_secs(1),
        max_message_size: 512,
    }
}

async fn next_snapshot<S>(ws: &mut S) -> Snapshot
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).unwrap(),
            Ok(Some(Ok(_))) => continue,
            other => panic!("expected a snapshot, got {other:?}"),
        }
    }
}

/// Reads until the server closes the connection; false if it stays open
/// for `within`.
async fn closed_within<S>(ws: &mut S, within: Duration) -> bool
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    tokio::time::timeout(within, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .is_ok()
}

async fn wait_for_subscribers(server: &TestServer, expected: usize) {
    for _ in 0..100 {
        if server.cache().feed().subscriber_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected {expected} subscribers, have {}",
        server.cache().feed().subscriber_count()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pushes_current_snapshot_then_each_change_once() {
    let server = TestServer::start(ServerOptions::default()).await;
    server.cache().refresh().await.unwrap();

    let (mut ws, _) = connect_async(server.url("ws", "/ws")).await.unwrap();

    let first = next_snapshot(&mut ws).await;
    assert_eq!(first.updates, server.cache().read().await.unwrap().updates);
    assert_eq!(first.updates.len(), 2);

    server.source.set(updates(&["bash", "glibc", "linux"]));
    server.cache().refresh().await.unwrap();

    let second = next_snapshot(&mut ws).await;
    assert_eq!(second.updates.len(), 3);
    assert_eq!(second.updates[1].name, "glibc");

    let extra = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(_)) => {}
                _ => return None,
            }
        }
    })
    .await;
    assert!(extra.is_err(), "unexpected duplicate push: {extra:?}");

    drop(ws);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn checked_but_empty_snapshot_is_pushed_then_one_change() {
    let server = TestServer::start(ServerOptions {
        ws: short_timeouts(),
        ..ServerOptions::default()
    })
    .await;
    server.source.set(Vec::new());
    server.cache().refresh().await.unwrap();

    let (mut ws, _) = connect_async(server.url("ws", "/ws")).await.unwrap();
    let first = next_snapshot(&mut ws).await;
    assert!(!first.checked.is_empty());
    assert!(first.updates.is_empty());

    server.source.set(updates(&["bash", "glibc", "linux"]));
    server.cache().refresh().await.unwrap();
    let second = next_snapshot(&mut ws).await;
    assert_eq!(second, server.cache().read().await.unwrap());
    assert_eq!(second.updates.len(), 3);

    // No further reads: the server sees no pong and hangs up.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    wait_for_subscribers(&server, 0).await;

    let leftover = tokio::time::timeout(Duration::from_secs(3), async {
        let mut texts = Vec::new();
        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(text) => texts.push(text),
                Message::Close(_) => break,
                _ => {}
            }
        }
        texts
    })
    .await
    .expect("server closes the connection");
    assert!(leftover.is_empty(), "unexpected extra pushes: {leftover:?}");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nothing_is_pushed_before_the_first_check() {
    let server = TestServer::start(ServerOptions::default()).await;

    let (mut ws, _) = connect_async(server.url("ws", "/ws")).await.unwrap();
    wait_for_subscribers(&server, 1).await;

    server.cache().refresh().await.unwrap();
    let snapshot = next_snapshot(&mut ws).await;
    assert_eq!(snapshot.updates.len(), 2);

    drop(ws);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_peer_is_dropped_after_pong_wait() {
    let server = TestServer::start(ServerOptions {
        ws: short_timeouts(),
        ..ServerOptions::default()
    })
    .await;
    server.cache().refresh().await.unwrap();

    let (mut ws, _) = connect_async(server.url("ws", "/ws")).await.unwrap();
    wait_for_subscribers(&server, 1).await;

    // Not polling the stream means pings are never answered.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    wait_for_subscribers(&server, 0).await;

    assert!(closed_within(&mut ws, Duration::from_secs(3)).await);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn responsive_peer_stays_connected() {
    let server = TestServer::start(ServerOptions {
        ws: short_timeouts(),
        ..ServerOptions::default()
    })
    .await;
    server.cache().refresh().await.unwrap();

    let (mut ws, _) = connect_async(server.url("ws", "/ws")).await.unwrap();
    next_snapshot(&mut ws).await;

    // Reading answers every ping with a pong.
    assert!(!closed_within(&mut ws, Duration::from_secs(2)).await);
    assert_eq!(server.cache().feed().subscriber_count(), 1);

    server.source.set(updates(&["zsh"]));
    server.cache().refresh().await.unwrap();
    assert_eq!(next_snapshot(&mut ws).await.updates.len(), 1);

    drop(ws);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_closes_open_sessions() {
    let server = TestServer::start(ServerOptions::default()).await;
    server.cache().refresh().await.unwrap();

    let (mut ws, _) = connect_async(server.url("ws", "/ws")).await.unwrap();
    next_snapshot(&mut ws).await;

    server.stop().await;
    assert!(closed_within(&mut ws, Duration::from_secs(3)).await);
}
