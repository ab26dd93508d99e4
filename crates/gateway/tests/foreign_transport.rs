//! Integration tests for a transport running on its own foreign loop and
//! reaching the bridge through a [`BridgeClient`].

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use common::{bridge, bridge_with_timeouts, eventually, ScriptedCore};
use sb_domain::agent::InboundMessage;
use sb_domain::error::Error;
use sb_domain::stream::{StreamErrorKind, StreamToken};
use sb_gateway::runtime::ForeignLoop;
use sb_gateway::BridgeClient;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn foreign_transport_round_trip() {
    let core = Arc::new(ScriptedCore::default());
    let bridge = bridge(core.clone(), Duration::from_secs(5));
    let client = BridgeClient::new(bridge.clone());
    let foreign = ForeignLoop::spawn("test-transport", Duration::from_millis(100)).unwrap();

    let tokens = foreign
        .spawn_task(async move {
            let session = client
                .get_or_create_session("telegram", "99", "chat", Some("Bo"))
                .await
                .unwrap();
            client
                .dispatch_streaming(&session, InboundMessage::new("Hello World"))
                .collect::<Vec<_>>()
                .await
        })
        .await
        .unwrap();

    assert_eq!(tokens.last(), Some(&StreamToken::End { text: "Hello World".into() }));
    assert_eq!(bridge.list_sessions().len(), 1);
    assert_eq!(core.created.load(Ordering::SeqCst), 1);

    foreign.shutdown_async(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn foreign_loop_is_not_starved_by_dispatch() {
    let core = Arc::new(ScriptedCore::default());
    let bridge = bridge(core, Duration::from_secs(5));
    let client = BridgeClient::new(bridge.clone());
    let foreign = ForeignLoop::spawn("test-starve", Duration::from_millis(100)).unwrap();

    // Stand-in for the client library's own event processing.
    let events = Arc::new(AtomicUsize::new(0));
    let ticker_events = events.clone();
    let ticker = foreign.spawn_task(async move {
        loop {
            ticker_events.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let observed = events.clone();
    let (reply, ticks) = foreign
        .spawn_task(async move {
            let session = client
                .get_or_create_session("discord", "1", "c", None)
                .await
                .unwrap();
            let before = observed.load(Ordering::SeqCst);
            let reply = client.dispatch(&session, InboundMessage::new("slow")).await;
            (reply, observed.load(Ordering::SeqCst) - before)
        })
        .await
        .unwrap();

    assert_eq!(reply.unwrap(), "slow done");
    assert!(ticks >= 5, "foreign loop starved: {ticks} ticks during dispatch");

    ticker.abort();
    foreign.shutdown_async(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remove_from_foreign_loop() {
    let core = Arc::new(ScriptedCore::default());
    let bridge = bridge(core.clone(), Duration::from_secs(5));
    let client = BridgeClient::new(bridge.clone());
    let foreign = ForeignLoop::spawn("test-remove", Duration::from_millis(100)).unwrap();

    let removed = foreign
        .spawn_task(async move {
            client.get_or_create_session("slack", "s", "c", None).await.unwrap();
            let first = client.remove_session("slack", "s").await.unwrap();
            let second = client.remove_session("slack", "s").await.unwrap();
            (first, second)
        })
        .await
        .unwrap();

    assert_eq!(removed, (true, false));
    assert_eq!(core.removed.load(Ordering::SeqCst), 1);
    foreign.shutdown_async(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streaming_turn_from_foreign_loop_times_out() {
    let core = Arc::new(ScriptedCore::default());
    let bridge = bridge(core.clone(), Duration::from_millis(50));
    let client = BridgeClient::new(bridge.clone());
    let foreign = ForeignLoop::spawn("test-stream-timeout", Duration::from_millis(100)).unwrap();

    let (session, tokens) = foreign
        .spawn_task(async move {
            let session = client
                .get_or_create_session("telegram", "t", "chat", None)
                .await
                .unwrap();
            let tokens = tokio::time::timeout(
                Duration::from_secs(2),
                client
                    .dispatch_streaming(&session, InboundMessage::new("hang"))
                    .collect::<Vec<_>>(),
            )
            .await;
            (session, tokens)
        })
        .await
        .unwrap();

    let tokens = tokens.expect("stream did not end after the dispatch timeout");
    assert_eq!(tokens[0], StreamToken::chunk("first "));
    assert!(matches!(
        tokens.last(),
        Some(StreamToken::Error {
            kind: StreamErrorKind::TimedOut,
            ..
        })
    ));
    assert!(eventually(|| core.active.load(Ordering::SeqCst) == 0).await);
    assert!(eventually(|| !session.is_busy()).await);

    foreign.shutdown_async(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_timeout_on_foreign_loop_stops_owner_turn() {
    let core = Arc::new(ScriptedCore::default());
    let bridge = bridge_with_timeouts(core.clone(), Duration::from_millis(50), Duration::from_secs(2));
    let client = BridgeClient::new(bridge.clone());
    let foreign = ForeignLoop::spawn("test-call-timeout", Duration::from_millis(100)).unwrap();

    let (session, result) = foreign
        .spawn_task(async move {
            let session = client
                .get_or_create_session("discord", "d", "chat", None)
                .await
                .unwrap();
            let result = client.dispatch(&session, InboundMessage::new("hang")).await;
            (session, result)
        })
        .await
        .unwrap();

    assert!(matches!(result, Err(Error::CrossLoopTimeout { .. })));
    assert!(eventually(|| core.active.load(Ordering::SeqCst) == 0).await);
    assert!(eventually(|| !session.is_busy()).await);
    assert_eq!(bridge.list_sessions().len(), 1);

    foreign.shutdown_async(Duration::from_secs(2)).await.unwrap();
}

#[test]
fn plain_thread_can_wait_on_owner_work() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let core = Arc::new(ScriptedCore::default());
    let bridge = rt.block_on(async { common::bridge(core, Duration::from_secs(5)) });
    bridge.get_or_create_session("cli", "x", "c", None).unwrap();

    let owner_bridge = bridge.clone();
    let count = std::thread::spawn(move || {
        owner_bridge
            .executor()
            .submit("count-sessions", {
                let b = owner_bridge.clone();
                async move { b.list_sessions().len() }
            })
            .wait_blocking(Duration::from_secs(1))
    })
    .join()
    .unwrap()
    .unwrap();

    assert_eq!(count, 1);
}
