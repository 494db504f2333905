//! Integration tests driving the streaming session against an in-process
//! websocket server

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

use tickwatch::config::FeedConfig;
use tickwatch::feed::types::{ConnectionState, StreamEvent};
use tickwatch::feed::StreamingSession;

fn feed_config(addr: std::net::SocketAddr) -> FeedConfig {
    FeedConfig {
        ws_url: format!("ws://{}", addr),
        api_token: String::new(),
        reconnect_base_delay_ms: 20,
        max_reconnect_attempts: 3,
        mock_interval_ms: 50,
        ..FeedConfig::default()
    }
}

async fn wait_for_state(session: &StreamingSession, expected: ConnectionState) {
    timeout(Duration::from_secs(5), async {
        let mut state_rx = session.state_changes();
        loop {
            if *state_rx.borrow() == expected {
                return;
            }
            state_rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {:?}", expected));
}

/// Accept one websocket connection and forward its text frames
async fn accept_and_relay(
    listener: &TcpListener,
    directives: &mpsc::UnboundedSender<String>,
) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.expect("accept failed");
    let mut ws = accept_async(stream).await.expect("handshake failed");

    // Drain the initial directives the client replays on open.
    loop {
        match timeout(Duration::from_millis(300), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                directives.send(text).expect("directive channel closed");
            }
            Ok(Some(Ok(_))) => {}
            _ => break,
        }
    }

    ws
}

#[tokio::test]
async fn test_deferred_subscribe_is_replayed_exactly_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (directive_tx, mut directive_rx) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        let _ws = accept_and_relay(&listener, &directive_tx).await;
        // Hold the connection open while the client settles.
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let session = StreamingSession::new(feed_config(addr));

    // Subscribing while disconnected defers the directive to the on-open
    // replay.
    session.subscribe("AAPL").await.expect("subscribe failed");
    wait_for_state(&session, ConnectionState::Connected).await;

    let first = timeout(Duration::from_secs(2), directive_rx.recv())
        .await
        .expect("no directive arrived")
        .expect("directive channel closed");
    assert_eq!(first, r#"{"type":"subscribe","symbol":"AAPL"}"#);

    // No duplicate follows.
    let duplicate = timeout(Duration::from_millis(400), directive_rx.recv()).await;
    assert!(duplicate.is_err(), "unexpected extra directive: {:?}", duplicate);

    session.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn test_trade_frames_update_cache_and_broadcast() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (directive_tx, _directive_rx) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        let mut ws = accept_and_relay(&listener, &directive_tx).await;

        for price in [180.0, 181.0] {
            let frame = json!({
                "type": "trade",
                "data": [{"p": price, "s": "AAPL", "t": 1712345678901u64, "v": 25, "c": []}]
            });
            ws.send(Message::Text(frame.to_string())).await.unwrap();
        }
        // Non-trade frames are ignored without killing the session.
        ws.send(Message::Text(json!({"type": "ping"}).to_string()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let session = StreamingSession::new(feed_config(addr));
    let mut updates = session.updates();
    session.subscribe("AAPL").await.expect("subscribe failed");

    let mut quotes = Vec::new();
    while quotes.len() < 2 {
        match timeout(Duration::from_secs(2), updates.recv())
            .await
            .expect("no update arrived")
            .expect("update channel closed")
        {
            StreamEvent::Quote(quote) => quotes.push(quote),
            StreamEvent::ConnectionChanged(_) => {}
        }
    }

    assert_eq!(quotes[0].price, 180.0);
    assert_eq!(quotes[0].change, 0.0);
    assert_eq!(quotes[1].price, 181.0);
    let expected = (181.0 - 180.0) / 180.0 * 100.0;
    assert!((quotes[1].percent_change - expected).abs() < 1e-9);

    // The cache was updated before the broadcast went out.
    let cache = session.cache();
    assert_eq!(cache.lock().await.last_price("AAPL"), Some(181.0));

    session.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn test_rate_limited_close_starts_mock_feed_without_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (directive_tx, _directive_rx) = mpsc::unbounded_channel();
    let accepts = Arc::new(AtomicUsize::new(0));

    let server_accepts = Arc::clone(&accepts);
    let server = tokio::spawn(async move {
        let mut ws = accept_and_relay(&listener, &directive_tx).await;
        server_accepts.fetch_add(1, Ordering::SeqCst);

        ws.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "429 too many requests".into(),
        })))
        .await
        .unwrap();

        // Count any further connection attempts; there must be none.
        loop {
            let (stream, _) = listener.accept().await.expect("accept failed");
            server_accepts.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    let session = StreamingSession::new(feed_config(addr));
    let mut trades = session.trades();
    session.subscribe("AAPL").await.expect("subscribe failed");

    wait_for_state(&session, ConnectionState::RateLimited).await;

    // Synthetic ticks arrive within one generator interval for the
    // subscribed symbol.
    let trade = timeout(Duration::from_millis(500), trades.recv())
        .await
        .expect("no synthetic tick arrived")
        .expect("trade channel closed");
    assert_eq!(trade.symbol, "AAPL");

    // No reconnect was attempted.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), ConnectionState::RateLimited);
    assert_eq!(session.reconnect_attempts(), 0);

    session.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn test_abnormal_close_reconnects_and_replays_subscriptions() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (directive_tx, mut directive_rx) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        // First connection: drop the TCP stream without a close handshake.
        let (stream, _) = listener.accept().await.expect("accept failed");
        let ws = accept_async(stream).await.expect("handshake failed");
        drop(ws);

        // Second connection: collect the replayed directives.
        let _ws = accept_and_relay(&listener, &directive_tx).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let session = StreamingSession::new(feed_config(addr));
    session.subscribe("AAPL").await.expect("subscribe failed");

    // The session reconnects on its own and replays the subscription.
    let replayed = timeout(Duration::from_secs(3), directive_rx.recv())
        .await
        .expect("subscription was not replayed")
        .expect("directive channel closed");
    assert_eq!(replayed, r#"{"type":"subscribe","symbol":"AAPL"}"#);

    wait_for_state(&session, ConnectionState::Connected).await;

    session.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn test_reconnect_budget_is_exhausted_silently() {
    // Bind then drop so the port refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = FeedConfig {
        reconnect_base_delay_ms: 10,
        max_reconnect_attempts: 2,
        ..feed_config(addr)
    };
    let session = StreamingSession::new(config);

    assert!(session.connect().await.is_err());

    // Attempts 1 and 2 run on timers; attempt 3 is rejected by the budget.
    timeout(Duration::from_secs(5), async {
        while session.reconnect_attempts() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reconnect attempts never exhausted the budget");

    // Settled: no further timers run once the budget is spent.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.reconnect_attempts(), 3);
    assert!(!session.is_connected());

    // An explicit connect is still allowed afterwards (and fails again
    // against the dead port).
    assert!(session.connect().await.is_err());
}

#[tokio::test]
async fn test_disconnect_sends_best_effort_unsubscribes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (directive_tx, mut directive_rx) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept failed");
        let mut ws = accept_async(stream).await.expect("handshake failed");
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                if directive_tx.send(text).is_err() {
                    break;
                }
            }
        }
    });

    let session = StreamingSession::new(feed_config(addr));
    session.subscribe("AAPL").await.expect("subscribe failed");
    wait_for_state(&session, ConnectionState::Connected).await;

    // Consume the subscribe directive.
    let first = timeout(Duration::from_secs(2), directive_rx.recv())
        .await
        .expect("no directive arrived")
        .expect("directive channel closed");
    assert_eq!(first, r#"{"type":"subscribe","symbol":"AAPL"}"#);

    session.disconnect().await;

    let unsubscribe = timeout(Duration::from_secs(2), directive_rx.recv())
        .await
        .expect("no unsubscribe arrived")
        .expect("directive channel closed");
    assert_eq!(unsubscribe, r#"{"type":"unsubscribe","symbol":"AAPL"}"#);

    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.subscribed_symbols().await.is_empty());

    server.abort();
}
