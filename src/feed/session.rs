//! Streaming session state machine
//!
//! Owns the websocket transport and drives the
//! connect/subscribe/reconnect/fallback lifecycle. All observable effects
//! flow through two broadcast channels: raw trades, and cache-reconciled
//! stock updates multiplexed with connection transitions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use futures_util::sink::SinkExt;
use futures_util::stream::{SplitSink, SplitStream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};
use tracing::{debug, error, info, warn};

use crate::config::FeedConfig;
use crate::feed::mock::MockTickGenerator;
use crate::feed::types::{ConnectionState, FeedError, StreamDirective, StreamEvent, Trade, TradeFrame};
use crate::market_data::{PriceCache, SubscriptionRegistry, normalize_symbol};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// How a close frame is acted upon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseDisposition {
    /// Upstream quota exhausted; terminal, switch to synthetic ticks
    RateLimited,
    /// Deliberate closure; stay down
    Clean,
    /// Anything else; reconnect within budget
    Abnormal,
}

fn classify_close(frame: Option<&CloseFrame<'_>>, rate_limit_marker: &str) -> CloseDisposition {
    match frame {
        Some(frame) if frame.reason.contains(rate_limit_marker) => CloseDisposition::RateLimited,
        Some(frame) if frame.code == CloseCode::Normal => CloseDisposition::Clean,
        _ => CloseDisposition::Abnormal,
    }
}

/// Shared tick-ingestion path.
///
/// Real and synthetic trades funnel through here: the cache is updated
/// first, then the raw trade and the reconciled quote are broadcast, so a
/// subscriber reading the cache while handling a broadcast always sees the
/// post-update state.
#[derive(Clone)]
pub(crate) struct TickIngest {
    cache: Arc<Mutex<PriceCache>>,
    trade_tx: broadcast::Sender<Trade>,
    update_tx: broadcast::Sender<StreamEvent>,
}

impl TickIngest {
    pub(crate) async fn ingest(&self, trade: Trade) {
        let quote = {
            let mut cache = self.cache.lock().await;
            cache.upsert(&trade)
        };
        let _ = self.trade_tx.send(trade);
        let _ = self.update_tx.send(StreamEvent::Quote(quote));
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        cache: Arc<Mutex<PriceCache>>,
    ) -> (
        Self,
        broadcast::Receiver<Trade>,
        broadcast::Receiver<StreamEvent>,
    ) {
        let (trade_tx, trade_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (update_tx, update_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        (
            Self {
                cache,
                trade_tx,
                update_tx,
            },
            trade_rx,
            update_rx,
        )
    }
}

struct SessionCore {
    config: FeedConfig,
    sink: Mutex<Option<WsSink>>,
    subscriptions: Arc<Mutex<SubscriptionRegistry>>,
    cache: Arc<Mutex<PriceCache>>,
    ingest: TickIngest,
    state_tx: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    mock_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCore {
    fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Publish a state transition on both the watch channel and the
    /// stock-update channel
    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state.clone());
        let _ = self
            .ingest
            .update_tx
            .send(StreamEvent::ConnectionChanged(state));
    }

    /// Atomically claim the transition into `Connecting`; returns false if
    /// a connect is already in flight or established
    fn begin_connecting(&self) -> bool {
        let claimed = self.state_tx.send_if_modified(|state| {
            if matches!(
                state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                false
            } else {
                *state = ConnectionState::Connecting;
                true
            }
        });
        if claimed {
            let _ = self
                .ingest
                .update_tx
                .send(StreamEvent::ConnectionChanged(ConnectionState::Connecting));
        }
        claimed
    }

    fn connect(
        self: Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            if !self.begin_connecting() {
                debug!("Feed is already connected or connecting");
                return Ok(());
            }

            info!("Connecting to streaming feed at {}", self.config.ws_url);
            match connect_async(self.config.stream_url()).await {
                Ok((stream, _)) => {
                    let (sink, source) = stream.split();
                    *self.sink.lock().await = Some(sink);
                    self.on_open().await;

                    let core = Arc::clone(&self);
                    let handle = tokio::spawn(async move { core.read_loop(source).await });
                    if let Some(previous) = self.reader_task.lock().await.replace(handle) {
                        previous.abort();
                    }
                    Ok(())
                }
                Err(e) => {
                    let message = format!("Failed to open feed transport: {}", e);
                    error!("{}", message);
                    self.set_state(ConnectionState::Error(message.clone()));
                    Self::schedule_reconnect(&self).await;
                    Err(FeedError::Connect(message).into())
                }
            }
        })
    }

    /// Reset the attempt budget, announce the connection, and replay the
    /// full subscription set.
    ///
    /// Holds the registry lock across the replay so a concurrent
    /// `subscribe` either lands before the snapshot (replayed) or observes
    /// the `Connected` state afterwards (sent directly) -- never both.
    async fn on_open(&self) {
        let subscriptions = self.subscriptions.lock().await;
        self.attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        info!("Connected to streaming feed");

        for symbol in subscriptions.snapshot() {
            match self.send_directive(&StreamDirective::subscribe(&symbol)).await {
                Ok(()) => debug!("Replayed subscription for {}", symbol),
                Err(e) => warn!("Failed to replay subscription for {}: {}", symbol, e),
            }
        }
    }

    async fn send_directive(&self, directive: &StreamDirective) -> Result<(), FeedError> {
        let message = serde_json::to_string(directive)?;
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(ws) => ws
                .send(Message::Text(message))
                .await
                .map_err(|e| FeedError::Transport(e.to_string())),
            None => Err(FeedError::NotConnected),
        }
    }

    async fn read_loop(self: Arc<Self>, mut source: WsSource) {
        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Text(text)) => self.handle_frame(&text).await,
                Ok(Message::Ping(payload)) => {
                    let mut sink = self.sink.lock().await;
                    if let Some(ws) = sink.as_mut() {
                        if let Err(e) = ws.send(Message::Pong(payload)).await {
                            warn!("Failed to answer transport ping: {}", e);
                        }
                    }
                }
                Ok(Message::Close(frame)) => {
                    Self::handle_close(&self, frame).await;
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    // Broadcast only; the close path drives recovery.
                    let message = format!("Feed transport error: {}", e);
                    error!("{}", message);
                    self.set_state(ConnectionState::Error(message));
                }
            }
        }
        // Stream ended without a close frame.
        Self::handle_close(&self, None).await;
    }

    async fn handle_frame(&self, text: &str) {
        let frame: TradeFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{}", FeedError::MalformedFrame(e.to_string()));
                return;
            }
        };

        if frame.kind != "trade" {
            debug!("Ignoring non-trade message: {}", frame.kind);
            return;
        }

        for trade in frame.data {
            self.ingest.ingest(trade).await;
        }
    }

    async fn handle_close(core: &Arc<Self>, frame: Option<CloseFrame<'_>>) {
        {
            // A close observed after a deliberate teardown (or once the
            // session is in fallback mode) must not restart anything.
            let state = core.state_tx.borrow();
            if matches!(
                *state,
                ConnectionState::Disconnected | ConnectionState::RateLimited
            ) {
                return;
            }
        }

        core.sink.lock().await.take();

        match classify_close(frame.as_ref(), &core.config.rate_limit_marker) {
            CloseDisposition::RateLimited => {
                info!("Feed rate limited; no reconnect will be attempted");
                core.set_state(ConnectionState::RateLimited);
                if core.config.mock_fallback {
                    Self::start_mock_feed(core).await;
                }
            }
            CloseDisposition::Clean => {
                info!("Feed closed cleanly");
                core.set_state(ConnectionState::Disconnected);
            }
            CloseDisposition::Abnormal => {
                warn!("Feed closed abnormally");
                Self::schedule_reconnect(core).await;
            }
        }
    }

    /// Schedule a reconnect attempt with `delay = base * attempt_number`.
    ///
    /// Past the attempt budget the session stays down silently; an
    /// explicit `connect` call resets nothing but still works, and a
    /// successful open resets the counter.
    async fn schedule_reconnect(core: &Arc<Self>) {
        let attempt = core.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > core.config.max_reconnect_attempts {
            info!(
                "Reconnect budget ({} attempts) exhausted; waiting for an explicit connect",
                core.config.max_reconnect_attempts
            );
            return;
        }

        core.set_state(ConnectionState::Reconnecting);
        let delay = Duration::from_millis(
            core.config
                .reconnect_base_delay_ms
                .saturating_mul(attempt as u64),
        );
        info!(
            "Scheduling reconnect attempt {}/{} in {:?}",
            attempt, core.config.max_reconnect_attempts, delay
        );

        let timer_core = Arc::clone(core);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A stale timer must never resurrect a torn-down session.
            if !matches!(timer_core.state(), ConnectionState::Reconnecting) {
                debug!("Reconnect timer fired after state moved on; ignoring");
                return;
            }
            if let Err(e) = Arc::clone(&timer_core).connect().await {
                warn!("Reconnect attempt {} failed: {}", attempt, e);
            }
        });
        if let Some(previous) = core.reconnect_task.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn start_mock_feed(core: &Arc<Self>) {
        let mut guard = core.mock_task.lock().await;
        if guard.is_some() {
            return;
        }

        info!("Starting synthetic tick generation");
        let generator = MockTickGenerator::new(
            Duration::from_millis(core.config.mock_interval_ms),
            Arc::clone(&core.subscriptions),
            Arc::clone(&core.cache),
            core.ingest.clone(),
        );
        *guard = Some(tokio::spawn(generator.run()));
    }

    async fn disconnect(&self) {
        // Best-effort unsubscribe while the transport is still open.
        if matches!(self.state(), ConnectionState::Connected) {
            let symbols = self.subscriptions.lock().await.snapshot();
            for symbol in &symbols {
                if let Err(e) = self
                    .send_directive(&StreamDirective::unsubscribe(symbol))
                    .await
                {
                    debug!("Best-effort unsubscribe for {} failed: {}", symbol, e);
                }
            }
        }

        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }

        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                warn!("Error closing feed transport: {}", e);
            }
        }

        if let Some(handle) = self.reconnect_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.mock_task.lock().await.take() {
            handle.abort();
        }

        self.subscriptions.lock().await.clear();
        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected from streaming feed");
    }
}

/// Streaming market-data client.
///
/// Explicitly constructed and injectable: the composition root owns one
/// instance and hands out broadcast receivers; tests build fresh instances.
pub struct StreamingSession {
    core: Arc<SessionCore>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl StreamingSession {
    pub fn new(config: FeedConfig) -> Self {
        Self::with_cache(config, Arc::new(Mutex::new(PriceCache::new())))
    }

    /// Build a session over an externally owned cache, typically one
    /// pre-seeded from the REST snapshot
    pub fn with_cache(config: FeedConfig, cache: Arc<Mutex<PriceCache>>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (trade_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (update_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let ingest = TickIngest {
            cache: Arc::clone(&cache),
            trade_tx,
            update_tx,
        };

        let core = Arc::new(SessionCore {
            config,
            sink: Mutex::new(None),
            subscriptions: Arc::new(Mutex::new(SubscriptionRegistry::new())),
            cache,
            ingest,
            state_tx,
            attempts: AtomicU32::new(0),
            reader_task: Mutex::new(None),
            reconnect_task: Mutex::new(None),
            mock_task: Mutex::new(None),
        });

        Self { core, state_rx }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel mirroring every state transition
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected)
    }

    /// Subscribe to cache-reconciled quotes and connection transitions.
    ///
    /// Subscribe before calling [`connect`](Self::connect); broadcast
    /// channels do not replay events for late receivers.
    pub fn updates(&self) -> broadcast::Receiver<StreamEvent> {
        self.core.ingest.update_tx.subscribe()
    }

    /// Subscribe to the raw trade stream (real and synthetic)
    pub fn trades(&self) -> broadcast::Receiver<Trade> {
        self.core.ingest.trade_tx.subscribe()
    }

    /// Shared handle to the authoritative price cache
    pub fn cache(&self) -> Arc<Mutex<PriceCache>> {
        Arc::clone(&self.core.cache)
    }

    /// Number of reconnect attempts made since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.core.attempts.load(Ordering::SeqCst)
    }

    /// Open the transport. Idempotent: a no-op while already connecting or
    /// connected.
    pub async fn connect(&self) -> Result<()> {
        SessionCore::connect(Arc::clone(&self.core)).await
    }

    /// Tear the session down: best-effort unsubscribe, close the
    /// transport, clear the subscription set, and cancel the reader,
    /// reconnect timer, and synthetic tick generator.
    pub async fn disconnect(&self) {
        self.core.disconnect().await;
    }

    /// Track a symbol. Sends the subscribe directive immediately when
    /// connected; otherwise triggers a connect and relies on the on-open
    /// replay of the full subscription set.
    pub async fn subscribe(&self, symbol: &str) -> Result<()> {
        let symbol = normalize_symbol(symbol);
        {
            let mut subscriptions = self.core.subscriptions.lock().await;
            subscriptions.add(&symbol);
            if matches!(self.core.state(), ConnectionState::Connected) {
                self.core
                    .send_directive(&StreamDirective::subscribe(&symbol))
                    .await?;
                info!("Subscribed to {}", symbol);
                return Ok(());
            }
        }

        debug!("Feed not connected; deferring subscribe for {}", symbol);
        SessionCore::connect(Arc::clone(&self.core)).await
    }

    /// Subscribe to a batch of symbols
    pub async fn subscribe_all(&self, symbols: &[String]) -> Result<()> {
        for symbol in symbols {
            self.subscribe(symbol).await?;
        }
        Ok(())
    }

    /// Stop tracking a symbol. Directives require an open transport, so
    /// this is a no-op while disconnected.
    pub async fn unsubscribe(&self, symbol: &str) -> Result<()> {
        if !self.is_connected() {
            debug!("Feed not connected; ignoring unsubscribe");
            return Ok(());
        }

        let symbol = normalize_symbol(symbol);
        let mut subscriptions = self.core.subscriptions.lock().await;
        self.core
            .send_directive(&StreamDirective::unsubscribe(&symbol))
            .await?;
        subscriptions.remove(&symbol);
        info!("Unsubscribed from {}", symbol);
        Ok(())
    }

    /// Stop tracking every symbol. No-op while disconnected.
    pub async fn unsubscribe_all(&self) -> Result<()> {
        if !self.is_connected() {
            debug!("Feed not connected; ignoring unsubscribe-all");
            return Ok(());
        }

        let mut subscriptions = self.core.subscriptions.lock().await;
        for symbol in subscriptions.snapshot() {
            self.core
                .send_directive(&StreamDirective::unsubscribe(&symbol))
                .await?;
        }
        subscriptions.clear();
        info!("Unsubscribed from all symbols");
        Ok(())
    }

    /// Currently tracked symbols
    pub async fn subscribed_symbols(&self) -> Vec<String> {
        self.core.subscriptions.lock().await.snapshot()
    }
}
