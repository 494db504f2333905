//! Watch session: the composition root that wires the streaming feed,
//! the alert engine, and the notification collaborator together.
//!
//! Everything is explicitly constructed and owned here; there is no
//! module-level shared state, and tests build fresh instances.

use anyhow::Result;
use colored::Colorize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::alerts::{AlertEvaluator, NotificationRequest, PriceAlert};
use crate::config::Config;
use crate::feed::types::{ConnectionState, StreamEvent};
use crate::feed::{SnapshotClient, StreamingSession};
use crate::market_data::Quote;
use crate::notify::SystemNotifier;

/// Owns the market-data pipeline for one process lifetime
pub struct WatchSession {
    config: Config,
    stream: StreamingSession,
    snapshot_client: SnapshotClient,
    evaluator: AlertEvaluator,
    notifier: SystemNotifier,
}

impl WatchSession {
    pub fn new(config: Config) -> Self {
        let stream = StreamingSession::new(config.feed.clone());
        let snapshot_client =
            SnapshotClient::new(config.feed.rest_url.clone(), config.feed.api_token.clone());
        let evaluator = AlertEvaluator::new(config.alerts.fire_policy);
        let notifier = SystemNotifier::new(env!("CARGO_PKG_NAME"));

        Self {
            config,
            stream,
            snapshot_client,
            evaluator,
            notifier,
        }
    }

    /// The underlying streaming session
    pub fn stream(&self) -> &StreamingSession {
        &self.stream
    }

    pub fn add_alert(&mut self, alert: PriceAlert) -> Result<()> {
        self.evaluator.add_alert(alert)
    }

    pub fn remove_alert(&mut self, id: &str) -> bool {
        self.evaluator.remove_alert(id)
    }

    pub fn update_alert(&mut self, alert: PriceAlert) -> bool {
        self.evaluator.update_alert(alert)
    }

    pub fn alerts(&self) -> Vec<PriceAlert> {
        self.evaluator.alerts()
    }

    /// Seed the cache, connect, subscribe the watchlist, and consume the
    /// update channel until Ctrl-C or channel closure.
    pub async fn run(&mut self) -> Result<()> {
        // Subscribe before connecting; broadcast channels do not replay.
        let mut updates = self.stream.updates();

        let seeds = self
            .snapshot_client
            .fetch_watchlist(&self.config.symbols)
            .await;
        if !seeds.is_empty() {
            let cache = self.stream.cache();
            cache.lock().await.seed(seeds);
        }

        if let Err(e) = self.stream.connect().await {
            // The reconnect machinery takes over from here.
            warn!("Initial connect failed: {}", e);
        }

        for symbol in self.config.symbols.clone() {
            if let Err(e) = self.stream.subscribe(&symbol).await {
                warn!("Failed to subscribe to {}: {}", symbol, e);
            }
        }

        info!(
            "Watch session running for {} symbols",
            self.config.symbols.len()
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
                event = updates.recv() => match event {
                    Ok(StreamEvent::Quote(quote)) => self.handle_quote(&quote),
                    Ok(StreamEvent::ConnectionChanged(state)) => print_state(&state),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Update consumer lagged; {} events dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }

        self.stream.disconnect().await;
        Ok(())
    }

    fn handle_quote(&mut self, quote: &Quote) {
        print_quote(quote);
        for request in self.evaluator.check_price_alerts(quote) {
            self.deliver(&request);
        }
    }

    fn deliver(&self, request: &NotificationRequest) {
        info!("Price alert fired: {}", request.body);
        self.notifier.deliver(request);
    }

    /// Print the effective configuration without starting anything
    pub fn print_dry_run_summary(&self) {
        println!();
        println!("Dry-run configuration:");
        println!("  symbols:       {}", self.config.symbols.join(", "));
        println!("  feed:          {}", self.config.feed.ws_url);
        println!("  rest:          {}", self.config.feed.rest_url);
        println!(
            "  reconnect:     {} attempts, base {}ms",
            self.config.feed.max_reconnect_attempts, self.config.feed.reconnect_base_delay_ms
        );
        println!(
            "  mock fallback: {} ({}ms interval)",
            self.config.feed.mock_fallback, self.config.feed.mock_interval_ms
        );
        println!("  fire policy:   {:?}", self.config.alerts.fire_policy);
        if self.alerts().is_empty() {
            println!("  alerts:        none");
        } else {
            for alert in self.alerts() {
                let direction = if alert.is_above { "above" } else { "below" };
                println!(
                    "  alert {}:      {} {} {:.2}",
                    alert.id, alert.symbol, direction, alert.target_price
                );
            }
        }
    }
}

fn print_quote(quote: &Quote) {
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    let movement = format!(
        "{:+.2} ({:+.2}%)",
        quote.change, quote.percent_change
    );
    let movement = if quote.change >= 0.0 {
        movement.green()
    } else {
        movement.red()
    };
    println!(
        "{} {:<6} {:>10.2} {}",
        timestamp, quote.symbol, quote.price, movement
    );
}

fn print_state(state: &ConnectionState) {
    let label = match state {
        ConnectionState::Connected => state.label().green(),
        ConnectionState::RateLimited | ConnectionState::Reconnecting => state.label().yellow(),
        ConnectionState::Error(_) => state.label().red(),
        _ => state.label().normal(),
    };
    println!("-- feed status: {}", label);
    if let ConnectionState::Error(message) = state {
        println!("   {}", message);
    }
}
