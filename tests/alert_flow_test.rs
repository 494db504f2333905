//! End-to-end alert flow: seeded cache, live tick, notification request

use tickwatch::alerts::{AlertEvaluator, FirePolicy, PriceAlert};
use tickwatch::feed::types::Trade;
use tickwatch::market_data::{PriceCache, Quote};

fn trade(symbol: &str, price: f64) -> Trade {
    Trade {
        symbol: symbol.to_string(),
        price,
        timestamp: 1712345678901,
        volume: 50.0,
        conditions: Vec::new(),
    }
}

#[test]
fn test_seeded_cache_tick_fires_one_notification() {
    let mut cache = PriceCache::new();
    cache.seed(vec![Quote::new("AAPL", "Apple Inc", 180.0, 0.0, 0.0)]);

    let mut evaluator = AlertEvaluator::new(FirePolicy::EveryTick);
    evaluator
        .add_alert(PriceAlert::new("a1", "AAPL", 179.0, true))
        .unwrap();

    let quote = cache.upsert(&trade("AAPL", 181.0));
    let requests = evaluator.check_price_alerts(&quote);

    assert_eq!(requests.len(), 1);
    assert!(requests[0].body.contains("AAPL"));
    assert!(requests[0].body.contains("181.00"));
    assert_eq!(requests[0].payload.quote.name, "Apple Inc");
    assert!((requests[0].payload.quote.change - 1.0).abs() < 1e-9);
}

#[test]
fn test_inactive_alert_stays_silent_end_to_end() {
    let mut cache = PriceCache::new();
    cache.seed(vec![Quote::new("AAPL", "Apple Inc", 180.0, 0.0, 0.0)]);

    let mut evaluator = AlertEvaluator::new(FirePolicy::EveryTick);
    let mut alert = PriceAlert::new("a1", "AAPL", 179.0, true);
    alert.is_active = false;
    evaluator.add_alert(alert).unwrap();

    let quote = cache.upsert(&trade("AAPL", 181.0));
    assert!(evaluator.check_price_alerts(&quote).is_empty());
}

#[test]
fn test_oscillating_price_policies_diverge() {
    let mut cache = PriceCache::new();
    cache.seed(vec![Quote::new("AAPL", "Apple Inc", 178.0, 0.0, 0.0)]);

    let mut every_tick = AlertEvaluator::new(FirePolicy::EveryTick);
    let mut on_crossing = AlertEvaluator::new(FirePolicy::OnCrossing);
    for evaluator in [&mut every_tick, &mut on_crossing] {
        evaluator
            .add_alert(PriceAlert::new("a1", "AAPL", 180.0, true))
            .unwrap();
    }

    let mut every_tick_fires = 0;
    let mut on_crossing_fires = 0;
    for price in [181.0, 182.0, 179.0, 181.5, 183.0] {
        let quote = cache.upsert(&trade("AAPL", price));
        every_tick_fires += every_tick.check_price_alerts(&quote).len();
        on_crossing_fires += on_crossing.check_price_alerts(&quote).len();
    }

    // Four qualifying ticks, but only two distinct crossings.
    assert_eq!(every_tick_fires, 4);
    assert_eq!(on_crossing_fires, 2);
}

#[test]
fn test_unseen_symbol_tick_still_evaluates() {
    let mut cache = PriceCache::new();
    let mut evaluator = AlertEvaluator::new(FirePolicy::EveryTick);
    evaluator
        .add_alert(PriceAlert::new("a1", "NVDA", 450.0, true))
        .unwrap();

    // First tick for an unseen symbol: zero change, but the alert still
    // sees the live price.
    let quote = cache.upsert(&trade("NVDA", 455.0));
    assert_eq!(quote.change, 0.0);

    let requests = evaluator.check_price_alerts(&quote);
    assert_eq!(requests.len(), 1);
    assert!(requests[0].body.contains("455.00"));
}
