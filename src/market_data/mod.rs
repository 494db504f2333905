//! Price cache and subscription tracking

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::feed::types::Trade;

/// Latest known price snapshot for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change: f64,
    pub percent_change: f64,
}

impl Quote {
    /// Build a seed quote, typically from REST snapshot data
    pub fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        price: f64,
        change: f64,
        percent_change: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            price,
            change,
            percent_change,
        }
    }
}

/// Authoritative symbol -> latest quote mapping.
///
/// Mutated only from the tick-ingestion path (real or synthetic trades) and
/// the snapshot seeding done before streaming starts. Entries are never
/// evicted for the process lifetime.
#[derive(Debug, Default)]
pub struct PriceCache {
    quotes: HashMap<String, Quote>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self {
            quotes: HashMap::new(),
        }
    }

    /// Get the cached quote for a symbol, if any
    pub fn get(&self, symbol: &str) -> Option<&Quote> {
        self.quotes.get(symbol)
    }

    /// Latest cached price for a symbol
    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.quotes.get(symbol).map(|quote| quote.price)
    }

    /// Reconcile a trade into the cache and return the updated quote.
    ///
    /// Change and percent change are computed against the immediately
    /// preceding cached price. A symbol seen for the first time enters with
    /// zero change and its symbol as a placeholder name until snapshot data
    /// enriches it.
    pub fn upsert(&mut self, trade: &Trade) -> Quote {
        match self.quotes.get_mut(&trade.symbol) {
            Some(quote) => {
                let previous = quote.price;
                let change = trade.price - previous;
                quote.change = change;
                quote.percent_change = if previous != 0.0 {
                    change / previous * 100.0
                } else {
                    0.0
                };
                quote.price = trade.price;
                quote.clone()
            }
            None => {
                let quote = Quote {
                    symbol: trade.symbol.clone(),
                    name: trade.symbol.clone(),
                    price: trade.price,
                    change: 0.0,
                    percent_change: 0.0,
                };
                self.quotes.insert(trade.symbol.clone(), quote.clone());
                quote
            }
        }
    }

    /// Bulk-insert quotes, overwriting any existing entries.
    ///
    /// Used to prime the cache from the REST snapshot before streaming
    /// starts; seeded entries keep their snapshot-provided names.
    pub fn seed(&mut self, quotes: Vec<Quote>) {
        for quote in quotes {
            self.quotes.insert(quote.symbol.clone(), quote);
        }
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Snapshot of all cached quotes
    pub fn snapshot(&self) -> Vec<Quote> {
        self.quotes.values().cloned().collect()
    }
}

/// Set of symbols currently desired for streaming.
///
/// Membership is independent of connection state: it survives transient
/// disconnects and is replayed to the transport on every successful
/// (re)connection. Symbols are normalized to uppercase.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    symbols: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            symbols: BTreeSet::new(),
        }
    }

    /// Add a symbol; returns false if it was already tracked
    pub fn add(&mut self, symbol: &str) -> bool {
        self.symbols.insert(normalize_symbol(symbol))
    }

    /// Remove a symbol; returns false if it was not tracked
    pub fn remove(&mut self, symbol: &str) -> bool {
        self.symbols.remove(&normalize_symbol(symbol))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(&normalize_symbol(symbol))
    }

    pub fn clear(&mut self) {
        self.symbols.clear();
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Ordered snapshot of tracked symbols, used for directive replay
    pub fn snapshot(&self) -> Vec<String> {
        self.symbols.iter().cloned().collect()
    }
}

/// Normalize symbol format for the upstream feed
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}
