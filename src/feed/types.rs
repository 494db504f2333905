//! Streaming feed data types and structures

use serde::{Deserialize, Serialize};

use crate::market_data::Quote;

/// Connection state of the streaming session.
///
/// Exactly one value at a time; every transition is broadcast as a
/// [`StreamEvent::ConnectionChanged`] so downstream consumers can render
/// status without polling a side channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Upstream signaled quota exhaustion; terminal for this session
    /// instance, synthetic ticks take over.
    RateLimited,
    Reconnecting,
    Error(String),
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::RateLimited => "Rate Limited",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Error(_) => "Error",
        }
    }
}

/// A single trade event as carried on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: f64,
    /// Trade time, unix milliseconds
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "v")]
    pub volume: f64,
    /// Trade condition codes; carried through parsing but unused downstream
    #[serde(rename = "c", default)]
    pub conditions: Vec<String>,
}

/// Inbound feed frame: `{"type": "trade", "data": [...]}`
#[derive(Debug, Deserialize)]
pub struct TradeFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Vec<Trade>,
}

/// Outbound subscribe/unsubscribe directive
#[derive(Debug, Clone, Serialize)]
pub struct StreamDirective {
    #[serde(rename = "type")]
    pub kind: String,
    pub symbol: String,
}

impl StreamDirective {
    pub fn subscribe(symbol: &str) -> Self {
        Self {
            kind: "subscribe".to_string(),
            symbol: symbol.to_string(),
        }
    }

    pub fn unsubscribe(symbol: &str) -> Self {
        Self {
            kind: "unsubscribe".to_string(),
            symbol: symbol.to_string(),
        }
    }
}

/// Events broadcast on the stock-update channel.
///
/// Cache-reconciled quotes and connection transitions share one channel so
/// consumers observe them in a single order.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Quote(Quote),
    ConnectionChanged(ConnectionState),
}

/// Error types for the streaming feed
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed connection error: {0}")]
    Connect(String),
    #[error("feed transport error: {0}")]
    Transport(String),
    #[error("directive requires an open transport")]
    NotConnected,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("snapshot fetch failed: {0}")]
    Snapshot(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trade_frame() {
        let raw = r#"{"type":"trade","data":[{"p":181.25,"s":"AAPL","t":1712345678901,"v":120,"c":["1","12"]}]}"#;
        let frame: TradeFrame = serde_json::from_str(raw).unwrap();

        assert_eq!(frame.kind, "trade");
        assert_eq!(frame.data.len(), 1);
        let trade = &frame.data[0];
        assert_eq!(trade.symbol, "AAPL");
        assert_eq!(trade.price, 181.25);
        assert_eq!(trade.timestamp, 1712345678901);
        assert_eq!(trade.conditions, vec!["1", "12"]);
    }

    #[test]
    fn test_parse_frame_without_conditions() {
        let raw = r#"{"type":"trade","data":[{"p":99.5,"s":"MSFT","t":1,"v":10.5}]}"#;
        let frame: TradeFrame = serde_json::from_str(raw).unwrap();
        assert!(frame.data[0].conditions.is_empty());
    }

    #[test]
    fn test_parse_ping_frame_has_no_trades() {
        let raw = r#"{"type":"ping"}"#;
        let frame: TradeFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.kind, "ping");
        assert!(frame.data.is_empty());
    }

    #[test]
    fn test_directive_serialization() {
        let directive = StreamDirective::subscribe("AAPL");
        let raw = serde_json::to_string(&directive).unwrap();
        assert_eq!(raw, r#"{"type":"subscribe","symbol":"AAPL"}"#);

        let directive = StreamDirective::unsubscribe("AAPL");
        let raw = serde_json::to_string(&directive).unwrap();
        assert_eq!(raw, r#"{"type":"unsubscribe","symbol":"AAPL"}"#);
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(ConnectionState::RateLimited.label(), "Rate Limited");
        assert_eq!(
            ConnectionState::Error("boom".to_string()).label(),
            "Error"
        );
    }
}
