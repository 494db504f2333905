//! REST snapshot client for priming the price cache

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::feed::types::FeedError;
use crate::market_data::Quote;

/// Upstream caps free-tier clients aggressively, so snapshot batches are
/// truncated and paced rather than fired in parallel.
const SNAPSHOT_BATCH_LIMIT: usize = 5;
const SNAPSHOT_PACING_MS: u64 = 300;

/// Quote snapshot as returned by the upstream REST API
#[derive(Debug, Clone, serde::Deserialize)]
pub struct QuoteSnapshot {
    /// Current price
    #[serde(rename = "c")]
    pub current: f64,
    /// Change since previous close
    #[serde(rename = "d", default)]
    pub change: f64,
    /// Percent change since previous close
    #[serde(rename = "dp", default)]
    pub percent_change: f64,
    #[serde(rename = "h", default)]
    pub high: f64,
    #[serde(rename = "l", default)]
    pub low: f64,
    #[serde(rename = "o", default)]
    pub open: f64,
    #[serde(rename = "pc", default)]
    pub previous_close: f64,
    #[serde(rename = "t", default)]
    pub timestamp: i64,
}

impl QuoteSnapshot {
    fn placeholder() -> Self {
        Self {
            current: 0.0,
            change: 0.0,
            percent_change: 0.0,
            high: 0.0,
            low: 0.0,
            open: 0.0,
            previous_close: 0.0,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Company profile as returned by the upstream REST API
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CompanyProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub exchange: String,
}

/// REST client for the quote/profile snapshot endpoints
pub struct SnapshotClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl SnapshotClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Fetch the current quote for a symbol
    pub async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot> {
        let url = format!(
            "{}/quote?symbol={}&token={}",
            self.base_url, symbol, self.token
        );

        debug!("Fetching quote snapshot for {}", symbol);
        self.get_json(&url).await
    }

    /// Fetch the company profile for a symbol
    pub async fn fetch_profile(&self, symbol: &str) -> Result<CompanyProfile> {
        let url = format!(
            "{}/stock/profile2?symbol={}&token={}",
            self.base_url, symbol, self.token
        );

        debug!("Fetching company profile for {}", symbol);
        self.get_json(&url).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| FeedError::Snapshot(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Snapshot(format!("HTTP error {}: {}", status, body)).into());
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FeedError::Snapshot(format!("bad response body: {}", e)).into())
    }

    /// Fetch seed quotes for a watchlist.
    ///
    /// Quote and profile are two independent calls per symbol; either
    /// failing degrades to a placeholder (zero-valued quote, symbol as
    /// name) so one symbol's failure never aborts the batch. This method
    /// itself never fails.
    pub async fn fetch_watchlist(&self, symbols: &[String]) -> Vec<Quote> {
        let batch: Vec<&String> = symbols.iter().take(SNAPSHOT_BATCH_LIMIT).collect();
        if batch.len() < symbols.len() {
            warn!(
                "Snapshot batch truncated to {} of {} symbols",
                batch.len(),
                symbols.len()
            );
        }

        let mut quotes = Vec::with_capacity(batch.len());

        for (index, symbol) in batch.iter().enumerate() {
            let snapshot = match self.fetch_quote(symbol).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Failed to fetch quote for {}: {}", symbol, e);
                    QuoteSnapshot::placeholder()
                }
            };

            let name = match self.fetch_profile(symbol).await {
                Ok(profile) if !profile.name.is_empty() => profile.name,
                Ok(_) => symbol.to_string(),
                Err(e) => {
                    warn!("Failed to fetch profile for {}: {}", symbol, e);
                    symbol.to_string()
                }
            };

            quotes.push(Quote::new(
                symbol.as_str(),
                name,
                snapshot.current,
                snapshot.change,
                snapshot.percent_change,
            ));

            if index + 1 < batch.len() {
                tokio::time::sleep(Duration::from_millis(SNAPSHOT_PACING_MS)).await;
            }
        }

        info!("Fetched snapshot data for {} symbols", quotes.len());
        quotes
    }
}
