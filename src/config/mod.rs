//! Configuration management module
//!
//! Handles loading, validation, and management of application configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::alerts::FirePolicy;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Watchlist symbols to subscribe on startup
    pub symbols: Vec<String>,

    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// Streaming feed configuration
    pub feed: FeedConfig,

    /// Alert evaluation configuration
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    /// WebSocket base URL
    pub ws_url: String,

    /// REST API base URL
    pub rest_url: String,

    /// API token appended to feed requests
    pub api_token: String,

    /// Base reconnect delay in milliseconds; attempt N waits N times this
    pub reconnect_base_delay_ms: u64,

    /// Maximum reconnection attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Synthetic tick interval in milliseconds
    pub mock_interval_ms: u64,

    /// Generate synthetic ticks after a rate-limited close
    pub mock_fallback: bool,

    /// Substring of a close reason that marks a rate-limited close
    pub rate_limit_marker: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Re-trigger behavior: "every-tick" or "on-crossing"
    pub fire_policy: FirePolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Absolute or relative path to the rolling log file
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec![
                "AAPL".to_string(),
                "MSFT".to_string(),
                "GOOGL".to_string(),
                "AMZN".to_string(),
                "META".to_string(),
            ],
            log_level: "info".to_string(),
            log: LogConfig::default(),
            feed: FeedConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws.finnhub.io".to_string(),
            rest_url: "https://finnhub.io/api/v1".to_string(),
            api_token: String::new(),
            reconnect_base_delay_ms: 3000,
            max_reconnect_attempts: 5,
            mock_interval_ms: 3000,
            mock_fallback: true,
            rate_limit_marker: "429".to_string(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            fire_policy: FirePolicy::EveryTick,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: "logs/tickwatch.log".to_string(),
        }
    }
}

impl FeedConfig {
    /// Full websocket URL including the token query parameter
    pub fn stream_url(&self) -> String {
        if self.api_token.is_empty() {
            self.ws_url.clone()
        } else {
            format!("{}?token={}", self.ws_url, self.api_token)
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // TICKWATCH_SYMBOLS - comma-separated watchlist
        if let Ok(symbols) = env::var("TICKWATCH_SYMBOLS") {
            self.symbols = symbols
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // TICKWATCH_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("TICKWATCH_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // TICKWATCH_LOG_FILE_PATH - logging destination file
        if let Ok(file_path) = env::var("TICKWATCH_LOG_FILE_PATH") {
            if !file_path.trim().is_empty() {
                self.log.file_path = file_path;
            }
        }

        // TICKWATCH_FEED_WS_URL - WebSocket URL
        if let Ok(ws_url) = env::var("TICKWATCH_FEED_WS_URL") {
            self.feed.ws_url = ws_url;
        }

        // TICKWATCH_FEED_REST_URL - REST API URL
        if let Ok(rest_url) = env::var("TICKWATCH_FEED_REST_URL") {
            self.feed.rest_url = rest_url;
        }

        // TICKWATCH_FEED_API_TOKEN - API token
        if let Ok(token) = env::var("TICKWATCH_FEED_API_TOKEN") {
            self.feed.api_token = token;
        }

        // TICKWATCH_FEED_RECONNECT_BASE_DELAY_MS - reconnect base delay
        if let Ok(delay) = env::var("TICKWATCH_FEED_RECONNECT_BASE_DELAY_MS") {
            if let Ok(value) = delay.parse::<u64>() {
                self.feed.reconnect_base_delay_ms = value;
            }
        }

        // TICKWATCH_FEED_MAX_RECONNECT_ATTEMPTS - reconnect budget
        if let Ok(attempts) = env::var("TICKWATCH_FEED_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(value) = attempts.parse::<u32>() {
                self.feed.max_reconnect_attempts = value;
            }
        }

        // TICKWATCH_FEED_MOCK_INTERVAL_MS - synthetic tick interval
        if let Ok(interval) = env::var("TICKWATCH_FEED_MOCK_INTERVAL_MS") {
            if let Ok(value) = interval.parse::<u64>() {
                self.feed.mock_interval_ms = value;
            }
        }

        // TICKWATCH_FEED_MOCK_FALLBACK - enable synthetic fallback
        if let Ok(fallback) = env::var("TICKWATCH_FEED_MOCK_FALLBACK") {
            self.feed.mock_fallback = fallback.parse().unwrap_or(self.feed.mock_fallback);
        }

        // TICKWATCH_ALERT_FIRE_POLICY - "every-tick" or "on-crossing"
        if let Ok(policy) = env::var("TICKWATCH_ALERT_FIRE_POLICY") {
            match policy.as_str() {
                "every-tick" => self.alerts.fire_policy = FirePolicy::EveryTick,
                "on-crossing" => self.alerts.fire_policy = FirePolicy::OnCrossing,
                other => tracing::warn!("Ignoring unknown alert fire policy: {}", other),
            }
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {}, using defaults", err);
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            anyhow::bail!("At least one symbol must be specified");
        }

        for symbol in &self.symbols {
            if symbol.trim().is_empty() {
                anyhow::bail!("Symbols must not be blank");
            }
        }

        if self.feed.ws_url.trim().is_empty() {
            anyhow::bail!("Feed WebSocket URL must not be empty");
        }

        if self.feed.reconnect_base_delay_ms == 0 {
            anyhow::bail!("Reconnect base delay must be greater than 0");
        }

        if self.feed.mock_interval_ms == 0 {
            anyhow::bail!("Mock tick interval must be greater than 0");
        }

        if self.feed.rate_limit_marker.trim().is_empty() {
            anyhow::bail!("Rate limit marker must not be empty");
        }

        if self.log.file_path.trim().is_empty() {
            anyhow::bail!("Log file path must not be empty");
        }

        Ok(())
    }

    /// Display formatted configuration
    pub fn display(&self) -> Result<()> {
        println!("Current configuration:");
        println!("{:#?}", self);
        Ok(())
    }

    /// Display configuration management help
    pub fn display_help() -> Result<()> {
        println!("Configuration management commands:");
        println!("  tickwatch config show    - Show current configuration");
        println!("  tickwatch config reset   - Show the default configuration");
        Ok(())
    }
}
