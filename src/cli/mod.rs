//! Command Line Interface module
//!
//! Implements the CLI commands and argument parsing for tickwatch.

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use crate::alerts::PriceAlert;

#[derive(Parser, Debug, Clone)]
#[command(name = "tickwatch")]
#[command(about = "Tickwatch streaming stock watchlist")]
#[command(long_about = "Streams live quotes for a watchlist and fires desktop price alerts")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    #[arg(long, default_value = "config.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the configured watchlist (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Price alert in SYMBOL:above|below:PRICE form; repeatable
    #[arg(long = "alert")]
    pub alerts: Vec<String>,

    /// Dry-run mode: show the effective configuration without connecting
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Stream the watchlist (default)
    Watch,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Watch
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Reset configuration to defaults
    Reset,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the actual command, using default if none provided
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }

    /// Adjust log level based on verbose flag
    pub fn effective_log_level(&self) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level.clone()
        }
    }

    /// Check if we're running in dry-run mode
    pub fn is_dry_run_mode(&self) -> bool {
        self.dry_run
    }

    /// Parse `--alert` specs into alert definitions; ids are assigned
    /// sequentially
    pub fn parsed_alerts(&self) -> Result<Vec<PriceAlert>> {
        self.alerts
            .iter()
            .enumerate()
            .map(|(index, spec)| parse_alert_spec(spec, index + 1))
            .collect()
    }
}

/// Parse a SYMBOL:above|below:PRICE alert spec
fn parse_alert_spec(spec: &str, id: usize) -> Result<PriceAlert> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() != 3 {
        return Err(anyhow!(
            "Invalid alert spec '{}'; expected SYMBOL:above|below:PRICE",
            spec
        ));
    }

    let is_above = match parts[1].to_ascii_lowercase().as_str() {
        "above" => true,
        "below" => false,
        other => return Err(anyhow!("Invalid alert direction '{}'", other)),
    };

    let price: f64 = parts[2]
        .parse()
        .map_err(|_| anyhow!("Invalid alert price '{}'", parts[2]))?;

    Ok(PriceAlert::new(id.to_string(), parts[0], price, is_above))
}
