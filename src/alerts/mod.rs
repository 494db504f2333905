//! Price alert registry and evaluation

use std::collections::{BTreeMap, HashMap};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::market_data::{Quote, normalize_symbol};

/// User-defined price threshold alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAlert {
    /// Caller-assigned unique id
    pub id: String,
    pub symbol: String,
    pub target_price: f64,
    /// true: fire when price rises above the target; false: below
    pub is_above: bool,
    pub is_active: bool,
}

impl PriceAlert {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        target_price: f64,
        is_above: bool,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: normalize_symbol(&symbol.into()),
            target_price,
            is_above,
            is_active: true,
        }
    }
}

/// Re-trigger behavior for alert evaluation.
///
/// The upstream behavior re-notifies on every qualifying tick, which reads
/// either as "keep reminding" or as a missing debounce depending on who you
/// ask; both are supported and the caller picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FirePolicy {
    /// Stateless: a notification for every tick that satisfies the
    /// condition, including a price parked past the threshold
    #[default]
    EveryTick,
    /// Edge-triggered: one notification per crossing, re-armed once the
    /// condition clears
    OnCrossing,
}

/// Holds user-defined alert rules, keyed by id
#[derive(Debug, Default)]
pub struct AlertRegistry {
    alerts: BTreeMap<String, PriceAlert>,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self {
            alerts: BTreeMap::new(),
        }
    }

    /// Add an alert after basic validation and symbol normalization
    pub fn add(&mut self, alert: PriceAlert) -> Result<()> {
        if alert.id.trim().is_empty() {
            return Err(anyhow!("Alert id cannot be empty"));
        }
        if alert.symbol.trim().is_empty() {
            return Err(anyhow!("Alert symbol cannot be empty"));
        }
        if !alert.target_price.is_finite() || alert.target_price <= 0.0 {
            return Err(anyhow!("Target price must be a positive, finite number"));
        }

        let mut alert = alert;
        alert.symbol = normalize_symbol(&alert.symbol);
        debug!(
            "Added price alert {} for {} at {}",
            alert.id, alert.symbol, alert.target_price
        );
        self.alerts.insert(alert.id.clone(), alert);
        Ok(())
    }

    /// Remove an alert by id; returns false if it was not present
    pub fn remove(&mut self, id: &str) -> bool {
        self.alerts.remove(id).is_some()
    }

    /// Full replace of an existing alert; returns false (and leaves the
    /// registry untouched) when the id is unknown
    pub fn update(&mut self, alert: PriceAlert) -> bool {
        if !self.alerts.contains_key(&alert.id) {
            return false;
        }
        let mut alert = alert;
        alert.symbol = normalize_symbol(&alert.symbol);
        self.alerts.insert(alert.id.clone(), alert);
        true
    }

    pub fn get(&self, id: &str) -> Option<&PriceAlert> {
        self.alerts.get(id)
    }

    /// All alerts, ordered by id
    pub fn list(&self) -> Vec<PriceAlert> {
        self.alerts.values().cloned().collect()
    }

    /// Alerts registered for a symbol, ordered by id
    pub fn list_for_symbol(&self, symbol: &str) -> Vec<PriceAlert> {
        let symbol = normalize_symbol(symbol);
        self.alerts
            .values()
            .filter(|alert| alert.symbol == symbol)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

/// Notification handed to the OS delivery collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub payload: AlertPayload,
}

/// The quote and alert that produced a notification
#[derive(Debug, Clone, PartialEq)]
pub struct AlertPayload {
    pub quote: Quote,
    pub alert: PriceAlert,
}

impl NotificationRequest {
    fn price_alert(quote: &Quote, alert: &PriceAlert) -> Self {
        let direction = if alert.is_above { "above" } else { "below" };
        Self {
            title: format!("{} Price Alert!", quote.symbol),
            body: format!(
                "{} is now {} ${:.2} at ${:.2}",
                quote.symbol, direction, alert.target_price, quote.price
            ),
            payload: AlertPayload {
                quote: quote.clone(),
                alert: alert.clone(),
            },
        }
    }
}

/// Evaluates quotes against the alert registry and emits notification
/// requests on threshold crossings
#[derive(Debug, Default)]
pub struct AlertEvaluator {
    registry: AlertRegistry,
    policy: FirePolicy,
    /// Per-alert: whether the condition held on the previous evaluation;
    /// only consulted under [`FirePolicy::OnCrossing`]
    satisfied: HashMap<String, bool>,
}

impl AlertEvaluator {
    pub fn new(policy: FirePolicy) -> Self {
        Self {
            registry: AlertRegistry::new(),
            policy,
            satisfied: HashMap::new(),
        }
    }

    pub fn policy(&self) -> FirePolicy {
        self.policy
    }

    pub fn add_alert(&mut self, alert: PriceAlert) -> Result<()> {
        self.registry.add(alert)
    }

    pub fn remove_alert(&mut self, id: &str) -> bool {
        self.satisfied.remove(id);
        self.registry.remove(id)
    }

    /// Full replace; a successful update re-arms the alert
    pub fn update_alert(&mut self, alert: PriceAlert) -> bool {
        let updated = self.registry.update(alert.clone());
        if updated {
            self.satisfied.remove(&alert.id);
        }
        updated
    }

    pub fn alerts(&self) -> Vec<PriceAlert> {
        self.registry.list()
    }

    pub fn alerts_for_symbol(&self, symbol: &str) -> Vec<PriceAlert> {
        self.registry.list_for_symbol(symbol)
    }

    /// Check a quote against all active alerts for its symbol.
    ///
    /// Under [`FirePolicy::EveryTick`] evaluation is stateless per call, so
    /// a price oscillating around the threshold notifies on every
    /// qualifying tick.
    pub fn check_price_alerts(&mut self, quote: &Quote) -> Vec<NotificationRequest> {
        let mut requests = Vec::new();

        for alert in self.registry.list_for_symbol(&quote.symbol) {
            if !alert.is_active {
                continue;
            }

            let crossed = if alert.is_above {
                quote.price > alert.target_price
            } else {
                quote.price < alert.target_price
            };

            let fire = match self.policy {
                FirePolicy::EveryTick => crossed,
                FirePolicy::OnCrossing => {
                    let previously = self.satisfied.get(&alert.id).copied().unwrap_or(false);
                    crossed && !previously
                }
            };
            self.satisfied.insert(alert.id.clone(), crossed);

            if fire {
                debug!(
                    "Alert {} fired for {} at {:.2}",
                    alert.id, quote.symbol, quote.price
                );
                requests.push(NotificationRequest::price_alert(quote, &alert));
            }
        }

        requests
    }
}
