//! Alert records and the sink they are delivered to.
//!
//! Alerts are emitted as structured JSON on the `risk_alert` target so log
//! analysis can pick them out:
//! ```text
//! RISK_ALERT: {"alert_id":"liquidation-long-BTC-1718000000000-00002a",...}
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

use crate::risk::{RiskLevel, Side};

/// What an alert is about. Side-bearing kinds debounce per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "side", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    /// Open interest moved sharply between polls
    OiChange,
    /// Funding rate far from neutral
    FundingPressure,
    /// A representative large position at max leverage is near liquidation
    LiquidationRisk(Side),
    /// An estimated position is HIGH or CRITICAL
    PositionAtRisk(Side),
    /// A liquidation printed on the trade tape (side that was liquidated)
    Liquidation(Side),
    /// A large trade on the feed (aggressor side)
    LargeTrade(Side),
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::OiChange => "OI_CHANGE",
            AlertKind::FundingPressure => "FUNDING_PRESSURE",
            AlertKind::LiquidationRisk(_) => "LIQUIDATION_RISK",
            AlertKind::PositionAtRisk(_) => "POSITION_AT_RISK",
            AlertKind::Liquidation(_) => "LIQUIDATION",
            AlertKind::LargeTrade(_) => "LARGE_TRADE",
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            AlertKind::OiChange | AlertKind::FundingPressure => None,
            AlertKind::LiquidationRisk(side)
            | AlertKind::PositionAtRisk(side)
            | AlertKind::Liquidation(side)
            | AlertKind::LargeTrade(side) => Some(*side),
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.side() {
            Some(side) => write!(f, "{}:{}", self.as_str(), side),
            None => f.write_str(self.as_str()),
        }
    }
}

/// Severity levels for alerts.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    /// Get display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Error => "ERROR",
            AlertSeverity::Critical => "CRITICAL",
        }
    }
}

impl From<RiskLevel> for AlertSeverity {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => AlertSeverity::Info,
            RiskLevel::Medium => AlertSeverity::Warning,
            RiskLevel::High => AlertSeverity::Error,
            RiskLevel::Critical => AlertSeverity::Critical,
        }
    }
}

/// A fired alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub kind: AlertKind,
    pub level: RiskLevel,
    pub severity: AlertSeverity,
    pub message: String,
    /// USD value behind the alert, when it has one
    pub notional: Option<Decimal>,
}

/// Per-process alert counter; keeps IDs unique within one millisecond.
static ALERT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl Alert {
    pub fn new(asset: &str, kind: AlertKind, level: RiskLevel, message: String) -> Self {
        let timestamp = Utc::now();
        let sequence = ALERT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let label = match kind.side() {
            Some(side) => format!("{}-{}", kind.as_str(), side),
            None => kind.as_str().to_string(),
        };
        let alert_id = format!(
            "{}-{}-{}-{:06x}",
            label.to_lowercase(),
            asset,
            timestamp.timestamp_millis(),
            sequence
        );

        Self {
            alert_id,
            timestamp,
            asset: asset.to_string(),
            kind,
            level,
            severity: level.into(),
            message,
            notional: None,
        }
    }

    pub fn with_notional(mut self, notional: Decimal) -> Self {
        self.notional = Some(notional);
        self
    }

    pub fn side(&self) -> Option<Side> {
        self.kind.side()
    }

    /// Emit alert as structured log.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();

        match self.severity {
            AlertSeverity::Info => info!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Warning => warn!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Error => error!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Critical => error!(target: "risk_alert", "RISK_ALERT: {}", json),
        }
    }
}

/// Receiver of fired alerts, injected into the monitors.
#[cfg_attr(test, mockall::automock)]
pub trait AlertSink: Send + Sync {
    fn on_alert(&self, alert: &Alert);
}

/// Writes every alert to the `risk_alert` log target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn on_alert(&self, alert: &Alert) {
        alert.emit();
    }
}
