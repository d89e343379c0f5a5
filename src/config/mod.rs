//! Configuration management for the risk monitor.
//!
//! Loads settings from environment variables and config files. Every
//! component receives the section it needs at construction time.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange endpoints and network behaviour
    #[serde(default)]
    pub api: ApiConfig,
    /// Monitored assets and loop cadence
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Risk analysis thresholds
    #[serde(default)]
    pub risk: RiskConfig,
    /// Alert gating and trade-size thresholds
    #[serde(default)]
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// REST base URL (the `/info` endpoint is appended)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// WebSocket endpoint for the trade feed
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// TCP/TLS connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Total request/response timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Attempts per request before a terminal transport error
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on every further attempt
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// Idle interval after which the socket is pinged
    #[serde(default = "default_ws_heartbeat")]
    pub ws_heartbeat_secs: u64,
    /// Grace delay after closing so in-flight cleanup can finish
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Coins to monitor (e.g., "BTC", "ETH")
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
    /// Seconds between market snapshot polls
    #[serde(default = "default_risk_poll_interval")]
    pub risk_poll_interval_secs: u64,
    /// Seconds between recent-trade polls for the liquidation tape
    #[serde(default = "default_liquidation_poll_interval")]
    pub liquidation_poll_interval_secs: u64,
    /// Fixed delay between WebSocket reconnect attempts
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Reconnect attempts before the stream gives up (0 = unlimited)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Remembered trade keys for de-duplication
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Snapshots kept per asset for trend detection
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maintenance margin rate used by the liquidation formula
    #[serde(default = "default_maintenance_margin_rate")]
    pub maintenance_margin_rate: Decimal,
    /// Report large positions within this many percent of liquidation
    #[serde(default = "default_liquidation_buffer_pct")]
    pub liquidation_buffer_pct: Decimal,
    /// Markets with less open interest (USD) are ignored
    #[serde(default = "default_min_open_interest_usd")]
    pub min_open_interest_usd: Decimal,
    /// Relative OI change between polls that raises a factor (0.15 = 15%)
    #[serde(default = "default_oi_change_threshold")]
    pub oi_change_threshold: Decimal,
    /// Relative OI change above which the factor is HIGH
    #[serde(default = "default_oi_change_high_threshold")]
    pub oi_change_high_threshold: Decimal,
    /// Representative large position as a fraction of OI
    #[serde(default = "default_large_position_fraction")]
    pub large_position_fraction: Decimal,
    /// Minimum representative position notional to analyse
    #[serde(default = "default_min_large_position_usd")]
    pub min_large_position_usd: Decimal,
    /// Only assets allowing at least this leverage are analysed for liquidation
    #[serde(default = "default_margin_risk_leverage")]
    pub margin_risk_leverage: u32,
    /// Absolute funding rate that raises a MEDIUM funding factor
    #[serde(default = "default_funding_medium_threshold")]
    pub funding_medium_threshold: Decimal,
    /// Absolute funding rate that raises a HIGH funding factor
    #[serde(default = "default_funding_high_threshold")]
    pub funding_high_threshold: Decimal,
    /// Which position estimator feeds the pipeline
    #[serde(default)]
    pub estimator: EstimatorKind,
    /// Account whose open positions the account estimator reads
    #[serde(default)]
    pub account_address: Option<String>,
}

/// Position source selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    /// Deterministic ladder derived from open interest
    #[default]
    Synthetic,
    /// Real positions of one account
    Account,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Consecutive qualifying cycles before an alert fires
    #[serde(default = "default_consecutive_count")]
    pub consecutive_count: u32,
    /// Minimum liquidation notional (USD) worth reporting
    #[serde(default = "default_liquidation_threshold_usd")]
    pub liquidation_threshold_usd: Decimal,
    /// Minimum trade notional (USD) worth reporting
    #[serde(default = "default_large_trade_threshold_usd")]
    pub large_trade_threshold_usd: Decimal,
}

// Default value functions
fn default_base_url() -> String {
    "https://api.hyperliquid.xyz".to_string()
}

fn default_ws_url() -> String {
    "wss://api.hyperliquid.xyz/ws".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    500 // 0.5s, 1s, 2s ...
}

fn default_ws_heartbeat() -> u64 {
    20
}

fn default_shutdown_grace() -> u64 {
    250
}

fn default_assets() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()]
}

fn default_risk_poll_interval() -> u64 {
    10
}

fn default_liquidation_poll_interval() -> u64 {
    2
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_dedup_capacity() -> usize {
    5_000
}

fn default_history_capacity() -> usize {
    10
}

fn default_maintenance_margin_rate() -> Decimal {
    Decimal::new(4, 3) // 0.004
}

fn default_liquidation_buffer_pct() -> Decimal {
    Decimal::new(5, 0) // 5%
}

fn default_min_open_interest_usd() -> Decimal {
    Decimal::new(1_000_000, 0)
}

fn default_oi_change_threshold() -> Decimal {
    Decimal::new(15, 2) // 0.15
}

fn default_oi_change_high_threshold() -> Decimal {
    Decimal::new(25, 2) // 0.25
}

fn default_large_position_fraction() -> Decimal {
    Decimal::new(5, 2) // 5% of OI
}

fn default_min_large_position_usd() -> Decimal {
    Decimal::new(100_000, 0)
}

fn default_margin_risk_leverage() -> u32 {
    15
}

fn default_funding_medium_threshold() -> Decimal {
    Decimal::new(1, 4) // 0.01%
}

fn default_funding_high_threshold() -> Decimal {
    Decimal::new(1, 3) // 0.1%
}

fn default_consecutive_count() -> u32 {
    2
}

fn default_liquidation_threshold_usd() -> Decimal {
    Decimal::new(50_000, 0)
}

fn default_large_trade_threshold_usd() -> Decimal {
    Decimal::new(100_000, 0)
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("PRM")
                    .list_separator(",")
                    .with_list_parse_key("monitor.assets")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.monitor.assets.is_empty(),
            "at least one monitored asset is required"
        );

        anyhow::ensure!(
            self.monitor
                .assets
                .iter()
                .all(|a| !a.trim().is_empty() && a.chars().all(|c| c.is_ascii_alphanumeric())),
            "asset symbols must be non-empty alphanumeric tickers"
        );

        anyhow::ensure!(
            self.api.max_retries >= 1,
            "max_retries must be at least 1"
        );

        anyhow::ensure!(
            self.api.connect_timeout_secs >= 1
                && self.api.connect_timeout_secs <= self.api.request_timeout_secs,
            "connect_timeout_secs must be >= 1 and <= request_timeout_secs"
        );

        anyhow::ensure!(
            self.risk.maintenance_margin_rate > Decimal::ZERO
                && self.risk.maintenance_margin_rate < Decimal::ONE,
            "maintenance_margin_rate must be between 0 and 1"
        );

        anyhow::ensure!(
            self.risk.oi_change_threshold <= self.risk.oi_change_high_threshold,
            "oi_change_threshold must not exceed oi_change_high_threshold"
        );

        anyhow::ensure!(
            self.alerts.consecutive_count >= 1,
            "consecutive_count must be at least 1"
        );

        anyhow::ensure!(
            self.monitor.dedup_capacity >= 1 && self.monitor.history_capacity >= 3,
            "dedup_capacity must be >= 1 and history_capacity >= 3"
        );

        if self.risk.estimator == EstimatorKind::Account {
            anyhow::ensure!(
                self.risk
                    .account_address
                    .as_deref()
                    .is_some_and(|a| a.starts_with("0x") && a.len() == 42),
                "account estimator requires a 0x-prefixed 20-byte account_address"
            );
        }

        Ok(())
    }

    /// Normalise asset tickers to upper case.
    pub fn normalized_assets(&self) -> Vec<String> {
        self.monitor
            .assets
            .iter()
            .map(|a| a.trim().to_uppercase())
            .collect()
    }
}

impl ApiConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn ws_heartbeat(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            monitor: MonitorConfig::default(),
            risk: RiskConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: default_ws_url(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            ws_heartbeat_secs: default_ws_heartbeat(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            assets: default_assets(),
            risk_poll_interval_secs: default_risk_poll_interval(),
            liquidation_poll_interval_secs: default_liquidation_poll_interval(),
            reconnect_delay_secs: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            dedup_capacity: default_dedup_capacity(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            maintenance_margin_rate: default_maintenance_margin_rate(),
            liquidation_buffer_pct: default_liquidation_buffer_pct(),
            min_open_interest_usd: default_min_open_interest_usd(),
            oi_change_threshold: default_oi_change_threshold(),
            oi_change_high_threshold: default_oi_change_high_threshold(),
            large_position_fraction: default_large_position_fraction(),
            min_large_position_usd: default_min_large_position_usd(),
            margin_risk_leverage: default_margin_risk_leverage(),
            funding_medium_threshold: default_funding_medium_threshold(),
            funding_high_threshold: default_funding_high_threshold(),
            estimator: EstimatorKind::default(),
            account_address: None,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            consecutive_count: default_consecutive_count(),
            liquidation_threshold_usd: default_liquidation_threshold_usd(),
            large_trade_threshold_usd: default_large_trade_threshold_usd(),
        }
    }
}
