//! Per-cycle risk factor analysis.
//!
//! Turns market snapshots and estimated positions into [`RiskSignal`]s. The
//! analyzer only describes conditions; the debouncer decides what fires.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use super::liquidation::{distance_to_liquidation_pct, liquidation_price, Position, RiskLevel, Side};
use crate::alerts::AlertKind;
use crate::config::RiskConfig;
use crate::exchange::MarketMetadata;
use crate::ingest::MarketSnapshot;
use crate::utils::{format_usd, relative_change};

/// Samples needed before OI change is evaluated.
const MIN_OI_SAMPLES: usize = 3;

/// Liquidation distance (percent) at which a liquidation factor is CRITICAL.
const CRITICAL_DISTANCE_PCT: Decimal = dec!(2);

/// One observed risk condition for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSignal {
    pub asset: String,
    pub kind: AlertKind,
    pub level: RiskLevel,
    pub message: String,
    /// Headline figure: OI change fraction, distance percent, funding rate or notional
    pub value: Decimal,
}

/// Stateful analyzer holding a bounded OI history per asset.
#[derive(Debug)]
pub struct RiskAnalyzer {
    config: RiskConfig,
    history_capacity: usize,
    oi_history: HashMap<String, VecDeque<Decimal>>,
}

impl RiskAnalyzer {
    pub fn new(config: RiskConfig, history_capacity: usize) -> Self {
        Self {
            config,
            history_capacity: history_capacity.max(MIN_OI_SAMPLES),
            oi_history: HashMap::new(),
        }
    }

    /// Analyze every snapshot of one cycle, in order.
    pub fn analyze_all(
        &mut self,
        snapshots: &[MarketSnapshot],
        metadata: &MarketMetadata,
    ) -> Vec<RiskSignal> {
        snapshots
            .iter()
            .flat_map(|s| self.analyze(s, metadata))
            .collect()
    }

    /// Risk factors of one market.
    ///
    /// Invalid markets and markets below the minimum open interest yield
    /// nothing and leave the OI history untouched.
    pub fn analyze(&mut self, snapshot: &MarketSnapshot, metadata: &MarketMetadata) -> Vec<RiskSignal> {
        if !snapshot.is_valid() {
            debug!(asset = %snapshot.asset, "Skipping snapshot without price or open interest");
            return Vec::new();
        }

        let oi_usd = snapshot.open_interest_usd();
        if oi_usd < self.config.min_open_interest_usd {
            debug!(asset = %snapshot.asset, oi_usd = %oi_usd, "Open interest below minimum");
            return Vec::new();
        }

        let mut signals = Vec::new();

        if let Some(signal) = self.oi_change(&snapshot.asset, oi_usd) {
            signals.push(signal);
        }

        if let Some(max_leverage) = metadata.max_leverage(&snapshot.asset) {
            signals.extend(self.liquidation_risk(snapshot, oi_usd, max_leverage));
        }

        if let Some(signal) = self.funding_pressure(snapshot) {
            signals.push(signal);
        }

        signals
    }

    fn oi_change(&mut self, asset: &str, oi_usd: Decimal) -> Option<RiskSignal> {
        let history = self.oi_history.entry(asset.to_string()).or_default();
        history.push_back(oi_usd);
        while history.len() > self.history_capacity {
            history.pop_front();
        }

        if history.len() < MIN_OI_SAMPLES {
            return None;
        }

        let previous = history[history.len() - 2];
        let change = relative_change(previous, oi_usd);
        if change.abs() < self.config.oi_change_threshold {
            return None;
        }

        let level = if change.abs() > self.config.oi_change_high_threshold {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };

        Some(RiskSignal {
            asset: asset.to_string(),
            kind: AlertKind::OiChange,
            level,
            message: format!(
                "Open interest {} {:.1}% ({} -> {})",
                if change.is_sign_negative() { "fell" } else { "rose" },
                change.abs() * dec!(100),
                format_usd(previous),
                format_usd(oi_usd)
            ),
            value: change,
        })
    }

    /// A position worth `large_position_fraction` of OI, opened at mark with
    /// the asset's max leverage, checked on both sides.
    fn liquidation_risk(
        &self,
        snapshot: &MarketSnapshot,
        oi_usd: Decimal,
        max_leverage: u32,
    ) -> Vec<RiskSignal> {
        if max_leverage < self.config.margin_risk_leverage {
            return Vec::new();
        }

        let notional = oi_usd * self.config.large_position_fraction;
        if notional < self.config.min_large_position_usd {
            return Vec::new();
        }

        let price = snapshot.mark_price;
        let leverage = Decimal::from(max_leverage);
        let size = notional / price;

        [Side::Long, Side::Short]
            .into_iter()
            .filter_map(|side| {
                let liq = liquidation_price(price, leverage, size, side, self.config.maintenance_margin_rate);
                let distance = distance_to_liquidation_pct(price, liq, side);
                if distance > self.config.liquidation_buffer_pct {
                    return None;
                }

                let level = if distance <= CRITICAL_DISTANCE_PCT {
                    RiskLevel::Critical
                } else {
                    RiskLevel::High
                };

                Some(RiskSignal {
                    asset: snapshot.asset.clone(),
                    kind: AlertKind::LiquidationRisk(side),
                    level,
                    message: format!(
                        "Large {side} positions ({}) at {max_leverage}x within {distance:.1}% of liquidation at {liq:.4}",
                        format_usd(notional)
                    ),
                    value: distance,
                })
            })
            .collect()
    }

    fn funding_pressure(&self, snapshot: &MarketSnapshot) -> Option<RiskSignal> {
        let rate = snapshot.funding_rate;
        if rate.abs() <= self.config.funding_medium_threshold {
            return None;
        }

        let level = if rate.abs() > self.config.funding_high_threshold {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };

        Some(RiskSignal {
            asset: snapshot.asset.clone(),
            kind: AlertKind::FundingPressure,
            level,
            message: format!(
                "{} funding rate {:.4}%",
                if rate.is_sign_negative() { "Negative" } else { "Positive" },
                rate * dec!(100)
            ),
            value: rate,
        })
    }

    /// One signal per (asset, side) holding a HIGH or CRITICAL position,
    /// describing the riskiest of them.
    pub fn position_signals(&self, positions: &[Position]) -> Vec<RiskSignal> {
        let mut worst: Vec<(&Position, usize)> = Vec::new();

        for position in positions.iter().filter(|p| p.risk_level.is_alerting()) {
            match worst
                .iter_mut()
                .find(|(p, _)| p.asset == position.asset && p.side == position.side)
            {
                Some((current, count)) => {
                    *count += 1;
                    if position.distance_to_liquidation_pct < current.distance_to_liquidation_pct {
                        *current = position;
                    }
                }
                None => worst.push((position, 1)),
            }
        }

        worst
            .into_iter()
            .map(|(p, count)| RiskSignal {
                asset: p.asset.clone(),
                kind: AlertKind::PositionAtRisk(p.side),
                level: p.risk_level,
                message: format!(
                    "{count} {} position(s) at risk; closest {}x entry {} is {:.2}% from liquidation at {:.4}",
                    p.side,
                    p.leverage,
                    p.entry_price,
                    p.distance_to_liquidation_pct,
                    p.liquidation_price
                ),
                value: p.distance_to_liquidation_pct,
            })
            .collect()
    }

    /// OI history for `asset`, oldest first.
    pub fn oi_history(&self, asset: &str) -> Option<&VecDeque<Decimal>> {
        self.oi_history.get(asset)
    }
}
