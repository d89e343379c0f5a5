//! Liquidation price, distance and PnL calculations.
//!
//! Pure functions over position parameters. Percentages are expressed in
//! percent units (2.5 = 2.5%) except `pnl_pct`, which is a fraction.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::safe_div;

/// Default maintenance margin rate (0.4%).
pub const DEFAULT_MAINTENANCE_MARGIN_RATE: Decimal = dec!(0.004);

/// Distance reported when either price is unusable.
pub const UNBOUNDED_DISTANCE: Decimal = Decimal::MAX;

/// Smallest distance reported for a position that is not past liquidation.
pub const MIN_DISTANCE_PCT: Decimal = dec!(0.01);

/// Position or trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Map a feed side label. `B`, `BUY` and `LONG` are long; anything else short.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "B" | "BUY" | "LONG" => Side::Long,
            _ => Side::Short,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk band derived from distance to liquidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// `CRITICAL ≤ 2%`, `HIGH ≤ 5%`, `MEDIUM ≤ 10%`, else `LOW`.
    pub fn from_distance(distance_pct: Decimal) -> Self {
        if distance_pct <= dec!(2) {
            RiskLevel::Critical
        } else if distance_pct <= dec!(5) {
            RiskLevel::High
        } else if distance_pct <= dec!(10) {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Whether this level counts towards an alert.
    pub fn is_alerting(&self) -> bool {
        *self >= RiskLevel::High
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liquidation price of a position.
///
/// - LONG: `entry × (1 − mmr·lev) / (1 − mmr)`
/// - SHORT: `entry × (1 + mmr·lev) / (1 + mmr)`
///
/// Returns zero when leverage, entry price or size is not positive.
pub fn liquidation_price(
    entry_price: Decimal,
    leverage: Decimal,
    size: Decimal,
    side: Side,
    maintenance_margin_rate: Decimal,
) -> Decimal {
    if leverage <= Decimal::ZERO || entry_price <= Decimal::ZERO || size <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let mmr = maintenance_margin_rate;
    match side {
        Side::Long => safe_div(entry_price * (Decimal::ONE - mmr * leverage), Decimal::ONE - mmr),
        Side::Short => safe_div(entry_price * (Decimal::ONE + mmr * leverage), Decimal::ONE + mmr),
    }
}

/// Percentage buffer left before `liquidation_price` is reached.
///
/// LONG measures against the liquidation price, SHORT against the current
/// price. Never negative; a position at (or within rounding of) its
/// liquidation price reports [`MIN_DISTANCE_PCT`]. Returns
/// [`UNBOUNDED_DISTANCE`] when either price is not positive.
pub fn distance_to_liquidation_pct(
    current_price: Decimal,
    liquidation_price: Decimal,
    side: Side,
) -> Decimal {
    if current_price <= Decimal::ZERO || liquidation_price <= Decimal::ZERO {
        return UNBOUNDED_DISTANCE;
    }

    let raw = match side {
        Side::Long => (current_price - liquidation_price) / liquidation_price,
        Side::Short => (liquidation_price - current_price) / current_price,
    } * dec!(100);

    if raw < Decimal::ZERO {
        Decimal::ZERO
    } else {
        raw.max(MIN_DISTANCE_PCT)
    }
}

/// `(pnl_usd, pnl_pct)`; positive means profit for `side`.
pub fn pnl(entry_price: Decimal, current_price: Decimal, size: Decimal, side: Side) -> (Decimal, Decimal) {
    let move_per_unit = match side {
        Side::Long => current_price - entry_price,
        Side::Short => entry_price - current_price,
    };

    (move_per_unit * size, safe_div(move_per_unit, entry_price))
}

/// A position with all derived risk figures filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub asset: String,
    pub side: Side,
    pub size_units: Decimal,
    pub entry_price: Decimal,
    pub leverage: Decimal,
    pub liquidation_price: Decimal,
    pub distance_to_liquidation_pct: Decimal,
    pub pnl_usd: Decimal,
    pub pnl_pct: Decimal,
    pub risk_level: RiskLevel,
}

impl Position {
    /// Derive every risk figure from the raw parameters at `current_price`.
    pub fn evaluate(
        asset: &str,
        side: Side,
        size_units: Decimal,
        entry_price: Decimal,
        leverage: Decimal,
        current_price: Decimal,
        maintenance_margin_rate: Decimal,
    ) -> Self {
        let liq = liquidation_price(entry_price, leverage, size_units, side, maintenance_margin_rate);
        Self::with_liquidation_price(asset, side, size_units, entry_price, leverage, liq, current_price)
    }

    /// Same as [`Position::evaluate`] but with a liquidation price supplied by
    /// the exchange.
    pub fn with_liquidation_price(
        asset: &str,
        side: Side,
        size_units: Decimal,
        entry_price: Decimal,
        leverage: Decimal,
        liquidation_price: Decimal,
        current_price: Decimal,
    ) -> Self {
        let distance = distance_to_liquidation_pct(current_price, liquidation_price, side);
        let (pnl_usd, pnl_pct) = pnl(entry_price, current_price, size_units, side);

        Self {
            asset: asset.to_string(),
            side,
            size_units,
            entry_price,
            leverage,
            liquidation_price,
            distance_to_liquidation_pct: distance,
            pnl_usd,
            pnl_pct,
            risk_level: RiskLevel::from_distance(distance),
        }
    }

    pub fn notional_at(&self, price: Decimal) -> Decimal {
        self.size_units * price
    }
}
