//! Risk evaluation.
//!
//! - Liquidation price, distance and PnL calculations
//! - Pluggable position estimators (real account feed or synthetic ladder)
//! - Per-cycle risk factor analysis of market snapshots and positions

mod analyzer;
mod estimator;
mod liquidation;

pub use analyzer::{RiskAnalyzer, RiskSignal};
pub use estimator::{AccountPositionEstimator, PositionEstimator, SyntheticPositionEstimator};
pub use liquidation::{
    distance_to_liquidation_pct, liquidation_price, pnl, Position, RiskLevel, Side,
    DEFAULT_MAINTENANCE_MARGIN_RATE, MIN_DISTANCE_PCT, UNBOUNDED_DISTANCE,
};
