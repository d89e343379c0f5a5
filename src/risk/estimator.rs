//! Position estimators.
//!
//! The exchange exposes no market-wide position feed, so the pipeline takes
//! its positions from a pluggable [`PositionEstimator`]: either the real open
//! positions of one account, or a deterministic synthetic ladder derived from
//! open interest.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, instrument};

use super::liquidation::{Position, Side};
use crate::exchange::{ExchangeError, InfoClient, MarketMetadata};
use crate::ingest::MarketSnapshot;

/// Source of position estimates for one cycle.
#[async_trait]
pub trait PositionEstimator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether the positions are simulated rather than observed.
    fn is_simulated(&self) -> bool;

    /// Positions for the given snapshots, sorted by distance to liquidation.
    async fn estimate(
        &self,
        snapshots: &[MarketSnapshot],
        metadata: &MarketMetadata,
    ) -> Result<Vec<Position>, ExchangeError>;
}

fn sort_by_distance(positions: &mut [Position]) {
    positions.sort_by(|a, b| a.distance_to_liquidation_pct.cmp(&b.distance_to_liquidation_pct));
}

/// Deterministic ladder of hypothetical positions over each asset's OI.
///
/// Level `i` of ten:
/// - first 30%: 2% of OI at `15 + 2i`x
/// - next 30%: 1% of OI at `10 + i`x
/// - last 40%: 0.5% of OI at `5 + i/2`x
///
/// Sides alternate starting with LONG; entries sit `0.1%·(1 − i/10)` on the
/// losing side of mark. Leverage is capped by the asset's margin tier.
#[derive(Debug, Clone)]
pub struct SyntheticPositionEstimator {
    maintenance_margin_rate: Decimal,
    /// Positions further than this from liquidation are omitted (percent)
    max_distance_pct: Decimal,
}

const LADDER_LEVELS: u32 = 10;

impl SyntheticPositionEstimator {
    pub fn new(maintenance_margin_rate: Decimal) -> Self {
        Self {
            maintenance_margin_rate,
            max_distance_pct: dec!(50),
        }
    }

    /// Ladder for one snapshot.
    pub fn ladder(&self, snapshot: &MarketSnapshot, metadata: &MarketMetadata) -> Vec<Position> {
        if !snapshot.is_valid() {
            return Vec::new();
        }

        let price = snapshot.mark_price;
        let oi_usd = snapshot.open_interest_usd();
        let levels = Decimal::from(LADDER_LEVELS);
        let mut positions = Vec::with_capacity(LADDER_LEVELS as usize);

        for i in 0..LADDER_LEVELS {
            let idx = Decimal::from(i);
            let (fraction, leverage) = match i {
                0..=2 => (dec!(0.02), dec!(15) + idx * dec!(2)),
                3..=5 => (dec!(0.01), dec!(10) + idx),
                _ => (dec!(0.005), dec!(5) + idx * dec!(0.5)),
            };

            let notional = oi_usd * fraction;
            let leverage = match metadata.max_leverage_for(&snapshot.asset, notional) {
                Some(cap) => leverage.min(Decimal::from(cap)),
                None => leverage,
            };

            let side = if i % 2 == 0 { Side::Long } else { Side::Short };
            let offset = dec!(0.001) * (Decimal::ONE - idx / levels);
            let entry = match side {
                Side::Long => price * (Decimal::ONE - offset),
                Side::Short => price * (Decimal::ONE + offset),
            };

            let position = Position::evaluate(
                &snapshot.asset,
                side,
                notional / price,
                entry,
                leverage,
                price,
                self.maintenance_margin_rate,
            );

            if position.distance_to_liquidation_pct <= self.max_distance_pct {
                positions.push(position);
            }
        }

        positions
    }
}

#[async_trait]
impl PositionEstimator for SyntheticPositionEstimator {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn is_simulated(&self) -> bool {
        true
    }

    async fn estimate(
        &self,
        snapshots: &[MarketSnapshot],
        metadata: &MarketMetadata,
    ) -> Result<Vec<Position>, ExchangeError> {
        let mut positions: Vec<Position> = snapshots
            .iter()
            .flat_map(|s| self.ladder(s, metadata))
            .collect();
        sort_by_distance(&mut positions);
        Ok(positions)
    }
}

/// Open positions of one account, priced at the current mark.
pub struct AccountPositionEstimator {
    client: InfoClient,
    address: String,
    maintenance_margin_rate: Decimal,
}

impl AccountPositionEstimator {
    pub fn new(client: InfoClient, address: String, maintenance_margin_rate: Decimal) -> Self {
        Self {
            client,
            address,
            maintenance_margin_rate,
        }
    }
}

#[async_trait]
impl PositionEstimator for AccountPositionEstimator {
    fn name(&self) -> &'static str {
        "account"
    }

    fn is_simulated(&self) -> bool {
        false
    }

    #[instrument(skip_all, fields(estimator = "account"))]
    async fn estimate(
        &self,
        snapshots: &[MarketSnapshot],
        _metadata: &MarketMetadata,
    ) -> Result<Vec<Position>, ExchangeError> {
        let state = self.client.clearinghouse_state(&self.address).await?;
        let mut positions = Vec::new();

        for entry in state.asset_positions {
            let raw = entry.position;
            let Some(snapshot) = snapshots
                .iter()
                .find(|s| s.asset.eq_ignore_ascii_case(&raw.coin))
            else {
                continue;
            };

            if raw.szi == Decimal::ZERO {
                continue;
            }

            let side = if raw.szi > Decimal::ZERO { Side::Long } else { Side::Short };
            let size = raw.szi.abs();
            let entry_price = raw.entry_px.unwrap_or(snapshot.mark_price);
            let leverage = Decimal::from(raw.leverage.value);

            let position = match raw.liquidation_px {
                Some(liq) if liq > Decimal::ZERO => Position::with_liquidation_price(
                    &snapshot.asset,
                    side,
                    size,
                    entry_price,
                    leverage,
                    liq,
                    snapshot.mark_price,
                ),
                _ => Position::evaluate(
                    &snapshot.asset,
                    side,
                    size,
                    entry_price,
                    leverage,
                    snapshot.mark_price,
                    self.maintenance_margin_rate,
                ),
            };

            positions.push(position);
        }

        debug!(positions = positions.len(), "Loaded account positions");
        sort_by_distance(&mut positions);
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ConnectionManager, ConnectionSettings, RetryPolicy, UniverseEntry};
    use crate::risk::liquidation::{RiskLevel, DEFAULT_MAINTENANCE_MARGIN_RATE};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn snapshot(asset: &str, mark: Decimal, oi: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            asset: asset.to_string(),
            mark_price: mark,
            mid_price: None,
            oracle_price: None,
            open_interest: oi,
            funding_rate: Decimal::ZERO,
            volume_24h: Decimal::ZERO,
            premium: None,
            observed_at: Utc::now(),
        }
    }

    fn metadata(max_leverage: u32) -> MarketMetadata {
        MarketMetadata::from_universe(&[UniverseEntry {
            name: "BTC".to_string(),
            sz_decimals: 5,
            max_leverage,
            only_isolated: false,
            is_delisted: false,
        }])
    }

    #[tokio::test]
    async fn test_synthetic_ladder_is_deterministic_and_sorted() {
        let estimator = SyntheticPositionEstimator::new(DEFAULT_MAINTENANCE_MARGIN_RATE);
        let snapshots = vec![snapshot("BTC", dec!(65000), dec!(1000))];

        let first = estimator.estimate(&snapshots, &metadata(40)).await.unwrap();
        let second = estimator.estimate(&snapshots, &metadata(40)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 10);
        assert!(estimator.is_simulated());
        assert!(first
            .windows(2)
            .all(|w| w[0].distance_to_liquidation_pct <= w[1].distance_to_liquidation_pct));

        // The 8x long rung sits about 2.93% above its liquidation price.
        let riskiest = &first[0];
        assert_eq!(riskiest.leverage, dec!(8));
        assert_eq!(riskiest.side, Side::Long);
        assert_eq!(riskiest.risk_level, RiskLevel::High);
        assert_eq!(riskiest.distance_to_liquidation_pct.round_dp(2), dec!(2.93));
    }

    #[test]
    fn test_ladder_sizes_and_sides() {
        let estimator = SyntheticPositionEstimator::new(DEFAULT_MAINTENANCE_MARGIN_RATE);
        let ladder = estimator.ladder(&snapshot("BTC", dec!(100), dec!(1_000_000)), &metadata(50));

        // Ladder order is preserved before sorting.
        assert_eq!(ladder[0].side, Side::Long);
        assert_eq!(ladder[1].side, Side::Short);
        assert_eq!(ladder[0].notional_at(dec!(100)), dec!(2_000_000));
        assert_eq!(ladder[4].notional_at(dec!(100)), dec!(1_000_000));
        assert_eq!(ladder[9].notional_at(dec!(100)), dec!(500_000));
        assert_eq!(ladder[9].leverage, dec!(9.5));
        assert!(ladder[0].entry_price < dec!(100));
        assert!(ladder[1].entry_price > dec!(100));
    }

    #[test]
    fn test_ladder_respects_leverage_cap_and_invalid_snapshots() {
        let estimator = SyntheticPositionEstimator::new(DEFAULT_MAINTENANCE_MARGIN_RATE);

        let capped = estimator.ladder(&snapshot("BTC", dec!(100), dec!(1000)), &metadata(10));
        assert!(capped.iter().all(|p| p.leverage <= dec!(10)));

        assert!(estimator
            .ladder(&snapshot("BTC", Decimal::ZERO, dec!(1000)), &metadata(10))
            .is_empty());
    }

    #[tokio::test]
    async fn test_account_estimator_prices_real_positions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "clearinghouseState"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "assetPositions": [
                    {"type": "oneWay", "position": {"coin": "BTC", "szi": "-0.5", "entryPx": "60000",
                      "leverage": {"type": "cross", "value": 20}, "liquidationPx": "62000"}},
                    {"type": "oneWay", "position": {"coin": "DOGE", "szi": "100", "entryPx": "0.1",
                      "leverage": {"type": "cross", "value": 5}, "liquidationPx": null}}
                ]
            })))
            .mount(&server)
            .await;

        let client = InfoClient::new(Arc::new(ConnectionManager::new(ConnectionSettings {
            base_url: server.uri(),
            ws_url: "ws://127.0.0.1:1/ws".to_string(),
            connect_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(500),
            heartbeat: Duration::from_secs(20),
            shutdown_grace: Duration::from_millis(1),
            retry: RetryPolicy::default(),
        })));
        let estimator = AccountPositionEstimator::new(
            client,
            "0x0123456789abcdef0123456789abcdef01234567".to_string(),
            DEFAULT_MAINTENANCE_MARGIN_RATE,
        );

        let positions = estimator
            .estimate(&[snapshot("BTC", dec!(61000), dec!(10))], &metadata(40))
            .await
            .unwrap();

        assert_eq!(positions.len(), 1);
        let btc = &positions[0];
        assert_eq!(btc.side, Side::Short);
        assert_eq!(btc.size_units, dec!(0.5));
        assert_eq!(btc.liquidation_price, dec!(62000));
        assert_eq!(btc.pnl_usd, dec!(-500));
        assert!(!estimator.is_simulated());
    }
}
