//! REST polling of market snapshots and the recent-trade tape.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::gate::TradeGate;
use super::normalize::{trade_from_value, MarketSnapshot, Trade};
use crate::exchange::{ExchangeError, InfoClient, UniverseEntry};

/// Result of one snapshot poll.
#[derive(Debug, Clone, Default)]
pub struct SnapshotPoll {
    /// Snapshots for the monitored assets found in the response, in request order
    pub snapshots: Vec<MarketSnapshot>,
    /// Monitored assets absent from the response
    pub missing: Vec<String>,
    /// Universe as returned with the contexts
    pub universe: Vec<UniverseEntry>,
}

/// Polls `metaAndAssetCtxs` and keeps the monitored assets.
pub struct SnapshotPoller {
    client: InfoClient,
    assets: Vec<String>,
}

impl SnapshotPoller {
    pub fn new(client: InfoClient, assets: Vec<String>) -> Self {
        Self { client, assets }
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    /// One request covers every asset; a missing asset is reported, not fatal.
    pub async fn poll(&self) -> Result<SnapshotPoll, ExchangeError> {
        let (meta, ctxs) = self.client.meta_and_asset_ctxs().await?;
        let observed_at = Utc::now();

        let mut snapshots = Vec::with_capacity(self.assets.len());
        let mut missing = Vec::new();

        for asset in &self.assets {
            let found = meta
                .universe
                .iter()
                .position(|u| u.name.eq_ignore_ascii_case(asset));

            match found.and_then(|idx| ctxs.get(idx).map(|ctx| (idx, ctx))) {
                Some((idx, ctx)) => {
                    snapshots.push(MarketSnapshot::from_ctx(&meta.universe[idx].name, ctx, observed_at))
                }
                None => {
                    warn!(asset = %asset, "Asset missing from market contexts, skipping this cycle");
                    missing.push(asset.clone());
                }
            }
        }

        debug!(snapshots = snapshots.len(), missing = missing.len(), "Polled market snapshots");

        Ok(SnapshotPoll {
            snapshots,
            missing,
            universe: meta.universe,
        })
    }
}

/// Result of one pass over the liquidation tape.
#[derive(Debug, Clone, Default)]
pub struct TapePoll {
    /// New liquidation trades, in time order per asset
    pub trades: Vec<Trade>,
    /// Assets whose poll failed this cycle
    pub failed: Vec<String>,
    /// Trades dropped because they could not be normalized
    pub malformed: usize,
}

/// Polls `recentTrades` per asset and yields liquidations not seen before.
///
/// The first page per asset only primes the watermark so history already on
/// the exchange is not reported as new.
pub struct LiquidationTapePoller {
    client: InfoClient,
    assets: Vec<String>,
    gate: TradeGate,
}

impl LiquidationTapePoller {
    pub fn new(client: InfoClient, assets: Vec<String>, dedup_capacity: usize) -> Self {
        Self {
            client,
            assets,
            gate: TradeGate::new(dedup_capacity),
        }
    }

    /// Poll every asset sequentially; failures are per asset.
    pub async fn poll(&mut self) -> TapePoll {
        let mut result = TapePoll::default();

        for asset in self.assets.clone() {
            match self.poll_asset(&asset, &mut result.malformed).await {
                Ok(trades) => result.trades.extend(trades),
                Err(e) => {
                    warn!(asset = %asset, error = %e, kind = e.kind(), "Trade tape poll failed");
                    result.failed.push(asset);
                }
            }
        }

        result
    }

    async fn poll_asset(&mut self, asset: &str, malformed: &mut usize) -> Result<Vec<Trade>, ExchangeError> {
        let page = self.client.recent_trades(asset).await?;

        let mut trades = Vec::with_capacity(page.len());
        for value in page {
            match trade_from_value(value) {
                Ok(trade) => trades.push(trade),
                Err(e) => {
                    *malformed += 1;
                    debug!(asset = %asset, error = %e, "Dropping malformed trade");
                }
            }
        }

        if !self.gate.is_primed(asset) {
            let newest = trades.iter().map(|t| t.timestamp_ms).max().unwrap_or(0);
            self.gate.prime(asset, newest);
            info!(asset = %asset, watermark = newest, "Trade tape primed");
            return Ok(Vec::new());
        }

        let liquidations: Vec<Trade> = trades.into_iter().filter(|t| t.is_liquidation).collect();
        let (accepted, _) = self.gate.admit_batch(liquidations);
        Ok(accepted)
    }
}
