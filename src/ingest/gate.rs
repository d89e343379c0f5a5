//! Admission of trade batches through de-duplication and the watermark.

use tracing::debug;

use super::dedup::TradeDeduplicator;
use super::normalize::Trade;
use super::watermark::Watermarks;

/// Why a trade was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Duplicate,
    Stale,
}

/// Counters for one admitted batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub accepted: usize,
    pub duplicates: usize,
    pub stale: usize,
}

/// Dedup set plus per-asset watermark, owned by exactly one ingest loop.
#[derive(Debug)]
pub struct TradeGate {
    dedup: TradeDeduplicator,
    watermarks: Watermarks,
}

impl TradeGate {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            dedup: TradeDeduplicator::with_capacity(dedup_capacity),
            watermarks: Watermarks::new(),
        }
    }

    /// Filter one delivered batch, preserving per-asset time order.
    ///
    /// The watermark is read once per asset before the batch and advanced to
    /// the newest accepted timestamp afterwards, so trades sharing a
    /// millisecond within one delivery are all kept while anything at or
    /// before a previously processed delivery is dropped.
    pub fn admit_batch(&mut self, mut trades: Vec<Trade>) -> (Vec<Trade>, BatchOutcome) {
        trades.sort_by_key(|t| t.timestamp_ms);

        let mut outcome = BatchOutcome::default();
        let mut floors: Vec<(String, Option<i64>)> = Vec::new();
        let mut accepted = Vec::with_capacity(trades.len());

        for trade in trades {
            let floor = match floors.iter().find(|(asset, _)| *asset == trade.asset) {
                Some((_, floor)) => *floor,
                None => {
                    let floor = self.watermarks.get(&trade.asset);
                    floors.push((trade.asset.clone(), floor));
                    floor
                }
            };

            match self.check(&trade, floor) {
                Ok(()) => {
                    outcome.accepted += 1;
                    accepted.push(trade);
                }
                Err(Rejection::Duplicate) => outcome.duplicates += 1,
                Err(Rejection::Stale) => outcome.stale += 1,
            }
        }

        for trade in &accepted {
            self.watermarks.advance(&trade.asset, trade.timestamp_ms);
        }

        if outcome.duplicates + outcome.stale > 0 {
            debug!(
                accepted = outcome.accepted,
                duplicates = outcome.duplicates,
                stale = outcome.stale,
                "Dropped re-delivered trades"
            );
        }

        (accepted, outcome)
    }

    fn check(&mut self, trade: &Trade, floor: Option<i64>) -> Result<(), Rejection> {
        if floor.is_some_and(|floor| trade.timestamp_ms <= floor) {
            return Err(Rejection::Stale);
        }
        if !self.dedup.check_and_mark(&trade.key) {
            return Err(Rejection::Duplicate);
        }
        Ok(())
    }

    /// Skip everything up to `timestamp_ms` for `asset` without processing it.
    pub fn prime(&mut self, asset: &str, timestamp_ms: i64) {
        self.watermarks.prime(asset, timestamp_ms);
    }

    pub fn is_primed(&self, asset: &str) -> bool {
        self.watermarks.is_primed(asset)
    }

    pub fn watermark(&self, asset: &str) -> Option<i64> {
        self.watermarks.get(asset)
    }

    pub fn remembered(&self) -> usize {
        self.dedup.len()
    }
}
