//! Session statistics for fired alerts and qualifying trades.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

use super::sink::Alert;
use crate::risk::Side;
use crate::utils::{format_usd, safe_div};

/// Count and notional of one breakdown bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct VolumeBucket {
    pub count: u64,
    pub notional: Decimal,
}

impl VolumeBucket {
    fn add(&mut self, count: u64, notional: Decimal) {
        self.count += count;
        self.notional += notional;
    }
}

/// Monotonically accumulating counters.
///
/// Each cycle builds a fresh delta and merges it into the session totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub started_at: DateTime<Utc>,
    pub total_events: u64,
    pub total_notional: Decimal,
    pub by_asset: HashMap<String, VolumeBucket>,
    pub by_side: HashMap<Side, VolumeBucket>,
}

/// Snapshot of a session for end-of-run reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub duration_secs: i64,
    pub total_events: u64,
    pub total_notional: Decimal,
    pub average_notional: Decimal,
    /// Sorted by notional, largest first
    pub assets: Vec<(String, VolumeBucket)>,
    /// Sorted by notional, largest first
    pub sides: Vec<(Side, VolumeBucket)>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            total_events: 0,
            total_notional: Decimal::ZERO,
            by_asset: HashMap::new(),
            by_side: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_events == 0
    }

    /// Count one event.
    pub fn record(&mut self, asset: &str, side: Option<Side>, notional: Decimal) {
        self.total_events += 1;
        self.total_notional += notional;
        self.by_asset
            .entry(asset.to_string())
            .or_default()
            .add(1, notional);
        if let Some(side) = side {
            self.by_side.entry(side).or_default().add(1, notional);
        }
    }

    pub fn record_alert(&mut self, alert: &Alert) {
        self.record(&alert.asset, alert.side(), alert.notional.unwrap_or_default());
    }

    /// Fold a cycle delta into these totals.
    pub fn merge(&mut self, delta: &SessionStats) {
        self.total_events += delta.total_events;
        self.total_notional += delta.total_notional;
        for (asset, bucket) in &delta.by_asset {
            self.by_asset
                .entry(asset.clone())
                .or_default()
                .add(bucket.count, bucket.notional);
        }
        for (side, bucket) in &delta.by_side {
            self.by_side
                .entry(*side)
                .or_default()
                .add(bucket.count, bucket.notional);
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let mut assets: Vec<(String, VolumeBucket)> = self
            .by_asset
            .iter()
            .map(|(asset, bucket)| (asset.clone(), *bucket))
            .collect();
        assets.sort_by(|a, b| b.1.notional.cmp(&a.1.notional).then_with(|| a.0.cmp(&b.0)));

        let mut sides: Vec<(Side, VolumeBucket)> =
            self.by_side.iter().map(|(side, bucket)| (*side, *bucket)).collect();
        sides.sort_by(|a, b| b.1.notional.cmp(&a.1.notional));

        SessionSummary {
            duration_secs: (Utc::now() - self.started_at).num_seconds(),
            total_events: self.total_events,
            total_notional: self.total_notional,
            average_notional: safe_div(self.total_notional, Decimal::from(self.total_events)),
            assets,
            sides,
        }
    }

    /// Log the session summary at INFO.
    pub fn log_summary(&self, label: &str) {
        let summary = self.summary();

        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("📊 {} session summary ({}s)", label, summary.duration_secs);
        info!(
            "   Events: {} | Volume: {} | Average: {}",
            summary.total_events,
            format_usd(summary.total_notional),
            format_usd(summary.average_notional)
        );

        for (asset, bucket) in &summary.assets {
            info!(
                "   {:<8} {:>5} events  {:>10}",
                asset,
                bucket.count,
                format_usd(bucket.notional)
            );
        }

        for (side, bucket) in &summary.sides {
            info!(
                "   {:<8} {:>5} events  {:>10}",
                side.as_str(),
                bucket.count,
                format_usd(bucket.notional)
            );
        }
    }
}
