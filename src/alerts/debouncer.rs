//! Consecutive-count alert gating.
//!
//! A `(asset, kind)` condition must hold at HIGH or CRITICAL for
//! `threshold` consecutive cycles before it fires. Firing resets the count,
//! and so does any cycle where the condition is absent or below alert level.

use std::collections::HashMap;
use tracing::debug;

use super::sink::AlertKind;
use crate::risk::{RiskLevel, RiskSignal};

type AlertKey = (String, AlertKind);

#[derive(Debug)]
pub struct AlertDebouncer {
    threshold: u32,
    counters: HashMap<AlertKey, u32>,
}

impl AlertDebouncer {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            counters: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record one observation of a condition. Returns true when it fires.
    pub fn observe(&mut self, asset: &str, kind: AlertKind, level: RiskLevel) -> bool {
        let key = (asset.to_string(), kind);

        if !level.is_alerting() {
            self.counters.remove(&key);
            return false;
        }

        let count = self.counters.entry(key).or_insert(0);
        *count += 1;

        if *count >= self.threshold {
            *count = 0;
            true
        } else {
            false
        }
    }

    /// Run one full cycle: every condition not present in `signals` resets,
    /// and the signals that fire are returned in input order.
    ///
    /// A key appearing more than once in a cycle is counted once.
    pub fn cycle(&mut self, signals: Vec<RiskSignal>) -> Vec<RiskSignal> {
        let mut seen: Vec<AlertKey> = Vec::with_capacity(signals.len());
        let mut fired = Vec::new();

        for signal in signals {
            let key = (signal.asset.clone(), signal.kind);
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);

            if self.observe(&signal.asset, signal.kind, signal.level) {
                fired.push(signal);
            }
        }

        let before = self.counters.len();
        self.counters.retain(|key, _| seen.contains(key));
        if self.counters.len() < before {
            debug!(cleared = before - self.counters.len(), "Conditions cleared this cycle");
        }

        fired
    }

    /// Current consecutive count for a condition.
    pub fn count(&self, asset: &str, kind: AlertKind) -> u32 {
        self.counters
            .get(&(asset.to_string(), kind))
            .copied()
            .unwrap_or(0)
    }
}
