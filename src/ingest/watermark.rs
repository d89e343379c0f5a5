//! Per-asset monotonic timestamp filter.

use std::collections::HashMap;

/// Last processed event timestamp per asset.
///
/// An event at or before the watermark is rejected; accepted events move the
/// watermark forward and it never regresses.
#[derive(Debug, Default, Clone)]
pub struct Watermarks {
    last_processed: HashMap<String, i64>,
}

impl Watermarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `timestamp_ms` for `asset` if it is newer than the watermark.
    pub fn advance(&mut self, asset: &str, timestamp_ms: i64) -> bool {
        match self.last_processed.get_mut(asset) {
            Some(last) if timestamp_ms <= *last => false,
            Some(last) => {
                *last = timestamp_ms;
                true
            }
            None => {
                self.last_processed.insert(asset.to_string(), timestamp_ms);
                true
            }
        }
    }

    /// Move the watermark to at least `timestamp_ms` without accepting an event.
    ///
    /// Used to skip history already on the exchange when a tape is first read.
    pub fn prime(&mut self, asset: &str, timestamp_ms: i64) {
        let last = self
            .last_processed
            .entry(asset.to_string())
            .or_insert(timestamp_ms);
        *last = (*last).max(timestamp_ms);
    }

    pub fn get(&self, asset: &str) -> Option<i64> {
        self.last_processed.get(asset).copied()
    }

    pub fn is_primed(&self, asset: &str) -> bool {
        self.last_processed.contains_key(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_at_or_before_watermark() {
        let mut marks = Watermarks::new();
        assert!(marks.advance("BTC", 100));
        assert!(!marks.advance("BTC", 100));
        assert!(!marks.advance("BTC", 50));
        assert!(marks.advance("BTC", 101));
        assert_eq!(marks.get("BTC"), Some(101));
    }

    #[test]
    fn test_out_of_order_arrivals_never_regress() {
        let mut marks = Watermarks::new();
        let accepted: Vec<i64> = [5, 3, 9, 7, 9, 12, 1]
            .into_iter()
            .filter(|ts| marks.advance("ETH", *ts))
            .collect();

        assert_eq!(accepted, vec![5, 9, 12]);
        assert_eq!(marks.get("ETH"), Some(12));
    }

    #[test]
    fn test_assets_are_independent() {
        let mut marks = Watermarks::new();
        assert!(marks.advance("BTC", 100));
        assert!(marks.advance("ETH", 10));
        assert!(!marks.advance("BTC", 10));
    }

    #[test]
    fn test_prime_skips_history() {
        let mut marks = Watermarks::new();
        assert!(!marks.is_primed("SOL"));
        marks.prime("SOL", 500);
        assert!(marks.is_primed("SOL"));
        assert!(!marks.advance("SOL", 500));
        assert!(marks.advance("SOL", 501));

        marks.prime("SOL", 10);
        assert_eq!(marks.get("SOL"), Some(501));
    }
}
