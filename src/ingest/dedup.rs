//! Trade de-duplication.
//!
//! Remembers recently seen trade keys in a bounded set with FIFO eviction so
//! a trade re-delivered across reconnects or overlapping polls is processed
//! only once.

use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};

use crate::risk::Side;

/// Default number of remembered keys.
pub const DEFAULT_DEDUP_CAPACITY: usize = 5_000;

/// Composite identity of one trade.
///
/// `id` is the trade id when the feed provides one, else the transaction
/// hash, else empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradeKey {
    pub asset: String,
    pub id: String,
    pub timestamp_ms: i64,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// Bounded set of processed trade keys.
#[derive(Debug)]
pub struct TradeDeduplicator {
    seen: HashSet<TradeKey>,
    eviction_queue: VecDeque<TradeKey>,
    capacity: usize,
}

impl TradeDeduplicator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DEDUP_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity),
            eviction_queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn is_duplicate(&self, key: &TradeKey) -> bool {
        self.seen.contains(key)
    }

    /// Record `key`.
    ///
    /// Returns `true` if the key was new, `false` if it was already present.
    pub fn check_and_mark(&mut self, key: &TradeKey) -> bool {
        if self.seen.contains(key) {
            return false;
        }

        if self.seen.len() >= self.capacity {
            if let Some(oldest) = self.eviction_queue.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(key.clone());
        self.eviction_queue.push_back(key.clone());
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for TradeDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}
