//! Event ingestion.
//!
//! Turns REST polls and the WebSocket trade feed into clean, de-duplicated,
//! per-asset time-ordered events:
//! - `dedup`: bounded FIFO set of seen trade keys
//! - `watermark`: per-asset last-processed timestamp
//! - `gate`: both filters applied to one delivered batch
//! - `normalize`: wire payloads to [`Trade`] and [`MarketSnapshot`]
//! - `poller`: snapshot and liquidation tape polling
//! - `stream`: trades channel with fixed-delay reconnect

mod dedup;
mod gate;
mod normalize;
mod poller;
mod stream;
mod watermark;

pub use dedup::{TradeDeduplicator, TradeKey, DEFAULT_DEDUP_CAPACITY};
pub use gate::{BatchOutcome, Rejection, TradeGate};
pub use normalize::{parse_trade_message, trade_from_raw, trade_from_value, MarketSnapshot, Trade};
pub use poller::{LiquidationTapePoller, SnapshotPoll, SnapshotPoller, TapePoll};
pub use stream::{ReconnectPolicy, TradeStream};
pub use watermark::Watermarks;
