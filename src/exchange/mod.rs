//! Exchange connectivity.
//!
//! - `connection`: pooled HTTP/WebSocket channel with retry and clean shutdown
//! - `client`: typed read-only `info` endpoint client
//! - `metadata`: ticker ↔ asset id resolution and leverage limits
//! - `types`: wire records validated at the boundary
//!
//! All requests are read-only; nothing here signs or places orders.

mod client;
mod connection;
mod error;
mod metadata;
mod types;

pub use client::{BookSummary, CandleInterval, InfoClient};
pub use connection::{ConnectionManager, ConnectionSettings, RetryPolicy, TradeFeed};
pub use error::ExchangeError;
pub use metadata::{margin_tiers, AssetMetadata, MarginTier, MarketMetadata};
pub use types::*;
