//! # Perp Risk Monitor
//!
//! Read-only liquidation-risk and large-trade monitoring for Hyperliquid
//! perpetuals.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Connection manager, typed info client and market metadata
//! - `ingest`: Snapshot polling, trade tape and WebSocket trade feed with
//!   de-duplication and per-asset watermarks
//! - `risk`: Liquidation math, position estimators and risk factor analysis
//! - `alerts`: Alert records, sinks, debouncing and session statistics
//! - `monitor`: Single-task pipeline drivers
//! - `utils`: Shared utilities and decimal arithmetic

pub mod alerts;
pub mod config;
pub mod exchange;
pub mod ingest;
pub mod monitor;
pub mod risk;
pub mod utils;

pub use config::Config;
