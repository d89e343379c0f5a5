//! Alert delivery.
//!
//! - `sink`: alert records and the [`AlertSink`] capability
//! - `debouncer`: consecutive-count gating per (asset, kind)
//! - `stats`: session-level counters and summaries

mod debouncer;
mod sink;
mod stats;

pub use debouncer::AlertDebouncer;
#[cfg(test)]
pub use sink::MockAlertSink;
pub use sink::{Alert, AlertKind, AlertSeverity, AlertSink, TracingAlertSink};
pub use stats::{SessionStats, SessionSummary, VolumeBucket};
