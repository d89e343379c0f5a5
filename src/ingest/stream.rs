//! WebSocket trade feed ingestion with reconnect.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::gate::TradeGate;
use super::normalize::{parse_trade_message, trade_from_value, Trade};
use crate::exchange::{ConnectionManager, ExchangeError, SubscribeRequest};

/// Reconnect behaviour of a [`TradeStream`].
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Fixed delay between attempts
    pub delay: Duration,
    /// Consecutive failed connections before giving up (0 = never)
    pub max_attempts: u32,
}

enum ConnectionOutcome {
    Stop,
    Reconnect { healthy: bool },
}

/// Subscribes to the trades channel for every tracked asset and delivers
/// de-duplicated, time-ordered batches.
pub struct TradeStream {
    connection: Arc<ConnectionManager>,
    assets: Vec<String>,
    gate: TradeGate,
    policy: ReconnectPolicy,
}

impl TradeStream {
    pub fn new(
        connection: Arc<ConnectionManager>,
        assets: Vec<String>,
        dedup_capacity: usize,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            connection,
            assets,
            gate: TradeGate::new(dedup_capacity),
            policy,
        }
    }

    /// Run until `shutdown` flips to true or the reconnect budget is spent.
    ///
    /// Every admitted batch is handed to `on_trades` on this task.
    pub async fn run<F>(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
        mut on_trades: F,
    ) -> Result<(), ExchangeError>
    where
        F: FnMut(Vec<Trade>),
    {
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self.run_connection(&mut shutdown, &mut on_trades).await {
                ConnectionOutcome::Stop => return Ok(()),
                ConnectionOutcome::Reconnect { healthy } => {
                    failures = if healthy { 1 } else { failures + 1 };

                    if self.policy.max_attempts > 0 && failures > self.policy.max_attempts {
                        error!(attempts = failures - 1, "Trade stream reconnect budget exhausted");
                        return Err(ExchangeError::Transport {
                            attempts: failures - 1,
                            message: "trade stream reconnect budget exhausted".into(),
                        });
                    }

                    warn!(
                        attempt = failures,
                        delay_ms = self.policy.delay.as_millis() as u64,
                        "Trade stream disconnected, reconnecting"
                    );

                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                return Ok(());
                            }
                        }
                        _ = sleep(self.policy.delay) => {}
                    }
                }
            }
        }
    }

    async fn run_connection<F>(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        on_trades: &mut F,
    ) -> ConnectionOutcome
    where
        F: FnMut(Vec<Trade>),
    {
        let subscriptions: Vec<SubscribeRequest> =
            self.assets.iter().map(|a| SubscribeRequest::trades(a)).collect();

        let mut feed = match self.connection.subscribe(&subscriptions).await {
            Ok(feed) => feed,
            Err(_) if self.connection.is_closed() => return ConnectionOutcome::Stop,
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Failed to open trade stream");
                return ConnectionOutcome::Reconnect { healthy: false };
            }
        };

        info!(assets = ?self.assets, "Trade stream subscribed");
        let mut received_any = false;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        feed.close().await;
                        return ConnectionOutcome::Stop;
                    }
                }
                message = feed.next_message() => match message {
                    Some(Ok(text)) => {
                        received_any = true;
                        self.handle_frame(&text, on_trades);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, kind = e.kind(), "Trade stream read failed");
                        return ConnectionOutcome::Reconnect { healthy: received_any };
                    }
                    None => {
                        info!("Trade stream closed by server");
                        return ConnectionOutcome::Reconnect { healthy: received_any };
                    }
                }
            }
        }
    }

    fn handle_frame<F>(&mut self, text: &str, on_trades: &mut F)
    where
        F: FnMut(Vec<Trade>),
    {
        let values = match parse_trade_message(text) {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "Discarding malformed trade frame");
                return;
            }
        };

        let mut trades = Vec::with_capacity(values.len());
        for value in values {
            match trade_from_value(value) {
                Ok(trade) => trades.push(trade),
                Err(e) => debug!(error = %e, "Dropping malformed trade"),
            }
        }

        if trades.is_empty() {
            return;
        }

        let (accepted, _) = self.gate.admit_batch(trades);
        if !accepted.is_empty() {
            on_trades(accepted);
        }
    }
}
