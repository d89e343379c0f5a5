//! Pipeline drivers.
//!
//! Each monitor is one task that exclusively owns its ingest state,
//! debouncer and statistics:
//! - [`RiskMonitor`]: snapshots → positions → risk factors → debounced alerts
//! - [`LiquidationMonitor`]: liquidation tape → liquidation alerts
//! - [`LargeTradeMonitor`]: WebSocket trades → large-trade alerts
//!
//! Every driver stops on the shutdown signal, including in the middle of a
//! cycle, and closes the connection before returning.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertDebouncer, AlertKind, AlertSink, SessionStats};
use crate::config::{Config, EstimatorKind, RiskConfig};
use crate::exchange::{ConnectionManager, ExchangeError, InfoClient, MarketMetadata};
use crate::ingest::{
    LiquidationTapePoller, MarketSnapshot, ReconnectPolicy, SnapshotPoller, Trade, TradeStream,
};
use crate::risk::{
    AccountPositionEstimator, Position, PositionEstimator, RiskAnalyzer, RiskLevel,
    SyntheticPositionEstimator,
};
use crate::utils::format_usd;

/// Trades this many times over the threshold are CRITICAL.
const CRITICAL_NOTIONAL_MULTIPLE: Decimal = dec!(10);

/// Build the configured position estimator.
pub fn build_estimator(
    config: &RiskConfig,
    client: &InfoClient,
) -> Result<Box<dyn PositionEstimator>, ExchangeError> {
    match config.estimator {
        EstimatorKind::Synthetic => Ok(Box::new(SyntheticPositionEstimator::new(
            config.maintenance_margin_rate,
        ))),
        EstimatorKind::Account => {
            let address = config.account_address.clone().ok_or_else(|| {
                ExchangeError::Configuration("account estimator requires account_address".into())
            })?;
            Ok(Box::new(AccountPositionEstimator::new(
                client.clone(),
                address,
                config.maintenance_margin_rate,
            )))
        }
    }
}

/// Sleep for `period` unless shutdown is requested first. Returns true on shutdown.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = sleep(period) => false,
    }
}

/// Resolve once shutdown is requested or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// What one risk cycle produced, handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub snapshots: Vec<MarketSnapshot>,
    /// Sorted by distance to liquidation
    pub positions: Vec<Position>,
    /// Alerts fired this cycle
    pub alerts: Vec<Alert>,
    /// Stats recorded this cycle only
    pub stats_delta: SessionStats,
    /// Monitored assets absent from this poll
    pub missing: Vec<String>,
    /// Whether `positions` are simulated
    pub simulated: bool,
}

/// Periodic market risk pipeline.
pub struct RiskMonitor {
    client: InfoClient,
    poller: SnapshotPoller,
    metadata: MarketMetadata,
    estimator: Box<dyn PositionEstimator>,
    analyzer: RiskAnalyzer,
    debouncer: AlertDebouncer,
    stats: SessionStats,
    sink: Arc<dyn AlertSink>,
    interval: Duration,
}

impl RiskMonitor {
    pub fn new(
        connection: Arc<ConnectionManager>,
        config: &Config,
        sink: Arc<dyn AlertSink>,
    ) -> Result<Self, ExchangeError> {
        let client = InfoClient::new(connection);
        let estimator = build_estimator(&config.risk, &client)?;

        Ok(Self {
            poller: SnapshotPoller::new(client.clone(), config.normalized_assets()),
            client,
            metadata: MarketMetadata::fallback(),
            estimator,
            analyzer: RiskAnalyzer::new(config.risk.clone(), config.monitor.history_capacity),
            debouncer: AlertDebouncer::new(config.alerts.consecutive_count),
            stats: SessionStats::new(),
            sink,
            interval: Duration::from_secs(config.monitor.risk_poll_interval_secs),
        })
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn metadata(&self) -> &MarketMetadata {
        &self.metadata
    }

    pub fn assets(&self) -> &[String] {
        self.poller.assets()
    }

    /// Load the asset universe. On failure the monitored set shrinks to the
    /// fallback assets it overlaps with (or the whole fallback set).
    pub async fn initialize(&mut self) {
        if self.metadata.load(&self.client).await.is_ok() {
            return;
        }

        let mut reduced: Vec<String> = self
            .poller
            .assets()
            .iter()
            .filter(|a| self.metadata.id_of(a).is_some())
            .cloned()
            .collect();
        if reduced.is_empty() {
            reduced = self.metadata.assets().map(|a| a.name.clone()).collect();
        }

        warn!(assets = ?reduced, "Monitoring reduced asset set");
        self.poller = SnapshotPoller::new(self.client.clone(), reduced);
    }

    /// One poll → estimate → analyze → debounce pass.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, ExchangeError> {
        let poll = self.poller.poll().await?;

        if !poll.universe.is_empty() {
            self.metadata = MarketMetadata::from_universe(&poll.universe);
        }

        let positions = match self.estimator.estimate(&poll.snapshots, &self.metadata).await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(
                    estimator = self.estimator.name(),
                    error = %e,
                    kind = e.kind(),
                    "Position estimate failed, analysing markets only"
                );
                Vec::new()
            }
        };

        let mut signals = self.analyzer.analyze_all(&poll.snapshots, &self.metadata);
        signals.extend(self.analyzer.position_signals(&positions));
        debug!(signals = signals.len(), positions = positions.len(), "Risk cycle analysed");

        let mut stats_delta = SessionStats::new();
        let alerts: Vec<Alert> = self
            .debouncer
            .cycle(signals)
            .into_iter()
            .map(|signal| {
                let alert = Alert::new(&signal.asset, signal.kind, signal.level, signal.message);
                self.sink.on_alert(&alert);
                stats_delta.record_alert(&alert);
                alert
            })
            .collect();
        self.stats.merge(&stats_delta);

        Ok(CycleReport {
            snapshots: poll.snapshots,
            positions,
            alerts,
            stats_delta,
            missing: poll.missing,
            simulated: self.estimator.is_simulated(),
        })
    }

    /// Poll until shutdown. A failed cycle is logged and the loop continues.
    pub async fn run<F>(&mut self, mut shutdown: watch::Receiver<bool>, mut on_report: F) -> Result<()>
    where
        F: FnMut(&CycleReport),
    {
        info!(
            assets = ?self.poller.assets(),
            estimator = self.estimator.name(),
            interval_secs = self.interval.as_secs(),
            "Risk monitor started"
        );
        if self.estimator.is_simulated() {
            warn!("Positions are simulated from open interest, not observed");
        }

        loop {
            let outcome = tokio::select! {
                outcome = self.run_cycle() => outcome,
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Shutdown requested, abandoning risk cycle");
                    break;
                }
            };

            match outcome {
                Ok(report) => on_report(&report),
                Err(e) => warn!(error = %e, kind = e.kind(), "Risk cycle failed"),
            }

            if wait_or_shutdown(&mut shutdown, self.interval).await {
                break;
            }
        }

        self.client.connection().close().await;
        info!("Risk monitor stopped");
        Ok(())
    }
}

/// Turns qualifying trades into alerts and statistics.
struct TradeAlerter {
    threshold: Decimal,
    sink: Arc<dyn AlertSink>,
    stats: SessionStats,
}

impl TradeAlerter {
    fn new(threshold: Decimal, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            threshold,
            sink,
            stats: SessionStats::new(),
        }
    }

    fn level_for(&self, notional: Decimal) -> RiskLevel {
        if notional >= self.threshold * CRITICAL_NOTIONAL_MULTIPLE {
            RiskLevel::Critical
        } else {
            RiskLevel::High
        }
    }

    /// Alert on every trade at or above the threshold.
    fn handle<K>(&mut self, trades: Vec<Trade>, kind_of: K) -> (Vec<Alert>, SessionStats)
    where
        K: Fn(&Trade) -> AlertKind,
    {
        let mut delta = SessionStats::new();
        let mut alerts = Vec::new();

        for trade in trades {
            let notional = trade.notional();
            if notional < self.threshold {
                debug!(asset = %trade.asset, notional = %notional, "Trade below alert threshold");
                continue;
            }

            let kind = kind_of(&trade);
            let message = match kind {
                AlertKind::Liquidation(side) => format!(
                    "{} {} liquidated: {} {} @ {}",
                    format_usd(notional),
                    side,
                    trade.size,
                    trade.asset,
                    trade.price
                ),
                _ => format!(
                    "{} {} {} {} @ {}",
                    format_usd(notional),
                    trade.side,
                    trade.size,
                    trade.asset,
                    trade.price
                ),
            };

            let alert = Alert::new(&trade.asset, kind, self.level_for(notional), message)
                .with_notional(notional);
            self.sink.on_alert(&alert);
            delta.record_alert(&alert);
            alerts.push(alert);
        }

        self.stats.merge(&delta);
        (alerts, delta)
    }
}

/// What one pass over the liquidation tape produced.
#[derive(Debug, Clone)]
pub struct TapeReport {
    pub alerts: Vec<Alert>,
    pub stats_delta: SessionStats,
    /// Assets whose poll failed
    pub failed: Vec<String>,
}

/// Polls the recent-trade tape for liquidations.
pub struct LiquidationMonitor {
    connection: Arc<ConnectionManager>,
    tape: LiquidationTapePoller,
    alerter: TradeAlerter,
    interval: Duration,
}

impl LiquidationMonitor {
    pub fn new(connection: Arc<ConnectionManager>, config: &Config, sink: Arc<dyn AlertSink>) -> Self {
        let client = InfoClient::new(connection.clone());
        Self {
            connection,
            tape: LiquidationTapePoller::new(
                client,
                config.normalized_assets(),
                config.monitor.dedup_capacity,
            ),
            alerter: TradeAlerter::new(config.alerts.liquidation_threshold_usd, sink),
            interval: Duration::from_secs(config.monitor.liquidation_poll_interval_secs),
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.alerter.stats
    }

    pub async fn run_cycle(&mut self) -> TapeReport {
        let poll = self.tape.poll().await;
        if poll.malformed > 0 {
            debug!(malformed = poll.malformed, "Dropped malformed tape entries");
        }

        let (alerts, stats_delta) = self
            .alerter
            .handle(poll.trades, |t| AlertKind::Liquidation(t.liquidated_side()));

        TapeReport {
            alerts,
            stats_delta,
            failed: poll.failed,
        }
    }

    pub async fn run<F>(&mut self, mut shutdown: watch::Receiver<bool>, mut on_report: F) -> Result<()>
    where
        F: FnMut(&TapeReport),
    {
        info!(
            threshold = %format_usd(self.alerter.threshold),
            interval_secs = self.interval.as_secs(),
            "Liquidation monitor started"
        );

        loop {
            let report = tokio::select! {
                report = self.run_cycle() => report,
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Shutdown requested, abandoning tape poll");
                    break;
                }
            };
            on_report(&report);

            if wait_or_shutdown(&mut shutdown, self.interval).await {
                break;
            }
        }

        self.connection.close().await;
        info!("Liquidation monitor stopped");
        Ok(())
    }
}

/// Large trades found in one delivered batch.
#[derive(Debug, Clone)]
pub struct TradeReport {
    pub alerts: Vec<Alert>,
    pub stats_delta: SessionStats,
}

/// Streams trades and reports the large ones.
pub struct LargeTradeMonitor {
    connection: Arc<ConnectionManager>,
    stream: TradeStream,
    alerter: TradeAlerter,
}

impl LargeTradeMonitor {
    pub fn new(connection: Arc<ConnectionManager>, config: &Config, sink: Arc<dyn AlertSink>) -> Self {
        let policy = ReconnectPolicy {
            delay: Duration::from_secs(config.monitor.reconnect_delay_secs),
            max_attempts: config.monitor.max_reconnect_attempts,
        };

        Self {
            stream: TradeStream::new(
                connection.clone(),
                config.normalized_assets(),
                config.monitor.dedup_capacity,
                policy,
            ),
            connection,
            alerter: TradeAlerter::new(config.alerts.large_trade_threshold_usd, sink),
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.alerter.stats
    }

    /// Stream until shutdown; `on_report` sees every admitted batch.
    pub async fn run<F>(&mut self, shutdown: watch::Receiver<bool>, mut on_report: F) -> Result<()>
    where
        F: FnMut(&TradeReport),
    {
        info!(
            threshold = %format_usd(self.alerter.threshold),
            "Large trade monitor started"
        );

        let Self {
            connection,
            stream,
            alerter,
        } = self;

        let result = stream
            .run(shutdown, |trades| {
                let (alerts, stats_delta) = alerter.handle(trades, |t| AlertKind::LargeTrade(t.side));
                on_report(&TradeReport { alerts, stats_delta });
            })
            .await;

        connection.close().await;
        info!("Large trade monitor stopped");
        result.context("trade stream stopped")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::MockAlertSink;
    use crate::exchange::{ConnectionSettings, RetryPolicy};
    use crate::ingest::trade_from_value;
    use crate::risk::Side;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::time::Instant;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::accept_async;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connection_for(server: &MockServer) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(ConnectionSettings {
            base_url: server.uri(),
            ws_url: "ws://127.0.0.1:1/ws".to_string(),
            connect_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(500),
            heartbeat: Duration::from_secs(20),
            shutdown_grace: Duration::from_millis(1),
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
            },
        }))
    }

    /// Slow timeouts and a full retry budget, for a server that never answers in time.
    fn stalled_connection(server: &MockServer) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(ConnectionSettings {
            base_url: server.uri(),
            ws_url: "ws://127.0.0.1:1/ws".to_string(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
            heartbeat: Duration::from_secs(20),
            shutdown_grace: Duration::from_millis(1),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(500),
            },
        }))
    }

    fn ws_connection(ws_url: String) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(ConnectionSettings {
            base_url: "http://127.0.0.1:1".to_string(),
            ws_url,
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
            heartbeat: Duration::from_secs(20),
            shutdown_grace: Duration::from_millis(1),
            retry: RetryPolicy::default(),
        }))
    }

    async fn stalled_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;
        server
    }

    fn stop_after(shutdown_tx: watch::Sender<bool>, delay: Duration) {
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = shutdown_tx.send(true);
        });
    }

    fn config(assets: &[&str]) -> Config {
        let mut config = Config::default();
        config.monitor.assets = assets.iter().map(|a| a.to_string()).collect();
        config
    }

    fn tape_trade(tid: u64, time: i64, side: &str, px: &str, sz: &str) -> serde_json::Value {
        json!({"coin": "BTC", "side": side, "px": px, "sz": sz, "time": time, "tid": tid,
               "liquidation": true})
    }

    #[tokio::test]
    async fn test_risk_cycle_debounces_before_alerting() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "metaAndAssetCtxs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"universe": [{"name": "BTC", "szDecimals": 5, "maxLeverage": 40}]},
                [{"funding": "0.002", "openInterest": "100", "markPx": "65000"}]
            ])))
            .mount(&server)
            .await;

        let mut sink = MockAlertSink::new();
        sink.expect_on_alert()
            .withf(|a| a.kind == AlertKind::FundingPressure && a.asset == "BTC")
            .times(1)
            .return_const(());
        sink.expect_on_alert()
            .withf(|a| matches!(a.kind, AlertKind::PositionAtRisk(_)))
            .times(2)
            .return_const(());

        let mut monitor =
            RiskMonitor::new(connection_for(&server), &config(&["BTC"]), Arc::new(sink)).unwrap();

        let first = monitor.run_cycle().await.unwrap();
        assert!(first.alerts.is_empty());
        assert!(first.simulated);
        assert_eq!(first.snapshots.len(), 1);
        assert!(!first.positions.is_empty());

        let second = monitor.run_cycle().await.unwrap();
        assert_eq!(second.alerts.len(), 3);
        assert_eq!(second.stats_delta.total_events, 3);
        assert_eq!(monitor.stats().total_events, 3);
        assert_eq!(monitor.metadata().max_leverage("BTC"), Some(40));
    }

    #[tokio::test]
    async fn test_risk_cycle_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let mut monitor = RiskMonitor::new(
            connection_for(&server),
            &config(&["BTC"]),
            Arc::new(MockAlertSink::new()),
        )
        .unwrap();

        assert!(matches!(monitor.run_cycle().await, Err(ExchangeError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_initialize_falls_back_to_reduced_assets() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut monitor = RiskMonitor::new(
            connection_for(&server),
            &config(&["ETH", "DOGE"]),
            Arc::new(MockAlertSink::new()),
        )
        .unwrap();
        monitor.initialize().await;

        assert!(monitor.metadata().is_fallback());
        assert_eq!(monitor.assets(), &["ETH".to_string()]);
    }

    #[test]
    fn test_account_estimator_requires_address() {
        let server_less = Arc::new(ConnectionManager::new(ConnectionSettings {
            base_url: "http://127.0.0.1:1".to_string(),
            ws_url: "ws://127.0.0.1:1/ws".to_string(),
            connect_timeout: Duration::from_millis(10),
            request_timeout: Duration::from_millis(10),
            heartbeat: Duration::from_secs(20),
            shutdown_grace: Duration::from_millis(1),
            retry: RetryPolicy::default(),
        }));
        let client = InfoClient::new(server_less);

        let mut risk = RiskConfig::default();
        risk.estimator = EstimatorKind::Account;
        assert!(matches!(
            build_estimator(&risk, &client),
            Err(ExchangeError::Configuration(_))
        ));

        risk.account_address = Some("0x0123456789abcdef0123456789abcdef01234567".to_string());
        assert_eq!(build_estimator(&risk, &client).unwrap().name(), "account");
    }

    #[tokio::test]
    async fn test_liquidation_monitor_alerts_above_threshold() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "recentTrades", "coin": "BTC"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                tape_trade(1, 1_000, "A", "100", "10")
            ])))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "recentTrades", "coin": "BTC"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                tape_trade(1, 1_000, "A", "100", "10"),
                tape_trade(2, 2_000, "A", "100", "1000"),
                tape_trade(3, 2_500, "B", "100", "10")
            ])))
            .with_priority(2)
            .mount(&server)
            .await;

        let mut sink = MockAlertSink::new();
        sink.expect_on_alert()
            .withf(|a| {
                a.kind == AlertKind::Liquidation(Side::Long) && a.notional == Some(dec!(100000))
            })
            .times(1)
            .return_const(());

        let mut monitor =
            LiquidationMonitor::new(connection_for(&server), &config(&["BTC"]), Arc::new(sink));

        let primed = monitor.run_cycle().await;
        assert!(primed.alerts.is_empty());

        let report = monitor.run_cycle().await;
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].level, RiskLevel::High);
        assert_eq!(monitor.stats().by_side[&Side::Long].notional, dec!(100000));

        let again = monitor.run_cycle().await;
        assert!(again.alerts.is_empty());
    }

    #[test]
    fn test_trade_alerter_levels_and_sides() {
        let mut sink = MockAlertSink::new();
        sink.expect_on_alert().times(2).return_const(());
        let mut alerter = TradeAlerter::new(dec!(100000), Arc::new(sink));

        let trades = vec![
            trade_from_value(json!({"coin": "ETH", "side": "B", "px": "3000", "sz": "400", "time": 1})).unwrap(),
            trade_from_value(json!({"coin": "ETH", "side": "A", "px": "3000", "sz": "40", "time": 2})).unwrap(),
            trade_from_value(json!({"coin": "ETH", "side": "A", "px": "3000", "sz": "10", "time": 3})).unwrap(),
        ];

        let (alerts, delta) = alerter.handle(trades, |t| AlertKind::LargeTrade(t.side));
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].kind, AlertKind::LargeTrade(Side::Long));
        assert_eq!(alerts[0].level, RiskLevel::Critical);
        assert_eq!(alerts[1].kind, AlertKind::LargeTrade(Side::Short));
        assert_eq!(alerts[1].level, RiskLevel::High);
        assert_eq!(delta.total_notional, dec!(1320000));
        assert_eq!(alerter.stats.total_events, 2);
    }

    #[tokio::test]
    async fn test_drivers_close_connection_on_shutdown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let connection = connection_for(&server);
        let mut monitor =
            LiquidationMonitor::new(connection.clone(), &config(&["BTC"]), Arc::new(MockAlertSink::new()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut cycles = 0;
        tokio_test::assert_ok!(
            monitor
                .run(shutdown_rx, |_| {
                    cycles += 1;
                    let _ = shutdown_tx.send(true);
                })
                .await
        );

        assert_eq!(cycles, 1);
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_risk_monitor_stops_during_stalled_retries() {
        let server = stalled_server().await;
        let connection = stalled_connection(&server);
        let mut monitor = RiskMonitor::new(
            connection.clone(),
            &config(&["BTC", "ETH", "SOL"]),
            Arc::new(MockAlertSink::new()),
        )
        .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        stop_after(shutdown_tx, Duration::from_millis(100));

        let started = Instant::now();
        let mut reports = 0;
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            monitor.run(shutdown_rx, |_| reports += 1),
        )
        .await
        .expect("risk monitor ignored shutdown while retrying");

        tokio_test::assert_ok!(result);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(reports, 0);
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_liquidation_monitor_stops_during_stalled_retries() {
        let server = stalled_server().await;
        let connection = stalled_connection(&server);
        let mut monitor = LiquidationMonitor::new(
            connection.clone(),
            &config(&["BTC", "ETH", "SOL"]),
            Arc::new(MockAlertSink::new()),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        stop_after(shutdown_tx, Duration::from_millis(100));

        let started = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(3), monitor.run(shutdown_rx, |_| {}))
            .await
            .expect("liquidation monitor ignored shutdown while retrying");

        tokio_test::assert_ok!(result);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_large_trade_monitor_reports_each_batch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            // subscription request
            let _ = ws.next().await;

            let frame = json!({"channel": "trades", "data": [
                {"coin": "BTC", "side": "B", "px": "100000", "sz": "2", "time": 1_000, "tid": 1},
                {"coin": "BTC", "side": "A", "px": "100000", "sz": "0.1", "time": 1_000, "tid": 2}
            ]});
            ws.send(Message::Text(frame.to_string().into())).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut sink = MockAlertSink::new();
        sink.expect_on_alert()
            .withf(|a| a.kind == AlertKind::LargeTrade(Side::Long) && a.notional == Some(dec!(200000)))
            .times(1)
            .return_const(());

        let mut config = config(&["BTC"]);
        config.alerts.large_trade_threshold_usd = dec!(100000);
        let connection = ws_connection(format!("ws://{addr}"));
        let mut monitor = LargeTradeMonitor::new(connection.clone(), &config, Arc::new(sink));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut reports: Vec<TradeReport> = Vec::new();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            monitor.run(shutdown_rx, |report| {
                reports.push(report.clone());
                let _ = shutdown_tx.send(true);
            }),
        )
        .await
        .expect("trade monitor did not stop");

        tokio_test::assert_ok!(result);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].alerts.len(), 1);
        assert_eq!(reports[0].alerts[0].level, RiskLevel::High);
        assert_eq!(reports[0].stats_delta.total_notional, dec!(200000));
        assert_eq!(monitor.stats().total_events, 1);
        assert!(connection.is_closed());
    }
}
