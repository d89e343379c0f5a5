//! Perp Risk Monitor - Main Entry Point
//!
//! Read-only monitors for Hyperliquid perpetuals. Ctrl-C stops the running
//! monitor, closes the connection and logs the session summary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use perp_risk_monitor::alerts::{AlertSink, TracingAlertSink};
use perp_risk_monitor::config::Config;
use perp_risk_monitor::exchange::{CandleInterval, ConnectionManager, InfoClient, MarketMetadata};
use perp_risk_monitor::monitor::{CycleReport, LargeTradeMonitor, LiquidationMonitor, RiskMonitor};
use perp_risk_monitor::utils::{format_usd, to_basis_points};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Perp Risk Monitor CLI
#[derive(Parser)]
#[command(name = "perp-risk-monitor")]
#[command(version, about = "Liquidation-risk and large-trade monitor for Hyperliquid perpetuals")]
struct Cli {
    /// Override the monitored assets (comma separated)
    #[arg(short, long, value_delimiter = ',', global = true)]
    assets: Option<Vec<String>>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll market snapshots and alert on risk factors (default)
    Risk,

    /// Poll the trade tape and alert on large liquidations
    Liquidations,

    /// Stream trades and alert on large prints
    Trades,

    /// Print a one-off market overview for one coin
    Market {
        /// Coin to inspect
        coin: String,

        /// Candle interval (1m, 5m, 15m, 1h, 4h, 12h, 1d)
        #[arg(short, long, default_value = "15m")]
        interval: String,

        /// Number of candles
        #[arg(short, long, default_value = "100")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize comprehensive logging
    init_logging()?;

    // Load configuration
    let mut config = Config::load()?;
    if let Some(assets) = cli.assets {
        config.monitor.assets = assets;
    }
    config.validate().context("Invalid configuration")?;
    log_config(&config);

    let connection = Arc::new(ConnectionManager::from_config(&config.api));
    let sink: Arc<dyn AlertSink> = Arc::new(TracingAlertSink);

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    match cli.command.unwrap_or(Commands::Risk) {
        Commands::Risk => {
            let mut monitor = RiskMonitor::new(connection, &config, sink)
                .context("Failed to build risk monitor")?;
            monitor.initialize().await;
            monitor.run(shutdown_rx, log_cycle).await?;
            monitor.stats().log_summary("Risk alerts");
        }
        Commands::Liquidations => {
            let mut monitor = LiquidationMonitor::new(connection, &config, sink);
            monitor
                .run(shutdown_rx, |report| {
                    if !report.failed.is_empty() {
                        warn!(failed = ?report.failed, "Tape poll failed for some assets");
                    }
                })
                .await?;
            monitor.stats().log_summary("Liquidations");
        }
        Commands::Trades => {
            let mut monitor = LargeTradeMonitor::new(connection, &config, sink);
            let result = monitor
                .run(shutdown_rx, |report| {
                    if !report.alerts.is_empty() {
                        debug!(
                            alerts = report.alerts.len(),
                            notional = %format_usd(report.stats_delta.total_notional),
                            "Large trades in batch"
                        );
                    }
                })
                .await;
            monitor.stats().log_summary("Large trades");
            result?;
        }
        Commands::Market {
            coin,
            interval,
            limit,
        } => {
            let interval: CandleInterval = interval.parse()?;
            let result = show_market(InfoClient::new(connection.clone()), &coin, interval, limit).await;
            connection.close().await;
            return result;
        }
    }

    info!("👋 Perp Risk Monitor shutdown complete");
    Ok(())
}

/// Initialize comprehensive logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::hourly("logs", "risk-monitor.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the guard alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("perp_risk_monitor=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Assets: {}", config.normalized_assets().join(", "));
    info!("   Endpoint: {}", config.api.base_url);
    info!(
        "   Maintenance Margin: {:.2}%",
        config.risk.maintenance_margin_rate * dec!(100)
    );
    info!(
        "   Liquidation Buffer: {}%",
        config.risk.liquidation_buffer_pct
    );
    info!(
        "   Min Open Interest: {}",
        format_usd(config.risk.min_open_interest_usd)
    );
    info!("   Estimator: {:?}", config.risk.estimator);
    info!(
        "   Alert After: {} consecutive cycles",
        config.alerts.consecutive_count
    );
    info!(
        "   Liquidation / Large Trade Thresholds: {} / {}",
        format_usd(config.alerts.liquidation_threshold_usd),
        format_usd(config.alerts.large_trade_threshold_usd)
    );
}

/// Presentation of one risk cycle.
fn log_cycle(report: &CycleReport) {
    for snapshot in &report.snapshots {
        info!(
            "   {:<6} mark {:>12} | OI {:>10} | funding {:>7.2}bps",
            snapshot.asset,
            snapshot.mark_price,
            format_usd(snapshot.open_interest_usd()),
            to_basis_points(snapshot.funding_rate)
        );
    }

    for position in report.positions.iter().take(5) {
        debug!(
            asset = %position.asset,
            side = %position.side,
            leverage = %position.leverage,
            liquidation_price = %position.liquidation_price.round_dp(4),
            distance_pct = %position.distance_to_liquidation_pct.round_dp(2),
            risk = %position.risk_level,
            simulated = report.simulated,
            "Closest position to liquidation"
        );
    }

    if !report.missing.is_empty() {
        warn!(missing = ?report.missing, "Assets missing from this poll");
    }
}

async fn show_market(client: InfoClient, coin: &str, interval: CandleInterval, limit: u32) -> Result<()> {
    let mut metadata = MarketMetadata::fallback();
    if let Err(e) = metadata.load(&client).await {
        warn!(error = %e, "Using fallback metadata");
    }

    let asset = metadata
        .asset(coin)
        .with_context(|| format!("Unknown asset: {coin}"))?
        .clone();

    info!("📈 {} (id {}, max {}x)", asset.name, asset.id, asset.max_leverage);

    let mids = client.all_mids().await?;
    if let Some(mid) = InfoClient::lookup_mid(&mids, &asset.name, Some(asset.id)) {
        info!("   Mid: {}", mid);
    }

    let book = client.book_summary(&asset.name).await?;
    info!(
        "   Book: {} / {} | spread {:.2}bps | depth {} / {}",
        book.best_bid,
        book.best_ask,
        book.spread_bps,
        format_usd(book.bid_depth_usd),
        format_usd(book.ask_depth_usd)
    );

    match client.latest_funding(&asset.name).await? {
        Some(record) => info!(
            "   Funding: {:.4}% (premium {:.4}%)",
            record.funding_rate * dec!(100),
            record.premium * dec!(100)
        ),
        None => info!("   Funding: no records in the last 24h"),
    }

    let candles = client.candles(&asset.name, interval, limit).await?;
    if let (Some(first), Some(last)) = (candles.first(), candles.last()) {
        let high = candles.iter().map(|c| c.high).max().unwrap_or(last.high);
        let low = candles.iter().map(|c| c.low).min().unwrap_or(last.low);
        info!(
            "   {} x {}: open {} close {} | range {} - {}",
            candles.len(),
            interval.as_str(),
            first.open,
            last.close,
            low,
            high
        );
    }

    Ok(())
}
