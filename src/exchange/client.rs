//! Typed client for the exchange `info` endpoint.
//!
//! Every call goes through the shared [`ConnectionManager`], so retries and
//! timeouts are uniform. Responses are decoded into the records in
//! [`super::types`] at this boundary.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::connection::ConnectionManager;
use super::error::ExchangeError;
use super::types::*;
use crate::utils::{safe_div, to_basis_points};

const INFO_ENDPOINT: &str = "/info";

/// Candle intervals accepted by `candleSnapshot`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CandleInterval {
    OneMinute,
    FiveMinutes,
    #[default]
    FifteenMinutes,
    OneHour,
    FourHours,
    TwelveHours,
    OneDay,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::FifteenMinutes => "15m",
            CandleInterval::OneHour => "1h",
            CandleInterval::FourHours => "4h",
            CandleInterval::TwelveHours => "12h",
            CandleInterval::OneDay => "1d",
        }
    }

    pub fn duration_ms(&self) -> i64 {
        const MINUTE: i64 = 60 * 1000;
        match self {
            CandleInterval::OneMinute => MINUTE,
            CandleInterval::FiveMinutes => 5 * MINUTE,
            CandleInterval::FifteenMinutes => 15 * MINUTE,
            CandleInterval::OneHour => 60 * MINUTE,
            CandleInterval::FourHours => 4 * 60 * MINUTE,
            CandleInterval::TwelveHours => 12 * 60 * MINUTE,
            CandleInterval::OneDay => 24 * 60 * MINUTE,
        }
    }

    /// `(start, end)` in ms covering the last `limit` candles ending at `now_ms`.
    pub fn window(&self, limit: u32, now_ms: i64) -> (i64, i64) {
        (now_ms - i64::from(limit) * self.duration_ms(), now_ms)
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandleInterval {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(CandleInterval::OneMinute),
            "5m" => Ok(CandleInterval::FiveMinutes),
            "15m" => Ok(CandleInterval::FifteenMinutes),
            "1h" => Ok(CandleInterval::OneHour),
            "4h" => Ok(CandleInterval::FourHours),
            "12h" => Ok(CandleInterval::TwelveHours),
            "1d" => Ok(CandleInterval::OneDay),
            other => Err(ExchangeError::Configuration(format!(
                "unsupported candle interval: {other}"
            ))),
        }
    }
}

/// Top-of-book view derived from an L2 snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSummary {
    pub coin: String,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub mid: Decimal,
    pub spread: Decimal,
    pub spread_bps: Decimal,
    /// Σ px·sz over all returned bid levels
    pub bid_depth_usd: Decimal,
    /// Σ px·sz over all returned ask levels
    pub ask_depth_usd: Decimal,
}

impl BookSummary {
    /// `None` when either side of the book is empty.
    pub fn from_book(book: &L2BookResponse) -> Option<Self> {
        let bids = book.levels.first()?;
        let asks = book.levels.get(1)?;
        let best_bid = bids.first()?.px;
        let best_ask = asks.first()?.px;

        let depth = |levels: &[BookLevel]| levels.iter().map(|l| l.px * l.sz).sum::<Decimal>();
        let mid = (best_bid + best_ask) / Decimal::TWO;
        let spread = best_ask - best_bid;

        Some(Self {
            coin: book.coin.clone(),
            best_bid,
            best_ask,
            mid,
            spread,
            spread_bps: to_basis_points(safe_div(spread, mid)),
            bid_depth_usd: depth(bids),
            ask_depth_usd: depth(asks),
        })
    }
}

/// Read-only client for market data and account state.
#[derive(Clone)]
pub struct InfoClient {
    connection: Arc<ConnectionManager>,
}

impl InfoClient {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Issue one info request and decode the body.
    async fn info<T: DeserializeOwned>(&self, request: &InfoRequest) -> Result<T, ExchangeError> {
        let value = self.connection.request(INFO_ENDPOINT, request).await?;
        decode(request.operation(), value)
    }

    /// Asset universe in enumeration order.
    #[instrument(skip(self), name = "info_meta")]
    pub async fn meta(&self) -> Result<MetaResponse, ExchangeError> {
        let meta: MetaResponse = self.info(&InfoRequest::Meta).await?;
        debug!(assets = meta.universe.len(), "Fetched asset universe");
        Ok(meta)
    }

    /// Metadata plus per-asset contexts, index-aligned.
    #[instrument(skip(self), name = "info_meta_and_asset_ctxs")]
    pub async fn meta_and_asset_ctxs(&self) -> Result<AssetCtxResponse, ExchangeError> {
        let (meta, ctxs): AssetCtxResponse = self.info(&InfoRequest::MetaAndAssetCtxs).await?;

        if meta.universe.len() != ctxs.len() {
            return Err(ExchangeError::Protocol(format!(
                "universe ({}) and contexts ({}) are not aligned",
                meta.universe.len(),
                ctxs.len()
            )));
        }

        debug!(assets = ctxs.len(), "Fetched asset contexts");
        Ok((meta, ctxs))
    }

    #[instrument(skip(self), name = "info_l2_book")]
    pub async fn l2_book(&self, coin: &str) -> Result<L2BookResponse, ExchangeError> {
        self.info(&InfoRequest::L2Book {
            coin: coin.to_string(),
        })
        .await
    }

    /// Fetch the book and reduce it to a [`BookSummary`].
    pub async fn book_summary(&self, coin: &str) -> Result<BookSummary, ExchangeError> {
        let book = self.l2_book(coin).await?;
        BookSummary::from_book(&book)
            .ok_or_else(|| ExchangeError::Domain(format!("empty order book for {coin}")))
    }

    /// Recent trade tape, one JSON value per trade.
    ///
    /// Trades are left undecoded so a single malformed entry can be dropped
    /// without losing the page.
    #[instrument(skip(self), name = "info_recent_trades")]
    pub async fn recent_trades(&self, coin: &str) -> Result<Vec<Value>, ExchangeError> {
        let trades: Vec<Value> = self
            .info(&InfoRequest::RecentTrades {
                coin: coin.to_string(),
            })
            .await?;
        debug!(coin = %coin, trades = trades.len(), "Fetched recent trades");
        Ok(trades)
    }

    /// The last `limit` candles of `interval`, ending now.
    #[instrument(skip(self), name = "info_candles")]
    pub async fn candles(
        &self,
        coin: &str,
        interval: CandleInterval,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let (start_time, end_time) = interval.window(limit, Utc::now().timestamp_millis());
        self.info(&InfoRequest::CandleSnapshot {
            req: CandleRequest {
                coin: coin.to_string(),
                interval: interval.as_str().to_string(),
                start_time,
                end_time,
            },
        })
        .await
    }

    /// Mid prices keyed as the exchange sends them (coin name or asset id).
    ///
    /// Unparseable entries are skipped.
    #[instrument(skip(self), name = "info_all_mids")]
    pub async fn all_mids(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let raw: AllMidsResponse = self.info(&InfoRequest::AllMids).await?;

        let mids: HashMap<String, Decimal> = raw
            .into_iter()
            .filter_map(|(key, px)| match px.parse::<Decimal>() {
                Ok(px) => Some((key, px)),
                Err(_) => {
                    debug!(key = %key, value = %px, "Skipping unparseable mid");
                    None
                }
            })
            .collect();

        Ok(mids)
    }

    /// Look a mid up by coin name first, then by asset id (`"3"` or `"@3"`).
    pub fn lookup_mid(
        mids: &HashMap<String, Decimal>,
        coin: &str,
        asset_id: Option<u32>,
    ) -> Option<Decimal> {
        mids.get(coin).copied().or_else(|| {
            let id = asset_id?;
            mids.get(&id.to_string())
                .or_else(|| mids.get(&format!("@{id}")))
                .copied()
        })
    }

    #[instrument(skip(self), name = "info_funding_history")]
    pub async fn funding_history(
        &self,
        coin: &str,
        start_time: i64,
        end_time: Option<i64>,
    ) -> Result<Vec<FundingHistoryRecord>, ExchangeError> {
        let records: Vec<FundingHistoryRecord> = self
            .info(&InfoRequest::FundingHistory {
                coin: coin.to_string(),
                start_time,
                end_time,
            })
            .await?;

        debug!(coin = %coin, records = records.len(), "Fetched funding history");
        Ok(records)
    }

    /// Most recent funding record from the last 24 hours.
    pub async fn latest_funding(
        &self,
        coin: &str,
    ) -> Result<Option<FundingHistoryRecord>, ExchangeError> {
        let since = Utc::now().timestamp_millis() - CandleInterval::OneDay.duration_ms();
        let records = self.funding_history(coin, since, None).await?;
        Ok(records.into_iter().max_by_key(|r| r.time))
    }

    /// Open positions of one account. Read-only; no signature involved.
    #[instrument(skip(self), name = "info_clearinghouse_state")]
    pub async fn clearinghouse_state(&self, user: &str) -> Result<ClearinghouseState, ExchangeError> {
        if !(user.starts_with("0x") && user.len() == 42) {
            return Err(ExchangeError::Configuration(format!(
                "invalid account address: {user}"
            )));
        }

        self.info(&InfoRequest::ClearinghouseState {
            user: user.to_string(),
        })
        .await
    }
}

/// Decode a response body; an empty body is a soft domain failure.
fn decode<T: DeserializeOwned>(operation: &str, value: Value) -> Result<T, ExchangeError> {
    if value.is_null() {
        return Err(ExchangeError::Domain(format!("{operation}: empty response")));
    }

    serde_json::from_value(value)
        .map_err(|e| ExchangeError::Protocol(format!("{operation}: unexpected shape: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::connection::{ConnectionSettings, RetryPolicy};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> InfoClient {
        let settings = ConnectionSettings {
            base_url: server.uri(),
            ws_url: "ws://127.0.0.1:1/ws".to_string(),
            connect_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(500),
            heartbeat: Duration::from_secs(20),
            shutdown_grace: Duration::from_millis(1),
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(5),
            },
        };
        InfoClient::new(Arc::new(ConnectionManager::new(settings)))
    }

    fn level(px: Decimal, sz: Decimal) -> BookLevel {
        BookLevel { px, sz, n: 1 }
    }

    #[test]
    fn test_candle_window() {
        let interval = CandleInterval::default();
        assert_eq!(interval.as_str(), "15m");

        let (start, end) = interval.window(100, 1_000_000_000);
        assert_eq!(end, 1_000_000_000);
        assert_eq!(end - start, 100 * 15 * 60 * 1000);

        assert_eq!("4h".parse::<CandleInterval>().unwrap(), CandleInterval::FourHours);
        assert!("2h".parse::<CandleInterval>().is_err());
    }

    #[test]
    fn test_book_summary() {
        let book = L2BookResponse {
            coin: "BTC".to_string(),
            time: 0,
            levels: vec![
                vec![level(dec!(99), dec!(2)), level(dec!(98), dec!(1))],
                vec![level(dec!(101), dec!(1))],
            ],
        };

        let summary = BookSummary::from_book(&book).unwrap();
        assert_eq!(summary.mid, dec!(100));
        assert_eq!(summary.spread, dec!(2));
        assert_eq!(summary.spread_bps, dec!(200));
        assert_eq!(summary.bid_depth_usd, dec!(296));
        assert_eq!(summary.ask_depth_usd, dec!(101));
    }

    #[test]
    fn test_book_summary_empty_side() {
        let book = L2BookResponse {
            coin: "BTC".to_string(),
            time: 0,
            levels: vec![vec![level(dec!(99), dec!(2))], vec![]],
        };
        assert!(BookSummary::from_book(&book).is_none());
    }

    #[test]
    fn test_lookup_mid_by_name_or_id() {
        let mut mids = HashMap::new();
        mids.insert("BTC".to_string(), dec!(65000));
        mids.insert("@7".to_string(), dec!(1.5));
        mids.insert("3".to_string(), dec!(20));

        assert_eq!(InfoClient::lookup_mid(&mids, "BTC", Some(0)), Some(dec!(65000)));
        assert_eq!(InfoClient::lookup_mid(&mids, "XYZ", Some(7)), Some(dec!(1.5)));
        assert_eq!(InfoClient::lookup_mid(&mids, "ABC", Some(3)), Some(dec!(20)));
        assert_eq!(InfoClient::lookup_mid(&mids, "ABC", None), None);
    }

    #[tokio::test]
    async fn test_meta_and_asset_ctxs_decodes_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "metaAndAssetCtxs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"universe": [{"name": "BTC", "szDecimals": 5, "maxLeverage": 40}]},
                [{"funding": "0.0000125", "openInterest": "25000.5", "markPx": "65000",
                  "midPx": "65000.5", "premium": null, "dayNtlVlm": "1000000"}]
            ])))
            .mount(&server)
            .await;

        let (meta, ctxs) = client_for(&server).meta_and_asset_ctxs().await.unwrap();
        assert_eq!(meta.universe[0].max_leverage, 40);
        assert_eq!(ctxs[0].open_interest, dec!(25000.5));
        assert_eq!(ctxs[0].premium, None);
    }

    #[tokio::test]
    async fn test_misaligned_contexts_are_protocol_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"universe": [{"name": "BTC"}, {"name": "ETH"}]},
                [{"funding": "0", "openInterest": "1", "markPx": "1"}]
            ])))
            .mount(&server)
            .await;

        let err = client_for(&server).meta_and_asset_ctxs().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_all_mids_skips_garbage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "allMids"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"BTC": "65000.5", "ETH": "n/a", "@1": "0.25"})),
            )
            .mount(&server)
            .await;

        let mids = client_for(&server).all_mids().await.unwrap();
        assert_eq!(mids.len(), 2);
        assert_eq!(mids["BTC"], dec!(65000.5));
    }

    #[tokio::test]
    async fn test_latest_funding_picks_newest() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "fundingHistory", "coin": "ETH"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"coin": "ETH", "fundingRate": "0.0001", "premium": "0.0002", "time": 2},
                {"coin": "ETH", "fundingRate": "0.0003", "premium": "0.0001", "time": 5},
                {"coin": "ETH", "fundingRate": "0.0002", "premium": "0.0001", "time": 3}
            ])))
            .mount(&server)
            .await;

        let latest = client_for(&server).latest_funding("ETH").await.unwrap().unwrap();
        assert_eq!(latest.time, 5);
        assert_eq!(latest.funding_rate, dec!(0.0003));
    }

    #[tokio::test]
    async fn test_empty_body_is_domain_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = client_for(&server).meta().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Domain(_)));
    }

    #[tokio::test]
    async fn test_clearinghouse_state_rejects_bad_address_without_io() {
        let server = MockServer::start().await;
        let err = client_for(&server)
            .clearinghouse_state("not-an-address")
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Configuration(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
