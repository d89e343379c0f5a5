//! Type definitions for Hyperliquid info API requests and responses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Request body for the info endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum InfoRequest {
    /// Asset universe.
    #[serde(rename = "meta")]
    Meta,

    /// Metadata plus per-asset contexts (prices, funding, OI).
    #[serde(rename = "metaAndAssetCtxs")]
    MetaAndAssetCtxs,

    /// Level-2 order book for one coin.
    #[serde(rename = "l2Book")]
    L2Book { coin: String },

    /// Recent public trade tape for one coin.
    #[serde(rename = "recentTrades")]
    RecentTrades { coin: String },

    /// OHLC candles over a time window.
    #[serde(rename = "candleSnapshot")]
    CandleSnapshot { req: CandleRequest },

    /// Mid prices for every coin.
    #[serde(rename = "allMids")]
    AllMids,

    /// Funding rate history.
    #[serde(rename = "fundingHistory")]
    FundingHistory {
        coin: String,
        #[serde(rename = "startTime")]
        start_time: i64,
        #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
        end_time: Option<i64>,
    },

    /// Open positions and margin summary of one account (read-only).
    #[serde(rename = "clearinghouseState")]
    ClearinghouseState { user: String },
}

impl InfoRequest {
    /// Operation name as sent on the wire, for logs.
    pub fn operation(&self) -> &'static str {
        match self {
            InfoRequest::Meta => "meta",
            InfoRequest::MetaAndAssetCtxs => "metaAndAssetCtxs",
            InfoRequest::L2Book { .. } => "l2Book",
            InfoRequest::RecentTrades { .. } => "recentTrades",
            InfoRequest::CandleSnapshot { .. } => "candleSnapshot",
            InfoRequest::AllMids => "allMids",
            InfoRequest::FundingHistory { .. } => "fundingHistory",
            InfoRequest::ClearinghouseState { .. } => "clearinghouseState",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleRequest {
    pub coin: String,
    pub interval: String,
    pub start_time: i64,
    pub end_time: i64,
}

/// Response from the `meta` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaResponse {
    #[serde(default)]
    pub universe: Vec<UniverseEntry>,
}

/// Metadata for a single asset in the universe.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniverseEntry {
    /// Asset name (e.g., "BTC", "ETH")
    pub name: String,
    /// Size decimal precision
    #[serde(default)]
    pub sz_decimals: u8,
    /// Maximum allowed leverage
    #[serde(default = "default_universe_leverage")]
    pub max_leverage: u32,
    /// Whether only isolated margin is allowed
    #[serde(default)]
    pub only_isolated: bool,
    /// Delisted assets stay in the universe to keep ids stable
    #[serde(default)]
    pub is_delisted: bool,
}

fn default_universe_leverage() -> u32 {
    10
}

/// Response from `metaAndAssetCtxs`: a (meta, contexts) pair.
pub type AssetCtxResponse = (MetaResponse, Vec<AssetCtx>);

/// Real-time context for an asset (prices, funding, volume).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCtx {
    /// Current funding rate (hourly)
    #[serde(deserialize_with = "deserialize_decimal")]
    pub funding: Decimal,
    /// Open interest in contracts
    #[serde(deserialize_with = "deserialize_decimal")]
    pub open_interest: Decimal,
    /// Previous day price (24h ago)
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub prev_day_px: Option<Decimal>,
    /// Daily notional volume
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub day_ntl_vlm: Option<Decimal>,
    /// Premium over oracle price (null for inactive coins)
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub premium: Option<Decimal>,
    /// Oracle price
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub oracle_px: Option<Decimal>,
    /// Mark price
    #[serde(deserialize_with = "deserialize_decimal")]
    pub mark_px: Decimal,
    /// Mid price (null for inactive coins)
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub mid_px: Option<Decimal>,
}

/// Level-2 book snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct L2BookResponse {
    pub coin: String,
    #[serde(default)]
    pub time: i64,
    /// `[bids, asks]`
    pub levels: Vec<Vec<BookLevel>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookLevel {
    #[serde(deserialize_with = "deserialize_decimal")]
    pub px: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub sz: Decimal,
    /// Number of resting orders at this level
    #[serde(default)]
    pub n: u32,
}

/// One trade as delivered by `recentTrades` or the trades channel.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrade {
    pub coin: String,
    /// "B" (buy aggressor) or "A" (sell aggressor); older feeds send words
    pub side: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub px: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub sz: Decimal,
    /// Exchange timestamp in milliseconds
    pub time: i64,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub tid: Option<u64>,
    #[serde(default, alias = "isLiquidation")]
    pub liquidation: bool,
}

/// One OHLC candle.
#[derive(Debug, Clone, Deserialize)]
pub struct Candle {
    /// Open time (ms)
    #[serde(rename = "t")]
    pub open_time: i64,
    /// Close time (ms)
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "s")]
    pub coin: String,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o", deserialize_with = "deserialize_decimal")]
    pub open: Decimal,
    #[serde(rename = "h", deserialize_with = "deserialize_decimal")]
    pub high: Decimal,
    #[serde(rename = "l", deserialize_with = "deserialize_decimal")]
    pub low: Decimal,
    #[serde(rename = "c", deserialize_with = "deserialize_decimal")]
    pub close: Decimal,
    #[serde(rename = "v", deserialize_with = "deserialize_decimal")]
    pub volume: Decimal,
    /// Number of trades
    #[serde(rename = "n", default)]
    pub trades: u64,
}

/// `allMids` maps coin (or `@<id>` / asset id) to a decimal string.
pub type AllMidsResponse = HashMap<String, String>;

/// Historical funding rate record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingHistoryRecord {
    pub coin: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub funding_rate: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub premium: Decimal,
    /// Timestamp in milliseconds
    pub time: i64,
}

/// Response from `clearinghouseState`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    #[serde(default)]
    pub asset_positions: Vec<AssetPositionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPositionEntry {
    pub position: AccountPosition,
}

/// An open position as reported for one account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPosition {
    pub coin: String,
    /// Signed size: positive long, negative short
    #[serde(deserialize_with = "deserialize_decimal")]
    pub szi: Decimal,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub entry_px: Option<Decimal>,
    pub leverage: AccountLeverage,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub liquidation_px: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountLeverage {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: u32,
}

/// Inbound trades-channel message.
///
/// The feed wraps trades under `data`, sometimes twice, and delivers either a
/// single object or a list. Anything else lands in `Unknown`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TradeMessage {
    Envelope {
        #[serde(default)]
        channel: Option<String>,
        data: TradeData,
    },
    Unknown(Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TradeData {
    Many(Vec<Value>),
    Nested { data: Vec<Value> },
    One(serde_json::Map<String, Value>),
}

/// Subscription request for the WebSocket endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub method: &'static str,
    pub subscription: Subscription,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Subscription {
    #[serde(rename = "trades")]
    Trades { coin: String },
}

impl SubscribeRequest {
    pub fn trades(coin: &str) -> Self {
        Self {
            method: "subscribe",
            subscription: Subscription::Trades {
                coin: coin.to_string(),
            },
        }
    }
}

// Hyperliquid encodes decimals as strings; a few feeds send bare numbers.

#[derive(Deserialize)]
#[serde(untagged)]
enum DecimalRepr {
    Str(String),
    Num(serde_json::Number),
}

impl DecimalRepr {
    fn parse<E: serde::de::Error>(self) -> Result<Option<Decimal>, E> {
        let s = match self {
            DecimalRepr::Str(s) => s,
            DecimalRepr::Num(n) => n.to_string(),
        };
        if s.trim().is_empty() {
            return Ok(None);
        }
        s.parse::<Decimal>()
            .or_else(|_| Decimal::from_scientific(&s))
            .map(Some)
            .map_err(E::custom)
    }
}

fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let repr = DecimalRepr::deserialize(deserializer)?;
    repr.parse()?
        .ok_or_else(|| serde::de::Error::custom("empty decimal string"))
}

/// Handles null, missing and empty values.
fn deserialize_decimal_opt<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<DecimalRepr> = Option::deserialize(deserializer)?;
    match opt {
        Some(repr) => repr.parse(),
        None => Ok(None),
    }
}
