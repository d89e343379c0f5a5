//! Conversion of wire payloads into typed events.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use super::dedup::TradeKey;
use crate::exchange::{AssetCtx, ExchangeError, RawTrade, TradeData, TradeMessage};
use crate::risk::Side;

/// A normalized trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub asset: String,
    /// Aggressor side: LONG for a buy, SHORT for a sell
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp_ms: i64,
    pub key: TradeKey,
    pub is_liquidation: bool,
}

impl Trade {
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }

    /// Side of the position that was closed out: a sell aggressor liquidates a long.
    pub fn liquidated_side(&self) -> Side {
        self.side.opposite()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_ms).single()
    }
}

/// One asset's market state at poll time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub asset: String,
    pub mark_price: Decimal,
    pub mid_price: Option<Decimal>,
    pub oracle_price: Option<Decimal>,
    /// Open interest in contracts
    pub open_interest: Decimal,
    /// Hourly funding rate
    pub funding_rate: Decimal,
    pub volume_24h: Decimal,
    pub premium: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn from_ctx(asset: &str, ctx: &AssetCtx, observed_at: DateTime<Utc>) -> Self {
        Self {
            asset: asset.to_string(),
            mark_price: ctx.mark_px,
            mid_price: ctx.mid_px,
            oracle_price: ctx.oracle_px,
            open_interest: ctx.open_interest,
            funding_rate: ctx.funding,
            volume_24h: ctx.day_ntl_vlm.unwrap_or_default(),
            premium: ctx.premium,
            observed_at,
        }
    }

    pub fn open_interest_usd(&self) -> Decimal {
        self.open_interest * self.mark_price
    }

    /// Whether prices and OI are usable for risk analysis.
    pub fn is_valid(&self) -> bool {
        self.mark_price > Decimal::ZERO && self.open_interest > Decimal::ZERO
    }
}

/// Decode and validate one trade.
///
/// Missing or non-positive price/size is a domain error for this trade only.
pub fn trade_from_value(value: Value) -> Result<Trade, ExchangeError> {
    let raw: RawTrade = serde_json::from_value(value)
        .map_err(|e| ExchangeError::Domain(format!("malformed trade: {e}")))?;
    trade_from_raw(raw)
}

pub fn trade_from_raw(raw: RawTrade) -> Result<Trade, ExchangeError> {
    if raw.px <= Decimal::ZERO || raw.sz <= Decimal::ZERO {
        return Err(ExchangeError::Domain(format!(
            "trade for {} has non-positive price or size",
            raw.coin
        )));
    }

    let side = Side::from_label(&raw.side);
    let id = raw
        .tid
        .map(|tid| tid.to_string())
        .or(raw.hash)
        .unwrap_or_default();

    let key = TradeKey {
        asset: raw.coin.clone(),
        id,
        timestamp_ms: raw.time,
        side,
        price: raw.px,
        size: raw.sz,
    };

    Ok(Trade {
        asset: raw.coin,
        side,
        price: raw.px,
        size: raw.sz,
        timestamp_ms: raw.time,
        key,
        is_liquidation: raw.liquidation,
    })
}

/// Extract trade objects from one WebSocket text frame.
///
/// Non-trade channels (subscription acks, pongs) yield an empty list.
/// Malformed JSON is a protocol error for this frame only.
pub fn parse_trade_message(text: &str) -> Result<Vec<Value>, ExchangeError> {
    let message: TradeMessage = serde_json::from_str(text)
        .map_err(|e| ExchangeError::Protocol(format!("malformed frame: {e}")))?;

    let (channel, data) = match message {
        TradeMessage::Envelope { channel, data } => (channel, data),
        TradeMessage::Unknown(_) => return Ok(Vec::new()),
    };

    if channel.as_deref().is_some_and(|c| c != "trades") {
        return Ok(Vec::new());
    }

    let trades = match data {
        TradeData::Many(items) | TradeData::Nested { data: items } => items,
        TradeData::One(obj) if is_trade_object(&obj) => vec![Value::Object(obj)],
        TradeData::One(_) => Vec::new(),
    };

    Ok(trades.into_iter().filter(Value::is_object).collect())
}

fn is_trade_object(obj: &serde_json::Map<String, Value>) -> bool {
    ["px", "sz", "time"].iter().all(|k| obj.contains_key(*k))
}
