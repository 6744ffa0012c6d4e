//! Wire format of the pricing socket.
//!
//! Data frames carry a base64 encoded protobuf `PricingData` record, either
//! bare or wrapped in a JSON envelope `{"type": "pricing", "message": "..."}`.
//! Binary frames carry the same record length-delimited. Control messages sent
//! to the server are plain JSON: `{"subscribe": [...]}` and
//! `{"unsubscribe": [...]}`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeZone, Utc};
use feed_core::{
    FeedError, Frame, MarketSession, OptionKind, QuoteType, Result, StreamMessage, Symbol,
};
use prost::Message;
use serde::Deserialize;
use serde_json::json;

/// Protobuf record pushed by the server.
///
/// Every field is optional on the wire; presence of the required ones is
/// checked when converting into a [`StreamMessage`].
#[derive(Clone, PartialEq, Message)]
pub struct PricingData {
    /// Ticker symbol.
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    /// Last price.
    #[prost(float, optional, tag = "2")]
    pub price: Option<f32>,
    /// Quote time in epoch milliseconds.
    #[prost(sint64, optional, tag = "3")]
    pub time: Option<i64>,
    /// Quote currency.
    #[prost(string, optional, tag = "4")]
    pub currency: Option<String>,
    /// Exchange code.
    #[prost(string, optional, tag = "5")]
    pub exchange: Option<String>,
    /// Instrument class.
    #[prost(enumeration = "WireQuoteType", optional, tag = "6")]
    pub quote_type: Option<i32>,
    /// Trading session.
    #[prost(enumeration = "WireMarketHours", optional, tag = "7")]
    pub market_hours: Option<i32>,
    /// Percent change on the day.
    #[prost(float, optional, tag = "8")]
    pub change_percent: Option<f32>,
    /// Volume traded on the day.
    #[prost(sint64, optional, tag = "9")]
    pub day_volume: Option<i64>,
    /// Session high.
    #[prost(float, optional, tag = "10")]
    pub day_high: Option<f32>,
    /// Session low.
    #[prost(float, optional, tag = "11")]
    pub day_low: Option<f32>,
    /// Absolute change on the day.
    #[prost(float, optional, tag = "12")]
    pub change: Option<f32>,
    /// Display name.
    #[prost(string, optional, tag = "13")]
    pub short_name: Option<String>,
    /// Contract expiry in epoch seconds.
    #[prost(sint64, optional, tag = "14")]
    pub expire_date: Option<i64>,
    /// Open interest.
    #[prost(sint64, optional, tag = "15")]
    pub open_interest: Option<i64>,
    /// Underlying of a derivative.
    #[prost(string, optional, tag = "16")]
    pub underlying_symbol: Option<String>,
    /// Strike of an option.
    #[prost(float, optional, tag = "17")]
    pub strike_price: Option<f32>,
    /// Call or put.
    #[prost(enumeration = "WireOptionType", optional, tag = "18")]
    pub option_type: Option<i32>,
}

/// Instrument class as numbered on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum WireQuoteType {
    /// Unset.
    None = 0,
    /// Alternative symbol.
    Altsymbol = 5,
    /// Keep-alive record.
    Heartbeat = 7,
    /// Equity.
    Equity = 8,
    /// Index.
    Index = 9,
    /// Mutual fund.
    Mutualfund = 11,
    /// Money market fund.
    Moneymarket = 12,
    /// Option.
    Option = 13,
    /// Currency.
    Currency = 14,
    /// Warrant.
    Warrant = 15,
    /// Bond.
    Bond = 17,
    /// Future.
    Future = 18,
    /// ETF.
    Etf = 20,
    /// Commodity.
    Commodity = 23,
    /// ECN quote.
    Ecnquote = 28,
    /// Cryptocurrency.
    Cryptocurrency = 41,
    /// Indicator.
    Indicator = 42,
    /// Industry.
    Industry = 1000,
}

/// Trading session as numbered on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum WireMarketHours {
    /// Pre-market.
    PreMarket = 0,
    /// Regular session.
    RegularMarket = 1,
    /// Post-market.
    PostMarket = 2,
    /// Extended hours.
    ExtendedHoursMarket = 3,
}

/// Option side as numbered on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum WireOptionType {
    /// Call.
    Call = 0,
    /// Put.
    Put = 1,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

/// Decodes one frame.
///
/// Returns `Ok(None)` for frames that carry no quote (heartbeats and server
/// acknowledgements) and [`FeedError::Decode`] for malformed ones.
pub fn decode_frame(frame: &Frame) -> Result<Option<StreamMessage>> {
    let record = match frame {
        Frame::Text(text) => {
            let text = text.trim();
            let payload = if text.starts_with('{') {
                let envelope: Envelope = serde_json::from_str(text)
                    .map_err(|e| FeedError::Decode(format!("invalid envelope: {e}")))?;
                match envelope.message {
                    Some(message) => message,
                    None => {
                        tracing::trace!(kind = ?envelope.kind, "Ignoring control frame");
                        return Ok(None);
                    }
                }
            } else {
                text.to_string()
            };

            let bytes = STANDARD
                .decode(payload.trim())
                .map_err(|e| FeedError::Decode(format!("invalid base64: {e}")))?;
            PricingData::decode(bytes.as_slice())
                .map_err(|e| FeedError::Decode(format!("invalid protobuf: {e}")))?
        }
        Frame::Binary(bytes) => PricingData::decode_length_delimited(bytes.as_ref())
            .map_err(|e| FeedError::Decode(format!("invalid protobuf: {e}")))?,
    };

    record.into_message()
}

impl PricingData {
    /// Converts the wire record, returning `Ok(None)` for heartbeats.
    pub fn into_message(self) -> Result<Option<StreamMessage>> {
        if self.quote_type == Some(WireQuoteType::Heartbeat as i32) {
            return Ok(None);
        }

        let symbol = self
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(Symbol::new)
            .ok_or_else(|| FeedError::Decode("record has no symbol".to_string()))?;

        let price = self
            .price
            .filter(|p| p.is_finite())
            .map(f64::from)
            .ok_or_else(|| FeedError::Decode(format!("{symbol}: missing or invalid price")))?;

        let timestamp = self
            .time
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| FeedError::Decode(format!("{symbol}: missing or invalid time")))?;

        let mut message = StreamMessage::new(symbol, price, timestamp)
            .with_exchange(self.exchange.unwrap_or_default());

        message.currency = self.currency.filter(|c| !c.is_empty());
        message.quote_type = self
            .quote_type
            .and_then(|v| WireQuoteType::try_from(v).ok())
            .and_then(WireQuoteType::to_quote_type);
        message.market_session = self
            .market_hours
            .and_then(|v| WireMarketHours::try_from(v).ok())
            .map(WireMarketHours::to_session);
        message.change_percent = self.change_percent.map(f64::from);
        message.change = self.change.map(f64::from);
        message.day_volume = self.day_volume;
        message.day_high = self.day_high.map(f64::from);
        message.day_low = self.day_low.map(f64::from);
        message.short_name = self.short_name.filter(|n| !n.is_empty());
        message.expire_date = self.expire_date.and_then(seconds_to_datetime);
        message.open_interest = self.open_interest;
        message.underlying_symbol = self
            .underlying_symbol
            .filter(|s| !s.trim().is_empty())
            .map(Symbol::new);
        message.strike_price = self.strike_price.map(f64::from);
        message.option_kind = self
            .option_type
            .and_then(|v| WireOptionType::try_from(v).ok())
            .map(|side| match side {
                WireOptionType::Call => OptionKind::Call,
                WireOptionType::Put => OptionKind::Put,
            });

        Ok(Some(message))
    }
}

impl WireQuoteType {
    const fn to_quote_type(self) -> Option<QuoteType> {
        Some(match self {
            Self::None | Self::Heartbeat => return None,
            Self::Altsymbol => QuoteType::AltSymbol,
            Self::Equity => QuoteType::Equity,
            Self::Index => QuoteType::Index,
            Self::Mutualfund => QuoteType::MutualFund,
            Self::Moneymarket => QuoteType::MoneyMarket,
            Self::Option => QuoteType::Option,
            Self::Currency => QuoteType::Currency,
            Self::Warrant => QuoteType::Warrant,
            Self::Bond => QuoteType::Bond,
            Self::Future => QuoteType::Future,
            Self::Etf => QuoteType::Etf,
            Self::Commodity => QuoteType::Commodity,
            Self::Ecnquote => QuoteType::EcnQuote,
            Self::Cryptocurrency => QuoteType::Cryptocurrency,
            Self::Indicator => QuoteType::Indicator,
            Self::Industry => QuoteType::Industry,
        })
    }
}

impl WireMarketHours {
    const fn to_session(self) -> MarketSession {
        match self {
            Self::PreMarket => MarketSession::PreMarket,
            Self::RegularMarket => MarketSession::Regular,
            Self::PostMarket => MarketSession::PostMarket,
            Self::ExtendedHoursMarket => MarketSession::ExtendedHours,
        }
    }
}

fn seconds_to_datetime(seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        return None;
    }
    Utc.timestamp_opt(seconds, 0).single()
}

/// Control message adding symbols to the server-side subscription.
pub fn subscribe_message(symbols: &[Symbol]) -> String {
    control_message("subscribe", symbols)
}

/// Control message removing symbols from the server-side subscription.
pub fn unsubscribe_message(symbols: &[Symbol]) -> String {
    control_message("unsubscribe", symbols)
}

fn control_message(action: &str, symbols: &[Symbol]) -> String {
    let symbols: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
    let mut object = serde_json::Map::new();
    object.insert(action.to_string(), json!(symbols));
    serde_json::Value::Object(object).to_string()
}

/// Symbols named in a control message, for inspection.
pub fn parse_control_message(text: &str) -> Option<(String, Vec<Symbol>)> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let (action, symbols) = value.as_object()?.iter().next()?;
    let symbols = symbols
        .as_array()?
        .iter()
        .filter_map(serde_json::Value::as_str)
        .map(Symbol::new)
        .collect();
    Some((action.clone(), symbols))
}
