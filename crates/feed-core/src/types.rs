//! Core data types shared across the workspace.
//!
//! This module defines the fundamental data structures:
//!
//! - [`Symbol`] - Trading symbol/ticker
//! - [`RequestSignature`] - Normalized cache key for an HTTP request
//! - [`Credentials`] - Cookie/crumb pair authorizing requests
//! - [`SubscriptionSet`] - Symbols a streaming client is subscribed to
//! - [`StreamMessage`] - Decoded live pricing record
//! - [`BatchResult`] - Per-entity outcome of a batch download

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;

/// A trading symbol/ticker.
///
/// Symbols are automatically uppercased and trimmed on creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Creates a new symbol from a string, converting to uppercase.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_uppercase())
    }

    /// Returns the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// HTTP method of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// Normalized identity of a cacheable request.
///
/// Parameters are stored sorted, so two requests that only differ in parameter
/// order compare and hash equal. A POST body is part of the identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestSignature {
    method: Method,
    url: String,
    params: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl RequestSignature {
    /// Creates a signature from its parts, normalizing the parameter set.
    #[must_use]
    pub fn new<I, K, V>(method: Method, url: impl Into<String>, params: I, body: Option<Bytes>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let params: BTreeSet<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        Self {
            method,
            url: url.into(),
            params: params.into_iter().collect(),
            body,
        }
    }

    /// Signature of a `GET` request.
    #[must_use]
    pub fn get<I, K, V>(url: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(Method::Get, url, params, None)
    }

    /// Signature of a `POST` request with a body.
    #[must_use]
    pub fn post(url: impl Into<String>, body: Bytes) -> Self {
        Self::new(Method::Post, url, std::iter::empty::<(String, String)>(), Some(body))
    }

    /// Request method.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request url without query parameters.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Normalized (sorted, de-duplicated) query parameters.
    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Request body, if any.
    #[must_use]
    pub const fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{k}={v}")?;
        }
        Ok(())
    }
}

/// Cookie/crumb pair authorizing requests against the remote service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Session cookie sent in the `Cookie` header.
    pub cookie: String,
    /// Token sent as the `crumb` query parameter.
    pub crumb: String,
    /// When the pair was obtained.
    pub obtained_at: DateTime<Utc>,
}

impl Credentials {
    /// Creates credentials obtained now.
    #[must_use]
    pub fn new(cookie: impl Into<String>, crumb: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
            crumb: crumb.into(),
            obtained_at: Utc::now(),
        }
    }

    /// Returns true if the pair is older than `max_age`.
    #[must_use]
    pub fn is_older_than(&self, max_age: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.obtained_at);
        age > chrono::TimeDelta::from_std(max_age).unwrap_or(chrono::TimeDelta::MAX)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("cookie", &"<redacted>")
            .field("crumb", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Set of symbols a streaming client is subscribed to.
///
/// Iteration order is sorted, so protocol messages built from the set are
/// deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    symbols: BTreeSet<Symbol>,
}

impl SubscriptionSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            symbols: BTreeSet::new(),
        }
    }

    /// Adds symbols, returning only those that were not already present.
    pub fn insert<I>(&mut self, symbols: I) -> Vec<Symbol>
    where
        I: IntoIterator,
        I::Item: Into<Symbol>,
    {
        symbols
            .into_iter()
            .map(Into::into)
            .filter(|s| self.symbols.insert(s.clone()))
            .collect()
    }

    /// Removes symbols, returning only those that were present.
    pub fn remove<I>(&mut self, symbols: I) -> Vec<Symbol>
    where
        I: IntoIterator,
        I::Item: Into<Symbol>,
    {
        symbols
            .into_iter()
            .map(Into::into)
            .filter(|s| self.symbols.remove(s))
            .collect()
    }

    /// Returns true if the symbol is subscribed.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.symbols.contains(symbol)
    }

    /// Number of subscribed symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Returns true if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Returns an iterator over the symbols in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// Snapshot of the set in sorted order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Symbol> {
        self.symbols.iter().cloned().collect()
    }
}

impl<S: Into<Symbol>> FromIterator<S> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            symbols: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Instrument class of a streamed quote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuoteType {
    /// Alternative symbol mapping.
    AltSymbol,
    /// Stock/equity.
    Equity,
    /// Market index.
    Index,
    /// Mutual fund.
    MutualFund,
    /// Money market fund.
    MoneyMarket,
    /// Option contract.
    Option,
    /// Currency pair.
    Currency,
    /// Warrant.
    Warrant,
    /// Bond.
    Bond,
    /// Futures contract.
    Future,
    /// Exchange traded fund.
    Etf,
    /// Commodity.
    Commodity,
    /// ECN quote.
    EcnQuote,
    /// Digital asset.
    Cryptocurrency,
    /// Market indicator.
    Indicator,
    /// Industry aggregate.
    Industry,
}

/// Trading session a streamed quote belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketSession {
    /// Before the regular open.
    PreMarket,
    /// Regular hours.
    Regular,
    /// After the regular close.
    PostMarket,
    /// Combined extended hours.
    ExtendedHours,
}

/// Call or put.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionKind {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

/// A decoded live pricing record.
///
/// Everything beyond symbol, price and timestamp is optional on the wire and
/// defaults to `None` (or an empty exchange) when absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Last price.
    pub price: f64,
    /// Quote time.
    pub timestamp: DateTime<Utc>,
    /// Exchange code, empty when not sent.
    pub exchange: String,
    /// Quote currency.
    pub currency: Option<String>,
    /// Instrument class.
    pub quote_type: Option<QuoteType>,
    /// Trading session.
    pub market_session: Option<MarketSession>,
    /// Percentage change since previous close.
    pub change_percent: Option<f64>,
    /// Absolute change since previous close.
    pub change: Option<f64>,
    /// Volume traded today.
    pub day_volume: Option<i64>,
    /// Today's high.
    pub day_high: Option<f64>,
    /// Today's low.
    pub day_low: Option<f64>,
    /// Short display name.
    pub short_name: Option<String>,
    /// Expiry of a derivative.
    pub expire_date: Option<DateTime<Utc>>,
    /// Open interest of a derivative.
    pub open_interest: Option<i64>,
    /// Underlying of a derivative.
    pub underlying_symbol: Option<Symbol>,
    /// Option strike.
    pub strike_price: Option<f64>,
    /// Call or put.
    pub option_kind: Option<OptionKind>,
}

impl StreamMessage {
    /// Creates a message with the required fields and everything else unset.
    #[must_use]
    pub const fn new(symbol: Symbol, price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            price,
            timestamp,
            exchange: String::new(),
            currency: None,
            quote_type: None,
            market_session: None,
            change_percent: None,
            change: None,
            day_volume: None,
            day_high: None,
            day_low: None,
            short_name: None,
            expire_date: None,
            open_interest: None,
            underlying_symbol: None,
            strike_price: None,
            option_kind: None,
        }
    }

    /// Sets the exchange.
    #[must_use]
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }
}

/// Outcome of a batch download: exactly one entry per requested id.
///
/// Entries are kept in the order the ids were requested.
#[derive(Debug)]
pub struct BatchResult<T> {
    entries: Vec<(String, Result<T>)>,
}

impl<T> BatchResult<T> {
    /// Builds a result from ordered entries.
    #[must_use]
    pub const fn from_entries(entries: Vec<(String, Result<T>)>) -> Self {
        Self { entries }
    }

    /// Outcome for one id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Result<T>> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == id).then_some(v))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no ids were requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids in request order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Iterates over `(id, outcome)` in request order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Result<T>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Successful entries.
    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().ok().map(|v| (k.as_str(), v)))
    }

    /// Failed entries.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &crate::FeedError)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().err().map(|e| (k.as_str(), e)))
    }

    /// Consumes the result into a map keyed by id.
    #[must_use]
    pub fn into_map(self) -> HashMap<String, Result<T>> {
        self.entries.into_iter().collect()
    }
}

impl<T> IntoIterator for BatchResult<T> {
    type Item = (String, Result<T>);
    type IntoIter = std::vec::IntoIter<(String, Result<T>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
