//! Per-symbol access.

use std::sync::Arc;

use bytes::Bytes;
use feed_core::{Result, Symbol};
use feed_yahoo::{FetchClient, endpoints};
use tracing::debug;

use crate::loaded::Loaded;

/// Raw data access for one symbol.
///
/// The quote snapshot is loaded once per instance and then served from
/// memory, independent of the shared response cache. Other endpoints go
/// through the context's [`FetchClient`] and its cache.
#[derive(Debug)]
pub struct Ticker {
    symbol: Symbol,
    api_base: String,
    client: FetchClient,
    quote: Loaded<Bytes>,
}

impl Ticker {
    /// Creates a ticker backed by `client`, with endpoints rooted at `api_base`.
    pub fn new(symbol: impl Into<Symbol>, client: FetchClient, api_base: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            api_base: api_base.into(),
            client,
            quote: Loaded::new(),
        }
    }

    /// The ticker's symbol.
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Raw quote payload, fetched on first call.
    pub async fn quote_snapshot(&self) -> Result<Arc<Bytes>> {
        self.quote
            .get_or_load(|| async {
                debug!(symbol = %self.symbol, "Loading quote snapshot");
                let url = format!("{}{}", self.api_base, endpoints::QUOTE_PATH);
                self.client
                    .get(&url, [("symbols", self.symbol.as_str())])
                    .await
            })
            .await
    }

    /// Drops the loaded quote so the next [`quote_snapshot`](Self::quote_snapshot) refetches.
    pub fn reload_quote(&mut self) {
        self.quote.reset();
    }

    /// Raw chart payload for a range such as `"1mo"` at an interval such as `"1d"`.
    pub async fn chart(&self, range: &str, interval: &str) -> Result<Bytes> {
        let url = format!("{}{}/{}", self.api_base, endpoints::CHART_PATH, self.symbol);
        self.client
            .get(
                &url,
                [
                    ("range", range),
                    ("interval", interval),
                    ("includeAdjustedClose", "true"),
                ],
            )
            .await
    }

    /// Raw quote summary payload for the given modules.
    pub async fn summary(&self, modules: &[&str]) -> Result<Bytes> {
        let url = format!(
            "{}{}/{}",
            self.api_base,
            endpoints::QUOTE_SUMMARY_PATH,
            self.symbol
        );
        self.client.get(&url, [("modules", modules.join(","))]).await
    }
}
