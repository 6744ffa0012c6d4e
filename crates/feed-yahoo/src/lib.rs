#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/feed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Yahoo Finance access layer.
//!
//! # Features
//!
//! - Lazily obtained cookie/crumb credentials with single-flight refresh
//! - Cached, deduplicated and retrying HTTP fetches
//! - Bounded-concurrency batch downloads with per-id results
//! - Reconnecting pricing stream in async and blocking flavours
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use feed_cache::RequestCache;
//! use feed_core::{FeedConfig, HttpTransport};
//! use feed_yahoo::{CredentialManager, FetchClient, ReqwestTransport, endpoints};
//!
//! # async fn example() -> feed_core::Result<()> {
//! let config = FeedConfig::default();
//! let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&config)?);
//! let credentials = Arc::new(CredentialManager::new(Arc::clone(&transport), &config));
//! let cache = Arc::new(RequestCache::new(config.cache_capacity));
//! let client = FetchClient::new(transport, credentials, cache, &config);
//!
//! let url = format!("{}{}", config.api_base, endpoints::QUOTE_PATH);
//! let body = client.get(&url, [("symbols", "AAPL")]).await?;
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```

/// Cookie/crumb credential management.
pub mod auth;
/// Bounded-concurrency batch downloads.
pub mod batch;
/// Authenticated HTTP fetches.
pub mod fetch;
/// Live pricing stream.
pub mod stream;
/// `reqwest` transport.
pub mod transport;

#[cfg(test)]
mod testing;

/// Well-known Yahoo Finance endpoint paths, relative to `FeedConfig::api_base`.
pub mod endpoints {
    /// Quote snapshot API.
    pub const QUOTE_PATH: &str = "/v7/finance/quote";

    /// Chart API; the symbol is appended as a path segment.
    pub const CHART_PATH: &str = "/v8/finance/chart";

    /// Quote summary API; the symbol is appended as a path segment.
    pub const QUOTE_SUMMARY_PATH: &str = "/v10/finance/quoteSummary";
}

pub use auth::CredentialManager;
pub use batch::{BatchFetcher, FailureMode};
pub use fetch::{CacheMode, FetchClient};
pub use stream::blocking::BlockingStreamingClient;
pub use stream::ws::WsConnector;
pub use stream::{ConnectionState, MessageStream, StreamingClient};
pub use transport::ReqwestTransport;
