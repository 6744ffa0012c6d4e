#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/feed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Unified access to the feed fetch, batch and streaming clients.
//!
//! This crate re-exports the core types and the Yahoo Finance clients, and
//! provides a [`FeedContext`] that wires them together around one set of
//! credentials and one response cache.
//!
//! # Example
//!
//! ```no_run
//! use feed::{FeedConfig, FeedContext};
//!
//! #[tokio::main]
//! async fn main() -> feed::Result<()> {
//!     let context = FeedContext::new(FeedConfig::default())?;
//!
//!     let stream = context.streaming_client();
//!     stream.subscribe(["AAPL", "BTC-USD"]).await?;
//!     stream
//!         .listen(|message| println!("{} {}", message.symbol, message.price))
//!         .await
//! }
//! ```

// Core types and traits
pub use feed_core::*;

// Cache
pub use feed_cache::{CacheStats, RequestCache};

// Clients
pub use feed_yahoo::{
    BatchFetcher, BlockingStreamingClient, CacheMode, ConnectionState, CredentialManager,
    FailureMode, FetchClient, MessageStream, ReqwestTransport, StreamingClient, WsConnector,
    endpoints,
};

mod context;
mod loaded;
mod ticker;

pub use context::{FeedContext, FeedContextBuilder};
pub use loaded::Loaded;
pub use ticker::Ticker;
