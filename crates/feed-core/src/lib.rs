#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/feed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for the market data access layer.
//!
//! This crate provides the foundational abstractions shared by every other crate:
//!
//! - [`FeedError`](error::FeedError) - Typed error taxonomy
//! - [`RequestSignature`](types::RequestSignature) - Cache key for HTTP requests
//! - [`HttpTransport`](transport::HttpTransport) - HTTP seam
//! - [`StreamConnector`](transport::StreamConnector) - Streaming socket seam
//! - [`BackoffPolicy`](backoff::BackoffPolicy) - Retry and reconnect delays
//! - [`FeedConfig`](config::FeedConfig) - Tunables

/// Exponential backoff with jitter.
pub mod backoff;
/// Client configuration.
pub mod config;
/// Error types for feed operations.
pub mod error;
/// Transport traits for HTTP and streaming.
pub mod transport;
/// Core data types (Symbol, RequestSignature, StreamMessage, etc.).
pub mod types;

// Re-export commonly used items at crate root
pub use backoff::{Backoff, BackoffPolicy};
pub use config::FeedConfig;
pub use error::{FeedError, Result};
pub use transport::{
    Frame, FrameSink, FrameSource, HttpRequest, HttpResponse, HttpTransport, StreamConnector,
};
pub use types::{
    BatchResult, Credentials, MarketSession, Method, OptionKind, QuoteType, RequestSignature,
    StreamMessage, SubscriptionSet, Symbol,
};
