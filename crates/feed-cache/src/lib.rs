#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/feed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Response caching for the feed client.
//!
//! This crate provides [`RequestCache`], a bounded LRU cache of raw responses
//! keyed by [`RequestSignature`](feed_core::RequestSignature) that collapses
//! concurrent identical requests into a single fetch.

/// In-memory LRU cache implementation.
pub mod memory;

pub use memory::{CacheStats, RequestCache};
