//! Client configuration.
//!
//! [`FeedConfig`] gathers the tunables of every component. It deserializes from
//! JSON with every field optional, so a config file only lists what it changes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    backoff::BackoffPolicy,
    error::{FeedError, Result},
};

/// Endpoint issuing the session cookie.
pub const DEFAULT_COOKIE_URL: &str = "https://fc.yahoo.com";

/// Endpoint returning the crumb for a cookie.
pub const DEFAULT_CRUMB_URL: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";

/// Host serving the JSON data endpoints.
pub const DEFAULT_API_BASE: &str = "https://query1.finance.yahoo.com";

/// Streaming endpoint.
pub const DEFAULT_STREAM_URL: &str = "wss://streamer.finance.yahoo.com/?version=2";

/// User agent for HTTP requests.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Configuration shared by the fetch layer, the batch downloader and the
/// streaming client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// User agent sent with every HTTP request.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Optional proxy url applied to all HTTP traffic.
    pub proxy: Option<String>,
    /// Scheme and host of the JSON data endpoints.
    pub api_base: String,
    /// Endpoint issuing the session cookie.
    pub cookie_url: String,
    /// Endpoint returning the crumb.
    pub crumb_url: String,
    /// Retries after rate limiting or transient failures.
    pub max_retries: u32,
    /// Delay shape between those retries.
    pub retry_backoff: BackoffPolicy,
    /// Number of responses kept by the request cache, 0 disables storage.
    pub cache_capacity: usize,
    /// Optional time after which cached responses are refetched.
    pub cache_ttl: Option<Duration>,
    /// Optional age after which credentials are refreshed proactively.
    pub credential_max_age: Option<Duration>,
    /// Default worker count for batch downloads.
    pub batch_concurrency: usize,
    /// Streaming endpoint.
    pub stream_url: String,
    /// Delay shape between reconnect attempts.
    pub reconnect_backoff: BackoffPolicy,
    /// Inbound silence after which the stream is considered dead.
    pub idle_timeout: Option<Duration>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            proxy: None,
            api_base: DEFAULT_API_BASE.to_string(),
            cookie_url: DEFAULT_COOKIE_URL.to_string(),
            crumb_url: DEFAULT_CRUMB_URL.to_string(),
            max_retries: 3,
            retry_backoff: BackoffPolicy::default(),
            cache_capacity: 512,
            cache_ttl: None,
            credential_max_age: None,
            batch_concurrency: 8,
            stream_url: DEFAULT_STREAM_URL.to_string(),
            reconnect_backoff: BackoffPolicy {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                ..BackoffPolicy::default()
            },
            idle_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl FeedConfig {
    /// Parses a JSON document, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| FeedError::InvalidParameter(e.to_string()))
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Routes HTTP traffic through a proxy.
    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Overrides the data endpoint host.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Overrides the cookie and crumb endpoints.
    #[must_use]
    pub fn with_auth_urls(mut self, cookie_url: impl Into<String>, crumb_url: impl Into<String>) -> Self {
        self.cookie_url = cookie_url.into();
        self.crumb_url = crumb_url.into();
        self
    }

    /// Sets the retry budget and its backoff.
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, backoff: BackoffPolicy) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Sets the cache capacity.
    #[must_use]
    pub const fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Expires cached responses after `ttl`.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the default batch worker count.
    #[must_use]
    pub const fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency;
        self
    }

    /// Overrides the streaming endpoint.
    #[must_use]
    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = url.into();
        self
    }

    /// Sets the reconnect backoff.
    #[must_use]
    pub fn with_reconnect_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Sets or disables the idle watchdog.
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}
