//! Authenticated, cached and retrying HTTP fetches.

use std::sync::Arc;

use bytes::Bytes;
use feed_cache::RequestCache;
use feed_core::{
    BackoffPolicy, Credentials, FeedConfig, FeedError, HttpRequest, HttpTransport,
    RequestSignature, Result,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::auth::CredentialManager;

/// How a fetch interacts with the response cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Serve from cache when possible and store the fresh response.
    #[default]
    Use,
    /// Skip the lookup but store the fresh response.
    Refresh,
    /// Neither read nor write the cache.
    Bypass,
}

/// HTTP front door shared by every higher level component.
///
/// Every request carries the current cookie and crumb. A rejected credential
/// pair triggers exactly one refresh-and-retry; rate limits and transient
/// failures are retried with exponential backoff; everything else is returned
/// as is.
#[derive(Debug, Clone)]
pub struct FetchClient {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<CredentialManager>,
    cache: Arc<RequestCache>,
    max_retries: u32,
    retry_backoff: BackoffPolicy,
}

impl FetchClient {
    /// Creates a client from shared parts.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<CredentialManager>,
        cache: Arc<RequestCache>,
        config: &FeedConfig,
    ) -> Self {
        Self {
            transport,
            credentials,
            cache,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff.clone(),
        }
    }

    /// GET with query parameters, served from cache when possible.
    pub async fn get<I, K, V>(&self, url: &str, params: I) -> Result<Bytes>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.get_with(url, params, CacheMode::Use).await
    }

    /// GET with an explicit cache mode.
    pub async fn get_with<I, K, V>(&self, url: &str, params: I, mode: CacheMode) -> Result<Bytes>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let signature = RequestSignature::get(url, params);
        self.fetch(&signature, mode).await
    }

    /// POST a JSON body. Identical bodies to the same url share a cache entry.
    pub async fn post(&self, url: &str, body: impl Into<Bytes>) -> Result<Bytes> {
        let signature = RequestSignature::post(url, body.into());
        self.fetch(&signature, CacheMode::Use).await
    }

    /// Executes a prepared request signature.
    pub async fn fetch(&self, signature: &RequestSignature, mode: CacheMode) -> Result<Bytes> {
        match mode {
            CacheMode::Use => {
                self.cache
                    .get_or_fetch(signature, || self.fetch_with_retry(signature))
                    .await
            }
            CacheMode::Refresh => {
                self.cache
                    .refresh(signature, || self.fetch_with_retry(signature))
                    .await
            }
            CacheMode::Bypass => self.fetch_with_retry(signature).await,
        }
    }

    /// Shared credential manager.
    pub const fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// Shared response cache.
    pub const fn cache(&self) -> &Arc<RequestCache> {
        &self.cache
    }

    #[instrument(skip(self), fields(signature = %signature))]
    async fn fetch_with_retry(&self, signature: &RequestSignature) -> Result<Bytes> {
        let mut backoff = self.retry_backoff.start();
        let mut auth_retried = false;

        loop {
            let credentials = self.credentials.obtain().await?;

            match self.execute_once(signature, &credentials).await {
                Ok(body) => return Ok(body),
                Err(FeedError::Auth(reason)) if !auth_retried => {
                    warn!(%reason, "Credentials rejected, refreshing");
                    auth_retried = true;
                    self.credentials.invalidate_stale(&credentials);
                    self.cache.invalidate(signature);
                }
                Err(err) if err.is_retryable() => {
                    if backoff.attempt_count() >= self.max_retries {
                        warn!(error = %err, retries = self.max_retries, "Retries exhausted");
                        return Err(err);
                    }
                    let Some(delay) = backoff.next_delay() else {
                        return Err(err);
                    };
                    // A server hint wins when it is longer, up to the policy ceiling.
                    let delay = err
                        .retry_after()
                        .map_or(delay, |hint| hint.min(self.retry_backoff.max_delay).max(delay));

                    debug!(
                        attempt = backoff.attempt_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn execute_once(
        &self,
        signature: &RequestSignature,
        credentials: &Credentials,
    ) -> Result<Bytes> {
        let request = HttpRequest::from_signature(signature).with_credentials(credentials);
        let response = self.transport.execute(request).await?;

        match FeedError::from_status(response.status, signature.url(), response.retry_after) {
            Some(err) => Err(err),
            None => Ok(response.body),
        }
    }
}
