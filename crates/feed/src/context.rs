//! Shared credentials, cache and transports behind one handle.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use feed_cache::RequestCache;
use feed_core::{BatchResult, FeedConfig, HttpTransport, Result, StreamConnector, Symbol};
use feed_yahoo::{
    BatchFetcher, BlockingStreamingClient, CredentialManager, FetchClient, ReqwestTransport,
    StreamingClient, WsConnector, endpoints,
};
use tracing::{debug, info};

use crate::ticker::Ticker;

/// Everything the clients of one session share.
///
/// A context owns one credential manager and one request cache. Every
/// [`FetchClient`], [`Ticker`] and batch download it hands out goes through
/// them, so a crumb obtained by one caller serves all others. Cloning is
/// cheap and shares the same state; separate contexts never share anything.
///
/// # Example
///
/// ```no_run
/// use feed::{FeedConfig, FeedContext};
///
/// # async fn example() -> feed::Result<()> {
/// let context = FeedContext::new(FeedConfig::default())?;
///
/// let ticker = context.ticker("AAPL");
/// let quote = ticker.quote_snapshot().await?;
///
/// let quotes = context.download_quotes(["MSFT", "NVDA"]).await;
/// println!("{} bytes, {} failed", quote.len(), quotes.failures().count());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FeedContext {
    config: Arc<FeedConfig>,
    client: FetchClient,
    connector: Arc<dyn StreamConnector>,
}

impl fmt::Debug for FeedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedContext")
            .field("api_base", &self.config.api_base)
            .field("stream_url", &self.config.stream_url)
            .field("cache", &self.client.cache().stats())
            .field("credentials", &self.credentials().current().map(|_| "obtained"))
            .finish()
    }
}

impl FeedContext {
    /// Creates a context with the default reqwest and websocket transports.
    pub fn new(config: FeedConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Starts a builder for contexts with custom transports.
    pub fn builder(config: FeedConfig) -> FeedContextBuilder {
        FeedContextBuilder {
            config,
            transport: None,
            connector: None,
        }
    }

    /// Configuration the context was built with.
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Fetch client over the shared credentials and cache.
    pub fn client(&self) -> &FetchClient {
        &self.client
    }

    /// Shared credential manager.
    pub fn credentials(&self) -> &Arc<CredentialManager> {
        self.client.credentials()
    }

    /// Shared response cache.
    pub fn cache(&self) -> &Arc<RequestCache> {
        self.client.cache()
    }

    /// Batch downloader sized by `batch_concurrency`.
    pub fn batch_fetcher(&self) -> BatchFetcher {
        BatchFetcher::new(self.config.batch_concurrency)
    }

    /// A new, disconnected streaming client.
    ///
    /// Each call returns an independent connection with its own subscriptions.
    pub fn streaming_client(&self) -> StreamingClient {
        StreamingClient::new(Arc::clone(&self.connector), &self.config)
    }

    /// A new, disconnected blocking streaming client.
    ///
    /// Its blocking methods must not be called from inside an async context.
    pub fn blocking_streaming_client(&self) -> Result<BlockingStreamingClient> {
        BlockingStreamingClient::from_async(self.streaming_client())
    }

    /// Per-symbol access sharing this context's credentials and cache.
    pub fn ticker(&self, symbol: impl Into<Symbol>) -> Ticker {
        Ticker::new(symbol, self.client.clone(), self.config.api_base.clone())
    }

    /// Raw quote payloads for many symbols, one outcome per distinct symbol.
    pub async fn download_quotes<I, S>(&self, symbols: I) -> BatchResult<Bytes>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = self.client.clone();
        let url: Arc<str> = format!("{}{}", self.config.api_base, endpoints::QUOTE_PATH).into();

        let result = self
            .batch_fetcher()
            .download(symbols, move |symbol| {
                let client = client.clone();
                let url = Arc::clone(&url);
                async move { client.get(&url, [("symbols", symbol)]).await }
            })
            .await;

        debug!(
            succeeded = result.successes().count(),
            failed = result.failures().count(),
            "Quote download finished"
        );
        result
    }
}

/// Builder for [`FeedContext`].
#[derive(Debug)]
pub struct FeedContextBuilder {
    config: FeedConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    connector: Option<Arc<dyn StreamConnector>>,
}

impl FeedContextBuilder {
    /// Uses `transport` for all HTTP traffic instead of reqwest.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses `connector` for streaming connections instead of websockets.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Builds the context.
    ///
    /// Fails only when the default HTTP transport cannot be created, for
    /// example because the configured proxy is invalid.
    pub fn build(self) -> Result<FeedContext> {
        let Self {
            config,
            transport,
            connector,
        } = self;

        let transport = match transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config)?),
        };
        let connector =
            connector.unwrap_or_else(|| Arc::new(WsConnector::from_config(&config)));

        let mut cache = RequestCache::new(config.cache_capacity);
        if let Some(ttl) = config.cache_ttl {
            cache = cache.with_ttl(ttl);
        }

        let credentials = Arc::new(CredentialManager::new(Arc::clone(&transport), &config));
        let client = FetchClient::new(transport, credentials, Arc::new(cache), &config);

        info!(
            api_base = %config.api_base,
            cache_capacity = config.cache_capacity,
            "Feed context ready"
        );

        Ok(FeedContext {
            config: Arc::new(config),
            client,
            connector,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use feed_core::{BackoffPolicy, FeedError, FrameSink, FrameSource};
    use feed_yahoo::ConnectionState;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_auth(server: &MockServer, expected_crumbs: u64) {
        Mock::given(method("GET"))
            .and(path("/cookie"))
            .respond_with(ResponseTemplate::new(404).insert_header("set-cookie", "A3=abc; Path=/"))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/crumb"))
            .respond_with(ResponseTemplate::new(200).set_body_string("crumb-1"))
            .expect(expected_crumbs)
            .mount(server)
            .await;
    }

    fn config_for(server: &MockServer) -> FeedConfig {
        FeedConfig::default()
            .with_api_base(server.uri())
            .with_auth_urls(format!("{}/cookie", server.uri()), format!("{}/crumb", server.uri()))
            .with_retries(
                0,
                BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(5), 2.0),
            )
    }

    #[derive(Debug)]
    struct RefusingConnector;

    #[async_trait]
    impl StreamConnector for RefusingConnector {
        async fn connect(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
            Err(FeedError::Connection("refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_ticker_snapshot_loaded_once() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/v7/finance/quote"))
            .and(query_param("symbols", "AAPL"))
            .and(query_param("crumb", "crumb-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("aapl"))
            .expect(2)
            .mount(&server)
            .await;

        let context = FeedContext::new(config_for(&server)).unwrap();
        let mut ticker = context.ticker("AAPL");
        assert_eq!(ticker.symbol().as_str(), "AAPL");

        let first = ticker.quote_snapshot().await.unwrap();
        let second = ticker.quote_snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.as_ref(), &Bytes::from_static(b"aapl"));

        // Reloading bypasses the snapshot but the shared cache still answers.
        ticker.reload_quote();
        context.cache().clear();
        let reloaded = ticker.quote_snapshot().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));
    }

    #[tokio::test]
    async fn test_ticker_chart_and_summary_paths() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/MSFT"))
            .and(query_param("range", "1mo"))
            .and(query_param("interval", "1d"))
            .respond_with(ResponseTemplate::new(200).set_body_string("chart"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v10/finance/quoteSummary/MSFT"))
            .and(query_param("modules", "price,summaryDetail"))
            .respond_with(ResponseTemplate::new(200).set_body_string("summary"))
            .expect(1)
            .mount(&server)
            .await;

        let context = FeedContext::new(config_for(&server)).unwrap();
        let ticker = context.ticker("MSFT");

        assert_eq!(ticker.chart("1mo", "1d").await.unwrap(), "chart");
        assert_eq!(ticker.chart("1mo", "1d").await.unwrap(), "chart");
        assert_eq!(
            ticker.summary(&["price", "summaryDetail"]).await.unwrap(),
            "summary"
        );
    }

    #[tokio::test]
    async fn test_download_quotes_reports_each_symbol() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        for symbol in ["A", "C"] {
            Mock::given(method("GET"))
                .and(path("/v7/finance/quote"))
                .and(query_param("symbols", symbol))
                .respond_with(ResponseTemplate::new(200).set_body_string(symbol))
                .mount(&server)
                .await;
        }

        let context = FeedContext::new(config_for(&server).with_batch_concurrency(2)).unwrap();
        assert_eq!(context.batch_fetcher().concurrency(), 2);

        let result = context.download_quotes(["A", "B", "C"]).await;
        assert_eq!(result.len(), 3);
        assert_eq!(result.get("A"), Some(&Ok(Bytes::from_static(b"A"))));
        assert_eq!(result.get("C"), Some(&Ok(Bytes::from_static(b"C"))));
        assert!(matches!(result.get("B"), Some(Err(FeedError::NotFound(_)))));
    }

    #[tokio::test]
    async fn test_clones_share_credentials_contexts_do_not() {
        let server = MockServer::start().await;
        mount_auth(&server, 2).await;
        Mock::given(method("GET"))
            .and(path("/v7/finance/quote"))
            .respond_with(ResponseTemplate::new(200).set_body_string("q"))
            .mount(&server)
            .await;

        let first = FeedContext::new(config_for(&server)).unwrap();
        let clone = first.clone();
        let second = FeedContext::new(config_for(&server)).unwrap();

        first.ticker("AAPL").quote_snapshot().await.unwrap();
        clone.ticker("MSFT").quote_snapshot().await.unwrap();
        second.ticker("AAPL").quote_snapshot().await.unwrap();

        assert!(Arc::ptr_eq(first.credentials(), clone.credentials()));
        assert!(Arc::ptr_eq(first.cache(), clone.cache()));
        assert!(!Arc::ptr_eq(first.credentials(), second.credentials()));
        assert_eq!(first.credentials().refresh_count(), 1);
        assert_eq!(second.credentials().refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_streaming_client_uses_custom_connector() {
        let context = FeedContext::builder(FeedConfig::default())
            .with_connector(Arc::new(RefusingConnector))
            .build()
            .unwrap();

        let stream = context.streaming_client();
        stream.subscribe(["AAPL"]).await.unwrap();
        assert_eq!(stream.subscriptions(), vec![Symbol::new("AAPL")]);

        let err = stream.connect().await.unwrap_err();
        assert_eq!(err, FeedError::Connection("refused".to_string()));
        assert_eq!(stream.state(), ConnectionState::Disconnected);

        // Each call hands out an independent client.
        assert!(context.streaming_client().subscriptions().is_empty());
    }

    #[test]
    fn test_blocking_streaming_client() {
        let context = FeedContext::builder(FeedConfig::default())
            .with_connector(Arc::new(RefusingConnector))
            .build()
            .unwrap();

        let stream = context.blocking_streaming_client().unwrap();
        assert_eq!(stream.state(), ConnectionState::Disconnected);
        assert!(stream.connect().is_err());
        stream.close();
        assert_eq!(stream.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_invalid_proxy_fails_build() {
        let config = FeedConfig::default().with_proxy("::not a url::");
        assert!(matches!(
            FeedContext::new(config),
            Err(FeedError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_debug_output() {
        let context = FeedContext::new(FeedConfig::default()).unwrap();
        let debug = format!("{context:?}");
        assert!(debug.contains("FeedContext"));
        assert!(debug.contains("query1.finance.yahoo.com"));
    }
}
