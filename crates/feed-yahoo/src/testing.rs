//! In-process transports for unit tests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use feed_core::{
    BackoffPolicy, FeedConfig, FeedError, Frame, FrameSink, FrameSource, HttpRequest,
    HttpResponse, HttpTransport, Result, StreamConnector,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

pub(crate) const COOKIE_URL: &str = "https://auth.test/cookie";
pub(crate) const CRUMB_URL: &str = "https://auth.test/crumb";

pub(crate) fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(5), 2.0)
}

pub(crate) fn test_config() -> FeedConfig {
    FeedConfig::default()
        .with_auth_urls(COOKIE_URL, CRUMB_URL)
        .with_retries(3, fast_backoff())
        .with_reconnect_backoff(fast_backoff())
        .with_idle_timeout(None)
}

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync;

/// Answers requests from a closure and records them.
pub(crate) struct MockTransport {
    handler: Box<Handler>,
    delay: Duration,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.url == url)
            .cloned()
            .collect()
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.handler)(&request)
    }
}

/// Fake cookie and crumb endpoints issuing `crumb-1`, `crumb-2`, ...
#[derive(Clone, Debug, Default)]
pub(crate) struct AuthServer {
    crumbs: Arc<AtomicUsize>,
    fail: bool,
}

impl AuthServer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) const fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn crumb_requests(&self) -> usize {
        self.crumbs.load(Ordering::SeqCst)
    }

    /// Serves the auth endpoints and hands every other request to `data`.
    pub(crate) fn handler<F>(
        &self,
        data: F,
    ) -> impl Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        let server = self.clone();
        move |request: &HttpRequest| match request.url.as_str() {
            COOKIE_URL => Ok(HttpResponse::new(404, "").with_set_cookie("A3=session; Path=/")),
            CRUMB_URL => {
                let generation = server.crumbs.fetch_add(1, Ordering::SeqCst) + 1;
                if server.fail {
                    Ok(HttpResponse::new(500, "unavailable"))
                } else {
                    Ok(HttpResponse::new(200, format!("crumb-{generation}")))
                }
            }
            _ => Ok(data(request)),
        }
    }
}

/// Scriptable stream endpoint backed by channels.
#[derive(Debug, Default)]
pub(crate) struct MockConnector {
    sent: Arc<Mutex<Vec<String>>>,
    feed: Mutex<Option<mpsc::UnboundedSender<Result<Frame>>>>,
    connects: AtomicUsize,
    failures: AtomicUsize,
    sink_closed: Arc<AtomicBool>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_next(&self, attempts: usize) {
        self.failures.store(attempts, Ordering::SeqCst);
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub(crate) fn sink_closed(&self) -> bool {
        self.sink_closed.load(Ordering::SeqCst)
    }

    /// Delivers a frame on the live connection.
    pub(crate) fn push(&self, frame: Frame) -> bool {
        self.feed
            .lock()
            .as_ref()
            .is_some_and(|feed| feed.send(Ok(frame)).is_ok())
    }

    /// Simulates the remote end going away.
    pub(crate) fn drop_connection(&self) {
        self.feed.lock().take();
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn connect(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(FeedError::Connection("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.feed.lock() = Some(tx);
        let sink = MockSink {
            sent: Arc::clone(&self.sent),
            closed: Arc::clone(&self.sink_closed),
        };
        Ok((Box::new(sink), Box::new(MockSource { rx })))
    }
}

#[derive(Debug)]
struct MockSink {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sent.lock().push(text);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct MockSource {
    rx: mpsc::UnboundedReceiver<Result<Frame>>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.rx.recv().await
    }
}

/// Waits until the watched value satisfies `predicate`, panicking after two seconds.
pub(crate) async fn wait_until<T, F>(mut rx: watch::Receiver<T>, predicate: F)
where
    F: Fn(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if predicate(&rx.borrow_and_update()) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Polls `condition` until it holds, panicking after two seconds.
pub(crate) async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
