//! Live pricing stream.
//!
//! [`StreamingClient`] owns one persistent connection and the set of symbols
//! the caller wants. The set is the source of truth: it is sent in full on
//! every (re)connect, and only the difference is sent while connected. A lost
//! connection is re-established with backoff inside [`StreamingClient::listen`],
//! and [`StreamingClient::close`] is terminal.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connected
//!                     |                           |
//!                     v                           v
//!                Disconnected               Disconnected (attempts exhausted)
//!
//! any state -> Closed (terminal)
//! ```

/// Blocking facade over the async client.
pub mod blocking;
/// Frame decoding and control messages.
pub mod codec;
/// WebSocket connector.
pub mod ws;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use feed_core::{
    BackoffPolicy, FeedConfig, FeedError, Frame, FrameSink, FrameSource, Result, StreamConnector,
    StreamMessage, SubscriptionSet, Symbol,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a streaming connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected with the full subscription set sent.
    Connected,
    /// Connection lost; re-establishing with backoff.
    Reconnecting,
    /// Closed by the caller. Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Stream of decoded messages returned by [`StreamingClient::messages`].
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<StreamMessage>> + Send>>;

#[derive(Debug)]
struct Shared {
    connector: Arc<dyn StreamConnector>,
    subscriptions: parking_lot::Mutex<SubscriptionSet>,
    // Held while sending control messages so the set and the wire never diverge.
    sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    // Parked between listeners.
    source: parking_lot::Mutex<Option<Box<dyn FrameSource>>>,
    connect_lock: tokio::sync::Mutex<()>,
    listening: AtomicBool,
    state: watch::Sender<ConnectionState>,
    closed: CancellationToken,
    reconnect_backoff: BackoffPolicy,
    idle_timeout: Option<Duration>,
}

/// Async client for the live pricing stream.
///
/// Cloning is cheap and every clone drives the same connection, so one task
/// can `listen` while another subscribes or closes.
#[derive(Debug, Clone)]
pub struct StreamingClient {
    shared: Arc<Shared>,
}

impl StreamingClient {
    /// Creates a disconnected client.
    pub fn new(connector: Arc<dyn StreamConnector>, config: &FeedConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                subscriptions: parking_lot::Mutex::new(SubscriptionSet::new()),
                sink: tokio::sync::Mutex::new(None),
                source: parking_lot::Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                listening: AtomicBool::new(false),
                state,
                closed: CancellationToken::new(),
                reconnect_backoff: config.reconnect_backoff.clone(),
                idle_timeout: config.idle_timeout,
            }),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Symbols currently subscribed, in sorted order.
    pub fn subscriptions(&self) -> Vec<Symbol> {
        self.shared.subscriptions.lock().to_vec()
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Opens the connection and sends the full subscription set.
    ///
    /// Does nothing when already connected, or while an active listener is
    /// reconnecting.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.shared.connect_lock.lock().await;

        match self.state() {
            ConnectionState::Closed => return Err(FeedError::Closed),
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Reconnecting if self.shared.listening.load(Ordering::SeqCst) => {
                return Ok(());
            }
            ConnectionState::Disconnected
            | ConnectionState::Connecting
            | ConnectionState::Reconnecting => {}
        }

        self.set_state(ConnectionState::Connecting);
        match self.establish().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Stream connection failed");
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Adds symbols to the subscription set.
    ///
    /// While connected only the newly added symbols are sent; otherwise the
    /// change is applied on the next connect.
    pub async fn subscribe<I, S>(&self, symbols: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        let symbols: Vec<Symbol> = symbols.into_iter().map(Into::into).collect();
        self.update_subscriptions(symbols, true).await
    }

    /// Removes symbols from the subscription set.
    pub async fn unsubscribe<I, S>(&self, symbols: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        let symbols: Vec<Symbol> = symbols.into_iter().map(Into::into).collect();
        self.update_subscriptions(symbols, false).await
    }

    /// Delivers messages to `handler` until [`close`](Self::close) is called.
    ///
    /// Connects first if needed. Undecodable frames are logged and skipped.
    /// A lost connection is re-established with backoff; when the attempts
    /// are exhausted the error is returned and the state is `Disconnected`.
    /// Returns `Ok(())` when the client is closed while listening.
    pub async fn listen<F>(&self, mut handler: F) -> Result<()>
    where
        F: FnMut(StreamMessage),
    {
        let mut listener = self.listener().await?;
        while let Some(message) = listener.next().await? {
            handler(message);
        }
        Ok(())
    }

    /// Messages as an async stream.
    ///
    /// The stream connects on first poll, ends when the client is closed and
    /// yields one error before ending if the connection cannot be recovered.
    pub fn messages(&self) -> Result<MessageStream> {
        self.ensure_open()?;

        enum Pump {
            Start(StreamingClient),
            Running(Listener),
            Done,
        }

        let stream = futures::stream::unfold(Pump::Start(self.clone()), |pump| async move {
            let mut listener = match pump {
                Pump::Start(client) => match client.listener().await {
                    Ok(listener) => listener,
                    Err(e) => return Some((Err(e), Pump::Done)),
                },
                Pump::Running(listener) => listener,
                Pump::Done => return None,
            };
            match listener.next().await {
                Ok(Some(message)) => Some((Ok(message), Pump::Running(listener))),
                Ok(None) => None,
                Err(e) => Some((Err(e), Pump::Done)),
            }
        });

        Ok(Box::pin(stream))
    }

    /// Closes the connection for good.
    ///
    /// Unblocks any active listener, which then returns `Ok(())`. Every later
    /// operation fails with [`FeedError::Closed`]. Calling it again is a no-op.
    pub async fn close(&self) {
        if self.shared.closed.is_cancelled() {
            return;
        }
        self.shared.closed.cancel();
        self.shared
            .state
            .send_modify(|state| *state = ConnectionState::Closed);

        if let Some(mut sink) = self.shared.sink.lock().await.take() {
            sink.close().await;
        }
        drop(self.shared.source.lock().take());
        info!("Stream closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(FeedError::Closed)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            debug!(state = %next, "Stream state changed");
        }
    }

    async fn update_subscriptions(&self, symbols: Vec<Symbol>, add: bool) -> Result<()> {
        self.ensure_open()?;

        let mut sink = self.shared.sink.lock().await;
        let changed = {
            let mut subscriptions = self.shared.subscriptions.lock();
            if add {
                subscriptions.insert(symbols)
            } else {
                subscriptions.remove(symbols)
            }
        };
        if changed.is_empty() {
            return Ok(());
        }

        debug!(symbols = ?changed, add, "Subscription set changed");
        if let Some(sink) = sink.as_mut() {
            let text = if add {
                codec::subscribe_message(&changed)
            } else {
                codec::unsubscribe_message(&changed)
            };
            // The full set is resent on reconnect, so a failed send is recoverable.
            if let Err(e) = sink.send_text(text).await {
                warn!(error = %e, "Failed to send subscription update");
            }
        }
        Ok(())
    }

    /// Opens a connection, sends the full set, and installs sink and source.
    async fn establish(&self) -> Result<()> {
        let connected = tokio::select! {
            biased;
            () = self.shared.closed.cancelled() => return Err(FeedError::Closed),
            connected = self.shared.connector.connect() => connected,
        };
        let (mut sink, source) = connected.map_err(|e| match e {
            FeedError::Connection(_) | FeedError::Closed => e,
            other => FeedError::Connection(other.to_string()),
        })?;

        let mut slot = self.shared.sink.lock().await;
        let symbols = self.shared.subscriptions.lock().to_vec();
        if !symbols.is_empty() {
            debug!(count = symbols.len(), "Sending subscription set");
            if let Err(e) = sink.send_text(codec::subscribe_message(&symbols)).await {
                sink.close().await;
                return Err(FeedError::Connection(format!("subscribe failed: {e}")));
            }
        }

        if self.is_closed() {
            sink.close().await;
            return Err(FeedError::Closed);
        }

        *slot = Some(sink);
        *self.shared.source.lock() = Some(source);
        self.set_state(ConnectionState::Connected);
        info!(symbols = symbols.len(), "Stream connected");
        Ok(())
    }

    /// Re-establishes a lost connection. Returns `Ok(None)` if closed meanwhile.
    async fn reconnect(&self) -> Result<Option<Box<dyn FrameSource>>> {
        self.set_state(ConnectionState::Reconnecting);
        if let Some(mut sink) = self.shared.sink.lock().await.take() {
            sink.close().await;
        }

        let mut backoff = self.shared.reconnect_backoff.start();
        loop {
            let Some(delay) = backoff.next_delay() else {
                let attempts = backoff.attempt_count();
                warn!(attempts, "Giving up on stream reconnection");
                self.set_state(ConnectionState::Disconnected);
                return Err(FeedError::Connection(format!(
                    "reconnect failed after {attempts} attempts"
                )));
            };

            debug!(
                attempt = backoff.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting"
            );
            tokio::select! {
                biased;
                () = self.shared.closed.cancelled() => return Ok(None),
                () = tokio::time::sleep(delay) => {}
            }

            match self.establish().await {
                Ok(()) => {
                    info!(attempts = backoff.attempt_count(), "Stream reconnected");
                    return Ok(self.shared.source.lock().take());
                }
                Err(FeedError::Closed) => return Ok(None),
                Err(e) => warn!(error = %e, attempt = backoff.attempt_count(), "Reconnect attempt failed"),
            }
        }
    }

    /// Claims the frame source, connecting first if needed.
    async fn listener(&self) -> Result<Listener> {
        self.ensure_open()?;
        if self.shared.listening.swap(true, Ordering::SeqCst) {
            return Err(FeedError::InvalidState(
                "another listener is already active".to_string(),
            ));
        }
        // From here the guard resets the flag on every exit path.
        let mut listener = Listener {
            client: self.clone(),
            source: None,
        };

        let parked = self.shared.source.lock().take();
        listener.source = match parked {
            Some(source) => Some(source),
            None => {
                self.connect().await?;
                let source = self.shared.source.lock().take();
                if source.is_none() && self.is_closed() {
                    return Err(FeedError::Closed);
                }
                source
            }
        };
        Ok(listener)
    }
}

/// Exclusive reader of the frame source.
///
/// Dropping it returns the source to the client so a later listener can
/// resume on the same connection. Dropping it mid-reconnect abandons the
/// attempt and leaves the client `Disconnected`.
struct Listener {
    client: StreamingClient,
    source: Option<Box<dyn FrameSource>>,
}

enum Received {
    Frame(Frame),
    Lost(String),
}

impl Listener {
    /// Next decoded message, `Ok(None)` once the client is closed.
    async fn next(&mut self) -> Result<Option<StreamMessage>> {
        let shared = Arc::clone(&self.client.shared);
        loop {
            if shared.closed.is_cancelled() {
                return Ok(None);
            }

            let received = match self.source.as_mut() {
                Some(source) => tokio::select! {
                    biased;
                    () = shared.closed.cancelled() => return Ok(None),
                    received = receive(source.as_mut(), shared.idle_timeout) => received,
                },
                None => Received::Lost("no active connection".to_string()),
            };

            match received {
                Received::Frame(frame) => match codec::decode_frame(&frame) {
                    Ok(Some(message)) => return Ok(Some(message)),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Skipping undecodable frame"),
                },
                Received::Lost(reason) => {
                    warn!(%reason, "Stream connection lost");
                    self.source = None;
                    match self.client.reconnect().await? {
                        Some(source) => self.source = Some(source),
                        None => return Ok(None),
                    }
                }
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            if !self.client.is_closed() {
                *self.client.shared.source.lock() = Some(source);
            }
        }
        // Only a listener reconnects, so nobody is left to finish the attempt.
        if self.client.state() == ConnectionState::Reconnecting {
            warn!("Listener dropped while reconnecting");
            self.client.set_state(ConnectionState::Disconnected);
        }
        self.client.shared.listening.store(false, Ordering::SeqCst);
    }
}

async fn receive(source: &mut dyn FrameSource, idle_timeout: Option<Duration>) -> Received {
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, source.next_frame()).await {
            Ok(next) => next,
            Err(_) => return Received::Lost(format!("no frames for {}s", limit.as_secs_f64())),
        },
        None => source.next_frame().await,
    };
    match next {
        Some(Ok(frame)) => Received::Frame(frame),
        Some(Err(e)) => Received::Lost(e.to_string()),
        None => Received::Lost("closed by server".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnector, eventually, fast_backoff, test_config, wait_until};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use futures::StreamExt;
    use prost::Message as _;
    use std::collections::BTreeSet;

    fn client(connector: &Arc<MockConnector>) -> StreamingClient {
        StreamingClient::new(Arc::clone(connector) as Arc<dyn StreamConnector>, &test_config())
    }

    fn quote(symbol: &str, price: f32) -> Frame {
        let record = codec::PricingData {
            id: Some(symbol.to_string()),
            price: Some(price),
            time: Some(1_700_000_000_000),
            ..codec::PricingData::default()
        };
        Frame::Text(format!(
            "{{\"type\":\"pricing\",\"message\":\"{}\"}}",
            STANDARD.encode(record.encode_to_vec())
        ))
    }

    fn subscribed_set(text: &str) -> BTreeSet<String> {
        let (action, symbols) = codec::parse_control_message(text).unwrap();
        assert_eq!(action, "subscribe");
        symbols.iter().map(|s| s.as_str().to_string()).collect()
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_sends_once() {
        let connector = Arc::new(MockConnector::new());
        let client = client(&connector);

        client.subscribe(["AAPL"]).await.unwrap();
        client.subscribe(["aapl"]).await.unwrap();
        assert!(connector.sent().is_empty());

        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(connector.sent(), vec!["{\"subscribe\":[\"AAPL\"]}".to_string()]);

        // Already connected: no new connection.
        client.connect().await.unwrap();
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_incremental_updates_while_connected() {
        let connector = Arc::new(MockConnector::new());
        let client = client(&connector);
        client.connect().await.unwrap();
        assert!(connector.sent().is_empty());

        client.subscribe(["AAPL", "MSFT"]).await.unwrap();
        client.subscribe(["MSFT", "GOOG"]).await.unwrap();
        client.unsubscribe(["AAPL", "TSLA"]).await.unwrap();
        client.unsubscribe(["TSLA"]).await.unwrap();

        assert_eq!(
            connector.sent(),
            vec![
                "{\"subscribe\":[\"AAPL\",\"MSFT\"]}".to_string(),
                "{\"subscribe\":[\"GOOG\"]}".to_string(),
                "{\"unsubscribe\":[\"AAPL\"]}".to_string(),
            ]
        );
        assert_eq!(
            client.subscriptions(),
            vec![Symbol::new("GOOG"), Symbol::new("MSFT")]
        );
    }

    #[tokio::test]
    async fn test_listen_delivers_messages() {
        let connector = Arc::new(MockConnector::new());
        let client = client(&connector);
        client.subscribe(["AAPL"]).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let listener = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .listen(move |m| {
                        let _ = tx.send(m);
                    })
                    .await
            })
        };

        wait_until(client.state_changes(), |s| *s == ConnectionState::Connected).await;
        assert!(connector.push(quote("AAPL", 190.0)));

        let message = rx.recv().await.unwrap();
        assert_eq!(message.symbol.as_str(), "AAPL");

        client.close().await;
        assert!(listener.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_undecodable_frames_skipped() {
        let connector = Arc::new(MockConnector::new());
        let client = client(&connector);
        client.connect().await.unwrap();

        connector.push(Frame::Text("garbage!".to_string()));
        connector.push(Frame::Text("{\"type\":\"pricing\",\"message\":\"AAAA\"}".to_string()));
        connector.push(quote("MSFT", 400.0));

        let mut messages = client.messages().unwrap();
        let message = messages.next().await.unwrap().unwrap();
        assert_eq!(message.symbol.as_str(), "MSFT");
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_reconnect_resends_full_set() {
        let connector = Arc::new(MockConnector::new());
        let client = client(&connector);
        client.subscribe(["AAPL", "BTC-USD"]).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let listener = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .listen(move |m| {
                        let _ = tx.send(m);
                    })
                    .await
            })
        };
        wait_until(client.state_changes(), |s| *s == ConnectionState::Connected).await;

        connector.drop_connection();
        eventually(|| connector.connects() == 2).await;
        wait_until(client.state_changes(), |s| *s == ConnectionState::Connected).await;

        let sent = connector.sent();
        assert_eq!(sent.len(), 2);
        let expected: BTreeSet<String> = ["AAPL", "BTC-USD"].iter().map(|s| s.to_string()).collect();
        assert_eq!(subscribed_set(&sent[1]), expected);

        // Messages flow on the new connection.
        assert!(connector.push(quote("BTC-USD", 64_000.0)));
        let message = rx.recv().await.unwrap();
        assert_eq!(message.symbol.as_str(), "BTC-USD");

        client.close().await;
        listener.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_during_reconnect_applied_after() {
        let connector = Arc::new(MockConnector::new());
        let config = test_config().with_reconnect_backoff(BackoffPolicy::new(
            Duration::from_millis(50),
            Duration::from_millis(50),
            1.0,
        ));
        let client = StreamingClient::new(Arc::clone(&connector) as Arc<dyn StreamConnector>, &config);
        client.subscribe(["AAPL"]).await.unwrap();

        let listener = {
            let client = client.clone();
            tokio::spawn(async move { client.listen(|_| {}).await })
        };
        wait_until(client.state_changes(), |s| *s == ConnectionState::Connected).await;

        connector.drop_connection();
        wait_until(client.state_changes(), |s| *s == ConnectionState::Reconnecting).await;
        client.subscribe(["ETH-USD"]).await.unwrap();
        wait_until(client.state_changes(), |s| *s == ConnectionState::Connected).await;

        let sent = connector.sent();
        let last = sent.last().unwrap();
        let expected: BTreeSet<String> = ["AAPL", "ETH-USD"].iter().map(|s| s.to_string()).collect();
        assert_eq!(subscribed_set(last), expected);

        client.close().await;
        listener.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_unblocks_listen() {
        let connector = Arc::new(MockConnector::new());
        let client = client(&connector);

        let listener = {
            let client = client.clone();
            tokio::spawn(async move { client.listen(|_| {}).await })
        };
        wait_until(client.state_changes(), |s| *s == ConnectionState::Connected).await;

        client.close().await;
        let result = tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listen did not return after close")
            .unwrap();
        assert!(result.is_ok());
        assert!(connector.sink_closed());

        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(client.subscribe(["AAPL"]).await, Err(FeedError::Closed));
        assert_eq!(client.connect().await, Err(FeedError::Closed));
        assert_eq!(client.listen(|_| {}).await, Err(FeedError::Closed));
        assert!(client.messages().is_err());

        // Idempotent.
        client.close().await;
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_before_connect() {
        let connector = Arc::new(MockConnector::new());
        let client = client(&connector);
        client.close().await;
        client.close().await;

        assert_eq!(client.connect().await, Err(FeedError::Closed));
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let connector = Arc::new(MockConnector::new());
        connector.fail_next(1);
        let client = client(&connector);

        assert!(matches!(client.connect().await, Err(FeedError::Connection(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_reconnect_gives_up() {
        let connector = Arc::new(MockConnector::new());
        let config = test_config().with_reconnect_backoff(fast_backoff().with_max_attempts(2));
        let client = StreamingClient::new(Arc::clone(&connector) as Arc<dyn StreamConnector>, &config);
        client.connect().await.unwrap();

        connector.fail_next(10);
        connector.drop_connection();

        let result = client.listen(|_| {}).await;
        assert!(matches!(result, Err(FeedError::Connection(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(connector.connects(), 3);
    }

    #[tokio::test]
    async fn test_idle_timeout_triggers_reconnect() {
        let connector = Arc::new(MockConnector::new());
        let config = test_config().with_idle_timeout(Some(Duration::from_millis(30)));
        let client = StreamingClient::new(Arc::clone(&connector) as Arc<dyn StreamConnector>, &config);

        let listener = {
            let client = client.clone();
            tokio::spawn(async move { client.listen(|_| {}).await })
        };
        eventually(|| connector.connects() >= 2).await;

        client.close().await;
        listener.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_single_listener() {
        let connector = Arc::new(MockConnector::new());
        let client = client(&connector);

        let listener = {
            let client = client.clone();
            tokio::spawn(async move { client.listen(|_| {}).await })
        };
        wait_until(client.state_changes(), |s| *s == ConnectionState::Connected).await;
        eventually(|| client.shared.listening.load(Ordering::SeqCst)).await;

        assert!(matches!(
            client.listen(|_| {}).await,
            Err(FeedError::InvalidState(_))
        ));

        client.close().await;
        listener.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_stream_returns_source() {
        let connector = Arc::new(MockConnector::new());
        let client = client(&connector);
        client.connect().await.unwrap();

        connector.push(quote("AAPL", 1.0));
        connector.push(quote("MSFT", 2.0));

        let mut first = client.messages().unwrap();
        assert_eq!(first.next().await.unwrap().unwrap().symbol.as_str(), "AAPL");
        drop(first);

        let mut second = client.messages().unwrap();
        assert_eq!(second.next().await.unwrap().unwrap().symbol.as_str(), "MSFT");
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_dropping_listener_mid_reconnect_disconnects() {
        let connector = Arc::new(MockConnector::new());
        let config = test_config().with_reconnect_backoff(BackoffPolicy::new(
            Duration::from_secs(5),
            Duration::from_secs(5),
            1.0,
        ));
        let client = StreamingClient::new(Arc::clone(&connector) as Arc<dyn StreamConnector>, &config);
        client.subscribe(["AAPL"]).await.unwrap();
        client.connect().await.unwrap();

        let mut messages = client.messages().unwrap();
        let poll = tokio::spawn(async move { messages.next().await.map(|r| r.is_ok()) });

        connector.drop_connection();
        wait_until(client.state_changes(), |s| *s == ConnectionState::Reconnecting).await;
        poll.abort();
        assert!(poll.await.unwrap_err().is_cancelled());
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // A later connect really opens a connection and later updates reach it.
        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(connector.connects(), 2);

        client.subscribe(["MSFT"]).await.unwrap();
        assert_eq!(
            connector.sent().last().map(String::as_str),
            Some("{\"subscribe\":[\"MSFT\"]}")
        );
    }

    #[tokio::test]
    async fn test_state_transitions_observable() {
        let connector = Arc::new(MockConnector::new());
        let client = client(&connector);
        let mut changes = client.state_changes();

        client.connect().await.unwrap();
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), ConnectionState::Connected);

        client.close().await;
        assert_eq!(*changes.borrow_and_update(), ConnectionState::Closed);
    }
}
