use std::future::Future;
use std::sync::Arc;

use feed_core::{FeedConfig, FeedError, Result, StreamConnector, StreamMessage, Symbol};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::watch;
use tracing::debug;

use super::{ConnectionState, StreamingClient};

/// Runtime that shuts down in the background when the last handle goes away.
#[derive(Debug)]
struct StreamRuntime {
    runtime: Option<Runtime>,
}

impl StreamRuntime {
    fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        match &self.runtime {
            Some(runtime) => Ok(runtime.block_on(future)),
            None => Err(FeedError::Closed),
        }
    }
}

impl Drop for StreamRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Blocking wrapper around [`StreamingClient`] for synchronous callers.
///
/// Owns a small runtime that drives the connection. Clones share both the
/// runtime and the connection, so one thread can block in
/// [`listen`](Self::listen) while another calls [`close`](Self::close).
///
/// The blocking methods must not be called from inside an async context.
/// Creating and dropping the client is fine anywhere; the runtime is shut
/// down without waiting when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct BlockingStreamingClient {
    client: StreamingClient,
    runtime: Arc<StreamRuntime>,
}

impl BlockingStreamingClient {
    /// Creates a disconnected client with its own runtime.
    pub fn new(connector: Arc<dyn StreamConnector>, config: &FeedConfig) -> Result<Self> {
        Self::from_async(StreamingClient::new(connector, config))
    }

    /// Wraps an existing async client.
    pub fn from_async(client: StreamingClient) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("feed-stream")
            .enable_all()
            .build()
            .map_err(|e| FeedError::Other(format!("Failed to start stream runtime: {e}")))?;

        Ok(Self {
            client,
            runtime: Arc::new(StreamRuntime {
                runtime: Some(runtime),
            }),
        })
    }

    /// See [`StreamingClient::connect`].
    pub fn connect(&self) -> Result<()> {
        self.runtime.block_on(self.client.connect())?
    }

    /// See [`StreamingClient::subscribe`].
    pub fn subscribe<I, S>(&self, symbols: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.runtime.block_on(self.client.subscribe(symbols))?
    }

    /// See [`StreamingClient::unsubscribe`].
    pub fn unsubscribe<I, S>(&self, symbols: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.runtime.block_on(self.client.unsubscribe(symbols))?
    }

    /// Blocks the calling thread delivering messages to `handler`.
    ///
    /// See [`StreamingClient::listen`].
    pub fn listen<F>(&self, handler: F) -> Result<()>
    where
        F: FnMut(StreamMessage),
    {
        self.runtime.block_on(self.client.listen(handler))?
    }

    /// Closes the connection and unblocks any thread inside [`listen`](Self::listen).
    pub fn close(&self) {
        if self.runtime.block_on(self.client.close()).is_err() {
            debug!("Stream runtime already shut down");
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    /// Receiver notified on every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.client.state_changes()
    }

    /// Symbols currently subscribed.
    pub fn subscriptions(&self) -> Vec<Symbol> {
        self.client.subscriptions()
    }

    /// The underlying async client.
    pub const fn as_async(&self) -> &StreamingClient {
        &self.client
    }
}
