//! WebSocket transport for the pricing stream.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use feed_core::{FeedConfig, FeedError, Frame, FrameSink, FrameSource, Result, StreamConnector};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens WebSocket connections to the pricing endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for an explicit `ws://` or `wss://` url.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Connector for the configured stream url.
    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.stream_url.clone())
    }

    /// Endpoint url.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        info!(url = %self.url, "Connecting to stream");
        let (socket, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| FeedError::Connection(e.to_string()))?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = socket.split();
        Ok((Box::new(WsSink { write }), Box::new(WsSource { read })))
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

impl fmt::Debug for WsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| FeedError::Connection(e.to_string()))
    }

    async fn close(&mut self) {
        if tokio::time::timeout(CLOSE_TIMEOUT, self.write.close()).await.is_err() {
            debug!("Timed out sending close frame");
        }
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
}

impl fmt::Debug for WsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.as_str().to_string()))),
                Ok(Message::Binary(bytes)) => return Some(Ok(Frame::Binary(bytes))),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Server closed the stream");
                    return None;
                }
                Err(e) => return Some(Err(FeedError::Connection(e.to_string()))),
            }
        }
    }
}
