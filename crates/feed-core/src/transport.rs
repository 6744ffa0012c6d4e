//! Transport traits consumed by the fetch layer and the streaming client.
//!
//! This module defines the seams between the core and the network:
//!
//! - [`HttpTransport`] - Performs one HTTP exchange
//! - [`StreamConnector`] - Opens a streaming connection
//! - [`FrameSink`] - Sending half of a streaming connection
//! - [`FrameSource`] - Receiving half of a streaming connection
//!
//! Transports report what happened on the wire. Status classification and
//! retries belong to the callers.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use std::time::Duration;

use crate::{
    error::Result,
    types::{Credentials, Method, RequestSignature},
};

/// A fully resolved HTTP request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Url without query string.
    pub url: String,
    /// Query parameters.
    pub params: Vec<(String, String)>,
    /// Value of the `Cookie` header, if any.
    pub cookie: Option<String>,
    /// Request body for `POST`.
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// A bare `GET` without parameters or cookie.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            params: Vec::new(),
            cookie: None,
            body: None,
        }
    }

    /// Builds the request described by a signature.
    #[must_use]
    pub fn from_signature(signature: &RequestSignature) -> Self {
        Self {
            method: signature.method(),
            url: signature.url().to_string(),
            params: signature.params().to_vec(),
            cookie: None,
            body: signature.body().cloned(),
        }
    }

    /// Sets the `Cookie` header.
    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Attaches the cookie header and the `crumb` query parameter.
    #[must_use]
    pub fn with_credentials(mut self, credentials: &Credentials) -> Self {
        self.cookie = Some(credentials.cookie.clone());
        self.params
            .push(("crumb".to_string(), credentials.crumb.clone()));
        self
    }

    /// Value of a query parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v.as_str()))
    }
}

/// Raw HTTP response as seen by the transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// `Set-Cookie` header values.
    pub set_cookies: Vec<String>,
    /// Parsed `Retry-After` header.
    pub retry_after: Option<Duration>,
    /// Body bytes.
    pub body: Bytes,
}

impl HttpResponse {
    /// A response with a status and body.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            ..Default::default()
        }
    }

    /// Adds a `Set-Cookie` value.
    #[must_use]
    pub fn with_set_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.set_cookies.push(cookie.into());
        self
    }

    /// Sets the retry hint.
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Performs HTTP exchanges.
///
/// Implementations return `Ok` for any response that arrived, whatever its
/// status, and `Err(FeedError::Transient)` when no response arrived.
#[async_trait]
pub trait HttpTransport: Send + Sync + Debug {
    /// Executes one request.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// One unit of the streaming wire protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

/// Opens streaming connections.
#[async_trait]
pub trait StreamConnector: Send + Sync + Debug {
    /// Connects and returns the sending and receiving halves.
    async fn connect(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)>;
}

/// Sending half of a streaming connection.
#[async_trait]
pub trait FrameSink: Send + Debug {
    /// Sends a text control message.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Closes the connection. Errors are ignored.
    async fn close(&mut self);
}

/// Receiving half of a streaming connection.
#[async_trait]
pub trait FrameSource: Send + Debug {
    /// Waits for the next data frame.
    ///
    /// Returns `None` when the remote end closed the connection and
    /// `Some(Err(_))` when it broke.
    async fn next_frame(&mut self) -> Option<Result<Frame>>;
}
