//! HTTP transport backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use feed_core::{FeedConfig, FeedError, HttpRequest, HttpResponse, HttpTransport, Method, Result};
use reqwest::header::{CONTENT_TYPE, COOKIE, RETRY_AFTER, SET_COOKIE};
use tracing::debug;

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a client from the user agent, timeout and proxy settings.
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| FeedError::InvalidParameter(format!("proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| FeedError::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(cookie) = &request.cookie {
            builder = builder.header(COOKIE, cookie.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }

        debug!(method = %request.method, url = %request.url, "Sending request");

        let response = builder
            .send()
            .await
            .map_err(|e| FeedError::Transient(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let set_cookies = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::Transient(e.to_string()))?;

        debug!(status, bytes = body.len(), "Received response");

        Ok(HttpResponse {
            status,
            set_cookies,
            retry_after,
            body,
        })
    }
}
