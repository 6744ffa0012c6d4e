//! Cookie/crumb credential management.
//!
//! Yahoo gates its JSON endpoints behind a session cookie plus a "crumb"
//! token bound to that cookie. [`CredentialManager`] obtains the pair lazily,
//! shares it between every caller, and guarantees that at most one refresh is
//! in flight no matter how many requests observe an authentication failure at
//! the same time.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use feed_core::{Credentials, FeedConfig, FeedError, HttpRequest, HttpTransport, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

type Refresh = Shared<BoxFuture<'static, Result<Arc<Credentials>>>>;

#[derive(Default)]
struct State {
    current: Option<Arc<Credentials>>,
    in_flight: Option<Refresh>,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("current", &self.current)
            .field("refreshing", &self.in_flight.is_some())
            .finish()
    }
}

/// Shared owner of the session cookie and crumb.
#[derive(Debug)]
pub struct CredentialManager {
    transport: Arc<dyn HttpTransport>,
    cookie_url: String,
    crumb_url: String,
    max_age: Option<Duration>,
    state: Mutex<State>,
    refreshes: AtomicU64,
}

impl CredentialManager {
    /// Creates a manager that fetches credentials through `transport`.
    pub fn new(transport: Arc<dyn HttpTransport>, config: &FeedConfig) -> Self {
        Self {
            transport,
            cookie_url: config.cookie_url.clone(),
            crumb_url: config.crumb_url.clone(),
            max_age: config.credential_max_age,
            state: Mutex::new(State::default()),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Returns valid credentials, fetching them if none are held.
    ///
    /// Concurrent callers that arrive while a refresh is running wait on that
    /// refresh and all receive its outcome, success or failure.
    pub async fn obtain(&self) -> Result<Arc<Credentials>> {
        let refresh = {
            let mut state = self.state.lock();
            if let Some(current) = state.current.as_ref().filter(|c| !self.is_expired(c)) {
                return Ok(Arc::clone(current));
            }
            if state.current.take().is_some() {
                debug!("Credentials expired");
            }

            match &state.in_flight {
                Some(refresh) => refresh.clone(),
                None => {
                    let refresh = self.start_refresh();
                    state.in_flight = Some(refresh.clone());
                    refresh
                }
            }
        };

        let result = refresh.clone().await;

        let mut state = self.state.lock();
        if state.in_flight.as_ref().is_some_and(|f| f.ptr_eq(&refresh)) {
            state.in_flight = None;
            match &result {
                Ok(credentials) => state.current = Some(Arc::clone(credentials)),
                Err(e) => warn!(error = %e, "Credential refresh failed"),
            }
        }
        result
    }

    /// Drops the held credentials so the next [`obtain`](Self::obtain) refreshes.
    pub fn invalidate(&self) {
        debug!("Invalidating credentials");
        self.state.lock().current = None;
    }

    /// Drops the held credentials only if they are still `stale`.
    ///
    /// Returns false when another caller already replaced them, in which case
    /// the caller should simply retry with the newer credentials.
    pub fn invalidate_stale(&self, stale: &Arc<Credentials>) -> bool {
        let mut state = self.state.lock();
        let is_current = state
            .current
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, stale));
        if is_current {
            debug!("Invalidating rejected credentials");
            state.current = None;
        }
        is_current
    }

    /// Currently held credentials, without triggering a refresh.
    pub fn current(&self) -> Option<Arc<Credentials>> {
        self.state.lock().current.clone()
    }

    /// Installs externally obtained credentials.
    pub fn set(&self, credentials: Credentials) {
        self.state.lock().current = Some(Arc::new(credentials));
    }

    /// Number of refreshes started since creation.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    fn is_expired(&self, credentials: &Credentials) -> bool {
        self.max_age
            .is_some_and(|max_age| credentials.is_older_than(max_age))
    }

    fn start_refresh(&self) -> Refresh {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        fetch_credentials(
            Arc::clone(&self.transport),
            self.cookie_url.clone(),
            self.crumb_url.clone(),
        )
        .boxed()
        .shared()
    }
}

#[instrument(skip_all, fields(cookie_url = %cookie_url))]
async fn fetch_credentials(
    transport: Arc<dyn HttpTransport>,
    cookie_url: String,
    crumb_url: String,
) -> Result<Arc<Credentials>> {
    debug!("Requesting session cookie");

    // The cookie endpoint answers with an error status but still sets the cookie.
    let response = transport
        .execute(HttpRequest::get(&cookie_url))
        .await
        .map_err(|e| FeedError::Auth(format!("cookie request failed: {e}")))?;

    let cookie = cookie_header(&response.set_cookies)
        .ok_or_else(|| FeedError::Auth("no session cookie issued".to_string()))?;

    let response = transport
        .execute(HttpRequest::get(&crumb_url).with_cookie(cookie.clone()))
        .await
        .map_err(|e| FeedError::Auth(format!("crumb request failed: {e}")))?;

    if !response.is_success() {
        return Err(FeedError::Auth(format!(
            "crumb request returned HTTP {}",
            response.status
        )));
    }

    let crumb = std::str::from_utf8(&response.body)
        .map_err(|_| FeedError::Auth("crumb is not valid UTF-8".to_string()))?
        .trim();

    if crumb.is_empty() || crumb.contains('<') || crumb.contains(char::is_whitespace) {
        return Err(FeedError::Auth("server returned an invalid crumb".to_string()));
    }

    info!("Obtained new credentials");
    Ok(Arc::new(Credentials::new(cookie, crumb)))
}

/// Joins the `name=value` part of every `Set-Cookie` header into one `Cookie` value.
fn cookie_header(set_cookies: &[String]) -> Option<String> {
    let pairs: Vec<&str> = set_cookies
        .iter()
        .filter_map(|header| header.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
