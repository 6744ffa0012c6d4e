//! Bounded-concurrency bulk downloads.
//!
//! [`BatchFetcher`] runs one job per id on a fixed pool of workers that pull
//! from a shared queue, so at most `concurrency` jobs are in flight. Failures
//! and panics are isolated per id: the returned [`BatchResult`] always holds
//! exactly one entry for every distinct input id.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use feed_core::{BatchResult, FeedError, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happens to the rest of a batch when one job fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Record the failure and keep going.
    #[default]
    BestEffort,
    /// Abort in-flight jobs and skip queued ones; they are reported as cancelled.
    FailFast,
}

/// Runs many independent fetches with bounded concurrency.
#[derive(Debug, Clone)]
pub struct BatchFetcher {
    concurrency: usize,
    failure_mode: FailureMode,
    cancel: Option<CancellationToken>,
}

impl Default for BatchFetcher {
    fn default() -> Self {
        Self::new(8)
    }
}

impl BatchFetcher {
    /// Creates a fetcher running at most `concurrency` jobs at once.
    ///
    /// A concurrency of zero is treated as one.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            failure_mode: FailureMode::BestEffort,
            cancel: None,
        }
    }

    /// Sets the failure mode.
    #[must_use]
    pub const fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Shorthand for [`FailureMode::FailFast`].
    #[must_use]
    pub const fn fail_fast(self) -> Self {
        self.with_failure_mode(FailureMode::FailFast)
    }

    /// Stops scheduling new jobs once `token` is cancelled.
    ///
    /// In [`FailureMode::BestEffort`] jobs already running complete normally;
    /// in [`FailureMode::FailFast`] they are aborted. Ids that never started
    /// or were aborted are reported as [`FeedError::Cancelled`].
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Maximum number of concurrent jobs.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Configured failure mode.
    #[must_use]
    pub const fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Fetches every id with `fetch` and collects the outcomes in input order.
    ///
    /// Duplicate ids are fetched once and reported at their first position.
    pub async fn download<I, S, T, F, Fut>(&self, ids: I, fetch: F) -> BatchResult<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        T: Send + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut seen = HashSet::new();
        let ids: Vec<String> = ids
            .into_iter()
            .map(Into::into)
            .filter(|id| seen.insert(id.clone()))
            .collect();

        if ids.is_empty() {
            return BatchResult::from_entries(Vec::new());
        }

        let workers = self.concurrency.min(ids.len());
        info!(ids = ids.len(), workers, mode = ?self.failure_mode, "Starting batch download");

        let queue: Arc<Mutex<VecDeque<(usize, String)>>> =
            Arc::new(Mutex::new(ids.iter().cloned().enumerate().collect()));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Result<T>)>();
        let fetch = Arc::new(fetch);
        let stop = self.cancel.clone().unwrap_or_default();
        let abort = CancellationToken::new();

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let fetch = Arc::clone(&fetch);
            let stop = stop.clone();
            let abort = abort.clone();
            let failure_mode = self.failure_mode;

            set.spawn(async move {
                loop {
                    if stop.is_cancelled() || abort.is_cancelled() {
                        break;
                    }
                    let Some((index, id)) = queue.lock().pop_front() else {
                        break;
                    };

                    debug!(worker, %id, "Fetching");
                    let job = AssertUnwindSafe(async { (*fetch)(id.clone()).await }).catch_unwind();
                    let result = tokio::select! {
                        biased;
                        () = abort.cancelled() => Err(FeedError::Cancelled),
                        () = stop.cancelled(), if failure_mode == FailureMode::FailFast => {
                            Err(FeedError::Cancelled)
                        }
                        outcome = job => outcome.unwrap_or_else(|payload| {
                            Err(FeedError::Other(format!(
                                "job panicked: {}",
                                panic_message(payload.as_ref())
                            )))
                        }),
                    };

                    if let Err(e) = &result {
                        if *e != FeedError::Cancelled {
                            warn!(worker, %id, error = %e, "Batch item failed");
                            if failure_mode == FailureMode::FailFast {
                                abort.cancel();
                            }
                        }
                    }

                    if tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Batch worker terminated abnormally");
            }
        }

        let mut slots: Vec<Option<Result<T>>> = ids.iter().map(|_| None).collect();
        while let Ok((index, result)) = rx.try_recv() {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(result);
            }
        }

        let interrupted = stop.is_cancelled() || abort.is_cancelled();
        let entries: Vec<(String, Result<T>)> = ids
            .into_iter()
            .zip(slots)
            .map(|(id, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(if interrupted {
                        FeedError::Cancelled
                    } else {
                        FeedError::Other("worker stopped before reporting".to_string())
                    })
                });
                (id, result)
            })
            .collect();

        let failed = entries.iter().filter(|(_, r)| r.is_err()).count();
        info!(total = entries.len(), failed, "Batch download finished");

        BatchResult::from_entries(entries)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
