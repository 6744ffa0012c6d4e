//! Ensure-loaded gate for values computed at most once.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use feed_core::Result;
use tokio::sync::OnceCell;

/// A value loaded on first access and then shared as an immutable snapshot.
///
/// Concurrent callers wait for the same load. A failed load is not remembered,
/// so the next caller tries again.
pub struct Loaded<T> {
    cell: OnceCell<Arc<T>>,
}

impl<T> Loaded<T> {
    /// An empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Returns the loaded value, running `load` if nothing is loaded yet.
    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.cell
            .get_or_try_init(|| async { load().await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }

    /// The loaded value, if any.
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    /// Returns true once a load has succeeded.
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Forgets the loaded value so the next access loads again.
    pub fn reset(&mut self) -> Option<Arc<T>> {
        self.cell.take()
    }
}

impl<T> Default for Loaded<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Loaded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(value) => f.debug_tuple("Loaded").field(value).finish(),
            None => f.write_str("Loaded(<pending>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_core::FeedError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_loads_once() {
        let loaded = Loaded::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let load = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, FeedError>(vec![1, 2, 3])
        };

        let results = futures::future::join_all((0..5).map(|_| loaded.get_or_load(load))).await;
        let first = results[0].as_ref().unwrap();
        assert!(results.iter().all(|r| Arc::ptr_eq(r.as_ref().unwrap(), first)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(loaded.is_loaded());
        assert_eq!(loaded.get().as_deref(), Some(&vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_failure_not_remembered() {
        let loaded: Loaded<String> = Loaded::new();

        let err = loaded
            .get_or_load(|| async { Err(FeedError::Transient("down".to_string())) })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!loaded.is_loaded());

        let value = loaded
            .get_or_load(|| async { Ok("up".to_string()) })
            .await
            .unwrap();
        assert_eq!(value.as_str(), "up");
    }

    #[tokio::test]
    async fn test_reset_reloads() {
        let mut loaded = Loaded::new();
        loaded.get_or_load(|| async { Ok(1) }).await.unwrap();
        assert_eq!(loaded.reset().as_deref(), Some(&1));
        assert!(loaded.get().is_none());

        let value = loaded.get_or_load(|| async { Ok(2) }).await.unwrap();
        assert_eq!(*value, 2);
    }

    #[test]
    fn test_debug() {
        let loaded: Loaded<u8> = Loaded::default();
        assert_eq!(format!("{loaded:?}"), "Loaded(<pending>)");
    }
}
