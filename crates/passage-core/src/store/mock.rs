//! In-memory credential store for testing.
//!
//! Configurable without touching the real keychain: seed it with items,
//! make it fail or stall, and count how often it was queried.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{CredentialStore, QueryError, QueryFuture};
use crate::cache::Secret;

/// A mock credential store.
///
/// # Example
///
/// ```
/// use passage_core::store::MockCredentialStore;
///
/// // One item under ("svc", "name")
/// let store = MockCredentialStore::new().with_item("svc", "name", "p@ss");
///
/// // Two items under the same selector make lookups ambiguous
/// let ambiguous = MockCredentialStore::new()
///     .with_item("svc", "name", "one")
///     .with_item("svc", "name", "two");
///
/// // A store that is always unreachable
/// let broken = MockCredentialStore::unavailable("keychain locked");
/// ```
#[derive(Debug, Default)]
pub struct MockCredentialStore {
    /// Items keyed by (service, account).
    items: HashMap<(String, String), Vec<Secret>>,
    /// Failure to report instead of looking anything up.
    failure: Option<String>,
    /// Delay before answering.
    delay: Option<Duration>,
    /// Number of queries received.
    call_count: Arc<AtomicUsize>,
}

impl MockCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose queries always fail with `Unavailable`.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Add an item. Adding twice under one selector makes it ambiguous.
    pub fn with_item(
        mut self,
        service: impl Into<String>,
        account: impl Into<String>,
        secret: impl AsRef<[u8]>,
    ) -> Self {
        self.items
            .entry((service.into(), account.into()))
            .or_default()
            .push(Secret::new(secret.as_ref().to_vec()));
        self
    }

    /// Wait this long before answering each query.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get the number of queries received so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Get a clone of the call counter for external tracking.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.call_count)
    }
}

impl CredentialStore for MockCredentialStore {
    fn query_one(&self, service: &str, account: &str) -> QueryFuture<'_> {
        let key = (service.to_string(), account.to_string());
        Box::pin(async move {
            self.call_count.fetch_add(1, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = &self.failure {
                return Err(QueryError::Unavailable(message.clone()));
            }

            match self.items.get(&key).map(Vec::as_slice) {
                None | Some([]) => Err(QueryError::NotFound),
                Some([secret]) => Ok(secret.clone()),
                Some(matches) => Err(QueryError::Ambiguous(matches.len())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_single_item() {
        let store = MockCredentialStore::new().with_item("svc", "name", "p@ss");
        let secret = store.query_one("svc", "name").await.unwrap();
        assert_eq!(secret.expose(), b"p@ss");
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn selector_is_service_then_account() {
        let store = MockCredentialStore::new().with_item("svc", "name", "p@ss");
        let result = store.query_one("name", "svc").await;
        assert_eq!(result.unwrap_err(), QueryError::NotFound);
    }

    #[tokio::test]
    async fn missing_item_is_not_found() {
        let store = MockCredentialStore::new();
        let result = store.query_one("svc", "name").await;
        assert_eq!(result.unwrap_err(), QueryError::NotFound);
    }

    #[tokio::test]
    async fn duplicate_items_are_ambiguous() {
        let store = MockCredentialStore::new()
            .with_item("svc", "name", "one")
            .with_item("svc", "name", "two");
        let result = store.query_one("svc", "name").await;
        assert_eq!(result.unwrap_err(), QueryError::Ambiguous(2));
    }

    #[tokio::test]
    async fn unavailable_store_fails() {
        let store = MockCredentialStore::unavailable("locked");
        let result = store.query_one("svc", "name").await;
        assert!(matches!(result, Err(QueryError::Unavailable(_))));
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn call_counter_is_shared() {
        let store = MockCredentialStore::new();
        let counter = store.call_counter();
        let _ = store.query_one("a", "b").await;
        let _ = store.query_one("a", "b").await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn delay_is_applied() {
        let store = MockCredentialStore::new()
            .with_item("svc", "name", "p@ss")
            .with_delay(Duration::from_millis(50));

        let start = tokio::time::Instant::now();
        store.query_one("svc", "name").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
