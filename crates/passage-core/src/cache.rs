//! In-memory secret cache.
//!
//! The cache maps a [`CacheKey`] to the [`Secret`] the credential store
//! returned for it. Entries never expire and are never removed one by one;
//! the only way to drop them is [`SecretCache::reset`], which swaps the whole
//! map for an empty one.
//!
//! # Thread Safety
//!
//! `SecretCache` is a cheap handle around a `tokio::sync::Mutex`. Clone it
//! into every connection task; all `get`/`put`/`reset` calls are serialized
//! by the lock.
//!
//! A reset that lands between a handler's cache miss and its `put` is
//! overwritten by that `put`, so a freshly reset cache can pick up one entry
//! fetched before the reset. The next reset clears it.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretBox};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::protocol::CacheKey;

/// An opaque secret payload.
///
/// The bytes are zeroed when the last clone is dropped. Cloning only bumps a
/// reference count.
#[derive(Clone)]
pub struct Secret(Arc<SecretBox<Vec<u8>>>);

impl Secret {
    /// Wrap raw secret bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::new(SecretBox::new(Box::new(bytes))))
    }

    /// Borrow the secret bytes.
    ///
    /// # Security
    ///
    /// Only call this to write the secret to a client.
    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }

    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        self.expose().len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl From<Vec<u8>> for Secret {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

// Manual Debug implementation to avoid exposing secrets
impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Secret").field(&"[REDACTED]").finish()
    }
}

/// Shared secret cache.
///
/// # Example
///
/// ```
/// use passage_core::cache::{Secret, SecretCache};
/// use passage_core::protocol::Request;
///
/// # tokio_test_block(async {
/// let cache = SecretCache::new();
/// let key = Request::new("me", "imap").cache_key().unwrap();
///
/// cache.put(key.clone(), Secret::from("hunter2")).await;
/// assert_eq!(cache.get(&key).await.unwrap().expose(), b"hunter2");
///
/// cache.reset().await;
/// assert!(cache.get(&key).await.is_none());
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone, Default)]
pub struct SecretCache {
    entries: Arc<Mutex<HashMap<CacheKey, Secret>>>,
}

impl SecretCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the secret cached for `key`.
    pub async fn get(&self, key: &CacheKey) -> Option<Secret> {
        self.entries.lock().await.get(key).cloned()
    }

    /// Cache `secret` under `key`, replacing any previous entry.
    pub async fn put(&self, key: CacheKey, secret: Secret) {
        trace!(key_len = key.as_bytes().len(), "Inserting secret");
        self.entries.lock().await.insert(key, secret);
    }

    /// Discard every entry.
    ///
    /// Returns the number of entries dropped.
    pub async fn reset(&self) -> usize {
        let discarded = {
            let mut entries = self.entries.lock().await;
            std::mem::take(&mut *entries)
        };
        let count = discarded.len();
        debug!(count = count, "Reset secret cache");
        count
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl std::fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;

    fn key(account: &str, service: &str) -> CacheKey {
        Request::new(account, service).cache_key().unwrap()
    }

    #[tokio::test]
    async fn put_then_get() {
        let cache = SecretCache::new();
        cache.put(key("a", "b"), Secret::from("secret")).await;

        let secret = cache.get(&key("a", "b")).await.expect("secret should exist");
        assert_eq!(secret.expose(), b"secret");
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let cache = SecretCache::new();
        assert!(cache.get(&key("a", "b")).await.is_none());
    }

    #[tokio::test]
    async fn put_replaces_existing() {
        let cache = SecretCache::new();
        cache.put(key("a", "b"), Secret::from("original")).await;
        cache.put(key("a", "b"), Secret::from("replacement")).await;

        assert_eq!(cache.len().await, 1);
        let secret = cache.get(&key("a", "b")).await.unwrap();
        assert_eq!(secret.expose(), b"replacement");
    }

    #[tokio::test]
    async fn reset_discards_everything() {
        let cache = SecretCache::new();
        let keys = [key("a", "b"), key("c", "d"), key("e", "f")];
        for k in &keys {
            cache.put(k.clone(), Secret::from("s")).await;
        }

        assert_eq!(cache.reset().await, 3);
        assert!(cache.is_empty().await);
        for k in &keys {
            assert!(cache.get(k).await.is_none());
        }
    }

    #[tokio::test]
    async fn reset_empty_cache() {
        let cache = SecretCache::new();
        assert_eq!(cache.reset().await, 0);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let cache = SecretCache::new();
        let handle = cache.clone();
        handle.put(key("a", "b"), Secret::from("shared")).await;

        assert!(cache.get(&key("a", "b")).await.is_some());
        cache.reset().await;
        assert!(handle.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_and_resets() {
        let cache = SecretCache::new();
        let mut tasks = Vec::new();

        for i in 0..32 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                let k = key(&format!("account-{}", i % 4), "svc");
                cache.put(k.clone(), Secret::from("value")).await;
                if i % 8 == 0 {
                    cache.reset().await;
                }
                cache.get(&k).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(cache.len().await <= 4);
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::from("super-secret");
        let debug_output = format!("{:?}", secret);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super-secret"));
    }

    #[test]
    fn secret_preserves_arbitrary_bytes() {
        let bytes = vec![0u8, 255, 10, 13, 0];
        let secret = Secret::new(bytes.clone());
        assert_eq!(secret.expose(), bytes.as_slice());
        assert_eq!(secret.len(), 5);
        assert!(!secret.is_empty());
    }
}
