//! Platform keychain backend.
//!
//! Uses the system keychain (macOS Keychain, Windows Credential Manager,
//! Linux Secret Service) via the `keyring` crate. Lookups are blocking and
//! may pop up an unlock or confirmation dialog, so they run on the blocking
//! thread pool.

use keyring::Entry;
use tracing::debug;

use super::{CredentialStore, QueryError, QueryFuture};
use crate::cache::Secret;

/// Credential store backed by the platform keychain.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringStore;

impl KeyringStore {
    /// Create a keychain-backed store.
    pub fn new() -> Self {
        Self
    }

    fn query_sync(service: &str, account: &str) -> Result<Secret, QueryError> {
        let entry = Entry::new(service, account).map_err(map_error)?;
        let bytes = entry.get_secret().map_err(map_error)?;
        debug!(service = %service, account = %account, "Keychain item found");
        Ok(Secret::new(bytes))
    }
}

fn map_error(error: keyring::Error) -> QueryError {
    match error {
        keyring::Error::NoEntry => QueryError::NotFound,
        keyring::Error::Ambiguous(items) => QueryError::Ambiguous(items.len()),
        other => QueryError::Unavailable(other.to_string()),
    }
}

impl CredentialStore for KeyringStore {
    fn query_one(&self, service: &str, account: &str) -> QueryFuture<'_> {
        let service = service.to_string();
        let account = account.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || Self::query_sync(&service, &account))
                .await
                .map_err(|e| QueryError::Unavailable(format!("keychain task failed: {e}")))?
        })
    }
}
