//! Credential store abstraction.
//!
//! The daemon only ever asks one question of the platform credential store:
//! "give me the single secret stored under this service and account". That
//! question is the [`CredentialStore`] trait, so the daemon can be tested
//! against [`MockCredentialStore`] and run against [`KeyringStore`].

mod keychain;
mod mock;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub use self::keychain::KeyringStore;
pub use self::mock::MockCredentialStore;

use crate::cache::Secret;

/// Error type for credential store queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// No item matches the selector.
    #[error("item not found")]
    NotFound,

    /// More than one item matches the selector.
    #[error("selector is ambiguous: {0} items match")]
    Ambiguous(usize),

    /// The store could not be reached or refused access.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer in time.
    #[error("credential store query timed out after {0:?}")]
    TimedOut(Duration),
}

/// Boxed future returned by [`CredentialStore::query_one`].
pub type QueryFuture<'a> = Pin<Box<dyn Future<Output = Result<Secret, QueryError>> + Send + 'a>>;

/// Trait for credential store implementations.
///
/// # Example (Mock Implementation)
///
/// ```ignore
/// struct FixedStore(Secret);
///
/// impl CredentialStore for FixedStore {
///     fn query_one(&self, _service: &str, _account: &str) -> QueryFuture<'_> {
///         let secret = self.0.clone();
///         Box::pin(async move { Ok(secret) })
///     }
/// }
/// ```
pub trait CredentialStore: Send + Sync + 'static {
    /// Fetch the unique secret stored under `(service, account)`.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::NotFound` when nothing matches,
    /// `QueryError::Ambiguous` when several items match and
    /// `QueryError::Unavailable` when the store itself fails.
    fn query_one(&self, service: &str, account: &str) -> QueryFuture<'_>;
}
