//! Per-connection request handling.
//!
//! Each accepted connection carries exactly one request. The handler decodes
//! it, answers from the cache if possible and otherwise asks the credential
//! store, caching the secret when the store returns exactly one match.
//!
//! The client learns nothing about failures: on any error the connection is
//! closed without a single byte written.

use std::sync::Arc;
use std::time::Duration;

use passage_core::{
    read_request, CredentialStore, LimitsConfig, ProtocolError, QueryError, Request, Secret,
    SecretCache,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// How a request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    /// The secret came from the cache.
    FromCache,
    /// The secret came from the credential store and is now cached.
    FromStore,
}

/// Why a request went unanswered.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// The request could not be read or decoded.
    #[error("bad request: {0}")]
    Decode(#[from] ProtocolError),

    /// The client did not finish its request in time.
    #[error("no complete request within {0:?}")]
    ReadTimeout(Duration),

    /// The cache key could not be derived.
    #[error("cannot derive cache key: {0}")]
    CacheKey(#[source] ProtocolError),

    /// The credential store had no unique answer.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Writing the secret to the client failed.
    #[error("failed to write response: {0}")]
    Write(#[source] std::io::Error),
}

/// Timeouts and size limits applied to each connection.
#[derive(Debug, Clone, Copy)]
pub struct HandlerLimits {
    /// Time allowed for the client to send a complete request.
    pub read_timeout: Duration,
    /// Time allowed for one credential store lookup.
    pub query_timeout: Duration,
    /// Largest request accepted, in bytes.
    pub max_request_bytes: usize,
}

impl From<&LimitsConfig> for HandlerLimits {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            read_timeout: limits.read_timeout(),
            query_timeout: limits.query_timeout(),
            max_request_bytes: limits.max_request_bytes,
        }
    }
}

impl Default for HandlerLimits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

/// Handles connections against a shared cache and credential store.
pub struct ConnectionHandler<S: CredentialStore> {
    cache: SecretCache,
    store: Arc<S>,
    limits: HandlerLimits,
}

impl<S: CredentialStore> Clone for ConnectionHandler<S> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            store: Arc::clone(&self.store),
            limits: self.limits,
        }
    }
}

impl<S: CredentialStore> ConnectionHandler<S> {
    /// Create a handler.
    pub fn new(cache: SecretCache, store: Arc<S>, limits: HandlerLimits) -> Self {
        Self {
            cache,
            store,
            limits,
        }
    }

    /// Serve one connection and close it.
    ///
    /// Outcomes are logged here; the returned value is for callers that care.
    pub async fn handle<C>(&self, mut conn: C) -> Result<Served, HandleError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.serve(&mut conn).await;
        match &result {
            Ok(Served::FromCache) => info!("Wrote result from cache"),
            Ok(Served::FromStore) => info!("Wrote result from credential store"),
            Err(HandleError::Decode(ProtocolError::ConnectionClosed)) => {
                debug!("Client disconnected without sending request")
            }
            Err(e) => warn!(error = %e, "Request not answered"),
        }

        // Close our side regardless of outcome
        if let Err(e) = conn.shutdown().await {
            debug!(error = %e, "Failed to shut down connection");
        }
        result
    }

    async fn serve<C>(&self, conn: &mut C) -> Result<Served, HandleError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let request = tokio::time::timeout(
            self.limits.read_timeout,
            read_request(conn, self.limits.max_request_bytes),
        )
        .await
        .map_err(|_| HandleError::ReadTimeout(self.limits.read_timeout))??;

        let key = request.cache_key().map_err(HandleError::CacheKey)?;

        if let Some(secret) = self.cache.get(&key).await {
            write_secret(conn, &secret).await?;
            return Ok(Served::FromCache);
        }

        let secret = self.query_store(&request).await?;
        let written = write_secret(conn, &secret).await;
        self.cache.put(key, secret).await;
        written?;
        Ok(Served::FromStore)
    }

    async fn query_store(&self, request: &Request) -> Result<Secret, QueryError> {
        debug!(
            service = %request.service(),
            account = %request.account(),
            "Cache miss, querying credential store"
        );
        let timeout = self.limits.query_timeout;
        tokio::time::timeout(
            timeout,
            self.store.query_one(request.service(), request.account()),
        )
        .await
        .map_err(|_| QueryError::TimedOut(timeout))?
    }
}

async fn write_secret<C>(conn: &mut C, secret: &Secret) -> Result<(), HandleError>
where
    C: AsyncWrite + Unpin,
{
    conn.write_all(secret.expose())
        .await
        .map_err(HandleError::Write)?;
    conn.flush().await.map_err(HandleError::Write)
}
