//! Main daemon orchestration.
//!
//! This module provides the core `Daemon` struct that coordinates:
//! - Accepting connections on the Unix socket
//! - Dispatching each connection to its own task
//! - Cache resets requested over the control channel
//! - Shutdown and removal of the socket file
//!
//! The daemon moves through `Starting → Serving → ShuttingDown → Stopped`
//! exactly once.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use passage_core::{Config, CredentialStore, SecretCache};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info};

use crate::handler::{ConnectionHandler, HandlerLimits};
use crate::signals::{SignalEvent, SignalListener};
use crate::socket::BoundSocket;

/// Where the daemon is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created, not yet accepting connections.
    Starting,
    /// Accepting connections.
    Serving,
    /// No longer accepting; releasing the socket.
    ShuttingDown,
    /// Socket released.
    Stopped,
}

/// Instructions delivered to a serving daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Discard every cached secret.
    ResetCache,
}

/// The main daemon struct.
pub struct Daemon<S: CredentialStore> {
    /// The secret cache shared with all connection tasks.
    cache: SecretCache,
    /// Per-connection request handling.
    handler: ConnectionHandler<S>,
    /// Connections served at once.
    max_connections: usize,
    /// Current lifecycle state.
    state: watch::Sender<LifecycleState>,
}

impl<S: CredentialStore> Daemon<S> {
    /// Create a new daemon with default limits.
    pub fn new(store: S) -> Self {
        Self::with_config(store, &Config::default())
    }

    /// Create a new daemon with the limits from `config`.
    pub fn with_config(store: S, config: &Config) -> Self {
        let cache = SecretCache::new();
        let handler = ConnectionHandler::new(
            cache.clone(),
            Arc::new(store),
            HandlerLimits::from(&config.limits),
        );
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self {
            cache,
            handler,
            max_connections: config.limits.max_connections.max(1),
            state,
        }
    }

    /// The shared secret cache.
    pub fn cache(&self) -> &SecretCache {
        &self.cache
    }

    /// Subscribe to lifecycle state changes.
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Run until `SIGINT` or `SIGTERM`, resetting the cache on `SIGUSR1`.
    pub async fn run(self, socket: BoundSocket, mut signals: SignalListener) -> anyhow::Result<()> {
        let (control_tx, control_rx) = mpsc::channel(8);

        let shutdown = async move {
            loop {
                match signals.next().await {
                    SignalEvent::ResetCache => {
                        info!("Got signal SIGUSR1: resetting");
                        if control_tx.send(ControlMessage::ResetCache).await.is_err() {
                            break;
                        }
                    }
                    event @ SignalEvent::Terminate(_) => {
                        info!(signal = %event, "Got signal");
                        break;
                    }
                }
            }
        };

        self.serve(socket, control_rx, shutdown).await
    }

    /// Serve connections on `socket` until `shutdown` completes.
    ///
    /// Messages on `control` are applied as they arrive. When `shutdown`
    /// resolves the listener is closed and the socket file removed. Requests
    /// already being handled run to completion on their own tasks.
    pub async fn serve<F>(
        &self,
        socket: BoundSocket,
        mut control: mpsc::Receiver<ControlMessage>,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let path = socket.path().to_path_buf();
        let (listener, guard) = socket.into_parts();
        let permits = Arc::new(Semaphore::new(self.max_connections));

        let accept = tokio::spawn(accept_loop(listener, self.handler.clone(), permits));
        self.state.send_replace(LifecycleState::Serving);
        info!(
            version = env!("CARGO_PKG_VERSION"),
            path = %path.display(),
            max_connections = self.max_connections,
            "Ready for business on Unix socket"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(message) = control.recv() => self.apply(message).await,
            }
        }

        self.state.send_replace(LifecycleState::ShuttingDown);
        info!("Shutting down");
        accept.abort();
        if let Err(e) = accept.await {
            if !e.is_cancelled() {
                return Err(e).context("Accept loop panicked");
            }
        }
        drop(guard);

        self.state.send_replace(LifecycleState::Stopped);
        info!(path = %path.display(), "Stopped");
        Ok(())
    }

    async fn apply(&self, message: ControlMessage) {
        match message {
            ControlMessage::ResetCache => {
                let count = self.cache.reset().await;
                info!(count = count, "Cache reset");
            }
        }
    }
}

/// Accept connections until the listener fails.
///
/// Each connection is served on its own task once a permit is available, so
/// at most `permits` connections are in flight.
async fn accept_loop<S: CredentialStore>(
    listener: UnixListener,
    handler: ConnectionHandler<S>,
    permits: Arc<Semaphore>,
) {
    loop {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            return;
        };

        match listener.accept().await {
            Ok((stream, _addr)) => {
                debug!("Accepted connection");
                let handler = handler.clone();
                tokio::spawn(async move {
                    let _ = handler.handle(stream).await;
                    drop(permit);
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection, no longer accepting");
                return;
            }
        }
    }
}
