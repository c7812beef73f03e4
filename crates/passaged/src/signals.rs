//! Process signal subscriptions.
//!
//! | Signal            | Effect                     |
//! |-------------------|----------------------------|
//! | `SIGUSR1`         | reset the secret cache     |
//! | `SIGINT`/`SIGTERM`| shut down gracefully       |

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};

/// A signal the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Discard all cached secrets.
    ResetCache,
    /// Stop serving and exit.
    Terminate(&'static str),
}

impl std::fmt::Display for SignalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalEvent::ResetCache => write!(f, "SIGUSR1"),
            SignalEvent::Terminate(name) => write!(f, "{}", name),
        }
    }
}

/// Subscriptions to the signals in [`SignalEvent`].
///
/// Subscribing replaces the default disposition, so once this exists
/// `SIGINT` and `SIGTERM` no longer kill the process outright.
pub struct SignalListener {
    reset: Signal,
    interrupt: Signal,
    terminate: Signal,
}

impl SignalListener {
    /// Subscribe to all signals. Must be called inside a tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            reset: signal(SignalKind::user_defined1())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next signal.
    pub async fn next(&mut self) -> SignalEvent {
        tokio::select! {
            Some(()) = self.reset.recv() => SignalEvent::ResetCache,
            Some(()) = self.interrupt.recv() => SignalEvent::Terminate("SIGINT"),
            Some(()) = self.terminate.recv() => SignalEvent::Terminate("SIGTERM"),
            else => SignalEvent::Terminate("signal driver shutdown"),
        }
    }
}
