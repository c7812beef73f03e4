//! Unix socket binding.
//!
//! The daemon listens on a socket in the user's home directory. The socket is
//! created with a `077` umask and chmod'ed to `0600` so that only the owning
//! user can connect. The socket file is removed again when the
//! [`BoundSocket`] is dropped.

use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::net::UnixListener;
use tracing::{debug, warn};

/// Error type for socket binding.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Failed to bind to the socket.
    #[error("failed to bind socket: {0}")]
    BindFailed(#[source] io::Error),

    /// Socket path is invalid.
    #[error("invalid socket path: {0}")]
    InvalidPath(String),

    /// Another process is already listening on the path.
    #[error("socket {0} is in use by another process")]
    AlreadyInUse(PathBuf),

    /// Failed to remove a stale socket left by a previous run.
    #[error("failed to remove stale socket: {0}")]
    StaleSocket(#[source] io::Error),
}

/// A socket path the daemon can bind to.
#[derive(Debug, Clone)]
pub struct UserSocket {
    /// Path to the Unix socket.
    path: PathBuf,
}

impl UserSocket {
    /// Create a socket at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bind the socket.
    ///
    /// A stale socket file from a previous run is replaced. A socket that
    /// still has a live listener, or a path that is not a socket at all, is
    /// left untouched and reported as an error.
    pub fn bind(&self) -> Result<BoundSocket, SocketError> {
        self.clear_stale()?;

        // Restrict the mode of the socket file from the moment it is created.
        let previous_mask = unsafe { libc::umask(0o077) };
        let bound = UnixListener::bind(&self.path);
        unsafe {
            libc::umask(previous_mask);
        }
        let listener = bound.map_err(SocketError::BindFailed)?;

        let guard = SocketGuard {
            path: self.path.clone(),
        };

        // Set permissions to 0600 (owner only)
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&self.path, perms).map_err(|e| {
            SocketError::BindFailed(io::Error::other(format!(
                "Failed to set socket permissions: {}",
                e
            )))
        })?;

        debug!(path = %self.path.display(), "Socket bound successfully");
        Ok(BoundSocket { listener, guard })
    }

    fn clear_stale(&self) -> Result<(), SocketError> {
        let metadata = match std::fs::symlink_metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(SocketError::StaleSocket(e)),
        };

        if !metadata.file_type().is_socket() {
            return Err(SocketError::InvalidPath(format!(
                "{} exists and is not a socket",
                self.path.display()
            )));
        }

        if std::os::unix::net::UnixStream::connect(&self.path).is_ok() {
            return Err(SocketError::AlreadyInUse(self.path.clone()));
        }

        std::fs::remove_file(&self.path).map_err(SocketError::StaleSocket)?;
        debug!(path = %self.path.display(), "Removed stale socket");
        Ok(())
    }
}

/// A bound listener together with the socket file backing it.
#[derive(Debug)]
pub struct BoundSocket {
    listener: UnixListener,
    guard: SocketGuard,
}

impl BoundSocket {
    /// The socket path.
    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Split into the listener and the guard that removes the socket file.
    pub fn into_parts(self) -> (UnixListener, SocketGuard) {
        (self.listener, self.guard)
    }
}

/// Removes the socket file when dropped.
#[derive(Debug)]
pub struct SocketGuard {
    path: PathBuf,
}

impl SocketGuard {
    /// The socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove socket"),
        }
    }
}
