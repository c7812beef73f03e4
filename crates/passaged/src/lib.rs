//! passage daemon implementation.
//!
//! This crate provides the daemon process for passage: socket binding,
//! connection handling, signal handling and the lifecycle tying them
//! together. Request decoding, the cache and credential store backends live
//! in `passage-core`.

pub mod daemon;
pub mod handler;
pub mod signals;
pub mod socket;

// Re-export main components
pub use daemon::{ControlMessage, Daemon, LifecycleState};
pub use handler::{ConnectionHandler, HandleError, HandlerLimits, Served};
pub use signals::{SignalEvent, SignalListener};
pub use socket::{BoundSocket, SocketError, SocketGuard, UserSocket};
