//! Core types and utilities for passage.
//!
//! This crate provides the building blocks of the passage secret broker.
//! It knows nothing about sockets or signals; the daemon wires these pieces
//! together.
//!
//! # Modules
//!
//! - [`protocol`]: The wire request (`Request`), its cache key and the decoder
//! - [`cache`]: The shared secret cache (`SecretCache`, `Secret`)
//! - [`store`]: Credential store trait plus keychain and mock backends
//! - [`config`]: Optional TOML configuration
//!
//! # Example
//!
//! ```
//! use passage_core::protocol::Request;
//!
//! // What a client sends
//! let request = Request::new("me@example.com", "smtp.example.com");
//! let json = request.to_json().unwrap();
//! assert_eq!(json, r#"{"Account":"me@example.com","Service":"smtp.example.com"}"#);
//! ```

pub mod cache;
pub mod config;
pub mod protocol;
pub mod store;

// Re-export commonly used types at the crate root for convenience
pub use cache::{Secret, SecretCache};
pub use config::{default_socket_path, Config, ConfigError, LimitsConfig};
pub use protocol::{read_request, CacheKey, ProtocolError, Request};
pub use store::{CredentialStore, KeyringStore, MockCredentialStore, QueryError, QueryFuture};
