//! Secret types for keeping credentials and bearer tokens out of logs.
//!
//! This module re-exports types from the [`secrecy`] crate. Client secrets
//! and access tokens flow through every layer of the token engine (config
//! loading, the token endpoint exchange, the cache, the client adapters), so
//! they are wrapped once at the edge and only unwrapped at the point where
//! they go on the wire.
//!
//! `SecretString` implements `Debug` with redaction, so deriving `Debug` on a
//! struct that holds one is safe for `{:?}` and `tracing` fields.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ClientCredentials {
//!     client_id: String,
//!     client_secret: SecretString,
//! }
//!
//! let creds = ClientCredentials {
//!     client_id: "orders-producer".to_string(),
//!     client_secret: SecretString::from("s3cr3t"),
//! };
//!
//! // client_secret is redacted
//! let debug = format!("{creds:?}");
//! assert!(!debug.contains("s3cr3t"));
//!
//! // Unwrap only where the value is sent to the token endpoint
//! assert_eq!(creds.client_secret.expose_secret(), "s3cr3t");
//! ```
//!
//! Use `SecretString` for:
//! - OAuth client secrets
//! - Access tokens held in the cache
//! - Bearer header values built by the HTTP adapter
//!
//! With the `serde` feature enabled (workspace default), secrets deserialize
//! straight from configuration files.

pub use secrecy::{ExposeSecret, SecretString};
