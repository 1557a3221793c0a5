//! Common utilities and types shared across the bearer token crates.

#![warn(clippy::pedantic)]

/// Module for observability configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for client naming types
pub mod types;

/// Module for peeking at JWT access token claims
pub mod jwt;
