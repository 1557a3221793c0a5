//! # Token Test Utilities
//!
//! Test doubles and fixtures for exercising token engines without a real
//! identity provider.
//!
//! ## Modules
//!
//! - `mock_idp` - wiremock token endpoint with canned grant responses
//! - `fetcher` - scripted `TokenFetcher` for paused-time engine tests
//! - `sink` - `TokenEventSink` that records every event
//! - `oauth_client` - `OAuthBearerClient` that records token-set calls
//! - `fixtures` - credentials, client configs and JWTs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use token_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let fetcher = ScriptedFetcher::new().then_token("AAA", 60);
//!     let sink = RecordingSink::new();
//!     let engine = build_engine(&client_config(EngineConfig::default()), fetcher.clone(), sink.clone()).unwrap();
//!     // ...
//! }
//! ```

pub mod fetcher;
pub mod fixtures;
pub mod mock_idp;
pub mod oauth_client;
pub mod sink;

pub use fetcher::ScriptedFetcher;
pub use fixtures::*;
pub use mock_idp::MockIdp;
pub use oauth_client::{RecordedToken, RecordingOAuthClient};
pub use sink::{RecordingSink, SinkEvent};
