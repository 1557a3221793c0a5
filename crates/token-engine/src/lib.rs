//! OAuth2 client-credentials token engine.
//!
//! Keeps a continuously valid bearer token available to any number of
//! Kafka and OpenSearch clients of one logical client, without each of them
//! calling the token endpoint.
//!
//! # Layout
//!
//! - [`config`]: credentials and engine tuning, loaded from env vars
//! - [`fetcher`]: the client-credentials exchange
//! - [`entry`]: fetched tokens and cache entries
//! - [`engine`]: read-through and proactive engines behind [`TokenEngine`]
//! - [`registry`]: one engine per logical client name
//! - [`adapter`]: Kafka refresh callback and HTTP bearer authorization
//! - [`observability`]: event sink, logging and metrics
//!
//! # Example
//!
//! ```rust,ignore
//! let config = TokenClientConfig::from_env("KAFKA_OAUTH")?;
//! let sink: Arc<dyn TokenEventSink> = Arc::new(TracingEventSink);
//! let engine = build_http_engine(&config, Arc::clone(&sink))?;
//!
//! let refresher = KafkaTokenRefresher::new(SyncTokenSource::new(engine, &config), sink);
//! // call refresher.on_token_refresh(&client) from the client's refresh hook
//! ```

pub mod adapter;
pub mod config;
pub mod engine;
pub mod entry;
pub mod errors;
pub mod fetcher;
pub mod observability;
pub mod registry;

pub use adapter::http::{authorize_request, BearerAuthLayer, BearerAuthService};
pub use adapter::kafka::{KafkaTokenRefresher, OAuthBearerClient, RefreshCallbackError};
pub use adapter::{OAuthBearerToken, SyncTokenSource};
pub use config::{CredentialsConfig, EngineConfig, RefreshStrategy, TokenClientConfig};
pub use engine::{build_engine, build_http_engine, EngineState, TokenEngine};
pub use entry::{CacheEntry, TokenResponse};
pub use errors::TokenError;
pub use fetcher::{HttpTokenFetcher, TokenFetcher};
pub use observability::{NoopEventSink, TokenEventSink, TracingEventSink};
pub use registry::TokenEngineRegistry;

#[cfg(feature = "rdkafka")]
pub use adapter::kafka::KafkaOAuthContext;
