//! Kafka SASL/OAUTHBEARER refresh callback.
//!
//! Kafka clients call back into the application whenever they need a token:
//! at connection setup and again before the current token's lifetime runs
//! out. The callback hands the client either a token or a failure message;
//! it does not fail out unless the client itself rejects the token.

use super::{OAuthBearerToken, SyncTokenSource};
use crate::observability::TokenEventSink;
use common::secret::ExposeSecret;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, instrument};

const ADAPTER: &str = "kafka";

/// Error type returned by a client's token-set API.
pub type ClientError = Box<dyn StdError + Send + Sync>;

/// The token-set and token-failure APIs of a Kafka client handle.
pub trait OAuthBearerClient {
    /// Install a token. `lifetime_ms` is the absolute expiry in Unix epoch
    /// milliseconds.
    ///
    /// # Errors
    ///
    /// Returns the client's own error if it rejects the token.
    fn set_token(
        &self,
        token: &str,
        lifetime_ms: i64,
        principal: &str,
        extensions: &[(String, String)],
    ) -> Result<(), ClientError>;

    /// Tell the client no token could be obtained.
    fn set_token_failure(&self, message: &str);
}

/// Failure the refresh callback cannot hand to the client.
#[derive(Debug, Error)]
pub enum RefreshCallbackError {
    /// The client rejected the token passed to its token-set API.
    #[error("Kafka client rejected the OAuth bearer token: {0}")]
    TokenRejected(#[source] ClientError),
}

/// Implements the Kafka `on_token_refresh` callback for one engine.
#[derive(Debug, Clone)]
pub struct KafkaTokenRefresher {
    source: SyncTokenSource,
    sink: Arc<dyn TokenEventSink>,
    extensions: Vec<(String, String)>,
}

impl KafkaTokenRefresher {
    #[must_use]
    pub fn new(source: SyncTokenSource, sink: Arc<dyn TokenEventSink>) -> Self {
        Self {
            source,
            sink,
            extensions: Vec::new(),
        }
    }

    /// SASL extensions passed along with every token (for example
    /// `logicalCluster`).
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.push((key.into(), value.into()));
        self
    }

    /// Fetch a token and hand it to `client`.
    ///
    /// Engine failures and empty tokens go to `client.set_token_failure`
    /// and the callback returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns `RefreshCallbackError::TokenRejected` if `client.set_token`
    /// fails; the host decides what to do with it.
    #[instrument(skip_all, name = "token_engine.kafka.on_token_refresh", fields(client = %self.source.name()))]
    pub fn on_token_refresh<C>(&self, client: &C) -> Result<(), RefreshCallbackError>
    where
        C: OAuthBearerClient + ?Sized,
    {
        let bearer: OAuthBearerToken = match self.source.token_blocking() {
            Ok(bearer) => bearer,
            Err(e) => {
                self.sink.adapter_failed(self.source.name(), ADAPTER, &e);
                client.set_token_failure(&format!(
                    "failed to obtain OAuth bearer token for '{}': {e}",
                    self.source.name()
                ));
                return Ok(());
            }
        };

        client
            .set_token(
                bearer.token.expose_secret(),
                bearer.expiration_epoch_millis,
                &bearer.principal,
                &self.extensions,
            )
            .map_err(|e| {
                error!(
                    target: "token_engine.adapter",
                    client = %self.source.name(),
                    error = %e,
                    "Kafka client rejected the OAuth bearer token"
                );
                RefreshCallbackError::TokenRejected(e)
            })?;

        debug!(
            target: "token_engine.adapter",
            client = %self.source.name(),
            principal = %bearer.principal,
            expiration_epoch_millis = bearer.expiration_epoch_millis,
            "OAuth bearer token handed to Kafka client"
        );
        Ok(())
    }
}

#[cfg(feature = "rdkafka")]
pub use rdkafka_context::KafkaOAuthContext;

#[cfg(feature = "rdkafka")]
mod rdkafka_context {
    use super::{SyncTokenSource, ADAPTER};
    use crate::observability::TokenEventSink;
    use common::secret::ExposeSecret;
    use rdkafka::client::{ClientContext, OAuthToken};
    use rdkafka::consumer::ConsumerContext;
    use std::error::Error;
    use std::sync::Arc;

    /// rdkafka client context that pulls tokens from an engine.
    ///
    /// librdkafka reports a returned error through its own token-failure
    /// API and schedules another refresh.
    #[derive(Debug, Clone)]
    pub struct KafkaOAuthContext {
        source: SyncTokenSource,
        sink: Arc<dyn TokenEventSink>,
    }

    impl KafkaOAuthContext {
        #[must_use]
        pub fn new(source: SyncTokenSource, sink: Arc<dyn TokenEventSink>) -> Self {
            Self { source, sink }
        }
    }

    impl ClientContext for KafkaOAuthContext {
        const ENABLE_REFRESH_OAUTH_TOKEN: bool = true;

        fn generate_oauth_token(
            &self,
            _oauthbearer_config: Option<&str>,
        ) -> Result<OAuthToken, Box<dyn Error>> {
            let bearer = self.source.token_blocking().map_err(|e| {
                self.sink.adapter_failed(self.source.name(), ADAPTER, &e);
                Box::new(e) as Box<dyn Error>
            })?;

            Ok(OAuthToken {
                token: bearer.token.expose_secret().to_string(),
                principal_name: bearer.principal,
                lifetime_ms: bearer.expiration_epoch_millis,
            })
        }
    }

    impl ConsumerContext for KafkaOAuthContext {}
}
