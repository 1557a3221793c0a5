//! Client-credentials exchange against the token endpoint.
//!
//! The fetcher is a plain I/O primitive: one POST, one parsed answer, no
//! retries and no caching. Retry and refresh policy lives in the engines.
//!
//! # Security
//!
//! - The client secret is only exposed when the form body is built
//! - Access tokens are wrapped in `SecretString` as soon as they are parsed
//! - Error response bodies are logged at trace level only
//! - HTTP timeouts prevent hanging connections

use crate::config::{CredentialsConfig, EngineConfig};
use crate::entry::TokenResponse;
use crate::errors::TokenError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// Performs a client-credentials grant.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    /// Exchange `credentials` for a token.
    ///
    /// # Errors
    ///
    /// - `Configuration` - a required credential field is empty
    /// - `Idp` - non-success status, OAuth error body, or malformed body
    /// - `Transport` - the request could not be sent or the response read
    /// - `Cancelled` - `cancel` fired before the exchange completed
    async fn fetch(
        &self,
        credentials: &CredentialsConfig,
        cancel: &CancellationToken,
    ) -> Result<TokenResponse, TokenError>;
}

// =============================================================================
// OAuth Response Types
// =============================================================================

/// Token endpoint body. Success and error bodies share one shape so an
/// `error` member is detected even on a 2xx response.
#[derive(Deserialize)]
struct OAuthTokenBody {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<ExpiresIn>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Some IdPs send `expires_in` as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(u64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> Result<u64, TokenError> {
        match self {
            ExpiresIn::Seconds(s) => Ok(*s),
            ExpiresIn::Text(t) => t.trim().parse().map_err(|_| {
                TokenError::Idp(format!("token response has invalid expires_in '{t}'"))
            }),
        }
    }
}

fn describe_oauth_error(error: &str, description: Option<&str>) -> String {
    match description.filter(|d| !d.is_empty()) {
        Some(d) => format!("{error}: {d}"),
        None => error.to_string(),
    }
}

// =============================================================================
// HTTP Fetcher
// =============================================================================

/// `reqwest`-backed fetcher. The client is shared read-only across calls.
#[derive(Debug, Clone)]
pub struct HttpTokenFetcher {
    http_client: reqwest::Client,
}

impl HttpTokenFetcher {
    /// Build a fetcher with the given request and connect timeouts.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the HTTP client cannot be built.
    pub fn new(http_timeout: Duration, connect_timeout: Duration) -> Result<Self, TokenError> {
        let http_client = reqwest::Client::builder()
            .timeout(http_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { http_client })
    }

    /// Build a fetcher using the engine's timeouts.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the HTTP client cannot be built.
    pub fn from_config(config: &EngineConfig) -> Result<Self, TokenError> {
        Self::new(config.http_timeout, config.connect_timeout)
    }

    /// Wrap an existing client (shared connection pool, custom TLS).
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    async fn exchange(&self, credentials: &CredentialsConfig) -> Result<TokenResponse, TokenError> {
        let url = credentials.token_endpoint().clone();

        debug!(
            target: "token_engine.fetcher",
            client_id = %credentials.client_id(),
            url = %url,
            "Requesting token from IdP"
        );

        let mut form_body = vec![
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id()),
            ("client_secret", credentials.client_secret().expose_secret()),
        ];
        if let Some(scope) = credentials.scope() {
            form_body.push(("scope", scope));
        }

        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form_body)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "token_engine.fetcher", error = %e, "HTTP request failed");
                transport_error(&e)
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            debug!(target: "token_engine.fetcher", error = %e, "Failed to read response body");
            transport_error(&e)
        })?;

        let parsed = serde_json::from_slice::<OAuthTokenBody>(&body);

        if !status.is_success() {
            trace!(
                target: "token_engine.fetcher",
                body = %String::from_utf8_lossy(&body),
                "Token endpoint error response body"
            );

            let oauth_error = parsed
                .ok()
                .and_then(|b| b.error.map(|e| describe_oauth_error(&e, b.error_description.as_deref())));

            warn!(
                target: "token_engine.fetcher",
                client_id = %credentials.client_id(),
                status = %status,
                oauth_error = oauth_error.as_deref().unwrap_or("<none>"),
                "Token endpoint rejected the request"
            );

            return Err(TokenError::Idp(match oauth_error {
                Some(e) => format!("status {status}: {e}"),
                None => format!("status {status}"),
            }));
        }

        let body = parsed.map_err(|e| {
            warn!(target: "token_engine.fetcher", error = %e, "Failed to parse token response");
            TokenError::Idp(format!("malformed token response: {e}"))
        })?;

        if let Some(error) = body.error {
            let message = describe_oauth_error(&error, body.error_description.as_deref());
            warn!(
                target: "token_engine.fetcher",
                client_id = %credentials.client_id(),
                oauth_error = %message,
                "Token endpoint returned an OAuth error body"
            );
            return Err(TokenError::Idp(message));
        }

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TokenError::Idp("token response has no access_token".into()))?;

        let expires_in = body.expires_in.as_ref().map_or(Ok(0), ExpiresIn::seconds)?;

        debug!(
            target: "token_engine.fetcher",
            client_id = %credentials.client_id(),
            expires_in_secs = expires_in,
            "Token acquired successfully"
        );

        Ok(TokenResponse {
            access_token: SecretString::from(access_token),
            expires_in,
            token_type: body.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: body.scope,
        })
    }
}

fn transport_error(e: &reqwest::Error) -> TokenError {
    if e.is_timeout() {
        TokenError::Transport(format!("token endpoint timed out: {e}"))
    } else {
        TokenError::Transport(e.to_string())
    }
}

#[async_trait]
impl TokenFetcher for HttpTokenFetcher {
    #[instrument(skip_all, name = "token_engine.fetch")]
    async fn fetch(
        &self,
        credentials: &CredentialsConfig,
        cancel: &CancellationToken,
    ) -> Result<TokenResponse, TokenError> {
        credentials.validate()?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TokenError::Cancelled),
            result = self.exchange(credentials) => result,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_in_accepts_number_and_string() {
        let body: OAuthTokenBody =
            serde_json::from_str(r#"{"access_token":"a","expires_in":3600}"#).unwrap();
        assert_eq!(body.expires_in.unwrap().seconds().unwrap(), 3600);

        let body: OAuthTokenBody =
            serde_json::from_str(r#"{"access_token":"a","expires_in":"1800"}"#).unwrap();
        assert_eq!(body.expires_in.unwrap().seconds().unwrap(), 1800);

        let body: OAuthTokenBody =
            serde_json::from_str(r#"{"access_token":"a","expires_in":"soon"}"#).unwrap();
        assert!(matches!(
            body.expires_in.unwrap().seconds(),
            Err(TokenError::Idp(_))
        ));
    }

    #[test]
    fn test_error_body_parses() {
        let body: OAuthTokenBody = serde_json::from_str(
            r#"{"error":"invalid_client","error_description":"Client authentication failed"}"#,
        )
        .unwrap();
        assert_eq!(body.error.as_deref(), Some("invalid_client"));
        assert_eq!(
            describe_oauth_error("invalid_client", body.error_description.as_deref()),
            "invalid_client: Client authentication failed"
        );
        assert_eq!(describe_oauth_error("invalid_scope", Some("")), "invalid_scope");
    }

    #[test]
    fn test_build_fetcher() {
        let fetcher = HttpTokenFetcher::from_config(&EngineConfig::default());
        assert!(fetcher.is_ok());
    }
}
