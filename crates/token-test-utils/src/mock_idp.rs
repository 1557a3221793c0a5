//! Mock OAuth2 token endpoint.
//!
//! Wraps a wiremock server that only answers client-credentials grants
//! posted as form bodies to [`TOKEN_PATH`].
//!
//! # Example
//!
//! ```rust,ignore
//! let idp = MockIdp::start().await;
//! idp.respond_with_token("AAA", 60).await;
//!
//! let fetcher = HttpTokenFetcher::from_config(&EngineConfig::default()).unwrap();
//! let token = fetcher.fetch(&idp.credentials(), &CancellationToken::new()).await.unwrap();
//! ```

use common::secret::SecretString;
use serde_json::json;
use std::time::Duration;
use token_engine::CredentialsConfig;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

pub const TOKEN_PATH: &str = "/oauth2/token";

pub struct MockIdp {
    server: MockServer,
}

impl MockIdp {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Absolute token endpoint URL.
    pub fn token_endpoint(&self) -> String {
        format!("{}{TOKEN_PATH}", self.server.uri())
    }

    /// Valid credentials pointing at this server.
    pub fn credentials(&self) -> CredentialsConfig {
        CredentialsConfig::new(
            "test-client",
            SecretString::from("test-secret"),
            &self.token_endpoint(),
            None,
        )
        .unwrap()
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    fn grant() -> MockBuilder {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=client_credentials"))
    }

    /// Answer every grant with `token`.
    pub async fn respond_with_token(&self, token: &str, expires_in: u64) {
        Self::grant()
            .respond_with(token_body(token, expires_in))
            .mount(&self.server)
            .await;
    }

    /// Answer the next grant only with `token`. Mount in the order the
    /// responses should be served.
    pub async fn respond_once_with_token(&self, token: &str, expires_in: u64) {
        Self::grant()
            .respond_with(token_body(token, expires_in))
            .up_to_n_times(1)
            .mount(&self.server)
            .await;
    }

    /// Answer every grant with `token` after `delay`.
    pub async fn respond_with_delay(&self, token: &str, expires_in: u64, delay: Duration) {
        Self::grant()
            .respond_with(token_body(token, expires_in).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Answer every grant with an OAuth error body.
    pub async fn respond_with_error(&self, status: u16, error: &str, description: &str) {
        Self::grant()
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": error,
                "error_description": description,
            })))
            .mount(&self.server)
            .await;
    }

    /// Answer every grant with a raw body.
    pub async fn respond_with_raw(&self, status: u16, body: &str) {
        Self::grant()
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Only accept grants that request `scope`.
    pub async fn expect_scope(&self, scope: &str, token: &str, expires_in: u64) {
        Self::grant()
            .and(body_string_contains(format!("scope={scope}")))
            .respond_with(token_body(token, expires_in))
            .mount(&self.server)
            .await;
    }

    /// Number of grant requests received so far.
    pub async fn token_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == TOKEN_PATH)
            .count()
    }

    /// Form bodies of the grant requests received so far.
    pub async fn token_request_bodies(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == TOKEN_PATH)
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect()
    }
}

fn token_body(token: &str, expires_in: u64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": token,
        "token_type": "Bearer",
        "expires_in": expires_in,
    }))
}
