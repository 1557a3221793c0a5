//! `OAuthBearerClient` that records what the refresh callback hands it.

use std::sync::Mutex;
use token_engine::adapter::kafka::ClientError;
use token_engine::OAuthBearerClient;

/// Arguments of one `set_token` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedToken {
    pub token: String,
    pub lifetime_ms: i64,
    pub principal: String,
    pub extensions: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct RecordingOAuthClient {
    tokens: Mutex<Vec<RecordedToken>>,
    failures: Mutex<Vec<String>>,
    reject_with: Option<String>,
}

impl RecordingOAuthClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client whose `set_token` always fails with `message`.
    pub fn rejecting(message: &str) -> Self {
        Self {
            reject_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Successful `set_token` calls.
    pub fn tokens(&self) -> Vec<RecordedToken> {
        self.tokens.lock().unwrap().clone()
    }

    /// Messages passed to `set_token_failure`.
    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }
}

impl OAuthBearerClient for RecordingOAuthClient {
    fn set_token(
        &self,
        token: &str,
        lifetime_ms: i64,
        principal: &str,
        extensions: &[(String, String)],
    ) -> Result<(), ClientError> {
        if let Some(message) = &self.reject_with {
            return Err(message.clone().into());
        }
        self.tokens.lock().unwrap().push(RecordedToken {
            token: token.to_string(),
            lifetime_ms,
            principal: principal.to_string(),
            extensions: extensions.to_vec(),
        });
        Ok(())
    }

    fn set_token_failure(&self, message: &str) {
        self.failures.lock().unwrap().push(message.to_string());
    }
}
