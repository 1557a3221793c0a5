//! Refresh adapters for downstream network clients.
//!
//! Kafka clients ask for a token from a synchronous callback on their own
//! threads and go through [`SyncTokenSource`], the only place async engine
//! calls are bridged into synchronous code. HTTP clients are async and call
//! the engine directly for each outbound request. Both bound their wait by
//! [`DEFAULT_BLOCKING_WAIT`] unless configured otherwise.

pub mod http;
pub mod kafka;

use crate::config::TokenClientConfig;
use crate::engine::TokenEngine;
use crate::entry::CacheEntry;
use crate::errors::TokenError;
use common::jwt::principal_from_token;
use common::secret::{ExposeSecret, SecretString};
use common::types::ClientName;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;

/// Longest an adapter waits for a token before giving up.
pub const DEFAULT_BLOCKING_WAIT: Duration = Duration::from_secs(30);

/// The tuple handed to a client's token-set API.
#[derive(Clone)]
pub struct OAuthBearerToken {
    /// The bearer token.
    pub token: SecretString,

    /// Absolute expiry in Unix epoch milliseconds.
    pub expiration_epoch_millis: i64,

    /// Principal name for the client.
    pub principal: String,
}

impl fmt::Debug for OAuthBearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthBearerToken")
            .field("token", &"[REDACTED]")
            .field("expiration_epoch_millis", &self.expiration_epoch_millis)
            .field("principal", &self.principal)
            .finish()
    }
}

/// Pick the principal for a token: configured override, then the token's
/// own `sub`/`azp`/`client_id` claim, then the OAuth client id.
#[must_use]
pub fn resolve_principal(configured: Option<&str>, access_token: &str, client_id: &str) -> String {
    configured
        .filter(|p| !p.trim().is_empty())
        .map(str::to_string)
        .or_else(|| principal_from_token(access_token))
        .unwrap_or_else(|| client_id.to_string())
}

/// Synchronous view of a [`TokenEngine`].
///
/// A usable cached entry is returned without touching the runtime. Otherwise
/// the call blocks on the engine:
///
/// - outside any runtime, on the handle captured at construction
/// - on a multi-thread runtime worker, via `block_in_place`
/// - on a current-thread runtime, never: that would deadlock, so the call
///   fails with `TokenError::Configuration`
#[derive(Clone)]
pub struct SyncTokenSource {
    engine: Arc<dyn TokenEngine>,
    principal: Option<String>,
    client_id: String,
    runtime: Option<Handle>,
    wait_limit: Duration,
}

impl SyncTokenSource {
    /// Wrap `engine`, capturing the current runtime handle if there is one.
    #[must_use]
    pub fn new(engine: Arc<dyn TokenEngine>, config: &TokenClientConfig) -> Self {
        Self {
            engine,
            principal: config.principal.clone(),
            client_id: config.credentials.client_id().to_string(),
            runtime: Handle::try_current().ok(),
            wait_limit: DEFAULT_BLOCKING_WAIT,
        }
    }

    /// Block on `handle` when called from outside a runtime.
    #[must_use]
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Bound how long a blocking call waits for a token.
    #[must_use]
    pub fn with_wait_limit(mut self, limit: Duration) -> Self {
        self.wait_limit = limit;
        self
    }

    /// The wrapped engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn TokenEngine> {
        &self.engine
    }

    /// Logical client name.
    #[must_use]
    pub fn name(&self) -> &ClientName {
        self.engine.name()
    }

    /// Obtain `(token, expiry, principal)`, blocking if no usable entry is
    /// cached.
    ///
    /// # Errors
    ///
    /// Any `TokenError` from the engine; `Idp` for an empty token;
    /// `Transport` if the wait limit elapses; `Configuration` if called from
    /// a current-thread runtime or with no runtime available.
    pub fn token_blocking(&self) -> Result<OAuthBearerToken, TokenError> {
        let entry = match self.engine.current() {
            Some(entry) => entry,
            None => self.block_on_engine()?,
        };
        self.bearer_from(&entry)
    }

    /// Async counterpart of [`token_blocking`](Self::token_blocking).
    ///
    /// # Errors
    ///
    /// Any `TokenError` from the engine; `Idp` for an empty token.
    pub async fn token(&self, cancel: &CancellationToken) -> Result<OAuthBearerToken, TokenError> {
        let entry = self.engine.get_valid_token(cancel).await?;
        self.bearer_from(&entry)
    }

    fn bearer_from(&self, entry: &CacheEntry) -> Result<OAuthBearerToken, TokenError> {
        if entry.is_empty() {
            return Err(TokenError::Idp("engine returned an empty access token".into()));
        }

        let token = entry.access_token().clone();
        let principal =
            resolve_principal(self.principal.as_deref(), token.expose_secret(), &self.client_id);

        Ok(OAuthBearerToken {
            token,
            expiration_epoch_millis: entry.expiration_epoch_millis(),
            principal,
        })
    }

    fn block_on_engine(&self) -> Result<Arc<CacheEntry>, TokenError> {
        let engine = Arc::clone(&self.engine);
        let wait_limit = self.wait_limit;
        let wait = async move {
            let cancel = CancellationToken::new();
            tokio::time::timeout(wait_limit, engine.get_valid_token(&cancel))
                .await
                .unwrap_or_else(|_| {
                    Err(TokenError::Transport(format!(
                        "no token within {}ms",
                        wait_limit.as_millis()
                    )))
                })
        };

        match Handle::try_current() {
            Ok(current) => match current.runtime_flavor() {
                RuntimeFlavor::MultiThread => {
                    tokio::task::block_in_place(|| current.block_on(wait))
                }
                _ => Err(TokenError::Configuration(
                    "cannot block for a token on a current-thread runtime; use the async API".into(),
                )),
            },
            Err(_) => match &self.runtime {
                Some(handle) => handle.block_on(wait),
                None => Err(TokenError::Configuration(
                    "no tokio runtime available to fetch a token".into(),
                )),
            },
        }
    }
}

impl fmt::Debug for SyncTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncTokenSource")
            .field("engine", &self.engine)
            .field("principal", &self.principal)
            .field("client_id", &self.client_id)
            .field("wait_limit", &self.wait_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // header {"alg":"none"}, payload {"sub":"svc-orders"}
    const JWT_WITH_SUB: &str = "eyJhbGciOiJub25lIn0.eyJzdWIiOiJzdmMtb3JkZXJzIn0.sig";

    #[test]
    fn test_principal_override_wins() {
        assert_eq!(
            resolve_principal(Some("configured"), JWT_WITH_SUB, "client"),
            "configured"
        );
    }

    #[test]
    fn test_principal_from_token_subject() {
        assert_eq!(resolve_principal(None, JWT_WITH_SUB, "client"), "svc-orders");
        assert_eq!(resolve_principal(Some("  "), JWT_WITH_SUB, "client"), "svc-orders");
    }

    #[test]
    fn test_principal_falls_back_to_client_id() {
        assert_eq!(resolve_principal(None, "opaque-token", "client"), "client");
    }

    #[test]
    fn test_bearer_token_debug_redacts() {
        let bearer = OAuthBearerToken {
            token: SecretString::from("super-secret-token"),
            expiration_epoch_millis: 1_700_000_000_000,
            principal: "svc".to_string(),
        };
        let debug_str = format!("{bearer:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("super-secret-token"));
    }
}
