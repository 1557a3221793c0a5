//! Unverified JWT claim peeking for access tokens.
//!
//! Access tokens issued by most identity providers are JWTs. Kafka's
//! OAUTHBEARER mechanism wants a principal name next to the token, and the
//! natural choice is the token's own subject. This module decodes the
//! payload segment to read a handful of claims.
//!
//! # Security
//!
//! - Signatures are NOT verified. The token came straight from our own IdP
//!   exchange and is only inspected to label it; never use these claims for
//!   an authorization decision.
//! - Tokens are size-checked before any decoding.
//! - Opaque (non-JWT) access tokens are valid OAuth2 tokens; callers treat
//!   `NotAJwt` as "no claims available", not as a failure.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use thiserror::Error;

/// Maximum token size we are willing to decode (8KB).
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Errors from peeking at token claims.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtPeekError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("token exceeds {MAX_JWT_SIZE_BYTES} bytes")]
    TokenTooLarge,

    /// Token is not a three-part JWT.
    #[error("token is not a JWT")]
    NotAJwt,

    /// Payload is not valid base64url JSON.
    #[error("token payload is malformed")]
    MalformedPayload,
}

/// The claims the token engine cares about. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PeekedClaims {
    /// Subject.
    #[serde(default)]
    pub sub: Option<String>,

    /// Authorized party (Keycloak, Entra ID).
    #[serde(default)]
    pub azp: Option<String>,

    /// Client id claim (Okta, Auth0 style).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Expiration, Unix epoch seconds.
    #[serde(default)]
    pub exp: Option<i64>,
}

impl PeekedClaims {
    /// Best principal name carried by the token: `sub`, then `azp`, then
    /// `client_id`. Empty values are skipped.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        [&self.sub, &self.azp, &self.client_id]
            .into_iter()
            .filter_map(|c| c.as_deref())
            .find(|s| !s.is_empty())
    }
}

/// Decode the payload of a JWT without verifying it.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `NotAJwt` - token does not have three dot-separated segments
/// - `MalformedPayload` - payload segment is not base64url-encoded JSON
pub fn peek_claims(token: &str) -> Result<PeekedClaims, JwtPeekError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token too large to peek"
        );
        return Err(JwtPeekError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(JwtPeekError::NotAJwt);
    };

    let payload_bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT payload base64");
        JwtPeekError::MalformedPayload
    })?;

    serde_json::from_slice(&payload_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT payload JSON");
        JwtPeekError::MalformedPayload
    })
}

/// Principal name carried by `token`, if it is a JWT that names one.
#[must_use]
pub fn principal_from_token(token: &str) -> Option<String> {
    peek_claims(token)
        .ok()
        .and_then(|claims| claims.principal().map(ToString::to_string))
}
