//! Fetched tokens and cache entries.
//!
//! A `CacheEntry` is immutable once built. Engines publish entries as whole
//! `Arc<CacheEntry>` values through a watch channel, so a reader sees either
//! the entry before a refresh or the one after it, never a mix.

use crate::config::EngineConfig;
use chrono::{DateTime, TimeDelta, Utc};
use common::secret::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Longest lifetime we will cache for. Larger `expires_in` values are
/// clamped so instant arithmetic cannot overflow.
const MAX_CACHE_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

// =============================================================================
// Token Response
// =============================================================================

/// A successful client-credentials grant.
///
/// Erroring token endpoint bodies never become a `TokenResponse`; their
/// `error`/`error_description` travel in `TokenError::Idp` instead.
#[derive(Clone)]
pub struct TokenResponse {
    /// The bearer token.
    pub access_token: SecretString,

    /// Lifetime reported by the IdP, in seconds.
    pub expires_in: u64,

    /// Token type, normally `Bearer`.
    pub token_type: String,

    /// Scope granted, when the IdP echoes it.
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Bearer token response with no scope.
    #[must_use]
    pub fn bearer(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            expires_in,
            token_type: "Bearer".to_string(),
            scope: None,
        }
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// The latest fetched token and when it stops being usable.
///
/// `absolute_expiry = fetched_at + max(min_ttl, expires_in - clock_skew)`.
#[derive(Debug)]
pub struct CacheEntry {
    token: TokenResponse,
    fetched_at: Instant,
    absolute_expiry: Instant,
    expires_at_utc: DateTime<Utc>,
}

impl CacheEntry {
    /// Build an entry for a token fetched at `fetched_at` (`now_utc` is the
    /// wall-clock reading taken at the same moment).
    #[must_use]
    pub fn new(
        token: TokenResponse,
        fetched_at: Instant,
        now_utc: DateTime<Utc>,
        min_ttl: Duration,
        clock_skew: Duration,
    ) -> Self {
        let reported = Duration::from_secs(token.expires_in).saturating_sub(clock_skew);
        let lifetime = reported.max(min_ttl).min(MAX_CACHE_LIFETIME);

        let expires_at_utc = TimeDelta::from_std(lifetime)
            .ok()
            .and_then(|delta| now_utc.checked_add_signed(delta))
            .unwrap_or(now_utc);

        Self {
            token,
            fetched_at,
            absolute_expiry: fetched_at + lifetime,
            expires_at_utc,
        }
    }

    /// Build an entry for a token fetched just now.
    #[must_use]
    pub fn fetched_now(token: TokenResponse, config: &EngineConfig) -> Self {
        Self::new(
            token,
            Instant::now(),
            Utc::now(),
            config.min_ttl,
            config.clock_skew,
        )
    }

    /// The token response.
    #[must_use]
    pub fn token(&self) -> &TokenResponse {
        &self.token
    }

    /// The bearer token.
    #[must_use]
    pub fn access_token(&self) -> &SecretString {
        &self.token.access_token
    }

    /// When the token was fetched.
    #[must_use]
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// When the token stops being usable.
    #[must_use]
    pub fn absolute_expiry(&self) -> Instant {
        self.absolute_expiry
    }

    /// Wall-clock expiry.
    #[must_use]
    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        self.expires_at_utc
    }

    /// Wall-clock expiry in Unix epoch milliseconds.
    #[must_use]
    pub fn expiration_epoch_millis(&self) -> i64 {
        self.expires_at_utc.timestamp_millis()
    }

    /// Cached lifetime (`absolute_expiry - fetched_at`).
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.absolute_expiry - self.fetched_at
    }

    /// Time left before `absolute_expiry`, zero once expired.
    #[must_use]
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.absolute_expiry.saturating_duration_since(now)
    }

    /// Whether `now` is at or past `absolute_expiry`.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.absolute_expiry
    }

    /// Whether the entry is still usable at `now` with `margin` to spare.
    ///
    /// An entry whose lifetime does not exceed `margin` is fresh for the
    /// first half of its lifetime instead.
    #[must_use]
    pub fn is_fresh_at(&self, now: Instant, margin: Duration) -> bool {
        let lifetime = self.lifetime();
        if lifetime > margin {
            self.remaining_at(now) > margin
        } else {
            now.saturating_duration_since(self.fetched_at) < lifetime / 2
        }
    }

    /// Whether the access token is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.token.access_token.expose_secret().is_empty()
    }
}

// =============================================================================
// Published slot
// =============================================================================

/// The engine's published entry. Written by the fetch path only.
pub(crate) struct TokenSlot {
    tx: watch::Sender<Option<Arc<CacheEntry>>>,
}

impl TokenSlot {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Current entry, cloned out so the borrow is released immediately.
    pub(crate) fn load(&self) -> Option<Arc<CacheEntry>> {
        self.tx.borrow().clone()
    }

    pub(crate) fn publish(&self, entry: Arc<CacheEntry>) {
        self.tx.send_replace(Some(entry));
    }

    pub(crate) fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<Arc<CacheEntry>>> {
        self.tx.subscribe()
    }
}
