//! Token engines.
//!
//! A [`TokenEngine`] owns one cache entry for one logical client and hands
//! out currently valid tokens. Two strategies sit behind the trait:
//!
//! - [`ReadThroughEngine`]: fetch on a cache miss; concurrent misses share a
//!   single in-flight fetch.
//! - [`ProactiveEngine`]: a background task refreshes ahead of expiry and
//!   retries failed refreshes indefinitely; reads never fetch.
//!
//! Both strategies allow at most one fetch in flight at any time, publish
//! entries as whole `Arc<CacheEntry>` swaps, and never return an entry that
//! is past its absolute expiry.

pub mod proactive;
pub mod read_through;

pub use proactive::ProactiveEngine;
pub use read_through::ReadThroughEngine;

use crate::config::{CredentialsConfig, EngineConfig, RefreshStrategy, TokenClientConfig};
use crate::entry::{CacheEntry, TokenSlot};
use crate::errors::TokenError;
use crate::fetcher::{HttpTokenFetcher, TokenFetcher};
use crate::observability::TokenEventSink;
use async_trait::async_trait;
use common::secret::ExposeSecret;
use common::types::ClientName;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Engine State
// =============================================================================

/// Engine health.
///
/// `Warming` until the first successful fetch, `Healthy` after it,
/// `Degraded` when a refresh fails while an entry is published, back to
/// `Healthy` on the next success. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Warming,
    Healthy,
    Degraded,
    Disposed,
}

impl EngineState {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Warming => "warming",
            EngineState::Healthy => "healthy",
            EngineState::Degraded => "degraded",
            EngineState::Disposed => "disposed",
        }
    }

    pub(crate) fn as_gauge(self) -> u8 {
        self as u8
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => EngineState::Warming,
            1 => EngineState::Healthy,
            2 => EngineState::Degraded,
            _ => EngineState::Disposed,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Engine Trait
// =============================================================================

/// Hands out currently valid bearer tokens for one logical client.
#[async_trait]
pub trait TokenEngine: Send + Sync + fmt::Debug {
    /// Logical client name (the cache key).
    fn name(&self) -> &ClientName;

    /// Return an entry that is not past its absolute expiry.
    ///
    /// # Errors
    ///
    /// - `Configuration` - the credentials were rejected as invalid
    /// - `Idp` / `Transport` - no usable token could be obtained
    /// - `Cancelled` - `cancel` fired, or the engine was disposed while waiting
    /// - `Disposed` - the engine was disposed before the call
    async fn get_valid_token(&self, cancel: &CancellationToken)
        -> Result<Arc<CacheEntry>, TokenError>;

    /// Non-blocking snapshot of a usable entry, if one is published.
    fn current(&self) -> Option<Arc<CacheEntry>>;

    /// Current health.
    fn state(&self) -> EngineState;

    /// Stop refreshing and cancel any in-flight fetch. Idempotent.
    fn dispose(&self);
}

/// Build the engine selected by `config.engine.strategy`.
///
/// # Errors
///
/// Returns `TokenError::Configuration` if the credentials or tuning knobs
/// are invalid, or if the proactive strategy is selected outside a tokio
/// runtime.
pub fn build_engine(
    config: &TokenClientConfig,
    fetcher: Arc<dyn TokenFetcher>,
    sink: Arc<dyn TokenEventSink>,
) -> Result<Arc<dyn TokenEngine>, TokenError> {
    let core = EngineCore::new(
        config.name.clone(),
        config.credentials.clone(),
        config.engine.clone(),
        fetcher,
        sink,
    )?;

    let engine: Arc<dyn TokenEngine> = match config.engine.strategy {
        RefreshStrategy::ReadThrough => Arc::new(ReadThroughEngine::from_core(core)),
        RefreshStrategy::Proactive => Arc::new(ProactiveEngine::from_core(core)?),
    };
    Ok(engine)
}

/// Build an engine backed by [`HttpTokenFetcher`].
///
/// # Errors
///
/// See [`build_engine`].
pub fn build_http_engine(
    config: &TokenClientConfig,
    sink: Arc<dyn TokenEventSink>,
) -> Result<Arc<dyn TokenEngine>, TokenError> {
    let fetcher = HttpTokenFetcher::from_config(&config.engine)?;
    build_engine(config, Arc::new(fetcher), sink)
}

// =============================================================================
// Shared engine core
// =============================================================================

/// State shared by both strategies: credentials, the published slot, the
/// shutdown token and the health state.
pub(crate) struct EngineCore {
    name: ClientName,
    credentials: CredentialsConfig,
    config: EngineConfig,
    fetcher: Arc<dyn TokenFetcher>,
    sink: Arc<dyn TokenEventSink>,
    slot: TokenSlot,
    shutdown: CancellationToken,
    state: AtomicU8,
    last_error: Mutex<Option<TokenError>>,
}

impl EngineCore {
    pub(crate) fn new(
        name: ClientName,
        credentials: CredentialsConfig,
        config: EngineConfig,
        fetcher: Arc<dyn TokenFetcher>,
        sink: Arc<dyn TokenEventSink>,
    ) -> Result<Arc<Self>, TokenError> {
        credentials.validate()?;
        config.validate()?;

        Ok(Arc::new(Self {
            name,
            credentials,
            config,
            fetcher,
            sink,
            slot: TokenSlot::new(),
            shutdown: CancellationToken::new(),
            state: AtomicU8::new(EngineState::Warming.as_gauge()),
            last_error: Mutex::new(None),
        }))
    }

    pub(crate) fn name(&self) -> &ClientName {
        &self.name
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn sink(&self) -> &Arc<dyn TokenEventSink> {
        &self.sink
    }

    pub(crate) fn slot(&self) -> &TokenSlot {
        &self.slot
    }

    pub(crate) fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` unless disposed, reporting actual changes.
    fn transition(&self, to: EngineState) {
        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                let from = EngineState::from_u8(raw);
                (from != EngineState::Disposed && from != to).then_some(to.as_gauge())
            });

        if let Ok(raw) = result {
            self.sink
                .state_changed(&self.name, EngineState::from_u8(raw), to);
        }
    }

    pub(crate) fn last_error(&self) -> Option<TokenError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, error: Option<TokenError>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Record a failed refresh. With an entry still published the engine is
    /// degraded, otherwise it is still warming.
    pub(crate) fn note_failure(&self, error: &TokenError) {
        self.set_last_error(Some(error.clone()));
        if self.slot.load().is_some() {
            self.transition(EngineState::Degraded);
        }
    }

    /// Run one exchange and publish the result.
    ///
    /// Aborts with `Cancelled` as soon as the engine is disposed, even if
    /// the fetcher ignores its cancellation token. An empty access token is
    /// an `Idp` error and is never published.
    pub(crate) async fn fetch_and_publish(
        &self,
        retry_in: Option<Duration>,
    ) -> Result<Arc<CacheEntry>, TokenError> {
        if self.is_disposed() {
            return Err(TokenError::Cancelled);
        }

        self.sink.fetch_started(&self.name);
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(TokenError::Cancelled),
            result = self.fetcher.fetch(&self.credentials, &self.shutdown) => result,
        };
        let elapsed = started.elapsed();

        let result = result.and_then(|response| {
            if response.access_token.expose_secret().is_empty() {
                Err(TokenError::Idp(
                    "token endpoint returned an empty access token".into(),
                ))
            } else {
                Ok(response)
            }
        });

        match result {
            Ok(response) => {
                let entry = Arc::new(CacheEntry::fetched_now(response, &self.config));
                self.slot.publish(Arc::clone(&entry));
                // `dispose` cancels before it clears, so either it clears
                // after this publish or the check below sees the cancel.
                if self.is_disposed() {
                    self.slot.clear();
                    return Err(TokenError::Cancelled);
                }
                self.set_last_error(None);
                self.sink.fetch_succeeded(&self.name, &entry, elapsed);
                self.transition(EngineState::Healthy);
                Ok(entry)
            }
            Err(error) => {
                self.sink
                    .fetch_failed(&self.name, &error, elapsed, retry_in);
                Err(error)
            }
        }
    }

    /// Cancel the shutdown token, drop the published entry and move to
    /// `Disposed`. Safe to call more than once.
    pub(crate) fn dispose(&self) {
        self.shutdown.cancel();

        let previous = self
            .state
            .swap(EngineState::Disposed.as_gauge(), Ordering::AcqRel);
        let previous = EngineState::from_u8(previous);

        if previous != EngineState::Disposed {
            self.slot.clear();
            self.sink
                .state_changed(&self.name, previous, EngineState::Disposed);
        }
    }
}

impl fmt::Debug for EngineCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCore")
            .field("name", &self.name)
            .field("credentials", &self.credentials)
            .field("strategy", &self.config.strategy)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::entry::TokenResponse;
    use crate::observability::NoopEventSink;
    use common::secret::SecretString;

    #[derive(Debug)]
    struct StaticFetcher(&'static str);

    #[async_trait]
    impl TokenFetcher for StaticFetcher {
        async fn fetch(
            &self,
            _credentials: &CredentialsConfig,
            _cancel: &CancellationToken,
        ) -> Result<TokenResponse, TokenError> {
            Ok(TokenResponse::bearer(self.0, 60))
        }
    }

    fn client_config(strategy: RefreshStrategy) -> TokenClientConfig {
        let credentials =
            CredentialsConfig::new("c", SecretString::from("s"), "https://idp/token", None)
                .unwrap();
        TokenClientConfig::new("orders", credentials)
            .with_engine(EngineConfig::default().with_strategy(strategy))
    }

    fn core(token: &'static str) -> Arc<EngineCore> {
        let config = client_config(RefreshStrategy::ReadThrough);
        EngineCore::new(
            config.name,
            config.credentials,
            config.engine,
            Arc::new(StaticFetcher(token)),
            Arc::new(NoopEventSink),
        )
        .unwrap()
    }

    #[test]
    fn test_state_round_trips_through_gauge_value() {
        for state in [
            EngineState::Warming,
            EngineState::Healthy,
            EngineState::Degraded,
            EngineState::Disposed,
        ] {
            assert_eq!(EngineState::from_u8(state.as_gauge()), state);
        }
        assert_eq!(EngineState::Degraded.to_string(), "degraded");
    }

    #[tokio::test]
    async fn test_fetch_and_publish_moves_to_healthy() {
        let core = core("AAA");
        assert_eq!(core.state(), EngineState::Warming);

        let entry = core.fetch_and_publish(None).await.unwrap();
        assert_eq!(entry.access_token().expose_secret(), "AAA");
        assert_eq!(core.state(), EngineState::Healthy);
        assert!(Arc::ptr_eq(&core.slot().load().unwrap(), &entry));
    }

    #[tokio::test]
    async fn test_empty_token_is_not_published() {
        let core = core("");
        let result = core.fetch_and_publish(None).await;
        assert!(matches!(result, Err(TokenError::Idp(_))));
        assert!(core.slot().load().is_none());
        assert_eq!(core.state(), EngineState::Warming);
    }

    #[tokio::test]
    async fn test_dispose_is_terminal_and_idempotent() {
        let core = core("AAA");
        core.fetch_and_publish(None).await.unwrap();

        core.dispose();
        core.dispose();
        assert_eq!(core.state(), EngineState::Disposed);
        assert!(core.slot().load().is_none());

        core.transition(EngineState::Healthy);
        assert_eq!(core.state(), EngineState::Disposed);
        assert!(matches!(
            core.fetch_and_publish(None).await,
            Err(TokenError::Cancelled)
        ));
    }

    /// Disposes its engine from inside `fetch`, then succeeds.
    #[derive(Default)]
    struct DisposingFetcher {
        core: std::sync::OnceLock<std::sync::Weak<EngineCore>>,
    }

    #[async_trait]
    impl TokenFetcher for DisposingFetcher {
        async fn fetch(
            &self,
            _credentials: &CredentialsConfig,
            _cancel: &CancellationToken,
        ) -> Result<TokenResponse, TokenError> {
            if let Some(core) = self.core.get().and_then(std::sync::Weak::upgrade) {
                core.dispose();
            }
            Ok(TokenResponse::bearer("AAA", 60))
        }
    }

    #[tokio::test]
    async fn test_fetch_finishing_after_dispose_leaves_slot_empty() {
        let config = client_config(RefreshStrategy::ReadThrough);
        let fetcher = Arc::new(DisposingFetcher::default());
        let core = EngineCore::new(
            config.name,
            config.credentials,
            config.engine,
            Arc::clone(&fetcher) as Arc<dyn TokenFetcher>,
            Arc::new(NoopEventSink),
        )
        .unwrap();
        fetcher.core.set(Arc::downgrade(&core)).unwrap();

        let result = core.fetch_and_publish(None).await;

        assert!(matches!(result, Err(TokenError::Cancelled)));
        assert!(core.slot().load().is_none());
        assert_eq!(core.state(), EngineState::Disposed);
    }

    #[tokio::test]
    async fn test_build_engine_selects_strategy() {
        let fetcher: Arc<dyn TokenFetcher> = Arc::new(StaticFetcher("AAA"));

        let engine = build_engine(
            &client_config(RefreshStrategy::ReadThrough),
            Arc::clone(&fetcher),
            Arc::new(NoopEventSink),
        )
        .unwrap();
        assert!(format!("{engine:?}").contains("ReadThroughEngine"));

        let engine = build_engine(
            &client_config(RefreshStrategy::Proactive),
            fetcher,
            Arc::new(NoopEventSink),
        )
        .unwrap();
        assert!(format!("{engine:?}").contains("ProactiveEngine"));
        engine.dispose();
    }

    #[test]
    fn test_build_proactive_engine_without_runtime_fails() {
        let result = build_engine(
            &client_config(RefreshStrategy::Proactive),
            Arc::new(StaticFetcher("AAA")),
            Arc::new(NoopEventSink),
        );
        assert!(matches!(result, Err(TokenError::Configuration(_))));
    }

    #[test]
    fn test_build_engine_rejects_invalid_tuning() {
        let config = client_config(RefreshStrategy::ReadThrough)
            .with_engine(EngineConfig::default().with_retry_interval(Duration::ZERO));
        let result = build_engine(
            &config,
            Arc::new(StaticFetcher("AAA")),
            Arc::new(NoopEventSink),
        );
        assert!(matches!(result, Err(TokenError::Configuration(_))));
    }
}
