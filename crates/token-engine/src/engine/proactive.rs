//! Background-refresh engine.
//!
//! A task spawned at construction fetches immediately, then sleeps until
//! shortly before the token expires and fetches again. Failed refreshes are
//! retried every `retry_interval` for as long as the engine lives; only a
//! `Configuration` error stops the loop. Readers never trigger a fetch: they
//! take the published entry, or wait for the first one on a cold start.

use super::{EngineCore, EngineState, TokenEngine};
use crate::config::EngineConfig;
use crate::entry::CacheEntry;
use crate::errors::TokenError;
use async_trait::async_trait;
use common::types::ClientName;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Proactive token engine.
///
/// Dropping the engine cancels its refresh task.
pub struct ProactiveEngine {
    core: Arc<EngineCore>,
    fatal: Arc<OnceLock<TokenError>>,
}

impl ProactiveEngine {
    /// Spawn the refresh task on the current tokio runtime.
    pub(crate) fn from_core(core: Arc<EngineCore>) -> Result<Self, TokenError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            TokenError::Configuration(
                "proactive refresh requires a running tokio runtime".into(),
            )
        })?;

        let fatal = Arc::new(OnceLock::new());
        handle.spawn(refresh_loop(Arc::clone(&core), Arc::clone(&fatal)));

        Ok(Self { core, fatal })
    }

    fn usable_entry(&self) -> Option<Arc<CacheEntry>> {
        self.core
            .slot()
            .load()
            .filter(|entry| !entry.is_expired_at(Instant::now()))
    }

    fn expired_error(&self) -> TokenError {
        match self.core.last_error() {
            Some(last) => TokenError::Idp(format!(
                "cached token expired and refresh is failing: {last}"
            )),
            None => TokenError::Idp("cached token expired before it could be refreshed".into()),
        }
    }
}

/// How long to sleep after a successful refresh.
///
/// `refresh_interval` when configured, otherwise the cached lifetime minus
/// `early_refresh_margin`, or half the lifetime when the lifetime does not
/// exceed the margin. Never shorter than `retry_interval`.
pub(crate) fn refresh_delay(entry: &CacheEntry, config: &EngineConfig) -> Duration {
    let delay = config.refresh_interval.unwrap_or_else(|| {
        let lifetime = entry.lifetime();
        if lifetime > config.early_refresh_margin {
            lifetime - config.early_refresh_margin
        } else {
            lifetime / 2
        }
    });
    delay.max(config.retry_interval)
}

#[instrument(skip_all, name = "token_engine.proactive.refresh_loop", fields(client = %core.name()))]
async fn refresh_loop(core: Arc<EngineCore>, fatal: Arc<OnceLock<TokenError>>) {
    let retry_interval = core.config().retry_interval;

    loop {
        let delay = match core.fetch_and_publish(Some(retry_interval)).await {
            Ok(entry) => refresh_delay(&entry, core.config()),
            Err(TokenError::Cancelled) if core.is_disposed() => break,
            Err(error @ TokenError::Configuration(_)) => {
                core.note_failure(&error);
                let _ = fatal.set(error);
                break;
            }
            Err(error) => {
                core.note_failure(&error);
                retry_interval
            }
        };

        tokio::select! {
            biased;
            () = core.shutdown().cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    debug!(
        target: "token_engine.proactive",
        client = %core.name(),
        "Refresh loop stopped"
    );
}

#[async_trait]
impl TokenEngine for ProactiveEngine {
    fn name(&self) -> &ClientName {
        self.core.name()
    }

    #[instrument(skip_all, name = "token_engine.proactive.get", fields(client = %self.core.name()))]
    async fn get_valid_token(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<CacheEntry>, TokenError> {
        if self.core.is_disposed() {
            return Err(TokenError::Disposed);
        }

        let retry_interval = self.core.config().retry_interval;
        let mut published = self.core.slot().subscribe();

        loop {
            if let Some(error) = self.fatal.get() {
                return Err(error.clone());
            }

            if let Some(entry) = published.borrow_and_update().clone() {
                if entry.is_expired_at(Instant::now()) {
                    return Err(self.expired_error());
                }
                return Ok(entry);
            }

            // Cold start: wait for the first publication, re-checking every
            // retry interval.
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TokenError::Cancelled),
                () = self.core.shutdown().cancelled() => return Err(TokenError::Cancelled),
                _ = published.changed() => {}
                () = tokio::time::sleep(retry_interval) => {}
            }
        }
    }

    fn current(&self) -> Option<Arc<CacheEntry>> {
        if self.core.is_disposed() {
            return None;
        }
        self.usable_entry()
    }

    fn state(&self) -> EngineState {
        self.core.state()
    }

    fn dispose(&self) {
        self.core.dispose();
    }
}

impl Drop for ProactiveEngine {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

impl fmt::Debug for ProactiveEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProactiveEngine")
            .field("core", &self.core)
            .field("fatal", &self.fatal.get())
            .finish()
    }
}
