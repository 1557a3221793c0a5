//! Fetch-on-miss engine with single-flight de-duplication.
//!
//! A caller that finds no fresh entry either starts a fetch or joins the one
//! already in flight. The in-flight fetch is a `Shared` future stored under a
//! mutex; the mutex is never held across an await. The fetch publishes its
//! entry before it clears the in-flight slot, so a caller that sees no fetch
//! in flight always sees the entry it produced.

use super::{EngineCore, EngineState, TokenEngine};
use crate::entry::CacheEntry;
use crate::errors::TokenError;
use async_trait::async_trait;
use common::types::ClientName;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<CacheEntry>, TokenError>>>;

enum Lookup {
    Cached(Arc<CacheEntry>),
    Fetch(SharedFetch),
}

/// Read-through token engine.
///
/// An entry is fresh while more than `early_expiry_margin` remains before its
/// absolute expiry. Failed fetches are not cached; every caller waiting on a
/// failed fetch receives the same error.
pub struct ReadThroughEngine {
    core: Arc<EngineCore>,
    in_flight: Arc<Mutex<Option<SharedFetch>>>,
}

impl ReadThroughEngine {
    pub(crate) fn from_core(core: Arc<EngineCore>) -> Self {
        Self {
            core,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    fn fresh_entry(&self) -> Option<Arc<CacheEntry>> {
        let margin = self.core.config().early_expiry_margin;
        self.core
            .slot()
            .load()
            .filter(|entry| entry.is_fresh_at(Instant::now(), margin))
    }

    fn join_or_start(&self) -> Lookup {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have finished a fetch while we waited for the lock.
        if let Some(entry) = self.fresh_entry() {
            return Lookup::Cached(entry);
        }

        if let Some(fetch) = in_flight.as_ref() {
            self.core.sink().fetch_joined(self.core.name());
            return Lookup::Fetch(fetch.clone());
        }

        let core = Arc::clone(&self.core);
        let slot = Arc::clone(&self.in_flight);
        let fetch = async move {
            let result = core.fetch_and_publish(None).await;
            if let Err(error) = &result {
                if !matches!(error, TokenError::Cancelled) {
                    core.note_failure(error);
                }
            }
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
            result
        }
        .boxed()
        .shared();

        *in_flight = Some(fetch.clone());
        Lookup::Fetch(fetch)
    }
}

#[async_trait]
impl TokenEngine for ReadThroughEngine {
    fn name(&self) -> &ClientName {
        self.core.name()
    }

    #[instrument(skip_all, name = "token_engine.read_through.get", fields(client = %self.core.name()))]
    async fn get_valid_token(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<CacheEntry>, TokenError> {
        if self.core.is_disposed() {
            return Err(TokenError::Disposed);
        }

        if let Some(entry) = self.fresh_entry() {
            return Ok(entry);
        }

        let fetch = match self.join_or_start() {
            Lookup::Cached(entry) => return Ok(entry),
            Lookup::Fetch(fetch) => fetch,
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TokenError::Cancelled),
            () = self.core.shutdown().cancelled() => Err(TokenError::Cancelled),
            result = fetch => result,
        }
    }

    fn current(&self) -> Option<Arc<CacheEntry>> {
        if self.core.is_disposed() {
            return None;
        }
        self.fresh_entry()
    }

    fn state(&self) -> EngineState {
        self.core.state()
    }

    fn dispose(&self) {
        self.core.dispose();
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for ReadThroughEngine {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

impl fmt::Debug for ReadThroughEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadThroughEngine")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}
