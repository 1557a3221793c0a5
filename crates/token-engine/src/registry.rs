//! One engine per logical client.
//!
//! Producer, consumer and admin clients configured with the same client name
//! share one engine, and therefore one cache and one refresh loop.

use crate::config::TokenClientConfig;
use crate::engine::{build_http_engine, EngineState, TokenEngine};
use crate::errors::TokenError;
use crate::observability::TokenEventSink;
use common::types::ClientName;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Engines keyed by client name.
pub struct TokenEngineRegistry {
    engines: Mutex<HashMap<ClientName, Arc<dyn TokenEngine>>>,
    sink: Arc<dyn TokenEventSink>,
}

impl TokenEngineRegistry {
    /// Empty registry. Engines it builds report to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn TokenEventSink>) -> Self {
        Self {
            engines: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Return the engine for `config.name`, building an HTTP-backed one if
    /// none is registered (or the registered one was disposed).
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if a new engine cannot be built.
    pub fn get_or_create(
        &self,
        config: &TokenClientConfig,
    ) -> Result<Arc<dyn TokenEngine>, TokenError> {
        self.get_or_create_with(&config.name, || {
            build_http_engine(config, Arc::clone(&self.sink))
        })
    }

    /// Return the engine for `name`, calling `create` if none is registered.
    ///
    /// `create` runs under the registry lock, so concurrent callers for the
    /// same name get the same engine.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `create`.
    pub fn get_or_create_with<F>(
        &self,
        name: &ClientName,
        create: F,
    ) -> Result<Arc<dyn TokenEngine>, TokenError>
    where
        F: FnOnce() -> Result<Arc<dyn TokenEngine>, TokenError>,
    {
        let mut engines = self.engines.lock().unwrap_or_else(PoisonError::into_inner);

        match engines.entry(name.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().state() != EngineState::Disposed {
                    return Ok(Arc::clone(occupied.get()));
                }
                let engine = create()?;
                occupied.insert(Arc::clone(&engine));
                debug!(target: "token_engine.registry", client = %name, "Replaced disposed engine");
                Ok(engine)
            }
            Entry::Vacant(vacant) => {
                let engine = create()?;
                vacant.insert(Arc::clone(&engine));
                debug!(target: "token_engine.registry", client = %name, "Registered engine");
                Ok(engine)
            }
        }
    }

    /// The engine registered for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &ClientName) -> Option<Arc<dyn TokenEngine>> {
        self.engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Dispose and forget the engine for `name`.
    pub fn remove(&self, name: &ClientName) -> bool {
        let removed = self
            .engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);

        match removed {
            Some(engine) => {
                engine.dispose();
                true
            }
            None => false,
        }
    }

    /// Number of registered engines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no engine is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose every engine and empty the registry.
    pub fn dispose_all(&self) {
        let engines: Vec<_> = self
            .engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        for (name, engine) in engines {
            engine.dispose();
            debug!(target: "token_engine.registry", client = %name, "Disposed engine");
        }
    }
}

impl fmt::Debug for TokenEngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEngineRegistry")
            .field("engines", &self.len())
            .finish_non_exhaustive()
    }
}

impl Drop for TokenEngineRegistry {
    fn drop(&mut self) {
        self.dispose_all();
    }
}
