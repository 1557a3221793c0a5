//! Engine event reporting.
//!
//! Engines do not log through process-wide objects. Each engine is handed an
//! `Arc<dyn TokenEventSink>` at construction and reports fetch outcomes and
//! state transitions to it. [`TracingEventSink`] is the production sink; tests
//! substitute a recording sink.
//!
//! # Privacy by Default
//!
//! Events never carry the access token or the client secret. Only the
//! client name, timings, error categories and IdP error text are reported.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `token_engine_fetch_total` | Counter | `client`, `status` | Token endpoint exchanges |
//! | `token_engine_fetch_duration_seconds` | Histogram | `client` | Exchange latency |
//! | `token_engine_fetch_failures_total` | Counter | `client`, `error_type` | Failed exchanges |
//! | `token_engine_fetch_joined_total` | Counter | `client` | Callers served by an in-flight fetch |
//! | `token_engine_state` | Gauge | `client` | Engine state |
//! | `token_engine_adapter_failures_total` | Counter | `adapter`, `error_type` | Callbacks without a token |

pub mod metrics;

use crate::engine::EngineState;
use crate::entry::CacheEntry;
use crate::errors::TokenError;
use common::types::ClientName;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Receives engine lifecycle events. All methods default to no-ops.
pub trait TokenEventSink: Send + Sync + fmt::Debug {
    /// A fetch is about to hit the token endpoint.
    fn fetch_started(&self, _client: &ClientName) {}

    /// A fetch succeeded and `entry` was published.
    fn fetch_succeeded(&self, _client: &ClientName, _entry: &CacheEntry, _elapsed: Duration) {}

    /// A fetch failed. `retry_in` is set when the engine will try again on
    /// its own.
    fn fetch_failed(
        &self,
        _client: &ClientName,
        _error: &TokenError,
        _elapsed: Duration,
        _retry_in: Option<Duration>,
    ) {
    }

    /// A caller joined a fetch that was already in flight.
    fn fetch_joined(&self, _client: &ClientName) {}

    /// The engine moved between states.
    fn state_changed(&self, _client: &ClientName, _from: EngineState, _to: EngineState) {}

    /// A refresh adapter could not hand a token to its client.
    fn adapter_failed(&self, _client: &ClientName, _adapter: &'static str, _error: &TokenError) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl TokenEventSink for NoopEventSink {}

/// Logs events with `tracing` and records metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl TokenEventSink for TracingEventSink {
    fn fetch_started(&self, client: &ClientName) {
        debug!(target: "token_engine.engine", client = %client, "Fetching token");
    }

    fn fetch_succeeded(&self, client: &ClientName, entry: &CacheEntry, elapsed: Duration) {
        info!(
            target: "token_engine.engine",
            client = %client,
            expires_in_secs = entry.token().expires_in,
            cached_lifetime_secs = entry.lifetime().as_secs(),
            expires_at = %entry.expires_at_utc(),
            elapsed = ?elapsed,
            "Token refreshed"
        );
        metrics::record_fetch(client, None, elapsed);
    }

    fn fetch_failed(
        &self,
        client: &ClientName,
        error: &TokenError,
        elapsed: Duration,
        retry_in: Option<Duration>,
    ) {
        match error {
            TokenError::Cancelled | TokenError::Disposed => {
                debug!(
                    target: "token_engine.engine",
                    client = %client,
                    error = %error,
                    "Token fetch aborted"
                );
                return;
            }
            TokenError::Configuration(_) => {
                error!(
                    target: "token_engine.engine",
                    client = %client,
                    error = %error,
                    "Token fetch failed with a configuration error, giving up"
                );
            }
            _ => match retry_in {
                Some(retry_in) => warn!(
                    target: "token_engine.engine",
                    client = %client,
                    error = %error,
                    retry_in = ?retry_in,
                    "Token fetch failed, retrying"
                ),
                None => warn!(
                    target: "token_engine.engine",
                    client = %client,
                    error = %error,
                    "Token fetch failed"
                ),
            },
        }
        metrics::record_fetch(client, Some(error.kind()), elapsed);
    }

    fn fetch_joined(&self, client: &ClientName) {
        metrics::record_fetch_joined(client);
    }

    fn state_changed(&self, client: &ClientName, from: EngineState, to: EngineState) {
        if to == EngineState::Degraded {
            warn!(
                target: "token_engine.engine",
                client = %client,
                from = %from,
                to = %to,
                "Token engine degraded, serving last good token"
            );
        } else {
            info!(
                target: "token_engine.engine",
                client = %client,
                from = %from,
                to = %to,
                "Token engine state changed"
            );
        }
        metrics::set_engine_state(client, to);
    }

    fn adapter_failed(&self, client: &ClientName, adapter: &'static str, error: &TokenError) {
        warn!(
            target: "token_engine.adapter",
            client = %client,
            adapter = adapter,
            error = %error,
            "Refresh adapter could not obtain a token"
        );
        metrics::record_adapter_failure(adapter, error.kind());
    }
}
