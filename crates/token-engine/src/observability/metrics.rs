//! Metrics definitions for the token engine.
//!
//! All metrics follow Prometheus naming conventions:
//! - `token_engine_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! - `client`: bounded by the number of configured logical clients
//! - `status`: 2 values (success, error)
//! - `error_type`: bounded by `TokenError::kind` (6 values)
//! - `adapter`: 2 values (kafka, http)
//!
//! The `metrics` facade is a no-op until the host installs a recorder.

use crate::engine::EngineState;
use common::types::ClientName;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Fetch Metrics
// ============================================================================

/// Record one token endpoint exchange.
///
/// Emits:
/// - `token_engine_fetch_total` counter (labels: `client`, `status`)
/// - `token_engine_fetch_duration_seconds` histogram (labels: `client`)
/// - `token_engine_fetch_failures_total` counter (labels: `client`,
///   `error_type`, on failure only)
pub fn record_fetch(client: &ClientName, error_type: Option<&'static str>, duration: Duration) {
    histogram!("token_engine_fetch_duration_seconds",
        "client" => client.as_str().to_string()
    )
    .record(duration.as_secs_f64());

    let status = if error_type.is_some() { "error" } else { "success" };
    counter!("token_engine_fetch_total",
        "client" => client.as_str().to_string(),
        "status" => status
    )
    .increment(1);

    if let Some(error_type) = error_type {
        counter!("token_engine_fetch_failures_total",
            "client" => client.as_str().to_string(),
            "error_type" => error_type
        )
        .increment(1);
    }
}

// ============================================================================
// Engine State (Gauge)
// ============================================================================

/// Set the engine state gauge.
///
/// Metric: `token_engine_state`
/// Labels: `client`
///
/// Values: 0 = warming, 1 = healthy, 2 = degraded, 3 = disposed.
pub fn set_engine_state(client: &ClientName, state: EngineState) {
    gauge!("token_engine_state",
        "client" => client.as_str().to_string()
    )
    .set(f64::from(state.as_gauge()));
}

/// Record a caller joining an in-flight fetch instead of starting one.
///
/// Metric: `token_engine_fetch_joined_total`
/// Labels: `client`
pub fn record_fetch_joined(client: &ClientName) {
    counter!("token_engine_fetch_joined_total",
        "client" => client.as_str().to_string()
    )
    .increment(1);
}

// ============================================================================
// Adapter Metrics
// ============================================================================

/// Record a refresh callback or request that could not be given a token.
///
/// Metric: `token_engine_adapter_failures_total`
/// Labels: `adapter`, `error_type`
pub fn record_adapter_failure(adapter: &'static str, error_type: &'static str) {
    counter!("token_engine_adapter_failures_total",
        "adapter" => adapter,
        "error_type" => error_type
    )
    .increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_metrics_without_recorder_do_not_panic() {
        let client = ClientName::from("orders");
        record_fetch(&client, None, Duration::from_millis(50));
        record_fetch(&client, Some("idp"), Duration::from_millis(100));
        set_engine_state(&client, EngineState::Healthy);
        record_fetch_joined(&client);
        record_adapter_failure("kafka", "idp");
    }

    #[test]
    fn test_fetch_metrics_are_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let client = ClientName::from("orders");

        metrics::with_local_recorder(&recorder, || {
            record_fetch(&client, None, Duration::from_millis(50));
            record_fetch(&client, Some("transport"), Duration::from_millis(10));
            record_fetch(&client, Some("transport"), Duration::from_millis(10));
            set_engine_state(&client, EngineState::Degraded);
        });

        let metrics = snapshotter.snapshot().into_vec();

        let counter_value = |name: &str, label: (&str, &str)| {
            metrics
                .iter()
                .find(|(key, _, _, _)| {
                    key.key().name() == name
                        && key
                            .key()
                            .labels()
                            .any(|l| l.key() == label.0 && l.value() == label.1)
                })
                .map(|(_, _, _, value)| match value {
                    DebugValue::Counter(c) => DebugValue::Counter(*c),
                    DebugValue::Gauge(g) => DebugValue::Gauge(*g),
                    DebugValue::Histogram(h) => DebugValue::Histogram(h.clone()),
                })
        };

        assert_eq!(
            counter_value("token_engine_fetch_total", ("status", "success")),
            Some(DebugValue::Counter(1))
        );
        assert_eq!(
            counter_value("token_engine_fetch_total", ("status", "error")),
            Some(DebugValue::Counter(2))
        );
        assert_eq!(
            counter_value("token_engine_fetch_failures_total", ("error_type", "transport")),
            Some(DebugValue::Counter(2))
        );
        assert!(matches!(
            counter_value("token_engine_state", ("client", "orders")),
            Some(DebugValue::Gauge(v)) if (v.into_inner() - 2.0).abs() < f64::EPSILON
        ));
    }
}
