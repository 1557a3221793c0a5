//! Engine behavior tests against a scripted fetcher.
//!
//! Covers:
//! - Fail-fast credential validation
//! - Read-through freshness window and single-flight
//! - Proactive refresh, failure tolerance and expiry
//! - Cancellation and disposal
//! - Engine sharing through the registry
//!
//! All tests run with tokio's clock paused, so sleeps complete instantly
//! and timings are exact.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use common::secret::{ExposeSecret, SecretString};
use common::types::ClientName;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use token_engine::{
    build_engine, CredentialsConfig, EngineConfig, EngineState, RefreshStrategy,
    TokenClientConfig, TokenEngine, TokenEngineRegistry, TokenError,
};
use token_test_utils::{client_config, RecordingSink, ScriptedFetcher, SinkEvent};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

fn read_through() -> EngineConfig {
    EngineConfig::default().with_strategy(RefreshStrategy::ReadThrough)
}

fn proactive() -> EngineConfig {
    EngineConfig::default().with_strategy(RefreshStrategy::Proactive)
}

fn engine_with(
    engine: EngineConfig,
    fetcher: &Arc<ScriptedFetcher>,
    sink: &Arc<RecordingSink>,
) -> Arc<dyn TokenEngine> {
    build_engine(
        &client_config(engine),
        Arc::clone(fetcher) as _,
        Arc::clone(sink) as _,
    )
    .unwrap()
}

async fn token_of(engine: &Arc<dyn TokenEngine>) -> String {
    engine
        .get_valid_token(&CancellationToken::new())
        .await
        .unwrap()
        .access_token()
        .expose_secret()
        .to_string()
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_empty_credential_field_is_a_configuration_error() {
    let cases = [
        ("", "s", "https://idp/token"),
        ("c", "", "https://idp/token"),
        ("c", "s", ""),
    ];

    for (client_id, secret, endpoint) in cases {
        let result =
            CredentialsConfig::new(client_id, SecretString::from(secret), endpoint, None);
        assert!(
            matches!(result, Err(TokenError::Configuration(_))),
            "({client_id:?}, {secret:?}, {endpoint:?}) should be rejected"
        );
    }
}

#[test]
fn test_empty_env_credentials_never_reach_the_fetcher() {
    let fetcher = ScriptedFetcher::always("AAA", 60);
    let vars = HashMap::from([
        ("OAUTH_CLIENT_ID".to_string(), String::new()),
        ("OAUTH_CLIENT_SECRET".to_string(), "s".to_string()),
        (
            "OAUTH_TOKEN_ENDPOINT".to_string(),
            "https://idp/token".to_string(),
        ),
    ]);

    let result = TokenClientConfig::from_vars("OAUTH", &vars);

    assert!(matches!(result, Err(TokenError::Configuration(_))));
    assert_eq!(fetcher.calls(), 0);
}

#[test]
fn test_expiry_margin_not_below_min_ttl_is_rejected_before_any_fetch() {
    let fetcher = ScriptedFetcher::always("AAA", 30);
    let sink = RecordingSink::new();
    let config = client_config(read_through().with_early_expiry_margin(Duration::from_secs(30)));

    let result = build_engine(&config, Arc::clone(&fetcher) as _, Arc::clone(&sink) as _);

    assert!(matches!(result, Err(TokenError::Configuration(_))));
    assert_eq!(fetcher.calls(), 0);
}

// ============================================================================
// Read-through
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_short_lived_tokens_are_not_refetched_on_every_call() {
    let fetcher = ScriptedFetcher::always("AAA", 1);
    let sink = RecordingSink::new();
    let engine = engine_with(
        read_through()
            .with_early_expiry_margin(Duration::from_secs(9))
            .with_min_ttl(Duration::from_secs(10)),
        &fetcher,
        &sink,
    );

    for _ in 0..5 {
        assert_eq!(token_of(&engine).await, "AAA");
    }
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reference_scenario_refetches_at_56_seconds() {
    let fetcher = ScriptedFetcher::new()
        .then_token("AAA", 60)
        .then_token("BBB", 60);
    let sink = RecordingSink::new();
    let engine = engine_with(read_through(), &fetcher, &sink);
    let start = Instant::now();

    assert_eq!(token_of(&engine).await, "AAA");

    sleep(Duration::from_secs(10)).await;
    assert_eq!(token_of(&engine).await, "AAA");
    assert_eq!(fetcher.calls(), 1);

    tokio::time::sleep_until(start + Duration::from_secs(56)).await;
    assert_eq!(token_of(&engine).await, "BBB");
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_forty_second_token_is_fresh_for_thirty_five_seconds() {
    let fetcher = ScriptedFetcher::new()
        .then_token("AAA", 40)
        .then_token("BBB", 40);
    let sink = RecordingSink::new();
    let engine = engine_with(
        read_through().with_early_expiry_margin(Duration::from_secs(5)),
        &fetcher,
        &sink,
    );
    let start = Instant::now();

    assert_eq!(token_of(&engine).await, "AAA");

    tokio::time::sleep_until(start + Duration::from_millis(34_900)).await;
    assert_eq!(token_of(&engine).await, "AAA");
    assert_eq!(fetcher.calls(), 1);

    tokio::time::sleep_until(start + Duration::from_secs(35)).await;
    assert_eq!(token_of(&engine).await, "BBB");
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fifty_concurrent_callers_share_one_fetch() {
    let fetcher = ScriptedFetcher::always("AAA", 60).with_delay(Duration::from_millis(200));
    let sink = RecordingSink::new();
    let engine = engine_with(read_through(), &fetcher, &sink);

    let callers: Vec<_> = (0..50)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.get_valid_token(&CancellationToken::new()).await })
        })
        .collect();

    let mut entries = Vec::new();
    for caller in callers {
        entries.push(caller.await.unwrap().unwrap());
    }

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(fetcher.max_in_flight(), 1);
    assert_eq!(entries.len(), 50);
    for entry in &entries {
        assert!(Arc::ptr_eq(entry, &entries[0]));
        assert_eq!(entry.access_token().expose_secret(), "AAA");
    }
    assert_eq!(sink.count(|e| *e == SinkEvent::FetchStarted), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_reaches_every_waiter_and_is_not_cached() {
    let fetcher = ScriptedFetcher::new()
        .with_delay(Duration::from_millis(100))
        .then_error(TokenError::Idp("invalid_client: bad secret".into()))
        .then_token("AAA", 60);
    let sink = RecordingSink::new();
    let engine = engine_with(read_through(), &fetcher, &sink);

    let callers: Vec<_> = (0..5)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.get_valid_token(&CancellationToken::new()).await })
        })
        .collect();

    for caller in callers {
        let err = caller.await.unwrap().unwrap_err();
        assert_eq!(err, TokenError::Idp("invalid_client: bad secret".into()));
    }
    assert_eq!(fetcher.calls(), 1);
    assert!(engine.current().is_none());

    assert_eq!(token_of(&engine).await, "AAA");
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_calls_thirty_seconds_apart_return_the_same_token() {
    for strategy in [RefreshStrategy::ReadThrough, RefreshStrategy::Proactive] {
        let fetcher = ScriptedFetcher::new()
            .then_token("AAA", 3600)
            .then_token("BBB", 3600);
        let sink = RecordingSink::new();
        let engine = engine_with(
            EngineConfig::default().with_strategy(strategy),
            &fetcher,
            &sink,
        );

        let first = token_of(&engine).await;
        sleep(Duration::from_secs(30)).await;
        let second = token_of(&engine).await;

        assert_eq!(first, "AAA", "{strategy}");
        assert_eq!(first, second, "{strategy}");
        assert_eq!(fetcher.calls(), 1, "{strategy}");
        engine.dispose();
    }
}

// ============================================================================
// Proactive
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_proactive_serves_last_good_token_until_expiry() {
    let fetcher = ScriptedFetcher::new()
        .then_token("AAA", 60)
        .otherwise(Err(TokenError::Idp("temporarily_unavailable".into())));
    let sink = RecordingSink::new();
    let engine = engine_with(proactive(), &fetcher, &sink);
    let start = Instant::now();

    assert_eq!(token_of(&engine).await, "AAA");
    assert_eq!(engine.state(), EngineState::Healthy);

    // First refresh at t+30s, then one retry per second.
    tokio::time::sleep_until(start + Duration::from_millis(32_500)).await;
    assert_eq!(
        sink.count(|e| matches!(e, SinkEvent::FetchFailed { kind: "idp", .. })),
        3
    );
    assert_eq!(engine.state(), EngineState::Degraded);
    assert_eq!(token_of(&engine).await, "AAA");

    tokio::time::sleep_until(start + Duration::from_millis(59_500)).await;
    assert_eq!(token_of(&engine).await, "AAA");

    tokio::time::sleep_until(start + Duration::from_millis(60_500)).await;
    let err = engine
        .get_valid_token(&CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        TokenError::Idp(msg) => assert!(msg.contains("temporarily_unavailable"), "{msg}"),
        other => panic!("expected Idp error, got {other:?}"),
    }
    assert!(engine.current().is_none());

    // Still retrying.
    let calls = fetcher.calls();
    sleep(Duration::from_secs(5)).await;
    assert!(fetcher.calls() > calls);
    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_proactive_failures_are_logged_with_retry_interval() {
    let fetcher = ScriptedFetcher::always_failing(TokenError::Transport("connection refused".into()));
    let sink = RecordingSink::new();
    let engine = engine_with(
        proactive().with_retry_interval(Duration::from_millis(500)),
        &fetcher,
        &sink,
    );

    sleep(Duration::from_millis(1_250)).await;

    assert_eq!(fetcher.calls(), 3);
    assert!(sink.events().iter().all(|e| match e {
        SinkEvent::FetchFailed { retry_in, .. } => *retry_in == Some(Duration::from_millis(500)),
        _ => true,
    }));
    assert_eq!(engine.state(), EngineState::Warming);
    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_proactive_state_machine() {
    let fetcher = ScriptedFetcher::new()
        .then_token("AAA", 60)
        .then_error(TokenError::Transport("connection reset".into()))
        .then_token("BBB", 60);
    let sink = RecordingSink::new();
    let engine = engine_with(proactive(), &fetcher, &sink);

    assert_eq!(token_of(&engine).await, "AAA");
    // refresh fails at t+30s, retry succeeds at t+31s
    sleep(Duration::from_millis(31_500)).await;
    assert_eq!(token_of(&engine).await, "BBB");

    engine.dispose();
    assert_eq!(
        sink.states(),
        vec![
            EngineState::Healthy,
            EngineState::Degraded,
            EngineState::Healthy,
            EngineState::Disposed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_proactive_reads_never_fetch() {
    let fetcher = ScriptedFetcher::always("AAA", 3600);
    let sink = RecordingSink::new();
    let engine = engine_with(proactive(), &fetcher, &sink);

    for _ in 0..20 {
        assert_eq!(token_of(&engine).await, "AAA");
    }
    assert_eq!(fetcher.calls(), 1);
    engine.dispose();
}

// ============================================================================
// Cancellation and disposal
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dispose_during_cold_start_cancels_waiter_promptly() {
    let retry_interval = Duration::from_secs(1);
    let fetcher = ScriptedFetcher::always_failing(TokenError::Transport("connection refused".into()));
    let sink = RecordingSink::new();
    let engine = engine_with(
        proactive().with_retry_interval(retry_interval),
        &fetcher,
        &sink,
    );

    let waiter = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let result = engine.get_valid_token(&CancellationToken::new()).await;
            (result, Instant::now())
        })
    };

    sleep(Duration::from_millis(2_500)).await;
    let disposed_at = Instant::now();
    engine.dispose();

    let (result, returned_at) = waiter.await.unwrap();
    assert_eq!(result.unwrap_err(), TokenError::Cancelled);
    assert!(returned_at - disposed_at <= retry_interval);
    assert_eq!(engine.state(), EngineState::Disposed);

    let calls = fetcher.calls();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(fetcher.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_caller_cancellation_during_cold_start() {
    for strategy in [RefreshStrategy::ReadThrough, RefreshStrategy::Proactive] {
        let fetcher = ScriptedFetcher::always("AAA", 60).with_delay(Duration::from_secs(60));
        let sink = RecordingSink::new();
        let engine = engine_with(
            EngineConfig::default().with_strategy(strategy),
            &fetcher,
            &sink,
        );

        let cancel = CancellationToken::new();
        let waiter = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.get_valid_token(&cancel).await })
        };

        sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert_eq!(
            waiter.await.unwrap().unwrap_err(),
            TokenError::Cancelled,
            "{strategy}"
        );
        assert_ne!(engine.state(), EngineState::Disposed, "{strategy}");
        engine.dispose();
    }
}

#[tokio::test(start_paused = true)]
async fn test_calls_after_dispose_fail_with_disposed() {
    for strategy in [RefreshStrategy::ReadThrough, RefreshStrategy::Proactive] {
        let fetcher = ScriptedFetcher::always("AAA", 60);
        let sink = RecordingSink::new();
        let engine = engine_with(
            EngineConfig::default().with_strategy(strategy),
            &fetcher,
            &sink,
        );
        assert_eq!(token_of(&engine).await, "AAA");

        engine.dispose();
        engine.dispose();

        assert_eq!(
            engine
                .get_valid_token(&CancellationToken::new())
                .await
                .unwrap_err(),
            TokenError::Disposed,
            "{strategy}"
        );
        assert!(engine.current().is_none(), "{strategy}");
        assert_eq!(
            sink.count(|e| matches!(
                e,
                SinkEvent::StateChanged {
                    to: EngineState::Disposed,
                    ..
                }
            )),
            1,
            "{strategy}"
        );
    }
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_registry_shares_one_engine_per_client() {
    let fetcher = ScriptedFetcher::always("AAA", 3600);
    let sink = RecordingSink::new();
    let registry = TokenEngineRegistry::new(Arc::clone(&sink) as _);
    let config = client_config(proactive());

    let create = || build_engine(&config, Arc::clone(&fetcher) as _, Arc::clone(&sink) as _);
    let producer = registry.get_or_create_with(&config.name, create).unwrap();
    let consumer = registry.get_or_create_with(&config.name, create).unwrap();

    assert!(Arc::ptr_eq(&producer, &consumer));
    assert_eq!(token_of(&producer).await, token_of(&consumer).await);
    assert_eq!(fetcher.calls(), 1);

    registry.dispose_all();
    assert_eq!(producer.state(), EngineState::Disposed);
    assert!(registry.get(&ClientName::from("orders")).is_none());
}
