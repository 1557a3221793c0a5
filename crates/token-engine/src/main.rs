//! token-check: check that a client's OAuth configuration yields a token.
//!
//! Usage: `token-check [PREFIX]` (default prefix `OAUTH`). Reads
//! `<PREFIX>_CLIENT_ID`, `<PREFIX>_CLIENT_SECRET`, `<PREFIX>_TOKEN_ENDPOINT`
//! and the optional tuning variables, fetches one token and reports its
//! expiry and principal. With `<PREFIX>_REFRESH_STRATEGY=proactive` it keeps
//! refreshing until SIGINT/SIGTERM.

use anyhow::Context;
use common::config::ObservabilityConfig;
use std::collections::HashMap;
use std::sync::Arc;
use token_engine::{
    build_http_engine, RefreshStrategy, SyncTokenSource, TokenClientConfig, TokenEventSink,
    TracingEventSink,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_PREFIX: &str = "OAUTH";

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new(common::config::DEFAULT_LOG_LEVEL));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    init_tracing(&ObservabilityConfig::from_vars(&vars));

    let prefix = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

    let config = TokenClientConfig::from_vars(&prefix, &vars).map_err(|e| {
        error!(target: "token_check", prefix = %prefix, error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        target: "token_check",
        client = %config.name,
        endpoint = %config.credentials.token_endpoint(),
        strategy = %config.engine.strategy,
        "Configuration loaded"
    );

    let sink: Arc<dyn TokenEventSink> = Arc::new(TracingEventSink);
    let engine = build_http_engine(&config, sink)?;
    let source = SyncTokenSource::new(Arc::clone(&engine), &config);

    let shutdown = CancellationToken::new();
    let bearer = tokio::select! {
        result = source.token(&shutdown) => result.context("failed to obtain a token")?,
        () = shutdown_signal() => {
            shutdown.cancel();
            engine.dispose();
            return Ok(());
        }
    };

    info!(
        target: "token_check",
        client = %config.name,
        principal = %bearer.principal,
        expiration_epoch_millis = bearer.expiration_epoch_millis,
        "Token obtained"
    );

    if config.engine.strategy == RefreshStrategy::Proactive {
        info!(target: "token_check", "Proactive refresh running, waiting for shutdown signal");
        shutdown_signal().await;
    }

    engine.dispose();
    info!(target: "token_check", state = %engine.state(), "Engine disposed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!(target: "token_check", "Received SIGINT"),
            Err(e) => {
                error!(target: "token_check", error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!(target: "token_check", "Received SIGTERM");
            }
            Err(e) => {
                error!(target: "token_check", error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
