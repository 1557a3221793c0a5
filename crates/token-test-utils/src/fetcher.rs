//! Scripted `TokenFetcher`.
//!
//! Each call pops the next scripted result after the configured delay. Once
//! the script runs out the fallback result (if any) is returned forever,
//! otherwise a `Transport` error. The fetcher counts calls and tracks how
//! many were in flight at once so tests can assert single-flight.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use token_engine::{CredentialsConfig, TokenError, TokenFetcher, TokenResponse};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type Scripted = Result<TokenResponse, TokenError>;

#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<Scripted>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fetcher that returns `token` on every call.
    pub fn always(token: &str, expires_in: u64) -> Arc<Self> {
        Self::new().otherwise(Ok(TokenResponse::bearer(token, expires_in)))
    }

    /// Fetcher that fails with `error` on every call.
    pub fn always_failing(error: TokenError) -> Arc<Self> {
        Self::new().otherwise(Err(error))
    }

    /// Append a successful response.
    pub fn then_token(self: Arc<Self>, token: &str, expires_in: u64) -> Arc<Self> {
        self.then(Ok(TokenResponse::bearer(token, expires_in)))
    }

    /// Append a failure.
    pub fn then_error(self: Arc<Self>, error: TokenError) -> Arc<Self> {
        self.then(Err(error))
    }

    /// Append any result.
    pub fn then(self: Arc<Self>, result: Scripted) -> Arc<Self> {
        self.script.lock().unwrap().push_back(result);
        self
    }

    /// Result returned once the script is exhausted.
    pub fn otherwise(self: Arc<Self>, result: Scripted) -> Arc<Self> {
        *self.fallback.lock().unwrap() = Some(result);
        self
    }

    /// How long each call takes.
    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock().unwrap() = delay;
        self
    }

    /// Number of calls started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// When each call started.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    fn next_result(&self) -> Scripted {
        if let Some(result) = self.script.lock().unwrap().pop_front() {
            return result;
        }
        self.fallback
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(TokenError::Transport("scripted fetcher exhausted".into())))
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        credentials: &CredentialsConfig,
        cancel: &CancellationToken,
    ) -> Result<TokenResponse, TokenError> {
        credentials.validate()?;

        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return Err(TokenError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        if cancel.is_cancelled() {
            return Err(TokenError::Cancelled);
        }
        self.next_result()
    }
}
