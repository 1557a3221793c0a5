//! Bearer authorization for HTTP clients (OpenSearch and similar).
//!
//! Every outbound request gets `Authorization: Bearer <token>` from the
//! engine. A request for which no token can be obtained, or none arrives
//! within the wait limit, fails with `TokenError::Unauthorized` and is never
//! sent.

use super::DEFAULT_BLOCKING_WAIT;
use crate::engine::TokenEngine;
use crate::errors::TokenError;
use crate::observability::TokenEventSink;
use common::secret::{ExposeSecret, SecretString};
use http::header::{HeaderValue, AUTHORIZATION};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{BoxError, Layer, Service};
use tracing::instrument;

const ADAPTER: &str = "http";

/// `Authorization` header value for `token`, marked sensitive.
///
/// # Errors
///
/// Returns `TokenError::Unauthorized` if the token contains bytes that are
/// not allowed in a header.
pub fn bearer_header(token: &SecretString) -> Result<HeaderValue, TokenError> {
    let mut value = HeaderValue::try_from(format!("Bearer {}", token.expose_secret()))
        .map_err(|_| {
            TokenError::Unauthorized("access token is not a valid header value".into())
        })?;
    value.set_sensitive(true);
    Ok(value)
}

async fn obtain_header(
    engine: &dyn TokenEngine,
    sink: &dyn TokenEventSink,
    cancel: &CancellationToken,
    wait_limit: Duration,
) -> Result<HeaderValue, TokenError> {
    let result = match tokio::time::timeout(wait_limit, engine.get_valid_token(cancel)).await {
        Ok(Ok(entry)) => bearer_header(entry.access_token()),
        Ok(Err(e)) => Err(TokenError::Unauthorized(format!(
            "could not obtain a bearer token for '{}': {e}",
            engine.name()
        ))),
        Err(_) => Err(TokenError::Unauthorized(format!(
            "no bearer token for '{}' within {}ms",
            engine.name(),
            wait_limit.as_millis()
        ))),
    };

    if let Err(e) = &result {
        sink.adapter_failed(engine.name(), ADAPTER, e);
    }
    result
}

/// Attach a bearer token to a `reqwest` request.
///
/// Waits at most [`DEFAULT_BLOCKING_WAIT`] for a token.
///
/// # Errors
///
/// Returns `TokenError::Unauthorized` if no token could be obtained in time.
#[instrument(skip_all, name = "token_engine.http.authorize", fields(client = %engine.name()))]
pub async fn authorize_request(
    engine: &dyn TokenEngine,
    sink: &dyn TokenEventSink,
    request: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> Result<reqwest::RequestBuilder, TokenError> {
    let header = obtain_header(engine, sink, cancel, DEFAULT_BLOCKING_WAIT).await?;
    Ok(request.header(AUTHORIZATION, header))
}

/// Tower layer that authorizes every request with the engine's token.
#[derive(Clone, Debug)]
pub struct BearerAuthLayer {
    engine: Arc<dyn TokenEngine>,
    sink: Arc<dyn TokenEventSink>,
    wait_limit: Duration,
}

impl BearerAuthLayer {
    #[must_use]
    pub fn new(engine: Arc<dyn TokenEngine>, sink: Arc<dyn TokenEventSink>) -> Self {
        Self {
            engine,
            sink,
            wait_limit: DEFAULT_BLOCKING_WAIT,
        }
    }

    /// Bound how long a request waits for a token.
    #[must_use]
    pub fn with_wait_limit(mut self, limit: Duration) -> Self {
        self.wait_limit = limit;
        self
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            engine: Arc::clone(&self.engine),
            sink: Arc::clone(&self.sink),
            wait_limit: self.wait_limit,
        }
    }
}

/// Service produced by [`BearerAuthLayer`].
#[derive(Clone, Debug)]
pub struct BearerAuthService<S> {
    inner: S,
    engine: Arc<dyn TokenEngine>,
    sink: Arc<dyn TokenEventSink>,
    wait_limit: Duration,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for BearerAuthService<S>
where
    S: Service<http::Request<ReqBody>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: http::Request<ReqBody>) -> Self::Future {
        // Keep the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let engine = Arc::clone(&self.engine);
        let sink = Arc::clone(&self.sink);
        let wait_limit = self.wait_limit;

        Box::pin(async move {
            let cancel = CancellationToken::new();
            let header = obtain_header(engine.as_ref(), sink.as_ref(), &cancel, wait_limit)
                .await
                .map_err(|e| Box::new(e) as BoxError)?;
            req.headers_mut().insert(AUTHORIZATION, header);
            inner.call(req).await.map_err(Into::into)
        })
    }
}
