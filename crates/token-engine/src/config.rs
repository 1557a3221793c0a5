//! Token engine configuration.
//!
//! Credentials are validated once, when they are built (or deserialized), so
//! an invalid `CredentialsConfig` cannot reach an engine or the token
//! endpoint. Engine tuning knobs have defaults and can be loaded from
//! environment variables. The client secret is redacted in Debug output.

use crate::errors::TokenError;
use common::secret::{ExposeSecret, SecretString};
use common::types::ClientName;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default wait between failed fetch attempts (and cold-start re-checks).
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Default time before expiry at which the proactive strategy refreshes.
pub const DEFAULT_EARLY_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Default time before expiry at which read-through treats an entry as stale.
pub const DEFAULT_EARLY_EXPIRY_MARGIN: Duration = Duration::from_secs(5);

/// Default floor for a cached token's lifetime.
pub const DEFAULT_MIN_TTL: Duration = Duration::from_secs(10);

/// Default clock skew subtracted from the reported lifetime.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::ZERO;

/// Default HTTP request timeout for the token endpoint.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for the token endpoint.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Credentials
// =============================================================================

/// Client-credentials grant inputs.
///
/// Construction fails with `TokenError::Configuration` if `client_id`,
/// `client_secret` or `token_endpoint` is empty, or if the endpoint is not
/// an absolute `http(s)` URL. An empty scope is treated as no scope.
#[derive(Clone, Deserialize)]
#[serde(try_from = "RawCredentials")]
pub struct CredentialsConfig {
    client_id: String,
    client_secret: SecretString,
    token_endpoint: Url,
    scope: Option<String>,
}

#[derive(Deserialize)]
struct RawCredentials {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    token_endpoint: String,
    #[serde(default)]
    scope: Option<String>,
}

impl TryFrom<RawCredentials> for CredentialsConfig {
    type Error = TokenError;

    fn try_from(raw: RawCredentials) -> Result<Self, Self::Error> {
        CredentialsConfig::new(
            raw.client_id,
            SecretString::from(raw.client_secret),
            &raw.token_endpoint,
            raw.scope,
        )
    }
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("scope", &self.scope)
            .finish()
    }
}

impl CredentialsConfig {
    /// Build and validate credentials.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if a required field is empty or
    /// the token endpoint is not an absolute `http`/`https` URL.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: SecretString,
        token_endpoint: &str,
        scope: Option<String>,
    ) -> Result<Self, TokenError> {
        let client_id = client_id.into();
        let token_endpoint = parse_token_endpoint(token_endpoint)?;
        let scope = scope
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let config = Self {
            client_id,
            client_secret,
            token_endpoint,
            scope,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the required-field invariant.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` naming the first empty field.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.client_id.trim().is_empty() {
            return Err(TokenError::Configuration("client_id is empty".into()));
        }
        if self.client_secret.expose_secret().is_empty() {
            return Err(TokenError::Configuration("client_secret is empty".into()));
        }
        Ok(())
    }

    /// OAuth client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// OAuth client secret.
    #[must_use]
    pub fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }

    /// Token endpoint URL.
    #[must_use]
    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    /// Requested scope, if any.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }
}

fn parse_token_endpoint(raw: &str) -> Result<Url, TokenError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TokenError::Configuration("token_endpoint is empty".into()));
    }

    let url = Url::parse(raw).map_err(|e| {
        TokenError::Configuration(format!("token_endpoint is not an absolute URL: {e}"))
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(TokenError::Configuration(format!(
            "token_endpoint must be an http(s) URL, got scheme '{}'",
            url.scheme()
        )));
    }

    Ok(url)
}

// =============================================================================
// Engine tuning
// =============================================================================

/// Which refresh strategy an engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStrategy {
    /// Fetch on a cache miss; concurrent misses share one fetch.
    #[default]
    ReadThrough,
    /// Background task refreshes ahead of expiry; reads never fetch.
    Proactive,
}

impl FromStr for RefreshStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read_through" | "read-through" | "readthrough" => Ok(RefreshStrategy::ReadThrough),
            "proactive" | "background" => Ok(RefreshStrategy::Proactive),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown refresh strategy '{other}'"
            ))),
        }
    }
}

impl fmt::Display for RefreshStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshStrategy::ReadThrough => f.write_str("read_through"),
            RefreshStrategy::Proactive => f.write_str("proactive"),
        }
    }
}

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Refresh strategy.
    pub strategy: RefreshStrategy,

    /// Wait between failed attempts, and cold-start re-check interval.
    pub retry_interval: Duration,

    /// Proactive: refresh this long before the token expires.
    pub early_refresh_margin: Duration,

    /// Read-through: treat an entry as stale this long before it expires.
    pub early_expiry_margin: Duration,

    /// Floor for a cached token's lifetime.
    pub min_ttl: Duration,

    /// Subtracted from the reported `expires_in`.
    pub clock_skew: Duration,

    /// Proactive: fixed refresh period instead of one derived from the
    /// token lifetime.
    pub refresh_interval: Option<Duration>,

    /// HTTP request timeout for the token endpoint.
    pub http_timeout: Duration,

    /// Connection timeout for the token endpoint.
    pub connect_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: RefreshStrategy::default(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            early_refresh_margin: DEFAULT_EARLY_REFRESH_MARGIN,
            early_expiry_margin: DEFAULT_EARLY_EXPIRY_MARGIN,
            min_ttl: DEFAULT_MIN_TTL,
            clock_skew: DEFAULT_CLOCK_SKEW,
            refresh_interval: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Set the refresh strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: RefreshStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the retry interval.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the proactive early refresh margin.
    #[must_use]
    pub fn with_early_refresh_margin(mut self, margin: Duration) -> Self {
        self.early_refresh_margin = margin;
        self
    }

    /// Set the read-through early expiry margin.
    #[must_use]
    pub fn with_early_expiry_margin(mut self, margin: Duration) -> Self {
        self.early_expiry_margin = margin;
        self
    }

    /// Set the minimum cached lifetime.
    #[must_use]
    pub fn with_min_ttl(mut self, min_ttl: Duration) -> Self {
        self.min_ttl = min_ttl;
        self
    }

    /// Set the clock skew allowance.
    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Use a fixed proactive refresh period.
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Reject knob combinations that would spin or never refresh.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` for a zero retry interval, a zero
    /// refresh interval, a zero HTTP timeout, or an early expiry margin that
    /// is not below `min_ttl` (read-through entries would be stale on
    /// arrival).
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.retry_interval.is_zero() {
            return Err(TokenError::Configuration(
                "retry_interval must be greater than zero".into(),
            ));
        }
        if self.refresh_interval.is_some_and(|d| d.is_zero()) {
            return Err(TokenError::Configuration(
                "refresh_interval must be greater than zero".into(),
            ));
        }
        if self.http_timeout.is_zero() {
            return Err(TokenError::Configuration(
                "http_timeout must be greater than zero".into(),
            ));
        }
        if self.early_expiry_margin >= self.min_ttl {
            return Err(TokenError::Configuration(format!(
                "early_expiry_margin ({}s) must be less than min_ttl ({}s)",
                self.early_expiry_margin.as_secs(),
                self.min_ttl.as_secs()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Per-client configuration
// =============================================================================

/// Everything needed to build an engine for one logical client.
#[derive(Debug, Clone)]
pub struct TokenClientConfig {
    /// Logical client name (cache key).
    pub name: ClientName,

    /// Client-credentials grant inputs.
    pub credentials: CredentialsConfig,

    /// Engine tuning.
    pub engine: EngineConfig,

    /// Principal handed to Kafka instead of the token's own subject.
    pub principal: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<ConfigError> for TokenError {
    fn from(err: ConfigError) -> Self {
        TokenError::Configuration(err.to_string())
    }
}

impl TokenClientConfig {
    /// Configuration with default engine tuning.
    #[must_use]
    pub fn new(name: impl Into<ClientName>, credentials: CredentialsConfig) -> Self {
        Self {
            name: name.into(),
            credentials,
            engine: EngineConfig::default(),
            principal: None,
        }
    }

    /// Replace the engine tuning.
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set a fixed principal.
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Load configuration from environment variables named `<PREFIX>_*`.
    ///
    /// # Errors
    ///
    /// See [`TokenClientConfig::from_vars`].
    pub fn from_env(prefix: &str) -> Result<Self, TokenError> {
        Self::from_vars(prefix, &env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if a required variable is
    /// missing, a value does not parse, or the credentials are invalid.
    pub fn from_vars(prefix: &str, vars: &HashMap<String, String>) -> Result<Self, TokenError> {
        let key = |suffix: &str| format!("{prefix}_{suffix}");
        let required = |suffix: &str| {
            let name = key(suffix);
            vars.get(&name)
                .cloned()
                .ok_or(ConfigError::MissingEnvVar(name))
        };

        let client_id = required("CLIENT_ID")?;
        let client_secret = SecretString::from(required("CLIENT_SECRET")?);
        let token_endpoint = required("TOKEN_ENDPOINT")?;
        let scope = vars.get(&key("SCOPE")).cloned();

        let credentials = CredentialsConfig::new(
            client_id.clone(),
            client_secret,
            &token_endpoint,
            scope,
        )?;

        let name = vars
            .get(&key("CLIENT_NAME"))
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .unwrap_or(client_id);

        let principal = vars
            .get(&key("PRINCIPAL"))
            .filter(|s| !s.trim().is_empty())
            .cloned();

        let defaults = EngineConfig::default();

        let strategy = match vars.get(&key("REFRESH_STRATEGY")) {
            Some(raw) => raw.parse()?,
            None => defaults.strategy,
        };

        let engine = EngineConfig {
            strategy,
            retry_interval: parse_duration(vars, &key("RETRY_INTERVAL_MS"), Duration::from_millis)?
                .unwrap_or(defaults.retry_interval),
            early_refresh_margin: parse_duration(
                vars,
                &key("EARLY_REFRESH_MARGIN_SECONDS"),
                Duration::from_secs,
            )?
            .unwrap_or(defaults.early_refresh_margin),
            early_expiry_margin: parse_duration(
                vars,
                &key("EARLY_EXPIRY_MARGIN_SECONDS"),
                Duration::from_secs,
            )?
            .unwrap_or(defaults.early_expiry_margin),
            min_ttl: parse_duration(vars, &key("MIN_TTL_SECONDS"), Duration::from_secs)?
                .unwrap_or(defaults.min_ttl),
            clock_skew: parse_duration(vars, &key("CLOCK_SKEW_SECONDS"), Duration::from_secs)?
                .unwrap_or(defaults.clock_skew),
            refresh_interval: parse_duration(
                vars,
                &key("REFRESH_INTERVAL_SECONDS"),
                Duration::from_secs,
            )?,
            http_timeout: parse_duration(vars, &key("HTTP_TIMEOUT_SECONDS"), Duration::from_secs)?
                .unwrap_or(defaults.http_timeout),
            connect_timeout: defaults.connect_timeout,
        };
        engine.validate()?;

        Ok(Self {
            name: ClientName::new(name),
            credentials,
            engine,
            principal,
        })
    }
}

fn parse_duration(
    vars: &HashMap<String, String>,
    name: &str,
    unit: fn(u64) -> Duration,
) -> Result<Option<Duration>, ConfigError> {
    vars.get(name)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(unit)
                .map_err(|e| ConfigError::InvalidValue(format!("{name}={raw}: {e}")))
        })
        .transpose()
}
