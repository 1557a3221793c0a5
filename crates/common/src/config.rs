//! Common configuration types for the bearer token crates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default log filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error, or an
    /// `EnvFilter` expression such as `token_engine=debug`)
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// Load from a variable map (`RUST_LOG`, `LOG_FORMAT=json`).
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let log_level = vars
            .get("RUST_LOG")
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let json_logs = vars
            .get("LOG_FORMAT")
            .is_some_and(|s| s.eq_ignore_ascii_case("json"));

        Self {
            log_level,
            json_logs,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = ObservabilityConfig::from_vars(&HashMap::new());
        assert_eq!(config, ObservabilityConfig::default());
    }

    #[test]
    fn test_from_vars() {
        let vars = HashMap::from([
            ("RUST_LOG".to_string(), "token_engine=debug".to_string()),
            ("LOG_FORMAT".to_string(), "JSON".to_string()),
        ]);
        let config = ObservabilityConfig::from_vars(&vars);
        assert_eq!(config.log_level, "token_engine=debug");
        assert!(config.json_logs);
    }
}
