//! Common data types for the bearer token crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical name of an OAuth client (e.g. `orders-producer`).
///
/// Every network client built for the same logical name shares one token
/// cache, so this is the cache key for engines and registries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientName(String);

impl ClientName {
    /// Create a client name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ClientName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for ClientName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
