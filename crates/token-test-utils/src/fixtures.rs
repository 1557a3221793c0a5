//! Pre-configured credentials, client configs and tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use common::secret::SecretString;
use token_engine::{CredentialsConfig, EngineConfig, TokenClientConfig};

pub const TEST_CLIENT_ID: &str = "c";
pub const TEST_CLIENT_SECRET: &str = "s";
pub const TEST_TOKEN_ENDPOINT: &str = "https://idp/token";
pub const TEST_CLIENT_NAME: &str = "orders";

/// `{c, s, https://idp/token}`.
pub fn test_credentials() -> CredentialsConfig {
    CredentialsConfig::new(
        TEST_CLIENT_ID,
        SecretString::from(TEST_CLIENT_SECRET),
        TEST_TOKEN_ENDPOINT,
        None,
    )
    .unwrap()
}

/// Client `orders` with the test credentials and `engine` tuning.
pub fn client_config(engine: EngineConfig) -> TokenClientConfig {
    TokenClientConfig::new(TEST_CLIENT_NAME, test_credentials()).with_engine(engine)
}

/// Client `orders` pointing at `endpoint`.
pub fn client_config_for(endpoint: &str, engine: EngineConfig) -> TokenClientConfig {
    let credentials = CredentialsConfig::new(
        TEST_CLIENT_ID,
        SecretString::from(TEST_CLIENT_SECRET),
        endpoint,
        None,
    )
    .unwrap();
    TokenClientConfig::new(TEST_CLIENT_NAME, credentials).with_engine(engine)
}

/// Unsigned JWT whose payload is `{"sub": subject}`.
pub fn jwt_with_subject(subject: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::json!({ "sub": subject }).to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}
