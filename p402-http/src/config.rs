//! Client configuration.
//!
//! [`ClientConfig`] deserializes from any serde source with defaults for
//! every field, or is read from the process environment (after loading a
//! `.env` file) by [`ClientConfig::from_env`].
//!
//! # Environment Variables
//!
//! - `P402_DISCOVERY_URL` - Requirements discovery endpoint
//! - `P402_REQUEST_TIMEOUT_SECS` - Per-request timeout (default: `30`)
//! - `P402_AUTHORIZATION_VALIDITY_SECS` - Signature lifetime (default: `3600`)
//! - `P402_VALID_AFTER` - `epoch`, `now` or `skew:<secs>` (default: `epoch`)
//! - `P402_CHECK_BALANCE` - Read the payer balance before signing (default: `true`)
//! - `P402_USER_AGENT` - `User-Agent` for outgoing requests
//! - `P402_RPC_<CHAIN_ID>` - RPC endpoint override for a numeric chain id

use std::collections::HashMap;
use std::time::Duration;

use p402::chain::ChainId;
use p402_evm::exact::{AuthorizationBuilder, DEFAULT_VALIDITY_SECS, ValidAfterPolicy};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::DEFAULT_USER_AGENT;

const ENV_PREFIX: &str = "P402_";
const RPC_PREFIX: &str = "P402_RPC_";

/// Errors raised while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable holds a value that cannot be parsed.
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        /// Variable name.
        var: String,
        /// Raw value.
        value: String,
        /// Parse failure.
        reason: String,
    },
}

/// Settings shared by every negotiation of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Endpoint answering requirement discovery queries. Without one,
    /// requirements come from the resource's own 402 answer.
    #[serde(default)]
    pub discovery_url: Option<Url>,

    /// Timeout applied to every outgoing request (default: `30`).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Lifetime of a signed authorization (default: `3600`).
    #[serde(default = "default_authorization_validity_secs")]
    pub authorization_validity_secs: u64,

    /// How `validAfter` is chosen (default: `epoch`).
    #[serde(default)]
    pub valid_after: ValidAfterPolicy,

    /// Whether to read the payer balance before signing (default: `true`).
    #[serde(default = "default_check_balance")]
    pub check_balance: bool,

    /// RPC endpoints replacing the catalog defaults, keyed by CAIP-2 id.
    #[serde(default)]
    pub rpc_overrides: HashMap<ChainId, Url>,

    /// `User-Agent` for outgoing requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_authorization_validity_secs() -> u64 {
    DEFAULT_VALIDITY_SECS
}

const fn default_check_balance() -> bool {
    true
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_owned()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            discovery_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            authorization_validity_secs: default_authorization_validity_secs(),
            valid_after: ValidAfterPolicy::default(),
            check_balance: default_check_balance(),
            rpc_overrides: HashMap::new(),
            user_agent: default_user_agent(),
        }
    }
}

impl ClientConfig {
    /// Loads `.env` if present, then reads `P402_*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a variable that cannot be
    /// parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded environment file");
        }
        Self::from_vars(std::env::vars())
    }

    /// Builds a configuration from `(name, value)` pairs. Names without the
    /// `P402_` prefix are ignored; unset settings keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a variable that cannot be
    /// parsed.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            if !key.starts_with(ENV_PREFIX) {
                continue;
            }
            match key {
                "P402_DISCOVERY_URL" => {
                    config.discovery_url = Some(parse_var(key, value, Url::parse)?);
                }
                "P402_REQUEST_TIMEOUT_SECS" => {
                    config.request_timeout_secs = parse_var(key, value, str::parse)?;
                }
                "P402_AUTHORIZATION_VALIDITY_SECS" => {
                    config.authorization_validity_secs = parse_var(key, value, str::parse)?;
                }
                "P402_VALID_AFTER" => {
                    config.valid_after = parse_var(key, value, str::parse)?;
                }
                "P402_CHECK_BALANCE" => {
                    config.check_balance = parse_var(key, value, parse_flag)?;
                }
                "P402_USER_AGENT" => value.clone_into(&mut config.user_agent),
                _ => {
                    if let Some(chain) = key.strip_prefix(RPC_PREFIX) {
                        let chain_id: u64 = parse_var(key, chain, str::parse)?;
                        let url = parse_var(key, value, Url::parse)?;
                        config.rpc_overrides.insert(ChainId::eip155(chain_id), url);
                    }
                }
            }
        }
        Ok(config)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Authorization builder honoring the validity and `validAfter` settings.
    #[must_use]
    pub const fn authorization_builder(&self) -> AuthorizationBuilder {
        AuthorizationBuilder::new()
            .with_validity_secs(self.authorization_validity_secs)
            .with_valid_after(self.valid_after)
    }
}

fn parse_var<T, E, F>(var: &str, value: &str, parse: F) -> Result<T, ConfigError>
where
    F: FnOnce(&str) -> Result<T, E>,
    E: std::fmt::Display,
{
    parse(value).map_err(|e| ConfigError::InvalidValue {
        var: var.to_owned(),
        value: value.to_owned(),
        reason: e.to_string(),
    })
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.discovery_url, None);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.authorization_validity_secs, 3600);
        assert_eq!(config.valid_after, ValidAfterPolicy::Epoch);
        assert!(config.check_balance);
        assert!(config.user_agent.starts_with("p402/"));
    }

    #[test]
    fn serde_fills_missing_fields() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"check_balance": false, "valid_after": "skew:30", "rpc_overrides": {"eip155:42220": "http://localhost:8545/"}}"#,
        )
        .unwrap();
        assert!(!config.check_balance);
        assert_eq!(config.valid_after, ValidAfterPolicy::Skewed(30));
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(
            config.rpc_overrides[&ChainId::eip155(42220)].as_str(),
            "http://localhost:8545/"
        );
    }

    #[test]
    fn reads_prefixed_variables() {
        let config = ClientConfig::from_vars([
            ("P402_DISCOVERY_URL", "https://pay.example.com/discover"),
            ("P402_REQUEST_TIMEOUT_SECS", "5"),
            ("P402_AUTHORIZATION_VALIDITY_SECS", "600"),
            ("P402_VALID_AFTER", "now"),
            ("P402_CHECK_BALANCE", "off"),
            ("P402_RPC_8453", "https://base.example.com"),
            ("HOME", "/root"),
        ])
        .unwrap();
        assert_eq!(
            config.discovery_url.unwrap().as_str(),
            "https://pay.example.com/discover"
        );
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.authorization_validity_secs, 600);
        assert_eq!(config.valid_after, ValidAfterPolicy::Now);
        assert!(!config.check_balance);
        assert!(config.rpc_overrides.contains_key(&ChainId::eip155(8453)));
    }

    #[test]
    fn rejects_unparseable_values() {
        let err = ClientConfig::from_vars([("P402_REQUEST_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref var, .. } if var == "P402_REQUEST_TIMEOUT_SECS"));
        assert!(ClientConfig::from_vars([("P402_RPC_celo", "https://forno.celo.org")]).is_err());
        assert!(ClientConfig::from_vars([("P402_CHECK_BALANCE", "maybe")]).is_err());
    }
}
