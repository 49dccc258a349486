//! Configuration loading for the gateway binary.
//!
//! Non-secret settings live in a YAML file (path overridable via
//! `GATEWAY_CONFIG_PATH`, default `config.yaml`); the client secret is
//! read from the environment (`DERIBIT_CLIENT_SECRET`), optionally
//! populated from a `.env` file, and never written into the YAML file.

use gateway_types::RiskLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("missing required environment variable {0}")]
    MissingEnv(String),
}

/// Non-secret gateway settings, deserialized from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub client_id: String,
    pub rest_base_url: String,
    pub ws_url: String,
    pub listen_port: u16,
    pub cert_path: String,
    pub key_path: String,
    pub log_level: String,
    pub max_requests_per_second: u32,
    pub risk_limits: RiskLimits,

    /// Populated from `DERIBIT_CLIENT_SECRET` after loading, never
    /// serialized back to disk.
    #[serde(skip)]
    pub client_secret: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            rest_base_url: "https://test.deribit.com/api/v2/".to_string(),
            ws_url: "wss://test.deribit.com/ws/api/v2".to_string(),
            listen_port: 9002,
            cert_path: "certs/server.crt".to_string(),
            key_path: "certs/server.key".to_string(),
            log_level: "info".to_string(),
            max_requests_per_second: 10,
            risk_limits: RiskLimits::default(),
            client_secret: String::new(),
        }
    }
}

impl GatewayConfig {
    /// Path to the config file, honoring `GATEWAY_CONFIG_PATH` with a
    /// fallback to `config.yaml`.
    pub fn path_from_env() -> PathBuf {
        std::env::var("GATEWAY_CONFIG_PATH")
            .unwrap_or_else(|_| "config.yaml".to_string())
            .into()
    }

    /// Load a `.env` file if present, then read and parse the YAML
    /// config at `path`, then overlay the client secret from the
    /// environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();

        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: GatewayConfig =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.client_secret = std::env::var("DERIBIT_CLIENT_SECRET")
            .map_err(|_| ConfigError::MissingEnv("DERIBIT_CLIENT_SECRET".to_string()))?;

        Ok(config)
    }

    /// Convenience entry point used by the binary: resolves the config
    /// path from the environment, then loads it.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Self::load(Self::path_from_env())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_matches_deribit_testnet_conventions() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_port, 9002);
        assert_eq!(config.max_requests_per_second, 10);
        assert!(config.rest_base_url.starts_with("https://"));
    }

    #[test]
    fn missing_secret_env_var_is_reported() {
        std::env::remove_var("DERIBIT_CLIENT_SECRET");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "client_id: \"abc\"").unwrap();
        let err = GatewayConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(_)));
    }

    #[test]
    fn yaml_overrides_are_applied() {
        std::env::set_var("DERIBIT_CLIENT_SECRET", "shh");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "client_id: \"abc\"\nlisten_port: 7000").unwrap();
        let config = GatewayConfig::load(file.path()).unwrap();
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.listen_port, 7000);
        assert_eq!(config.client_secret, "shh");
        std::env::remove_var("DERIBIT_CLIENT_SECRET");
    }

    #[test]
    fn config_path_from_env_defaults_to_config_yaml() {
        std::env::remove_var("GATEWAY_CONFIG_PATH");
        assert_eq!(GatewayConfig::path_from_env(), PathBuf::from("config.yaml"));
    }
}
