//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod authority;
mod issuer;
mod storage;

pub use authority::AuthorityConfig;
pub use issuer::{IssuerAddress, IssuerConfig};
pub use storage::{ReconcilerConfig, StorageConfig};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "RECEIPTS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "RECEIPTS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "RECEIPTS_LOG";

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Certification authority endpoint and service-account credentials.
    pub authority: AuthorityConfig,
    /// Fixed identity printed as issuer on every receipt.
    pub issuer: IssuerConfig,
    /// Donation store and pending-receipt side-log.
    pub storage: StorageConfig,
    /// Background reconciliation of certified-but-unpersisted receipts.
    pub reconciler: ReconcilerConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new("config", FileFormat::Yaml).required(false))
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.authority = config
            .authority
            .with_credentials("hogar-test", "test-secret");
        config.issuer.tax_id = "1234567-8".to_string();
        config.issuer.legal_name = "Asociación Hogar San Vicente".to_string();
        config.issuer.trade_name = "Hogar San Vicente".to_string();
        config.issuer.address.street = "4a Avenida 5-20 Zona 1".to_string();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.authority.timeout_secs, 30);
        assert_eq!(config.authority.token_refresh_margin_secs, 3600);
        assert_eq!(config.authority.max_auth_retries, 1);
        assert_eq!(config.issuer.currency, "GTQ");
        assert_eq!(config.storage.path, "data/receipts.db");
        assert_eq!(config.reconciler.interval_secs, 60);
    }

    #[test]
    fn test_config_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.yaml");
        std::fs::write(
            &path,
            r#"
authority:
  base_url: "https://fel.example.invalid/api"
  service_id: "hogar-01"
  timeout_secs: 5
issuer:
  tax_id: "1234567-8"
  legal_name: "Asociación Hogar de Ancianos"
  address:
    municipality: "Antigua Guatemala"
"#,
        )
        .unwrap();

        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.authority.base_url, "https://fel.example.invalid/api");
        assert_eq!(config.authority.service_id, "hogar-01");
        assert_eq!(config.authority.timeout_secs, 5);
        // untouched values keep their defaults
        assert_eq!(config.authority.max_auth_retries, 1);
        assert_eq!(config.issuer.tax_id, "1234567-8");
        assert_eq!(config.issuer.address.municipality, "Antigua Guatemala");
        assert_eq!(config.issuer.address.country, "GT");
    }
}
