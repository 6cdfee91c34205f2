//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod billing;
mod collaborators;
mod notification;
mod storage;

pub use billing::{BillingConfig, CheckoutConfig};
pub use collaborators::CollaboratorsConfig;
pub use notification::NotificationConfig;
pub use storage::StorageConfig;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FRESHCYCLE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FRESHCYCLE";

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage backend.
    pub storage: StorageConfig,
    /// Scheduler cadence, payment timeout and retry escalation.
    pub billing: BillingConfig,
    /// Notification delivery retries.
    pub notification: NotificationConfig,
    /// Shipping rules used when quoting checkout totals.
    pub checkout: CheckoutConfig,
    /// Endpoints of the external services.
    pub collaborators: CollaboratorsConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix,
    ///    e.g. `FRESHCYCLE__BILLING__MAX_CONCURRENCY=16`
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
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
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("billing.retry_delays_days")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ::config::ConfigError> {
        let billing = &self.billing;
        if billing.max_concurrency == 0 {
            return Err(::config::ConfigError::Message(
                "billing.max_concurrency must be at least 1".to_string(),
            ));
        }
        if billing.past_due_after_failures == 0
            || billing.expire_after_failures < billing.past_due_after_failures
        {
            return Err(::config::ConfigError::Message(format!(
                "billing.expire_after_failures ({}) must be >= past_due_after_failures ({}) >= 1",
                billing.expire_after_failures, billing.past_due_after_failures
            )));
        }
        if self.notification.inline_attempts == 0 {
            return Err(::config::ConfigError::Message(
                "notification.inline_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.notification.min_backoff_ms = 1;
        config.notification.max_backoff_ms = 5;
        config.billing.payment_timeout_secs = 1;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.storage.storage_type, "memory");
        assert_eq!(config.billing.sweep_interval_secs, 3600);
        assert_eq!(config.billing.retry_delays_days, vec![3, 7, 14]);
        assert_eq!(config.billing.past_due_after_failures, 3);
        assert_eq!(config.billing.expire_after_failures, 4);
        assert_eq!(config.checkout.free_shipping_threshold_cents, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.billing.expire_after_failures = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("freshcycle.yaml");
        std::fs::write(
            &path,
            "storage:\n  type: sqlite\n  path: /tmp/fc.db\nbilling:\n  max_concurrency: 2\n  retry_delays_days: [1, 2]\n",
        )
        .unwrap();

        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.storage.storage_type, "sqlite");
        assert_eq!(config.storage.path, "/tmp/fc.db");
        assert_eq!(config.billing.max_concurrency, 2);
        assert_eq!(config.billing.retry_delays_days, vec![1, 2]);
        assert_eq!(config.billing.payment_timeout_secs, 30);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("FRESHCYCLE__BILLING__SWEEP_INTERVAL_SECS", "60");
        let config = Config::load(None);
        std::env::remove_var("FRESHCYCLE__BILLING__SWEEP_INTERVAL_SECS");

        assert_eq!(config.unwrap().billing.sweep_interval_secs, 60);
    }
}
