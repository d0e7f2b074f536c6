//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::wait::Poller;

/// Settings shared by every migration command, layered from defaults,
/// configuration files, and `DISK_MIGRATION_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DISK_MIGRATION",
    discovery(
        app_name = "disk-migration",
        env_var = "DISK_MIGRATION_CONFIG_PATH",
        config_file_name = "disk-migration.toml",
        dotfile_name = ".disk-migration.toml",
        project_file_name = "disk-migration.toml"
    )
)]
pub struct MigrationConfig {
    /// Namespace holding the claims and jobs.
    #[ortho_config(default = "creditcoin".to_owned())]
    pub namespace: String,
    /// Storage class requested for destination volumes.
    #[ortho_config(default = "managed-csi".to_owned())]
    pub storage_class: String,
    /// Capacity requested for destination volumes.
    #[ortho_config(default = "50Gi".to_owned())]
    pub dummy_claim_capacity: String,
    /// Container image used by copy and delete jobs.
    #[ortho_config(default = "debian".to_owned())]
    pub job_image: String,
    /// Chain directory under `chains/` that jobs operate on.
    #[ortho_config(default = "creditcoin".to_owned())]
    pub chain_name: String,
    /// Prefix the workload's claim template adds to pod names.
    #[ortho_config(default = "node-storage-".to_owned())]
    pub claim_prefix: String,
    /// Directory receiving captured job logs.
    #[ortho_config(default = "logs".to_owned())]
    pub log_dir: String,
    /// Seconds between status polls.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to disk-migration.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

impl MigrationConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("disk-migration")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the namespace to use, preferring a command-line override.
    #[must_use]
    pub fn namespace_or<'a>(&'a self, namespace: Option<&'a str>) -> &'a str {
        namespace.unwrap_or(&self.namespace)
    }

    /// Builds a poller using the configured interval.
    #[must_use]
    pub fn poller(&self) -> Poller {
        Poller::new(Duration::from_secs(self.poll_interval_secs))
    }

    /// Returns the log directory as a UTF-8 path.
    #[must_use]
    pub fn log_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.log_dir)
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is blank
    /// and [`ConfigError::InvalidPollInterval`] when the interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.namespace,
                FieldMetadata::new("namespace", "DISK_MIGRATION_NAMESPACE", "namespace"),
            ),
            (
                &self.storage_class,
                FieldMetadata::new(
                    "storage class",
                    "DISK_MIGRATION_STORAGE_CLASS",
                    "storage_class",
                ),
            ),
            (
                &self.dummy_claim_capacity,
                FieldMetadata::new(
                    "destination capacity",
                    "DISK_MIGRATION_DUMMY_CLAIM_CAPACITY",
                    "dummy_claim_capacity",
                ),
            ),
            (
                &self.job_image,
                FieldMetadata::new("job image", "DISK_MIGRATION_JOB_IMAGE", "job_image"),
            ),
            (
                &self.chain_name,
                FieldMetadata::new("chain name", "DISK_MIGRATION_CHAIN_NAME", "chain_name"),
            ),
            (
                &self.log_dir,
                FieldMetadata::new("log directory", "DISK_MIGRATION_LOG_DIR", "log_dir"),
            ),
        ];
        for (value, metadata) in &required {
            if value.trim().is_empty() {
                return Err(metadata.missing());
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Raised when the poll interval is zero.
    #[error("poll_interval_secs must be greater than zero")]
    InvalidPollInterval,
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
