//! Configuration loading via `ortho-config`.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Name of the configuration file discovered in the project and user config
/// directories.
pub const CONFIG_FILE_NAME: &str = "strata.toml";

/// Control-plane configuration derived from defaults, `strata.toml` and
/// `STRATA_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STRATA",
    discovery(
        app_name = "strata",
        env_var = "STRATA_CONFIG_PATH",
        config_file_name = "strata.toml",
        dotfile_name = ".strata.toml",
        project_file_name = "strata.toml"
    )
)]
pub struct StrataConfig {
    /// Directory holding `state.json`. Defaults to `.strata`.
    #[ortho_config(default = ".strata".to_owned())]
    pub state_dir: String,
    /// Upper bound on provider calls in flight during one scale pass.
    #[ortho_config(default = 8)]
    pub provider_concurrency: usize,
    /// Containers the mock provider reports per node.
    #[ortho_config(default = 1)]
    pub containers_per_node: u32,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[ortho_config(default = "info".to_owned())]
    pub log_filter: String,
    /// Emit JSON log lines instead of human readable ones.
    #[ortho_config(default = false)]
    pub log_json: bool,
}

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

    fn hint(&self) -> String {
        format!(
            "{}: set {} or add {} to {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key
        )
    }
}

const STATE_DIR: FieldMetadata =
    FieldMetadata::new("state directory", "STRATA_STATE_DIR", "state_dir");
const PROVIDER_CONCURRENCY: FieldMetadata = FieldMetadata::new(
    "provider concurrency",
    "STRATA_PROVIDER_CONCURRENCY",
    "provider_concurrency",
);
const CONTAINERS_PER_NODE: FieldMetadata = FieldMetadata::new(
    "containers per node",
    "STRATA_CONTAINERS_PER_NODE",
    "containers_per_node",
);
const LOG_FILTER: FieldMetadata =
    FieldMetadata::new("log filter", "STRATA_LOG_FILTER", "log_filter");

impl StrataConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("strata")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// State directory as a UTF-8 path.
    #[must_use]
    pub fn state_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.state_dir.trim())
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply each field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for blank strings and
    /// [`ConfigError::Invalid`] for zero bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_dir.trim().is_empty() {
            return Err(ConfigError::MissingField(STATE_DIR.hint()));
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::MissingField(LOG_FILTER.hint()));
        }
        if self.provider_concurrency == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be at least 1",
                PROVIDER_CONCURRENCY.hint()
            )));
        }
        if self.containers_per_node == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be at least 1",
                CONTAINERS_PER_NODE.hint()
            )));
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
    /// Indicates a configuration value is out of range.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
