//! Configuration loading via `ortho-config`.
//!
//! Two structures are layered from defaults, `flotilla.toml`, and `FLOTILLA_*`
//! environment variables: [`ClientConfig`] for local behaviour and
//! [`AccountConfig`] for the backend account to operate on.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::account::{Account, CloudType};
use crate::error::ClusterError;

/// Directory created under the user's home when no override is configured.
pub const DEFAULT_HOME_DIR: &str = ".flotilla";

/// Default upper bound on a wait loop, in seconds.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 600;

/// Client behaviour settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FLOTILLA",
    discovery(
        app_name = "flotilla",
        env_var = "FLOTILLA_CONFIG_PATH",
        config_file_name = "flotilla.toml",
        dotfile_name = ".flotilla.toml",
        project_file_name = "flotilla.toml"
    )
)]
pub struct ClientConfig {
    /// Directory holding the account cache and credential bundles. Defaults
    /// to `~/.flotilla`.
    pub home: Option<String>,
    /// Whether derived account state is persisted between invocations.
    #[ortho_config(default = true)]
    pub cache: bool,
    /// Maximum time a wait loop may run before giving up.
    #[ortho_config(default = DEFAULT_WAIT_TIMEOUT_SECS)]
    pub wait_timeout_secs: u64,
    /// Delay between polls; the backend default applies when unset.
    pub poll_interval_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            home: None,
            cache: true,
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
            poll_interval_secs: None,
        }
    }
}

impl ClientConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("flotilla")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that the timing values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a duration is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wait_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "wait_timeout_secs must be greater than zero (FLOTILLA_WAIT_TIMEOUT_SECS)",
            )));
        }
        if self.poll_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(String::from(
                "poll_interval_secs must be greater than zero (FLOTILLA_POLL_INTERVAL_SECS)",
            )));
        }
        Ok(())
    }

    /// Resolves the home directory: the configured value, or `.flotilla`
    /// under the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when no home directory can be
    /// determined or it is not valid UTF-8.
    pub fn home_dir(&self) -> Result<Utf8PathBuf, ConfigError> {
        if let Some(home) = self.home.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            return Ok(Utf8PathBuf::from(home));
        }
        let user_home = dirs::home_dir().ok_or_else(|| {
            ConfigError::Invalid(String::from(
                "unable to determine the user's home directory; set FLOTILLA_HOME",
            ))
        })?;
        let user_home = Utf8PathBuf::from_path_buf(user_home).map_err(|path| {
            ConfigError::Invalid(format!(
                "home directory {} is not valid UTF-8; set FLOTILLA_HOME",
                path.display()
            ))
        })?;
        Ok(user_home.join(DEFAULT_HOME_DIR))
    }

    /// Wait loop timeout.
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Poll interval override, if configured.
    #[must_use]
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_secs.map(Duration::from_secs)
    }
}

/// Account settings for the backend to operate on.
#[derive(Clone, Debug, Default, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FLOTILLA_ACCOUNT",
    discovery(
        app_name = "flotilla",
        env_var = "FLOTILLA_CONFIG_PATH",
        config_file_name = "flotilla.toml",
        dotfile_name = ".flotilla.toml",
        project_file_name = "flotilla.toml"
    )
)]
pub struct AccountConfig {
    /// Backend family: `make-coe`, `make-swarm`, or `magnum`.
    #[ortho_config(default = CloudType::MakeCoe.tag().to_owned())]
    pub cloud: String,
    /// User name used to authenticate.
    pub username: Option<String>,
    /// API key for the make-coe and make-swarm backends.
    pub api_key: Option<String>,
    /// Password for Magnum.
    pub password: Option<String>,
    /// API endpoint override.
    pub endpoint: Option<String>,
    /// Identity endpoint (Keystone for Magnum).
    pub auth_endpoint: Option<String>,
    /// Project scope for Magnum.
    pub project: Option<String>,
    /// Identity domain for Magnum; defaults to `Default`.
    pub domain: Option<String>,
    /// Region used to pick the catalog endpoint.
    pub region: Option<String>,
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
}

impl AccountConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("flotilla")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    fn require_field<'a>(
        value: Option<&'a str>,
        metadata: &FieldMetadata,
    ) -> Result<&'a str, ConfigError> {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ConfigError::MissingField(format!(
                    "missing {}: set {} or add {} to flotilla.toml",
                    metadata.description, metadata.env_var, metadata.toml_key
                ))
            })
    }

    /// Parses the configured cloud type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown cloud type.
    pub fn cloud_type(&self) -> Result<CloudType, ConfigError> {
        self.cloud
            .parse()
            .map_err(|err: ClusterError| ConfigError::Invalid(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a field required by the cloud
    /// type is empty, or [`ConfigError::Invalid`] for an unknown cloud type.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cloud = self.cloud_type()?;
        Self::require_field(
            self.username.as_deref(),
            &FieldMetadata::new("account user name", "FLOTILLA_ACCOUNT_USERNAME", "username"),
        )?;
        self.secret(cloud)?;
        if cloud == CloudType::Magnum {
            Self::require_field(
                self.auth_endpoint.as_deref(),
                &FieldMetadata::new(
                    "Keystone endpoint",
                    "FLOTILLA_ACCOUNT_AUTH_ENDPOINT",
                    "auth_endpoint",
                ),
            )?;
            Self::require_field(
                self.project.as_deref(),
                &FieldMetadata::new("Magnum project", "FLOTILLA_ACCOUNT_PROJECT", "project"),
            )?;
        }
        Ok(())
    }

    fn secret(&self, cloud: CloudType) -> Result<&str, ConfigError> {
        match cloud {
            CloudType::Magnum => Self::require_field(
                self.password.as_deref().or(self.api_key.as_deref()),
                &FieldMetadata::new("Magnum password", "FLOTILLA_ACCOUNT_PASSWORD", "password"),
            ),
            CloudType::MakeCoe | CloudType::MakeSwarm => Self::require_field(
                self.api_key.as_deref().or(self.password.as_deref()),
                &FieldMetadata::new("account API key", "FLOTILLA_ACCOUNT_API_KEY", "api_key"),
            ),
        }
    }

    /// Validates the settings and builds the account they describe.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn to_account(&self) -> Result<Account, ConfigError> {
        self.validate()?;
        let cloud = self.cloud_type()?;
        Account::builder(cloud)
            .username(self.username.clone().unwrap_or_default())
            .secret(self.secret(cloud)?)
            .endpoint(self.endpoint.clone())
            .auth_endpoint(self.auth_endpoint.clone())
            .project(self.project.clone())
            .domain(self.domain.clone())
            .region(self.region.clone())
            .build()
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
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

impl From<ConfigError> for ClusterError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
