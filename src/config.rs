//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::nas::LoginPolicy;
use crate::provision::ProvisionerSettings;

/// Descriptor directory used when none is configured.
pub const DEFAULT_CONFIG_DIR: &str = "/var/lib/qnap-csi/attachments";

/// Plugin name reported when none is configured.
pub const DEFAULT_DRIVER_NAME: &str = "qnap.csi.storage";

const CONFIG_FILE: &str = "qnap-csi.toml";

/// Driver configuration derived from environment variables, configuration
/// files, and CLI flags.
///
/// Appliance fields are only needed by the controller role and `node_id`
/// only by the node role, so they are optional here and checked by
/// [`DriverConfig::validate_controller`] and
/// [`DriverConfig::validate_node`].
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "QNAP",
    discovery(
        app_name = "qnap-csi",
        env_var = "QNAP_CONFIG_PATH",
        config_file_name = "qnap-csi.toml",
        dotfile_name = ".qnap-csi.toml",
        project_file_name = "qnap-csi.toml"
    )
)]
pub struct DriverConfig {
    /// Base URL of the appliance management interface.
    pub url: Option<String>,
    /// Appliance account name.
    pub username: Option<String>,
    /// Appliance account password.
    pub password: Option<String>,
    /// iSCSI portal (`IP:PORT`) handed to nodes in the volume context.
    pub portal: Option<String>,
    /// Storage pool new LUNs are allocated from.
    #[ortho_config(default = 1)]
    pub storage_pool_id: u32,
    /// Identifier this node reports.
    pub node_id: Option<String>,
    /// Directory holding attachment descriptors.
    #[ortho_config(default = DEFAULT_CONFIG_DIR.to_owned())]
    pub config_dir: String,
    /// Plugin name reported by the identity service.
    #[ortho_config(default = DEFAULT_DRIVER_NAME.to_owned())]
    pub driver_name: String,
    /// Delay between LUN readiness polls, in milliseconds.
    #[ortho_config(default = 1000)]
    pub lun_poll_interval_ms: u64,
    /// Upper bound on LUN readiness polling, in seconds. Zero waits until
    /// the request is cancelled.
    #[ortho_config(default = 600)]
    pub lun_ready_timeout_secs: u64,
    /// Keep one appliance session across requests instead of logging in
    /// for each one.
    #[ortho_config(default = false)]
    pub reuse_session: bool,
    /// Default tracing filter; `RUST_LOG` takes precedence.
    #[ortho_config(default = "info".to_owned())]
    pub log_level: String,
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
            "missing {}: set {} or add {} to {CONFIG_FILE}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const URL: FieldMetadata = FieldMetadata::new("appliance URL", "QNAP_URL", "url");
const USERNAME: FieldMetadata =
    FieldMetadata::new("appliance user name", "QNAP_USERNAME", "username");
const PASSWORD: FieldMetadata =
    FieldMetadata::new("appliance password", "QNAP_PASSWORD", "password");
const PORTAL: FieldMetadata = FieldMetadata::new("iSCSI portal", "QNAP_PORTAL", "portal");
const NODE_ID: FieldMetadata = FieldMetadata::new("node identifier", "QNAP_NODE_ID", "node_id");
const CONFIG_DIR: FieldMetadata =
    FieldMetadata::new("descriptor directory", "QNAP_CONFIG_DIR", "config_dir");

/// Appliance credentials taken from a validated configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApplianceAccess<'a> {
    /// Base URL of the management interface.
    pub url: &'a str,
    /// Account name.
    pub username: &'a str,
    /// Account password.
    pub password: &'a str,
}

impl DriverConfig {
    fn require<'a>(value: Option<&'a str>, metadata: &FieldMetadata) -> Result<&'a str, ConfigError> {
        match value {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(metadata.missing()),
        }
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("qnap-csi")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks the fields the controller role needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the environment variable
    /// and file key of the first missing field, or
    /// [`ConfigError::Invalid`] for a zero polling interval.
    pub fn validate_controller(&self) -> Result<ApplianceAccess<'_>, ConfigError> {
        let url = Self::require(self.url.as_deref(), &URL)?;
        let username = Self::require(self.username.as_deref(), &USERNAME)?;
        let password = Self::require(self.password.as_deref(), &PASSWORD)?;
        Self::require(self.portal.as_deref(), &PORTAL)?;
        if self.lun_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(String::from(
                "lun_poll_interval_ms must be greater than zero (QNAP_LUN_POLL_INTERVAL_MS)",
            )));
        }
        Ok(ApplianceAccess {
            url,
            username,
            password,
        })
    }

    /// Checks the fields the node role needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the node id or descriptor
    /// directory is empty.
    pub fn validate_node(&self) -> Result<&str, ConfigError> {
        let node_id = Self::require(self.node_id.as_deref(), &NODE_ID)?;
        Self::require(Some(self.config_dir.as_str()), &CONFIG_DIR)?;
        Ok(node_id)
    }

    /// Builds provisioner settings from the controller fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when controller validation fails.
    pub fn provisioner_settings(&self) -> Result<ProvisionerSettings, ConfigError> {
        self.validate_controller()?;
        let portal = Self::require(self.portal.as_deref(), &PORTAL)?;
        let login_policy = if self.reuse_session {
            LoginPolicy::Reuse
        } else {
            LoginPolicy::EveryRequest
        };
        Ok(ProvisionerSettings::new(self.storage_pool_id, portal)
            .with_poll_interval(Duration::from_millis(self.lun_poll_interval_ms))
            .with_ready_timeout(self.ready_timeout())
            .with_login_policy(login_policy))
    }

    /// Readiness bound, or `None` when polling is bounded only by
    /// cancellation.
    #[must_use]
    pub const fn ready_timeout(&self) -> Option<Duration> {
        if self.lun_ready_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.lun_ready_timeout_secs))
        }
    }

    /// Descriptor directory as a path.
    #[must_use]
    pub fn descriptor_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.config_dir)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A field is present but unusable.
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
