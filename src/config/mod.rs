//! Configuration loading via `ortho-config`.
//!
//! Three structs are layered independently: cloud credentials for each
//! provider and the provider-neutral [`DockConfig`]. Each merges defaults,
//! `dock.toml`, and environment variables (including values loaded from the
//! dock home `.env` file by [`load_env_file`]).

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

pub mod env_file;

/// Default `forward_ports` list.
pub const DEFAULT_FORWARD_PORTS: &str = "8080,3000,5432,6379,27017";

/// Scaleway credentials and instance settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCW",
    discovery(
        app_name = "dock",
        env_var = "DOCK_CONFIG_PATH",
        config_file_name = "dock.toml",
        dotfile_name = ".dock.toml",
        project_file_name = "dock.toml"
    )
)]
pub struct ScalewayConfig {
    /// API access key.
    pub access_key: Option<String>,
    /// API secret key.
    pub secret_key: Option<String>,
    /// Project that owns the instance.
    pub project_id: Option<String>,
    /// Organisation identifier; the project id is used when unset.
    pub organization_id: Option<String>,
    /// Region used by the Terraform provider.
    #[ortho_config(default = "fr-par".to_owned())]
    pub region: String,
    /// Availability zone for the instance.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub zone: String,
    /// Commercial instance type.
    #[ortho_config(default = "DEV1-M".to_owned())]
    pub instance_type: String,
    /// Image label; empty selects one from the instance type.
    #[ortho_config(default = String::new())]
    pub instance_image: String,
    /// Instance name.
    #[ortho_config(default = "dock-env".to_owned())]
    pub instance_name: String,
}

/// DigitalOcean credentials and droplet settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DO",
    discovery(
        app_name = "dock",
        env_var = "DOCK_CONFIG_PATH",
        config_file_name = "dock.toml",
        dotfile_name = ".dock.toml",
        project_file_name = "dock.toml"
    )
)]
pub struct DigitalOceanConfig {
    /// API token.
    pub token: Option<String>,
    /// Droplet region.
    #[ortho_config(default = "nyc1".to_owned())]
    pub region: String,
    /// Droplet size slug.
    #[ortho_config(default = "s-2vcpu-4gb".to_owned())]
    pub droplet_size: String,
    /// Droplet name.
    #[ortho_config(default = "dock-env".to_owned())]
    pub droplet_name: String,
}

/// Provider-neutral settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DOCK",
    discovery(
        app_name = "dock",
        env_var = "DOCK_CONFIG_PATH",
        config_file_name = "dock.toml",
        dotfile_name = ".dock.toml",
        project_file_name = "dock.toml"
    )
)]
pub struct DockConfig {
    /// Cloud provider: `scaleway` or `digitalocean`.
    #[ortho_config(default = "scaleway".to_owned())]
    pub provider: String,
    /// Public key uploaded to the provider. Supports `~/`.
    #[ortho_config(default = "~/.ssh/id_ed25519.pub".to_owned())]
    pub ssh_public_key_path: String,
    /// Private key used for every SSH connection. Supports `~/`.
    #[ortho_config(default = "~/.ssh/id_ed25519".to_owned())]
    pub ssh_private_key_path: String,
    /// Remote login user.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Kubernetes distribution installed by cloud-init: `k3s` or `kind`.
    #[ortho_config(default = "k3s".to_owned())]
    pub kubernetes_engine: String,
    /// Whether Terraform reserves a flexible IP.
    #[ortho_config(default = false)]
    pub use_reserved_ip: bool,
    /// Comma separated ports forwarded by `dock portforward`.
    #[ortho_config(default = DEFAULT_FORWARD_PORTS.to_owned())]
    pub forward_ports: String,
    /// sshd `MaxStartups` value.
    #[ortho_config(default = "100:30:200".to_owned())]
    pub ssh_max_startups: String,
    /// sshd `MaxSessions` value.
    #[ortho_config(default = 100)]
    pub ssh_max_sessions: u32,
    /// `true`/`1` enables auto-pilot; anything else disables it.
    #[ortho_config(default = "true".to_owned())]
    pub auto_pilot: String,
    /// Path to the `scw` executable.
    #[ortho_config(default = "scw".to_owned())]
    pub scw_bin: String,
    /// Path to the `doctl` executable.
    #[ortho_config(default = "doctl".to_owned())]
    pub doctl_bin: String,
    /// Path to the `terraform` executable.
    #[ortho_config(default = "terraform".to_owned())]
    pub terraform_bin: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
}

/// Supported cloud providers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderKind {
    /// Scaleway instances driven by `scw`.
    Scaleway,
    /// DigitalOcean droplets driven by `doctl`.
    DigitalOcean,
}

impl ProviderKind {
    /// Stable lowercase name, also used as the Terraform directory name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scaleway => "scaleway",
            Self::DigitalOcean => "digitalocean",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scaleway" | "scw" => Ok(Self::Scaleway),
            "digitalocean" | "do" => Ok(Self::DigitalOcean),
            other => Err(ConfigError::Invalid(format!(
                "unsupported provider '{other}': set DOCK_PROVIDER to scaleway or digitalocean"
            ))),
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn require<'a>(&self, value: Option<&'a str>) -> Result<&'a str, ConfigError> {
        match value.map(str::trim) {
            Some(trimmed) if !trimmed.is_empty() => Ok(trimmed),
            _ => Err(ConfigError::MissingField(format!(
                "missing {}: set {} (or run 'dock env --set {}=...') or add {} to [{}] in dock.toml",
                self.description, self.env_var, self.env_var, self.toml_key, self.section
            ))),
        }
    }
}

/// Validated Scaleway credentials ready to hand to `scw` and Terraform.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScalewayCredentials {
    /// API access key.
    pub access_key: String,
    /// API secret key.
    pub secret_key: String,
    /// Project id.
    pub project_id: String,
    /// Organisation id, defaulting to the project id.
    pub organization_id: String,
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("dock")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that the credentials needed by `scw` and Terraform are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first missing value.
    pub fn credentials(&self) -> Result<ScalewayCredentials, ConfigError> {
        let access_key = FieldMetadata::new(
            "Scaleway access key",
            "SCW_ACCESS_KEY",
            "access_key",
            "scaleway",
        )
        .require(self.access_key.as_deref())?;
        let secret_key = FieldMetadata::new(
            "Scaleway secret key",
            "SCW_SECRET_KEY",
            "secret_key",
            "scaleway",
        )
        .require(self.secret_key.as_deref())?;
        let project_id = FieldMetadata::new(
            "Scaleway project ID",
            "SCW_PROJECT_ID",
            "project_id",
            "scaleway",
        )
        .require(self.project_id.as_deref())?;
        let organization_id = self
            .organization_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(project_id);

        Ok(ScalewayCredentials {
            access_key: access_key.to_owned(),
            secret_key: secret_key.to_owned(),
            project_id: project_id.to_owned(),
            organization_id: organization_id.to_owned(),
        })
    }
}

impl DigitalOceanConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("dock")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the API token.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the token is unset.
    pub fn require_token(&self) -> Result<String, ConfigError> {
        FieldMetadata::new(
            "DigitalOcean API token",
            "DO_TOKEN",
            "token",
            "digitalocean",
        )
        .require(self.token.as_deref())
        .map(str::to_owned)
    }
}

impl DockConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("dock")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Parses the configured provider.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unknown provider names.
    pub fn provider_kind(&self) -> Result<ProviderKind, ConfigError> {
        self.provider.parse()
    }

    /// Validates enumerated and free-form values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider_kind()?;
        if !matches!(self.kubernetes_engine.as_str(), "k3s" | "kind") {
            return Err(ConfigError::Invalid(format!(
                "kubernetes engine must be 'k3s' or 'kind', got '{}' (DOCK_KUBERNETES_ENGINE)",
                self.kubernetes_engine
            )));
        }
        if self.ssh_user.trim().is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "ssh user must not be empty (DOCK_SSH_USER)",
            )));
        }
        Ok(())
    }

    /// Parses `forward_ports`, dropping zero and unparsable entries.
    #[must_use]
    pub fn forward_ports(&self) -> Vec<u16> {
        parse_port_list(&self.forward_ports)
    }

    /// Whether auto-pilot runs after create/start.
    #[must_use]
    pub fn auto_pilot_enabled(&self) -> bool {
        let value = self.auto_pilot.trim();
        value.eq_ignore_ascii_case("true") || value == "1"
    }

    /// Private key path with `~/` expanded.
    #[must_use]
    pub fn private_key_path(&self) -> String {
        expand_home(&self.ssh_private_key_path)
    }

    /// Public key path with `~/` expanded.
    #[must_use]
    pub fn public_key_path(&self) -> String {
        expand_home(&self.ssh_public_key_path)
    }
}

/// Parses a comma separated port list.
#[must_use]
pub fn parse_port_list(raw: &str) -> Vec<u16> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.parse::<u16>() {
            Ok(0) | Err(_) => {
                warn!(value = part, "ignoring invalid forward port");
                None
            }
            Ok(port) => Some(port),
        })
        .collect()
}

/// Expands a leading `~/` using the user's home directory.
#[must_use]
pub fn expand_home(path: &str) -> String {
    let Some(rest) = path.strip_prefix("~/") else {
        return path.to_owned();
    };
    dirs::home_dir()
        .and_then(|home| Utf8PathBuf::from_path_buf(home).ok())
        .map_or_else(|| path.to_owned(), |home| home.join(rest).into_string())
}

/// Loads `path` into the process environment without overriding variables
/// that are already set. Returns `false` when the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::EnvFile`] when the file exists but is malformed.
pub fn load_env_file(path: &Utf8Path) -> Result<bool, ConfigError> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            debug!(path = %path, "loaded environment file");
            Ok(true)
        }
        Err(err) if err.not_found() => Ok(false),
        Err(err) => Err(ConfigError::EnvFile {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when the dotenv file cannot be parsed.
    #[error("failed to load {path}: {message}")]
    EnvFile {
        /// Path of the dotenv file.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests;
