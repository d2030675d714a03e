//! Cloud provider adapters driven through their CLIs.
//!
//! [`Provider`] is the seam the lifecycle commands use to query and power
//! the instance. Terraform owns creation and destruction; providers only
//! describe, power on, and shut down what Terraform created.

use thiserror::Error;

use crate::config::{ConfigError, DockConfig, ProviderKind};
use crate::process::ProcessError;
use crate::state::EnvironmentState;
use crate::terraform::TerraformVars;

pub mod digitalocean;
pub mod scaleway;

pub use digitalocean::DigitalOceanProvider;
pub use scaleway::ScalewayProvider;

/// A provider instance id, optionally qualified by zone (`fr-par-1/uuid`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRef {
    /// Zone prefix, when present.
    pub zone: Option<String>,
    /// Bare instance identifier.
    pub id: String,
}

impl InstanceRef {
    /// Splits a zone-qualified id.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.split_once('/') {
            Some((zone, id)) if !zone.is_empty() && !id.is_empty() => Self {
                zone: Some(zone.to_owned()),
                id: id.to_owned(),
            },
            _ => Self {
                zone: None,
                id: trimmed.to_owned(),
            },
        }
    }

    /// Fills the zone from `fallback` when the id carried none.
    #[must_use]
    pub fn with_default_zone(self, fallback: Option<String>) -> Self {
        Self {
            zone: self.zone.or(fallback),
            id: self.id,
        }
    }
}

/// Live instance facts returned by [`Provider::describe`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceInfo {
    /// Raw provider status string.
    pub status: String,
    /// Public IPv4 address, if assigned.
    pub public_ip: Option<String>,
    /// Root volume id, where the provider exposes one.
    pub root_volume_id: Option<String>,
}

/// Errors raised by provider adapters.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when the CLI cannot be started or exits unsuccessfully.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when CLI JSON output cannot be interpreted.
    #[error("failed to parse {resource} output: {message}")]
    Parse {
        /// Resource being parsed.
        resource: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when a required field is absent from the response.
    #[error("{resource} response is missing {field}")]
    MissingField {
        /// Resource being inspected.
        resource: String,
        /// Missing field.
        field: &'static str,
    },
    /// Raised when credentials or settings are missing.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised for operations the provider does not offer.
    #[error("{operation} is not supported for {provider}")]
    Unsupported {
        /// Operation attempted.
        operation: &'static str,
        /// Active provider.
        provider: ProviderKind,
    },
}

impl ProviderError {
    pub(crate) fn parse(resource: &str, err: &serde_json::Error) -> Self {
        Self::Parse {
            resource: resource.to_owned(),
            message: err.to_string(),
        }
    }
}

/// Operations every cloud adapter offers.
pub trait Provider {
    /// Fetches the live status and address of `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the CLI fails or the output is invalid.
    fn describe(&self, instance: &InstanceRef) -> Result<InstanceInfo, ProviderError>;

    /// Powers the instance on and waits for completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the CLI fails.
    fn power_on(&self, instance: &InstanceRef) -> Result<(), ProviderError>;

    /// Shuts the instance down, forcing power-off when graceful shutdown
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when both attempts fail.
    fn shutdown(&self, instance: &InstanceRef) -> Result<(), ProviderError>;

    /// Maps a raw status string to the lifecycle state.
    fn map_status(&self, status: &str) -> EnvironmentState;

    /// Builds Terraform variables for apply and destroy.
    fn terraform_vars(&self, dock: &DockConfig) -> TerraformVars;

    /// Instance size label recorded in analytics and snapshots.
    fn instance_type(&self) -> &str;

    /// Configured image label; empty means auto-selected.
    fn instance_image(&self) -> &str;

    /// Configured zone or region.
    fn zone(&self) -> &str;
}

/// Terraform variables shared by every provider.
pub(crate) fn common_vars(vars: &mut TerraformVars, dock: &DockConfig) {
    vars.push("ssh_public_key_path", dock.public_key_path());
    vars.push("ssh_private_key_path", dock.private_key_path());
    vars.push("kubernetes_engine", dock.kubernetes_engine.clone());
    vars.push("use_reserved_ip", dock.use_reserved_ip.to_string());
    vars.push("ssh_max_startups", dock.ssh_max_startups.clone());
    vars.push("ssh_max_sessions", dock.ssh_max_sessions.to_string());
}

#[cfg(test)]
mod tests;
