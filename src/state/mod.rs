//! Environment lifecycle state reconciled from Terraform and the provider.

use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::process::CommandRunner;
use crate::provider::{InstanceRef, Provider};
use crate::ssh::SshSettings;
use crate::terraform::{Terraform, TerraformError};

/// Lifecycle state of the managed instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnvironmentState {
    /// Nothing is provisioned.
    Absent,
    /// The provider is still creating or transitioning the instance.
    Provisioning,
    /// The instance is powered on.
    Running,
    /// The instance exists but is powered off.
    Stopped,
    /// Terraform state exists but the instance is gone.
    Destroyed,
}

impl EnvironmentState {
    /// Lowercase name used in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details surfaced for an existing instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StateDetails {
    /// Provider instance id as recorded by Terraform.
    pub instance_id: String,
    /// Zone or region, when known.
    pub zone: Option<String>,
    /// Current public IPv4 address (running only).
    pub ip: Option<String>,
    /// Ready-to-paste SSH command (running only).
    pub ssh_command: Option<String>,
    /// `DOCKER_HOST` value (running only).
    pub docker_host: Option<String>,
}

/// Result of [`detect`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvironmentStatus {
    /// Reconciled state.
    pub state: EnvironmentState,
    /// Details when an instance is known.
    pub details: Option<StateDetails>,
}

impl EnvironmentStatus {
    /// Status without details.
    #[must_use]
    pub const fn bare(state: EnvironmentState) -> Self {
        Self {
            state,
            details: None,
        }
    }

    /// Instance id when known.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        self.details.as_ref().map(|details| details.instance_id.as_str())
    }

    /// Public IP when running.
    #[must_use]
    pub fn ip(&self) -> Option<&str> {
        self.details.as_ref().and_then(|details| details.ip.as_deref())
    }
}

/// Errors raised by state detection and precondition checks.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum StateError {
    /// Raised when Terraform state cannot be inspected.
    #[error(transparent)]
    Terraform(#[from] TerraformError),
    /// Raised when an operation needs a running instance.
    #[error("Cannot {action}: environment is {state}. {hint}")]
    NotRunning {
        /// Operation that was refused.
        action: String,
        /// Observed state.
        state: EnvironmentState,
        /// Next step for the user.
        hint: &'static str,
    },
    /// Raised when the instance is running but has no public address.
    #[error("Cannot {action}: the running instance has no public IP")]
    NoAddress {
        /// Operation that was refused.
        action: String,
    },
}

/// Reconciles Terraform state with a live provider query.
///
/// # Errors
///
/// Returns [`StateError::Terraform`] when the state file cannot be probed.
/// Provider failures are reported as [`EnvironmentState::Destroyed`].
pub fn detect<R: CommandRunner>(
    terraform: &Terraform<R>,
    provider: &dyn Provider,
    ssh: &SshSettings,
) -> Result<EnvironmentStatus, StateError> {
    if !terraform.state_exists()? {
        return Ok(EnvironmentStatus::bare(EnvironmentState::Absent));
    }
    let Some(outputs) = terraform.output() else {
        debug!("terraform outputs unavailable");
        return Ok(EnvironmentStatus::bare(EnvironmentState::Absent));
    };
    let Some(instance_id) = outputs.instance_id() else {
        return Ok(EnvironmentStatus::bare(EnvironmentState::Absent));
    };

    let instance = InstanceRef::parse(&instance_id).with_default_zone(outputs.zone());
    let info = match provider.describe(&instance) {
        Ok(info) => info,
        Err(err) => {
            warn!(instance = %instance_id, error = %err, "instance lookup failed");
            return Ok(EnvironmentStatus::bare(EnvironmentState::Destroyed));
        }
    };

    let state = provider.map_status(&info.status);
    let base = StateDetails {
        instance_id,
        zone: instance.zone.clone(),
        ..StateDetails::default()
    };
    let details = match state {
        EnvironmentState::Running => {
            let ip = info.public_ip.or_else(|| outputs.public_ip());
            let key_path = outputs
                .ssh_key_path()
                .map_or_else(|| ssh.key_path.clone(), |path| crate::config::expand_home(&path));
            StateDetails {
                ssh_command: ip
                    .as_deref()
                    .map(|addr| format!("ssh -i {key_path} {}@{addr}", ssh.user)),
                docker_host: ip.as_deref().map(|addr| ssh.docker_host(addr)),
                ip,
                ..base
            }
        }
        EnvironmentState::Stopped | EnvironmentState::Provisioning => base,
        EnvironmentState::Absent | EnvironmentState::Destroyed => {
            return Ok(EnvironmentStatus::bare(state));
        }
    };
    Ok(EnvironmentStatus {
        state,
        details: Some(details),
    })
}

/// Renders the `dock status` report.
#[must_use]
pub fn format_state(status: &EnvironmentStatus) -> String {
    let id = status.instance_id().unwrap_or("unknown");
    match status.state {
        EnvironmentState::Absent => {
            String::from("No environment exists. Run 'dock create' to create one.")
        }
        EnvironmentState::Provisioning => {
            format!("Environment is provisioning (instance ID: {id})")
        }
        EnvironmentState::Stopped => format!(
            "Environment is stopped (instance ID: {id}). Run 'dock start' to power on."
        ),
        EnvironmentState::Destroyed => String::from(
            "Environment was destroyed externally. Run 'dock destroy' to clean up state, then 'dock create' to recreate.",
        ),
        EnvironmentState::Running => {
            let details = status.details.clone().unwrap_or_default();
            let mut lines = vec![
                String::from("Environment is running"),
                format!("  IP: {}", details.ip.as_deref().unwrap_or("unknown")),
            ];
            if let Some(zone) = &details.zone {
                lines.push(format!("  Zone: {zone}"));
            }
            if let Some(ssh) = &details.ssh_command {
                lines.push(format!("  SSH: {ssh}"));
            }
            if let Some(host) = &details.docker_host {
                lines.push(format!("  Docker: export DOCKER_HOST={host}"));
            }
            lines.join("\n")
        }
    }
}

/// Returns the public IP or a "Cannot X" error naming the next step.
///
/// # Errors
///
/// Returns [`StateError::NotRunning`] unless the instance is running, and
/// [`StateError::NoAddress`] when it has no public IP.
pub fn require_running(status: &EnvironmentStatus, action: &str) -> Result<String, StateError> {
    if status.state != EnvironmentState::Running {
        let hint = match status.state {
            EnvironmentState::Stopped => "Run 'dock start' first.",
            _ => "Run 'dock create' first.",
        };
        return Err(StateError::NotRunning {
            action: action.to_owned(),
            state: status.state,
            hint,
        });
    }
    status
        .ip()
        .map(str::to_owned)
        .ok_or_else(|| StateError::NoAddress {
            action: action.to_owned(),
        })
}
