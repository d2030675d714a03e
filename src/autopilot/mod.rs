//! Auto-pilot: connection setup after `create`/`start` and teardown
//! before `stop`/`destroy`.
//!
//! Auto-pilot records an `up`/`down` flag in `~/.dock/state`, renders
//! `~/.dock/dock.init` (sourced from the user's shell rc), writes the SSH
//! config block, starts the ControlMaster, and starts the background port
//! forward. Connection failures during setup are logged and never abort
//! the lifecycle command that triggered them.

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::files::{self, FsError};
use crate::process::CommandRunner;
use crate::shell::ShellKind;
use crate::ssh_config::{ControlMaster, MasterStatus, SshConfigError};
use crate::state::{EnvironmentState, EnvironmentStatus};
use crate::tunnel::{Tunnel, TunnelError, TunnelStart};

/// Comment preceding the rc-file integration.
pub const INTEGRATION_MARKER: &str = "# dock auto-pilot integration";

const REFRESH_PAUSE: Duration = Duration::from_millis(500);

/// Auto-pilot flag persisted in the state file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DockState {
    /// Connections should be active.
    Up,
    /// Connections were torn down.
    Down,
    /// No environment.
    Absent,
}

impl DockState {
    /// File representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Absent => "absent",
        }
    }

    /// Parses file contents; anything unrecognised is `Absent`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "up" => Self::Up,
            "down" => Self::Down,
            _ => Self::Absent,
        }
    }
}

impl fmt::Display for DockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by auto-pilot bookkeeping.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum AutoPilotError {
    /// Raised when state or script files cannot be written.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Raised when the SSH config cannot be inspected.
    #[error(transparent)]
    SshConfig(#[from] SshConfigError),
    /// Raised when a tunnel record cannot be inspected.
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

/// Renders `dock.init`.
#[must_use]
pub fn render_init_script(state_file: &Utf8Path, kubeconfig: &Utf8Path) -> String {
    format!(
        r#"#!/bin/bash
# Dock auto-pilot initialization script
# Generated automatically - do not edit manually

# Only configure if dock environment is up
if [ -f "{state_file}" ] && [ "$(cat {state_file})" = "up" ]; then
  # Set up SSH multiplexing (if not already configured)
  if ! grep -q "Host dock" ~/.ssh/config 2>/dev/null; then
    dock ssh-config >/dev/null 2>&1
  fi

  # Docker over the multiplexed SSH connection
  export DOCKER_HOST=ssh://dock

  export KUBECONFIG="{kubeconfig}"
fi
"#
    )
}

/// The line(s) that source `dock.init` from a shell rc.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShellIntegration {
    shell: ShellKind,
    rc_file: Utf8PathBuf,
}

impl ShellIntegration {
    /// Integration for `shell` written to `rc_file`.
    pub fn new(shell: ShellKind, rc_file: impl Into<Utf8PathBuf>) -> Self {
        Self {
            shell,
            rc_file: rc_file.into(),
        }
    }

    /// Integration for the current `$SHELL` under `home`.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when rc candidates cannot be probed.
    pub fn detect(home: &Utf8Path) -> Result<Self, FsError> {
        let shell = ShellKind::detect();
        Ok(Self::new(shell, shell.rc_file(home)?))
    }

    /// rc file receiving the integration.
    #[must_use]
    pub fn rc_file(&self) -> &Utf8Path {
        &self.rc_file
    }

    /// Text appended to the rc file.
    #[must_use]
    pub fn snippet(&self) -> String {
        match self.shell {
            ShellKind::Fish => format!(
                "\n{INTEGRATION_MARKER}\nif test -f ~/.dock/dock.init\n  source ~/.dock/dock.init\nend\n"
            ),
            ShellKind::Bash | ShellKind::Zsh => format!(
                "\n{INTEGRATION_MARKER}\n[ -f ~/.dock/dock.init ] && source ~/.dock/dock.init\n"
            ),
        }
    }

    /// Whether the rc file already mentions the integration.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the rc file cannot be read.
    pub fn is_installed(&self) -> Result<bool, FsError> {
        Ok(files::read_optional(&self.rc_file)?
            .is_some_and(|content| {
                content.contains(INTEGRATION_MARKER) || content.contains("dock.init")
            }))
    }

    /// Appends the snippet once; returns `false` when already present.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the rc file cannot be written.
    pub fn install(&self) -> Result<bool, FsError> {
        if self.is_installed()? {
            return Ok(false);
        }
        files::append(&self.rc_file, &self.snippet())?;
        info!(rc = %self.rc_file, "installed auto-pilot shell integration");
        Ok(true)
    }

    /// Removes the integration; returns `false` when none was found.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the rc file cannot be rewritten.
    pub fn remove(&self) -> Result<bool, FsError> {
        let Some(content) = files::read_optional(&self.rc_file)? else {
            return Ok(false);
        };
        let snippet = self.snippet();
        let updated = if content.contains(&snippet) {
            content.replace(&snippet, "")
        } else if self.shell == ShellKind::Fish {
            return Ok(false);
        } else {
            let kept: Vec<&str> = content
                .lines()
                .filter(|line| !line.contains(INTEGRATION_MARKER) && !line.contains("dock.init"))
                .collect();
            format!("{}\n", kept.join("\n"))
        };
        if updated == content {
            return Ok(false);
        }
        files::write(&self.rc_file, updated)?;
        Ok(true)
    }
}

/// Files owned by auto-pilot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AutoPilotPaths {
    /// `~/.dock/state`.
    pub state_file: Utf8PathBuf,
    /// `~/.dock/dock.init`.
    pub init_script: Utf8PathBuf,
    /// Local kubeconfig exported by `dock.init`.
    pub kubeconfig: Utf8PathBuf,
}

/// Connection managers driven by auto-pilot.
#[derive(Clone, Debug)]
pub struct Connections<R> {
    /// SSH config block and master connection.
    pub master: ControlMaster<R>,
    /// Background port forward.
    pub port_forward: Tunnel<R>,
    /// Docker socket tunnel.
    pub docker_tunnel: Tunnel<R>,
    /// Ports forwarded by default.
    pub forward_ports: Vec<u16>,
}

/// Coordinates auto-pilot setup and teardown.
#[derive(Clone, Debug)]
pub struct AutoPilot<R> {
    enabled: bool,
    paths: AutoPilotPaths,
    integration: ShellIntegration,
    connections: Connections<R>,
}

impl<R: CommandRunner> AutoPilot<R> {
    /// Creates the coordinator; `enabled` gates [`Self::setup`] and
    /// [`Self::cleanup`].
    pub const fn new(
        enabled: bool,
        paths: AutoPilotPaths,
        integration: ShellIntegration,
        connections: Connections<R>,
    ) -> Self {
        Self {
            enabled,
            paths,
            integration,
            connections,
        }
    }

    /// Shell integration handle.
    #[must_use]
    pub const fn integration(&self) -> &ShellIntegration {
        &self.integration
    }

    /// Reads the persisted flag; missing means `Absent`.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the state file cannot be read.
    pub fn state(&self) -> Result<DockState, FsError> {
        Ok(files::read_optional(&self.paths.state_file)?
            .map_or(DockState::Absent, |raw| DockState::parse(&raw)))
    }

    /// Persists `state`.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the state file cannot be written.
    pub fn set_state(&self, state: DockState) -> Result<(), FsError> {
        files::write(&self.paths.state_file, state.as_str())
    }

    /// Writes `dock.init` with mode 0755.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the script cannot be written.
    pub fn write_init(&self) -> Result<(), FsError> {
        let script = render_init_script(&self.paths.state_file, &self.paths.kubeconfig);
        files::write(&self.paths.init_script, script)?;
        files::set_mode(&self.paths.init_script, 0o755)
    }

    /// Deletes `dock.init`.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the script exists but cannot be removed.
    pub fn remove_init(&self) -> Result<bool, FsError> {
        files::remove_file(&self.paths.init_script)
    }

    /// Post-`create`/`start` setup; a no-op when disabled.
    ///
    /// # Errors
    ///
    /// Returns [`AutoPilotError`] when auto-pilot files cannot be written.
    pub async fn setup(&self, ip: &str) -> Result<Vec<String>, AutoPilotError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.connect(ip).await
    }

    async fn connect(&self, ip: &str) -> Result<Vec<String>, AutoPilotError> {
        let mut lines = Vec::new();
        self.set_state(DockState::Up)?;
        self.write_init()?;
        if self.integration.install()? {
            lines.push(format!(
                "Added auto-pilot integration to {}",
                self.integration.rc_file()
            ));
        }

        lines.push(String::from("Setting up SSH multiplexing..."));
        if let Err(err) = self.connections.master.start_master(ip) {
            warn!(error = %err, "SSH multiplexing setup failed");
            lines.push(format!("  SSH multiplexing unavailable: {err}"));
        }

        if !self.connections.forward_ports.is_empty() {
            lines.push(String::from("Starting port forwarding..."));
            match self
                .connections
                .port_forward
                .start_background(ip, &self.connections.forward_ports)
                .await
            {
                Ok(TunnelStart::Started(record)) => {
                    debug!(pid = record.pid, "port forward started");
                }
                Ok(TunnelStart::AlreadyRunning(record)) => {
                    debug!(pid = record.pid, "port forward already running");
                }
                Err(err) => {
                    warn!(error = %err, "port forwarding failed");
                    lines.push(format!("  Port forwarding unavailable: {err}"));
                }
            }
        }

        lines.extend([
            String::new(),
            String::from("Auto-pilot configured:"),
            String::from("  DOCKER_HOST=ssh://dock"),
            format!("  KUBECONFIG={}", self.paths.kubeconfig),
            String::new(),
            String::from("To apply in current shell, run:"),
            String::from("  source ~/.dock/dock.init"),
        ]);
        Ok(lines)
    }

    /// Pre-`stop`/`destroy` teardown; a no-op when disabled.
    ///
    /// # Errors
    ///
    /// Returns [`AutoPilotError`] when the state file cannot be written.
    pub fn cleanup(&self) -> Result<Vec<String>, AutoPilotError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.disconnect()?;
        Ok(vec![String::from("Cleaning up auto-pilot...")])
    }

    fn disconnect(&self) -> Result<(), AutoPilotError> {
        match self.connections.port_forward.stop() {
            Ok(stopped) => debug!(stopped, "port forward stopped"),
            Err(err) => warn!(error = %err, "could not stop port forwarding"),
        }
        if let Err(err) = self.connections.master.stop_master() {
            warn!(error = %err, "could not stop SSH master");
        }
        self.set_state(DockState::Down)?;
        Ok(())
    }

    /// Tears connections down and sets them up again against `ip`,
    /// whether or not auto-pilot is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`AutoPilotError`] when auto-pilot files cannot be written.
    pub async fn refresh(&self, ip: &str) -> Result<Vec<String>, AutoPilotError> {
        let mut lines = vec![String::from("Refreshing connections...")];
        self.disconnect()?;
        sleep(REFRESH_PAUSE).await;
        lines.extend(self.connect(ip).await?);
        lines.push(String::from("Connections refreshed."));
        Ok(lines)
    }

    /// Stops every connection, including the Docker tunnel, leaving
    /// `dock.init` in place.
    ///
    /// # Errors
    ///
    /// Returns [`AutoPilotError`] when the state file cannot be written.
    pub fn clean(&self) -> Result<Vec<String>, AutoPilotError> {
        self.disconnect()?;
        match self.connections.docker_tunnel.stop() {
            Ok(stopped) => debug!(stopped, "docker tunnel stopped"),
            Err(err) => warn!(error = %err, "could not stop docker tunnel"),
        }
        Ok(vec![
            String::from("Cleaning all connections..."),
            String::from("All connections cleaned."),
            String::from("Environment is still available. Run 'dock connection --refresh' to reconnect."),
        ])
    }

    /// Renders `dock connection --status`.
    ///
    /// # Errors
    ///
    /// Returns [`AutoPilotError`] when records or sockets cannot be read.
    pub fn connection_status(
        &self,
        infra: &EnvironmentStatus,
    ) -> Result<Vec<String>, AutoPilotError> {
        let mut lines = vec![
            String::from("Connection Status"),
            String::from("================="),
            format!("Infrastructure: {}", infra.state),
            format!("Auto-pilot state: {}", self.state()?),
        ];
        if infra.state == EnvironmentState::Running {
            if let Some(ip) = infra.ip() {
                lines.push(format!("Remote IP: {ip}"));
            }
        }
        lines.push(String::new());

        let master = match self.connections.master.check_master()? {
            MasterStatus::Active(_) => "active",
            MasterStatus::Stale | MasterStatus::NotRunning => "not active",
        };
        lines.push(format!("SSH master: {master}"));
        lines.push(format!(
            "Port forwarding: {}",
            active_label(self.connections.port_forward.status()?.is_some())
        ));
        lines.push(format!(
            "Docker tunnel: {}",
            active_label(self.connections.docker_tunnel.status()?.is_some())
        ));
        lines.extend([
            String::new(),
            String::from("Commands:"),
            String::from("  dock connection --refresh  # Restart all connections"),
            String::from("  dock connection --clean    # Stop all connections"),
        ]);
        Ok(lines)
    }
}

const fn active_label(active: bool) -> &'static str {
    if active { "active" } else { "not active" }
}
