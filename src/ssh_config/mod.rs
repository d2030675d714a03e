//! Managed `Host dock` block in `~/.ssh/config` and the ControlMaster
//! connection it enables.
//!
//! The block is delimited by marker comments so it can be replaced or
//! removed without touching the rest of the user's configuration. The
//! master connection's control socket lives under `~/.ssh/sockets`.

use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use crate::files::{self, FsError};
use crate::process::{CommandRunner, CommandSpec, ProcessError};
use crate::ssh::SshSettings;

/// Opening marker of the managed block.
pub const MARKER_START: &str = "# dock-managed-start";
/// Closing marker of the managed block.
pub const MARKER_END: &str = "# dock-managed-end";
/// Host alias written to the SSH config.
pub const HOST_ALIAS: &str = "dock";

const SOCKET_PREFIX: &str = "dock-";

static BLANK_RUNS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\n{3,}").ok());

/// Errors raised while managing the SSH config or master connection.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SshConfigError {
    /// Raised when files under `~/.ssh` cannot be accessed.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Raised when `ssh` cannot be started.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when the master connection fails to start.
    #[error("failed to start SSH master connection (ssh exited with {status})")]
    MasterFailed {
        /// Exit status text.
        status: String,
    },
}

/// Locations under `~/.ssh`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshConfigPaths {
    /// `~/.ssh`.
    pub ssh_dir: Utf8PathBuf,
    /// `~/.ssh/config`.
    pub config_file: Utf8PathBuf,
    /// `~/.ssh/sockets`.
    pub sockets_dir: Utf8PathBuf,
}

impl SshConfigPaths {
    /// Derives the paths from a home directory.
    #[must_use]
    pub fn for_home(home: &Utf8Path) -> Self {
        let ssh_dir = home.join(".ssh");
        Self {
            config_file: ssh_dir.join("config"),
            sockets_dir: ssh_dir.join("sockets"),
            ssh_dir,
        }
    }

    /// `ControlPath` template shared by the config block and `ssh -O`.
    #[must_use]
    pub fn control_path(&self) -> String {
        format!("{}/{SOCKET_PREFIX}%r@%h-%p", self.sockets_dir)
    }
}

/// Renders the managed block.
#[must_use]
pub fn render_block(ip: &str, user: &str, key_path: &str, control_path: &str) -> String {
    format!(
        "{MARKER_START}
# Dock remote development environment
Host {HOST_ALIAS}
  HostName {ip}
  User {user}
  IdentityFile {key_path}
  StrictHostKeyChecking accept-new
  ControlMaster auto
  ControlPath {control_path}
  ControlPersist 600
  ServerAliveInterval 30
  ServerAliveCountMax 3
{MARKER_END}
"
    )
}

/// Removes the managed block, collapsing runs of blank lines.
#[must_use]
pub fn strip_block(content: &str) -> String {
    let Some((before, rest)) = content.split_once(MARKER_START) else {
        return content.to_owned();
    };
    let Some((_, after)) = rest.split_once(MARKER_END) else {
        return content.to_owned();
    };
    let joined = format!("{before}{after}");
    BLANK_RUNS.as_ref().map_or_else(
        || joined.clone(),
        |pattern| pattern.replace_all(&joined, "\n\n").into_owned(),
    )
}

/// Returns the managed block including its markers.
#[must_use]
pub fn extract_block(content: &str) -> Option<String> {
    let (_, rest) = content.split_once(MARKER_START)?;
    let (inner, _) = rest.split_once(MARKER_END)?;
    Some(format!("{MARKER_START}{inner}{MARKER_END}"))
}

/// Outcome of probing the master connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MasterStatus {
    /// A live master answers on this socket.
    Active(Utf8PathBuf),
    /// A socket existed but the master was gone; it has been removed.
    Stale,
    /// No control socket exists.
    NotRunning,
}

/// Writes the SSH config block and drives the master connection.
#[derive(Clone, Debug)]
pub struct ControlMaster<R> {
    paths: SshConfigPaths,
    settings: SshSettings,
    runner: R,
}

impl<R: CommandRunner> ControlMaster<R> {
    /// Creates a manager for `paths`.
    pub const fn new(paths: SshConfigPaths, settings: SshSettings, runner: R) -> Self {
        Self {
            paths,
            settings,
            runner,
        }
    }

    /// Paths under `~/.ssh`.
    #[must_use]
    pub const fn paths(&self) -> &SshConfigPaths {
        &self.paths
    }

    /// Replaces the managed block with one pointing at `ip`.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::Fs`] when `~/.ssh` cannot be written.
    pub fn write_config(&self, ip: &str) -> Result<(), SshConfigError> {
        for dir in [&self.paths.ssh_dir, &self.paths.sockets_dir] {
            files::create_dir_all(dir)?;
            files::set_mode(dir, 0o700)?;
        }
        let existing = files::read_optional(&self.paths.config_file)?.unwrap_or_default();
        let kept = strip_block(&existing);
        let block = render_block(
            ip,
            &self.settings.user,
            &self.settings.key_path,
            &self.paths.control_path(),
        );
        let trimmed = kept.trim_end();
        let updated = if trimmed.is_empty() {
            block
        } else {
            format!("{trimmed}\n\n{block}")
        };
        files::write(&self.paths.config_file, updated)?;
        files::set_mode(&self.paths.config_file, 0o600)?;
        info!(ip, path = %self.paths.config_file, "wrote SSH config block");
        Ok(())
    }

    /// Removes the managed block and any control sockets. Returns `false`
    /// when there was no block.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::Fs`] when the config cannot be rewritten.
    pub fn remove_config(&self) -> Result<bool, SshConfigError> {
        let Some(existing) = files::read_optional(&self.paths.config_file)? else {
            return Ok(false);
        };
        let stripped = strip_block(&existing);
        if stripped == existing {
            return Ok(false);
        }
        files::write(&self.paths.config_file, stripped)?;
        files::set_mode(&self.paths.config_file, 0o600)?;
        self.cleanup_sockets()?;
        Ok(true)
    }

    /// Returns the managed block, if present.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::Fs`] when the config cannot be read.
    pub fn show(&self) -> Result<Option<String>, SshConfigError> {
        Ok(files::read_optional(&self.paths.config_file)?
            .as_deref()
            .and_then(extract_block))
    }

    fn control_spec(&self) -> CommandSpec {
        CommandSpec::new(self.settings.ssh_bin.clone())
    }

    /// Writes the config and starts a backgrounded master (`ssh -f -N -M`).
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::MasterFailed`] when `ssh` exits non-zero.
    pub fn start_master(&self, ip: &str) -> Result<(), SshConfigError> {
        self.write_config(ip)?;
        let spec = self.control_spec().args([
            String::from("-f"),
            String::from("-N"),
            String::from("-M"),
            String::from("-o"),
            format!("ControlPath={}", self.paths.control_path()),
            String::from(HOST_ALIAS),
        ]);
        // `ssh -f` keeps the inherited pipes open, so run with the terminal.
        match self.runner.run_interactive(&spec)? {
            Some(0) => Ok(()),
            other => Err(SshConfigError::MasterFailed {
                status: other.map_or_else(|| String::from("unknown"), |code| code.to_string()),
            }),
        }
    }

    /// Asks the master to exit and removes leftover sockets.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError`] when sockets cannot be removed.
    pub fn stop_master(&self) -> Result<(), SshConfigError> {
        let spec = self.control_spec().args([
            String::from("-O"),
            String::from("exit"),
            String::from("-o"),
            format!("ControlPath={}", self.paths.control_path()),
            String::from(HOST_ALIAS),
        ]);
        match self.runner.run(&spec) {
            Ok(output) if !output.is_success() => {
                debug!(stderr = %output.stderr.trim(), "no master connection to stop");
            }
            Ok(_) => info!("stopped SSH master connection"),
            Err(err) => debug!(error = %err, "ssh -O exit could not run"),
        }
        self.cleanup_sockets()
    }

    /// First control socket present, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::Fs`] when the sockets dir cannot be read.
    pub fn active_socket(&self) -> Result<Option<Utf8PathBuf>, SshConfigError> {
        Ok(files::list_dir(&self.paths.sockets_dir)?
            .into_iter()
            .find(|name| name.starts_with(SOCKET_PREFIX))
            .map(|name| self.paths.sockets_dir.join(name)))
    }

    /// Probes the master with `ssh -O check`, removing stale sockets.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::Fs`] when sockets cannot be inspected.
    pub fn check_master(&self) -> Result<MasterStatus, SshConfigError> {
        let Some(socket) = self.active_socket()? else {
            return Ok(MasterStatus::NotRunning);
        };
        let spec = self.control_spec().args([
            String::from("-O"),
            String::from("check"),
            String::from("-o"),
            format!("ControlPath={}", self.paths.control_path()),
            String::from(HOST_ALIAS),
        ]);
        let alive = self
            .runner
            .run(&spec)
            .is_ok_and(|output| output.is_success());
        if alive {
            return Ok(MasterStatus::Active(socket));
        }
        debug!(socket = %socket, "removing stale control socket");
        files::remove_file(&socket)?;
        Ok(MasterStatus::Stale)
    }

    fn cleanup_sockets(&self) -> Result<(), SshConfigError> {
        for name in files::list_dir(&self.paths.sockets_dir)? {
            if name.starts_with(SOCKET_PREFIX) {
                files::remove_file(&self.paths.sockets_dir.join(name))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
