//! Background SSH tunnels tracked by PID records.
//!
//! Two tunnels exist: local port forwards (`-L port:localhost:port`) and a
//! Docker socket forward (`-L <sock>:/var/run/docker.sock`). Each background
//! tunnel writes a JSON record holding its PID; a record whose PID no longer
//! answers a signal-0 probe is stale and removed on the next status check.

use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::files::{self, FsError};
use crate::process::{self, CommandRunner, CommandSpec, ProcessError};
use crate::ssh::SshSettings;

const DEFAULT_GRACE: Duration = Duration::from_secs(1);
const DEFAULT_SOCKET_WAIT: Duration = Duration::from_secs(3);
const SOCKET_POLL: Duration = Duration::from_millis(100);
const REMOTE_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Persisted description of a running tunnel.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRecord {
    /// PID of the background `ssh` process.
    pub pid: u32,
    /// Remote address.
    pub ip: String,
    /// Forwarded ports (port-forward tunnels).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    /// Local socket path (Docker tunnels).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<Utf8PathBuf>,
    /// RFC 3339 start time.
    pub started_at: String,
}

/// Errors raised while managing tunnels.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum TunnelError {
    /// Raised when record or socket files cannot be accessed.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Raised when `ssh` cannot be started.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when a record file is not valid JSON.
    #[error("invalid tunnel record {path}: {message}")]
    Record {
        /// Record path.
        path: Utf8PathBuf,
        /// Parser error.
        message: String,
    },
    /// Raised when a port forward is requested without ports.
    #[error("no ports to forward: pass ports or set DOCK_FORWARD_PORTS")]
    NoPorts,
    /// Raised when `ssh` exits during the grace period.
    #[error("SSH tunnel exited immediately (is a local port already in use?)")]
    Exited,
    /// Raised when the Docker socket never appears.
    #[error("Docker tunnel failed: socket {socket} was not created")]
    SocketTimeout {
        /// Expected socket path.
        socket: Utf8PathBuf,
    },
}

/// Result of a background start request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TunnelStart {
    /// A new tunnel was started.
    Started(TunnelRecord),
    /// A live tunnel already existed and was left alone.
    AlreadyRunning(TunnelRecord),
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum TunnelKind {
    PortForward,
    DockerSocket { socket: Utf8PathBuf },
}

/// Manages one kind of background tunnel.
#[derive(Clone, Debug)]
pub struct Tunnel<R> {
    kind: TunnelKind,
    record_path: Utf8PathBuf,
    settings: SshSettings,
    runner: R,
    grace: Duration,
    socket_wait: Duration,
}

impl<R: CommandRunner> Tunnel<R> {
    /// Port forwarding tunnel recorded at `record_path`.
    pub fn port_forward(
        record_path: impl Into<Utf8PathBuf>,
        settings: SshSettings,
        runner: R,
    ) -> Self {
        Self {
            kind: TunnelKind::PortForward,
            record_path: record_path.into(),
            settings,
            runner,
            grace: DEFAULT_GRACE,
            socket_wait: DEFAULT_SOCKET_WAIT,
        }
    }

    /// Docker socket tunnel exposing the remote daemon at `socket`.
    pub fn docker_socket(
        record_path: impl Into<Utf8PathBuf>,
        socket: impl Into<Utf8PathBuf>,
        settings: SshSettings,
        runner: R,
    ) -> Self {
        Self {
            kind: TunnelKind::DockerSocket {
                socket: socket.into(),
            },
            ..Self::port_forward(record_path, settings, runner)
        }
    }

    /// Overrides how long a port forward must survive before it counts as
    /// started.
    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Overrides how long to wait for the Docker socket.
    #[must_use]
    pub const fn with_socket_wait(mut self, wait: Duration) -> Self {
        self.socket_wait = wait;
        self
    }

    /// Local socket path for Docker tunnels.
    #[must_use]
    pub fn socket(&self) -> Option<&Utf8Path> {
        match &self.kind {
            TunnelKind::DockerSocket { socket } => Some(socket),
            TunnelKind::PortForward => None,
        }
    }

    /// The `ssh -N` invocation for this tunnel.
    #[must_use]
    pub fn spec(&self, ip: &str, ports: &[u16]) -> CommandSpec {
        let mut spec = CommandSpec::new(self.settings.ssh_bin.clone())
            .arg("-N")
            .args(self.settings.common_options())
            .args([
                "-o",
                "ExitOnForwardFailure=yes",
                "-o",
                "ServerAliveInterval=30",
                "-o",
                "ServerAliveCountMax=3",
            ]);
        match &self.kind {
            TunnelKind::PortForward => {
                for port in ports {
                    spec = spec.arg("-L").arg(format!("{port}:localhost:{port}"));
                }
            }
            TunnelKind::DockerSocket { socket } => {
                spec = spec
                    .arg("-L")
                    .arg(format!("{socket}:{REMOTE_DOCKER_SOCKET}"));
            }
        }
        spec.arg(self.settings.destination(ip))
    }

    fn read_record(&self) -> Result<Option<TunnelRecord>, TunnelError> {
        let Some(raw) = files::read_optional(&self.record_path)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| TunnelError::Record {
                path: self.record_path.clone(),
                message: err.to_string(),
            })
    }

    fn write_record(&self, record: &TunnelRecord) -> Result<(), TunnelError> {
        let json = serde_json::to_string_pretty(record).map_err(|err| TunnelError::Record {
            path: self.record_path.clone(),
            message: err.to_string(),
        })?;
        files::write(&self.record_path, json)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), TunnelError> {
        files::remove_file(&self.record_path)?;
        if let Some(socket) = self.socket() {
            files::remove_file(socket)?;
        }
        Ok(())
    }

    /// Returns the live tunnel, removing a stale record and socket.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError`] when the record cannot be read or removed.
    pub fn status(&self) -> Result<Option<TunnelRecord>, TunnelError> {
        let record = match self.read_record() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(TunnelError::Record { path, message }) => {
                warn!(path = %path, message, "discarding unreadable tunnel record");
                self.clear()?;
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        if process::pid_alive(record.pid) {
            return Ok(Some(record));
        }
        debug!(pid = record.pid, "tunnel process is gone, removing record");
        self.clear()?;
        Ok(None)
    }

    /// Starts the tunnel detached and records its PID.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError`] when `ssh` cannot start, exits during the
    /// grace period, or the Docker socket does not appear.
    pub async fn start_background(
        &self,
        ip: &str,
        ports: &[u16],
    ) -> Result<TunnelStart, TunnelError> {
        if let Some(existing) = self.status()? {
            return Ok(TunnelStart::AlreadyRunning(existing));
        }
        if matches!(self.kind, TunnelKind::PortForward) && ports.is_empty() {
            return Err(TunnelError::NoPorts);
        }
        self.prepare_socket()?;

        let pid = self.runner.spawn_background(&self.spec(ip, ports))?;
        match &self.kind {
            TunnelKind::PortForward => {
                sleep(self.grace).await;
                if !process::pid_alive(pid) {
                    return Err(TunnelError::Exited);
                }
            }
            TunnelKind::DockerSocket { socket } => {
                if !wait_for_file(socket, self.socket_wait).await {
                    if !process::terminate(pid) {
                        debug!(pid, "tunnel already exited");
                    }
                    return Err(TunnelError::SocketTimeout {
                        socket: socket.clone(),
                    });
                }
            }
        }

        let record = TunnelRecord {
            pid,
            ip: ip.to_owned(),
            ports: ports.to_vec(),
            socket: self.socket().map(Utf8Path::to_path_buf),
            started_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        self.write_record(&record)?;
        info!(pid, ip, "tunnel started");
        Ok(TunnelStart::Started(record))
    }

    /// Runs the tunnel attached to the terminal until it exits.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError`] when `ssh` cannot start.
    pub fn run_foreground(&self, ip: &str, ports: &[u16]) -> Result<Option<i32>, TunnelError> {
        if matches!(self.kind, TunnelKind::PortForward) && ports.is_empty() {
            return Err(TunnelError::NoPorts);
        }
        self.prepare_socket()?;
        let code = self.runner.run_interactive(&self.spec(ip, ports))?;
        if let Some(socket) = self.socket() {
            files::remove_file(socket)?;
        }
        Ok(code)
    }

    /// Signals the recorded process and removes the record and socket.
    /// Returns `true` when a live tunnel was stopped.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError`] when files cannot be removed.
    pub fn stop(&self) -> Result<bool, TunnelError> {
        let record = match self.read_record() {
            Ok(record) => record,
            Err(TunnelError::Record { .. }) => None,
            Err(err) => return Err(err),
        };
        let stopped =
            record.is_some_and(|rec| process::pid_alive(rec.pid) && process::terminate(rec.pid));
        self.clear()?;
        Ok(stopped)
    }

    fn prepare_socket(&self) -> Result<(), TunnelError> {
        if let Some(socket) = self.socket() {
            if let Some(parent) = socket.parent() {
                files::create_dir_all(parent)?;
            }
            files::remove_file(socket)?;
        }
        Ok(())
    }
}

async fn wait_for_file(path: &Utf8Path, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        if path.exists() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(SOCKET_POLL).await;
    }
}
