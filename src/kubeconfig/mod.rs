//! Retrieval of the instance's kubeconfig.

use std::sync::LazyLock;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::files::{self, FsError};
use crate::process::{CommandRunner, CommandSpec, ProcessError, check_output};
use crate::ssh::SshSettings;

const REMOTE_KUBECONFIG: &str = "/root/.kube/config";
const READY_PROBE: &str = "test -f /var/run/dock-provisioned && kubectl get nodes";
const CLUSTER_PROBE: &str = "kubectl get nodes";

static LOOPBACK_SERVER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"server:\s*https://(localhost|127\.0\.0\.1):").ok());

/// Errors raised while fetching the kubeconfig.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum KubeconfigError {
    /// Raised when `scp` or `ssh` cannot run or fails.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when the local file cannot be written.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Raised when Kubernetes never becomes ready.
    #[error("timed out waiting for Kubernetes after {attempts} attempts")]
    Timeout {
        /// Number of probes made.
        attempts: u32,
    },
}

/// Rewrites loopback API server addresses to `ip`.
#[must_use]
pub fn rewrite_server(config: &str, ip: &str) -> String {
    LOOPBACK_SERVER.as_ref().map_or_else(
        || config.to_owned(),
        |pattern| {
            pattern
                .replace_all(config, format!("server: https://{ip}:").as_str())
                .into_owned()
        },
    )
}

/// Copies and patches `~/.kube/dock-config`.
#[derive(Clone, Debug)]
pub struct Kubeconfig<R> {
    path: Utf8PathBuf,
    settings: SshSettings,
    runner: R,
    attempts: u32,
    interval: Duration,
}

impl<R: CommandRunner> Kubeconfig<R> {
    /// Creates a fetcher writing to `path`; polls 30 times at 10s intervals.
    pub fn new(path: impl Into<Utf8PathBuf>, settings: SshSettings, runner: R) -> Self {
        Self {
            path: path.into(),
            settings,
            runner,
            attempts: 30,
            interval: Duration::from_secs(10),
        }
    }

    /// Overrides the readiness polling schedule.
    #[must_use]
    pub const fn with_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.attempts = attempts;
        self.interval = interval;
        self
    }

    /// Local kubeconfig path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Copies the remote kubeconfig and points it at `ip`.
    ///
    /// # Errors
    ///
    /// Returns [`KubeconfigError`] when `scp` fails or the file cannot be
    /// rewritten.
    pub fn fetch(&self, ip: &str) -> Result<Utf8PathBuf, KubeconfigError> {
        if let Some(parent) = self.path.parent() {
            files::create_dir_all(parent)?;
        }
        let spec = CommandSpec::new(self.settings.scp_bin.clone())
            .args(self.settings.common_options())
            .arg(format!("{}:{REMOTE_KUBECONFIG}", self.settings.destination(ip)))
            .arg(self.path.as_str());
        let output = self.runner.run(&spec)?;
        check_output(&self.settings.scp_bin, output)?;

        let copied = files::read_optional(&self.path)?.unwrap_or_default();
        files::write(&self.path, rewrite_server(&copied, ip))?;
        info!(path = %self.path, "kubeconfig saved");
        Ok(self.path.clone())
    }

    /// Polls until cloud-init has finished and `kubectl get nodes` succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`KubeconfigError::Timeout`] when every attempt fails.
    pub async fn wait_until_ready(&self, ip: &str) -> Result<(), KubeconfigError> {
        self.poll(ip, READY_PROBE).await
    }

    /// Polls until `kubectl get nodes` succeeds, for instances booted from a
    /// snapshot where cloud-init does not run.
    ///
    /// # Errors
    ///
    /// Returns [`KubeconfigError::Timeout`] when every attempt fails.
    pub async fn wait_until_reachable(&self, ip: &str) -> Result<(), KubeconfigError> {
        self.poll(ip, CLUSTER_PROBE).await
    }

    async fn poll(&self, ip: &str, probe: &str) -> Result<(), KubeconfigError> {
        let spec = self
            .settings
            .ssh_spec(&["-o", "ConnectTimeout=5"], ip)
            .arg(probe);
        for attempt in 1..=self.attempts {
            match self.runner.run(&spec) {
                Ok(output) if output.is_success() => {
                    info!(attempt, "kubernetes is ready");
                    return Ok(());
                }
                Ok(output) => {
                    debug!(attempt, status = %output.status_text(), "kubernetes not ready");
                }
                Err(err) => debug!(attempt, error = %err, "readiness probe failed to run"),
            }
            if attempt < self.attempts {
                sleep(self.interval).await;
            }
        }
        Err(KubeconfigError::Timeout {
            attempts: self.attempts,
        })
    }
}
