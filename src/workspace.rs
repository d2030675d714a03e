//! Per-invocation context: resolved home, configuration, and adapters.
//!
//! Every command starts from a [`Workspace`]. Loading one merges the dock
//! home `.env` file into the environment, layers configuration, validates
//! it, and syncs the embedded Terraform files for the active provider.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::analytics::{AnalyticsLog, TrackMeta};
use crate::autopilot::{AutoPilot, AutoPilotPaths, Connections, ShellIntegration};
use crate::config::{
    self, ConfigError, DigitalOceanConfig, DockConfig, ProviderKind, ScalewayConfig,
};
use crate::files::FsError;
use crate::home::{self, DockHome, HomeError};
use crate::kubeconfig::Kubeconfig;
use crate::process::{CommandRunner, ProcessCommandRunner};
use crate::provider::{DigitalOceanProvider, Provider, ProviderError, ScalewayProvider};
use crate::snapshot::SnapshotCatalog;
use crate::ssh::{Remote, SshSettings};
use crate::ssh_config::{ControlMaster, SshConfigPaths};
use crate::state::{self, EnvironmentStatus, StateError};
use crate::terraform::Terraform;
use crate::tunnel::Tunnel;

/// Errors raised while preparing a workspace.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum WorkspaceError {
    /// Raised when the dock home cannot be resolved or prepared.
    #[error(transparent)]
    Home(#[from] HomeError),
    /// Raised when configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Waits and polling intervals used by long-running operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timings {
    /// Time a background port forward must survive.
    pub tunnel_grace: Duration,
    /// Time allowed for the Docker socket to appear.
    pub socket_wait: Duration,
    /// Kubernetes readiness probes.
    pub kube_attempts: u32,
    /// Pause between readiness probes.
    pub kube_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            tunnel_grace: Duration::from_secs(1),
            socket_wait: Duration::from_secs(3),
            kube_attempts: 30,
            kube_interval: Duration::from_secs(10),
        }
    }
}

/// Resolved settings plus the runner every adapter shares.
#[derive(Clone, Debug)]
pub struct Workspace<R> {
    home: DockHome,
    user_home: Utf8PathBuf,
    dock: DockConfig,
    scaleway: ScalewayConfig,
    digitalocean: DigitalOceanConfig,
    kind: ProviderKind,
    runner: R,
    timings: Timings,
}

impl Workspace<ProcessCommandRunner> {
    /// Loads the workspace for a real invocation.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError`] when the home, `.env` file, or
    /// configuration cannot be loaded.
    pub fn load() -> Result<Self, WorkspaceError> {
        let dock_home = DockHome::discover()?;
        if config::load_env_file(&dock_home.env_file())? {
            debug!(path = %dock_home.env_file(), "merged dock environment file");
        }
        Self::from_parts(
            dock_home,
            home::user_home()?,
            DockConfig::load_without_cli_args()?,
            ScalewayConfig::load_without_cli_args()?,
            DigitalOceanConfig::load_without_cli_args()?,
            ProcessCommandRunner,
        )
    }
}

impl<R: CommandRunner + Clone + 'static> Workspace<R> {
    /// Assembles a workspace from already-loaded parts and prepares the
    /// dock home.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError`] when validation fails or the home cannot
    /// be written.
    pub fn from_parts(
        dock_home: DockHome,
        user_home: Utf8PathBuf,
        dock: DockConfig,
        scaleway: ScalewayConfig,
        digitalocean: DigitalOceanConfig,
        runner: R,
    ) -> Result<Self, WorkspaceError> {
        dock.validate()?;
        let kind = dock.provider_kind()?;
        dock_home.ensure(kind)?;
        Ok(Self {
            home: dock_home,
            user_home,
            dock,
            scaleway,
            digitalocean,
            kind,
            runner,
            timings: Timings::default(),
        })
    }

    /// Replaces the wait and polling schedule.
    #[must_use]
    pub const fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// The dock home.
    #[must_use]
    pub const fn home(&self) -> &DockHome {
        &self.home
    }

    /// The user's home directory.
    #[must_use]
    pub fn user_home(&self) -> &Utf8Path {
        &self.user_home
    }

    /// Provider-neutral settings.
    #[must_use]
    pub const fn dock(&self) -> &DockConfig {
        &self.dock
    }

    /// Active provider.
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Adapter for the active provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] when credentials are missing.
    pub fn provider(&self) -> Result<Box<dyn Provider>, ProviderError> {
        Ok(match self.kind {
            ProviderKind::Scaleway => Box::new(self.scaleway_adapter()?),
            ProviderKind::DigitalOcean => Box::new(DigitalOceanProvider::new(
                self.digitalocean.clone(),
                self.dock.doctl_bin.clone(),
                self.runner.clone(),
            )?),
        })
    }

    /// The Scaleway adapter, for operations only Scaleway offers.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unsupported`] when another provider is
    /// active and [`ProviderError::Config`] when credentials are missing.
    pub fn scaleway_provider(
        &self,
        operation: &'static str,
    ) -> Result<ScalewayProvider<R>, ProviderError> {
        if self.kind != ProviderKind::Scaleway {
            return Err(ProviderError::Unsupported {
                operation,
                provider: self.kind,
            });
        }
        self.scaleway_adapter()
    }

    fn scaleway_adapter(&self) -> Result<ScalewayProvider<R>, ProviderError> {
        ScalewayProvider::new(
            self.scaleway.clone(),
            self.dock.scw_bin.clone(),
            self.runner.clone(),
        )
    }

    /// Terraform bound to the active provider's working directory.
    #[must_use]
    pub fn terraform(&self) -> Terraform<R> {
        Terraform::new(
            self.dock.terraform_bin.clone(),
            self.home.terraform_dir(self.kind),
            self.runner.clone(),
        )
    }

    /// Client-side SSH settings.
    #[must_use]
    pub fn ssh(&self) -> SshSettings {
        SshSettings::from_config(&self.dock)
    }

    /// Remote command helper.
    #[must_use]
    pub fn remote(&self) -> Remote<R> {
        Remote::new(self.ssh(), self.runner.clone())
    }

    /// SSH config block and master connection manager.
    #[must_use]
    pub fn control_master(&self) -> ControlMaster<R> {
        ControlMaster::new(
            SshConfigPaths::for_home(&self.user_home),
            self.ssh(),
            self.runner.clone(),
        )
    }

    /// Background port forward.
    #[must_use]
    pub fn port_forward(&self) -> Tunnel<R> {
        Tunnel::port_forward(self.home.portforward_record(), self.ssh(), self.runner.clone())
            .with_grace(self.timings.tunnel_grace)
    }

    /// Background Docker socket forward.
    #[must_use]
    pub fn docker_tunnel(&self) -> Tunnel<R> {
        Tunnel::docker_socket(
            self.home.docker_tunnel_record(),
            self.home.docker_socket(),
            self.ssh(),
            self.runner.clone(),
        )
        .with_socket_wait(self.timings.socket_wait)
    }

    /// Local kubeconfig path, `~/.kube/dock-config`.
    #[must_use]
    pub fn kubeconfig_path(&self) -> Utf8PathBuf {
        self.user_home.join(".kube").join("dock-config")
    }

    /// Kubeconfig fetcher.
    #[must_use]
    pub fn kubeconfig(&self) -> Kubeconfig<R> {
        Kubeconfig::new(self.kubeconfig_path(), self.ssh(), self.runner.clone())
            .with_polling(self.timings.kube_attempts, self.timings.kube_interval)
    }

    /// Analytics log.
    #[must_use]
    pub fn analytics(&self) -> AnalyticsLog {
        AnalyticsLog::new(self.home.analytics_file())
    }

    /// Snapshot store.
    #[must_use]
    pub fn snapshots(&self) -> SnapshotCatalog {
        SnapshotCatalog::new(self.home.snapshots_file())
    }

    /// Auto-pilot controller for the current shell.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when rc file candidates cannot be probed.
    pub fn autopilot(&self) -> Result<AutoPilot<R>, FsError> {
        Ok(AutoPilot::new(
            self.dock.auto_pilot_enabled(),
            AutoPilotPaths {
                state_file: self.home.state_file(),
                init_script: self.home.init_script(),
                kubeconfig: self.kubeconfig_path(),
            },
            ShellIntegration::detect(&self.user_home)?,
            Connections {
                master: self.control_master(),
                port_forward: self.port_forward(),
                docker_tunnel: self.docker_tunnel(),
                forward_ports: self.dock.forward_ports(),
            },
        ))
    }

    /// Instance facts recorded with tracked commands.
    #[must_use]
    pub fn track_meta(&self) -> TrackMeta {
        match self.kind {
            ProviderKind::Scaleway => TrackMeta {
                instance_type: self.scaleway.instance_type.clone(),
                instance_image: self.scaleway.instance_image.clone(),
                zone: self.scaleway.zone.clone(),
            },
            ProviderKind::DigitalOcean => TrackMeta {
                instance_type: self.digitalocean.droplet_size.clone(),
                instance_image: String::new(),
                zone: self.digitalocean.region.clone(),
            },
        }
    }

    /// Reconciles Terraform state with the provider.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when Terraform state cannot be probed.
    pub fn detect_state(&self, provider: &dyn Provider) -> Result<EnvironmentStatus, StateError> {
        state::detect(&self.terraform(), provider, &self.ssh())
    }
}
