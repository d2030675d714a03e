//! Command handlers behind the `dock` binary.
//!
//! [`dispatch`] routes a parsed [`Cli`] to its handler. Handlers write
//! user-facing text to the supplied writer and return the process exit
//! code; failures surface as [`CommandError`] and are reported by `main`.

mod connections;
mod housekeeping;
mod lifecycle;

use std::io::{self, Write};

use thiserror::Error;

use crate::autopilot::AutoPilotError;
use crate::cli::Cli;
use crate::completions::CompletionError;
use crate::config::ConfigError;
use crate::config::env_file::EnvFileError;
use crate::files::FsError;
use crate::home::{self, DockHome, HomeError};
use crate::kubeconfig::KubeconfigError;
use crate::process::CommandRunner;
use crate::provider::{InstanceRef, ProviderError};
use crate::snapshot::SnapshotError;
use crate::ssh::SshError;
use crate::ssh_config::SshConfigError;
use crate::state::{EnvironmentState, EnvironmentStatus, StateError};
use crate::terraform::TerraformError;
use crate::tunnel::TunnelError;
use crate::upgrade::UpgradeError;
use crate::workspace::{Workspace, WorkspaceError};

const RULE: &str = "----------------------------------------";

/// Errors surfaced by command handlers.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Raised when the workspace cannot be prepared.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// Raised when the dock home cannot be resolved.
    #[error(transparent)]
    Home(#[from] HomeError),
    /// Raised when configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when `~/.dock/.env` cannot be edited.
    #[error(transparent)]
    EnvFile(#[from] EnvFileError),
    /// Raised on filesystem failures.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Raised when the provider CLI fails.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Raised when Terraform fails.
    #[error(transparent)]
    Terraform(#[from] TerraformError),
    /// Raised when the environment is not in the required state.
    #[error(transparent)]
    State(#[from] StateError),
    /// Raised when an SSH operation fails.
    #[error(transparent)]
    Ssh(#[from] SshError),
    /// Raised when the SSH config block or master fails.
    #[error(transparent)]
    SshConfig(#[from] SshConfigError),
    /// Raised when a tunnel cannot be managed.
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    /// Raised when the kubeconfig cannot be fetched.
    #[error(transparent)]
    Kubeconfig(#[from] KubeconfigError),
    /// Raised by snapshot operations.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// Raised by auto-pilot.
    #[error(transparent)]
    AutoPilot(#[from] AutoPilotError),
    /// Raised when completions cannot be installed.
    #[error(transparent)]
    Completion(#[from] CompletionError),
    /// Raised when the upgrade fails.
    #[error(transparent)]
    Upgrade(#[from] UpgradeError),
    /// Raised when output cannot be written.
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
    /// Raised when Terraform produced no usable outputs.
    #[error("Failed to read Terraform outputs")]
    MissingOutputs,
    /// Raised when the instance id is unknown.
    #[error("Could not determine the instance ID")]
    NoInstance,
    /// Raised when the instance has no public address.
    #[error("Could not determine the instance IP")]
    NoAddress,
    /// Raised when a lifecycle transition is not allowed from `state`.
    #[error("Cannot {action}: environment is {state}")]
    InvalidState {
        /// Refused operation.
        action: &'static str,
        /// Observed state.
        state: EnvironmentState,
    },
}

/// Runs the parsed command, returning the process exit code.
///
/// Commands that only edit files under the dock home skip workspace
/// loading so a broken configuration can still be repaired.
///
/// # Errors
///
/// Returns [`CommandError`] when the command fails.
pub async fn dispatch(cli: Cli, out: &mut dyn Write) -> Result<i32, CommandError> {
    match cli {
        Cli::Version => housekeeping::version(out),
        Cli::Env(args) => housekeeping::env(&DockHome::discover()?, &args, out),
        Cli::Analytics(args) => housekeeping::analytics(&DockHome::discover()?, &args, out),
        Cli::Upgrade(args) => housekeeping::upgrade(&DockHome::discover()?, &args, out).await,
        Cli::Autocomplete(args) => housekeeping::autocomplete(
            &DockHome::discover()?,
            &home::user_home()?,
            &args,
            out,
        ),
        other => run(&Workspace::load()?, other, out).await,
    }
}

/// Runs `cli` against an already-loaded workspace.
///
/// # Errors
///
/// Returns [`CommandError`] when the command fails.
pub async fn run<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    cli: Cli,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    match cli {
        Cli::Create(args) => lifecycle::create(ws, &args, out).await,
        Cli::Destroy => lifecycle::destroy(ws, out).await,
        Cli::Status => lifecycle::status(ws, out),
        Cli::Start => lifecycle::start(ws, out).await,
        Cli::Stop => lifecycle::stop(ws, out).await,
        Cli::Ssh(args) => connections::ssh(ws, &args),
        Cli::SshConfig(args) => connections::ssh_config(ws, &args, out),
        Cli::Kubeconfig => connections::kubeconfig(ws, out),
        Cli::DockerEnv => connections::docker_env(ws, out),
        Cli::DockerTunnel(args) => connections::docker_tunnel(ws, &args, out).await,
        Cli::Portforward(args) => connections::portforward(ws, &args, out).await,
        Cli::Configure(args) => connections::configure(ws, &args, out),
        Cli::Connection(args) => connections::connection(ws, &args, out).await,
        Cli::Init(args) => connections::init(ws, &args, out),
        Cli::Snapshot(args) => housekeeping::snapshot(ws, &args, out),
        Cli::Version => housekeeping::version(out),
        Cli::Env(args) => housekeeping::env(ws.home(), &args, out),
        Cli::Analytics(args) => housekeeping::analytics(ws.home(), &args, out),
        Cli::Upgrade(args) => housekeeping::upgrade(ws.home(), &args, out).await,
        Cli::Autocomplete(args) => {
            housekeeping::autocomplete(ws.home(), ws.user_home(), &args, out)
        }
    }
}

/// Current state; `Absent` without touching the provider when no
/// Terraform state exists, so credentials are only needed for real work.
fn current_state<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
) -> Result<EnvironmentStatus, CommandError> {
    if !ws.terraform().state_exists()? {
        return Ok(EnvironmentStatus::bare(EnvironmentState::Absent));
    }
    let provider = ws.provider()?;
    Ok(ws.detect_state(provider.as_ref())?)
}

fn instance_ref(status: &EnvironmentStatus) -> Result<InstanceRef, CommandError> {
    let details = status.details.as_ref().ok_or(CommandError::NoInstance)?;
    Ok(InstanceRef::parse(&details.instance_id).with_default_zone(details.zone.clone()))
}

fn emit<S: AsRef<str>>(out: &mut dyn Write, lines: &[S]) -> io::Result<()> {
    for line in lines {
        writeln!(out, "{}", line.as_ref())?;
    }
    Ok(())
}

fn boxed(out: &mut dyn Write, title: &str, lines: &[String]) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{RULE}")?;
    writeln!(out, "{title}")?;
    writeln!(out, "{RULE}")?;
    emit(out, lines)?;
    if !lines.is_empty() {
        writeln!(out, "{RULE}")?;
    }
    Ok(())
}
