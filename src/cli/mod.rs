//! Command-line interface definitions for the `dock` binary.
//!
//! This module centralises the clap parser structures so the binary, the
//! completion generator, and the build script (man page) share one
//! definition. It must only depend on `clap`.

use clap::{Args, Parser};

/// Top-level CLI for the `dock` binary.
#[derive(Debug, Parser)]
#[command(
    name = "dock",
    about = "Disposable remote development environment on a single cloud instance",
    version,
    arg_required_else_help = true
)]
pub enum Cli {
    /// Create and provision the environment.
    #[command(name = "create")]
    Create(CreateCommand),
    /// Destroy all resources.
    #[command(name = "destroy")]
    Destroy,
    /// Show the current state.
    #[command(name = "status")]
    Status,
    /// Open an SSH session, or run a command remotely.
    #[command(name = "ssh")]
    Ssh(SshCommand),
    /// Manage the SSH config block and multiplexed master connection.
    #[command(name = "ssh-config")]
    SshConfig(SshConfigCommand),
    /// Power on a stopped instance.
    #[command(name = "start")]
    Start,
    /// Gracefully shut the instance down.
    #[command(name = "stop")]
    Stop,
    /// Fetch or refresh the local kubeconfig.
    #[command(name = "kubeconfig")]
    Kubeconfig,
    /// Print the DOCKER_HOST export command.
    #[command(name = "docker-env")]
    DockerEnv,
    /// Forward the remote Docker socket to a local socket.
    #[command(name = "docker-tunnel")]
    DockerTunnel(TunnelCommand),
    /// Forward remote ports to localhost.
    #[command(name = "portforward")]
    Portforward(PortforwardCommand),
    /// Apply SSH server tuning on the instance.
    #[command(name = "configure")]
    Configure(ConfigureCommand),
    /// Inspect, refresh, or clean the auto-pilot connections.
    #[command(name = "connection")]
    Connection(ConnectionCommand),
    /// Install the auto-pilot shell integration.
    #[command(name = "init")]
    Init(InitCommand),
    /// Show usage statistics and operation history.
    #[command(name = "analytics")]
    Analytics(AnalyticsCommand),
    /// Create, list, or delete boot snapshots.
    #[command(name = "snapshot")]
    Snapshot(SnapshotCommand),
    /// Manage variables in ~/.dock/.env.
    #[command(name = "env")]
    Env(EnvCommand),
    /// Upgrade dock to the latest release.
    #[command(name = "upgrade")]
    Upgrade(UpgradeCommand),
    /// Show the current version.
    #[command(name = "version")]
    Version,
    /// Set up shell autocompletion.
    #[command(name = "autocomplete")]
    Autocomplete(AutocompleteCommand),
}

/// Arguments for `dock create`.
#[derive(Debug, Args)]
pub struct CreateCommand {
    /// Boot from a snapshot image; without a name, the newest snapshot
    /// matching the configured instance type and zone is used.
    #[arg(long, value_name = "NAME")]
    pub snapshot: Option<Option<String>>,
}

/// Arguments for `dock ssh`.
#[derive(Debug, Args)]
pub struct SshCommand {
    /// Command to run remotely instead of an interactive shell.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Arguments for `dock ssh-config`.
#[derive(Debug, Args)]
pub struct SshConfigCommand {
    /// Print the managed block.
    #[arg(long, conflicts_with_all = ["remove", "start_master", "stop_master"])]
    pub show: bool,
    /// Remove the managed block and stop the master connection.
    #[arg(long, conflicts_with_all = ["start_master", "stop_master"])]
    pub remove: bool,
    /// Only start the master connection.
    #[arg(long, conflicts_with = "stop_master")]
    pub start_master: bool,
    /// Only stop the master connection.
    #[arg(long)]
    pub stop_master: bool,
}

/// Arguments for `dock docker-tunnel`.
#[derive(Debug, Args)]
pub struct TunnelCommand {
    /// Run in the background.
    #[arg(short = 'd', long = "background", conflicts_with_all = ["stop", "status"])]
    pub background: bool,
    /// Stop the background tunnel.
    #[arg(long, conflicts_with = "status")]
    pub stop: bool,
    /// Show whether the background tunnel is running.
    #[arg(long)]
    pub status: bool,
}

/// Arguments for `dock portforward`.
#[derive(Debug, Args)]
pub struct PortforwardCommand {
    /// Tunnel mode flags.
    #[command(flatten)]
    pub mode: TunnelCommand,
    /// Ports to forward; defaults to DOCK_FORWARD_PORTS.
    #[arg(value_name = "PORT")]
    pub ports: Vec<u16>,
}

/// Arguments for `dock configure`.
#[derive(Debug, Args)]
pub struct ConfigureCommand {
    /// Print the remote sshd settings without changing them.
    #[arg(long)]
    pub show: bool,
}

/// Arguments for `dock connection`.
#[derive(Debug, Args)]
pub struct ConnectionCommand {
    /// Show connection status (default).
    #[arg(long, conflicts_with_all = ["refresh", "clean"])]
    pub status: bool,
    /// Restart all connections.
    #[arg(long, conflicts_with = "clean")]
    pub refresh: bool,
    /// Stop all connections.
    #[arg(long)]
    pub clean: bool,
}

/// Arguments for `dock init`.
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Remove the shell integration instead.
    #[arg(long)]
    pub remove: bool,
}

/// Arguments for `dock analytics`.
#[derive(Debug, Args)]
pub struct AnalyticsCommand {
    /// Show the last 10 operations.
    #[arg(long, conflicts_with = "all")]
    pub last: bool,
    /// Show every operation.
    #[arg(long)]
    pub all: bool,
}

/// Arguments for `dock snapshot`.
#[derive(Debug, Args)]
pub struct SnapshotCommand {
    /// Snapshot the running instance.
    #[arg(long, conflicts_with_all = ["list", "delete"])]
    pub create: bool,
    /// List snapshots (default).
    #[arg(short = 'l', long, conflicts_with = "delete")]
    pub list: bool,
    /// Delete the named snapshot and its image.
    #[arg(long, value_name = "NAME")]
    pub delete: Option<String>,
}

/// Arguments for `dock env`.
#[derive(Debug, Args)]
pub struct EnvCommand {
    /// List variables and their sources (default).
    #[arg(long, conflicts_with_all = ["set", "unset"])]
    pub list: bool,
    /// Set variables, e.g. `--set KEY=value,KEY2=value2`.
    #[arg(long, value_name = "KEY=VALUE,...", conflicts_with = "unset")]
    pub set: Option<String>,
    /// Remove variables, e.g. `--unset KEY1,KEY2`.
    #[arg(long, value_name = "KEY,...")]
    pub unset: Option<String>,
}

/// Arguments for `dock upgrade`.
#[derive(Debug, Args)]
pub struct UpgradeCommand {
    /// Only check whether an update exists.
    #[arg(short = 'c', long)]
    pub check: bool,
}

/// Arguments for `dock autocomplete`.
#[derive(Debug, Args)]
pub struct AutocompleteCommand {
    /// Generate the bash script regardless of $SHELL.
    #[arg(long, conflicts_with = "zsh")]
    pub bash: bool,
    /// Generate the zsh script regardless of $SHELL.
    #[arg(long)]
    pub zsh: bool,
    /// Only write the script; leave the shell rc untouched.
    #[arg(long)]
    pub generate: bool,
}
