//! Core library for the `dock` remote development environment tool.
//!
//! The crate drives one disposable cloud instance through Terraform and
//! the provider CLIs (`scw`, `doctl`), tracks its lifecycle, and manages
//! the SSH plumbing around it: multiplexed connections, port forwards, a
//! Docker socket tunnel, and the fetched kubeconfig.

pub mod analytics;
pub mod autopilot;
pub mod cli;
pub mod commands;
pub mod completions;
pub mod config;
pub mod files;
pub mod home;
pub mod kubeconfig;
pub mod process;
pub mod provider;
pub mod shell;
pub mod snapshot;
pub mod ssh;
pub mod ssh_config;
pub mod state;
pub mod terraform;
#[cfg(test)]
pub mod test_support;
pub mod tunnel;
pub mod upgrade;
pub mod workspace;

pub use commands::{CommandError, dispatch};
pub use config::{DigitalOceanConfig, DockConfig, ProviderKind, ScalewayConfig};
pub use process::{CommandRunner, ProcessCommandRunner};
pub use provider::Provider;
pub use state::{EnvironmentState, EnvironmentStatus};
pub use workspace::Workspace;
