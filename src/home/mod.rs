//! The dock home directory (`~/.dock` or `$DOCK_HOME`).

use std::env;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::config::ProviderKind;
use crate::files::{self, FsError};
use crate::terraform::embedded;

/// Environment variable overriding the dock home location.
pub const DOCK_HOME_ENV: &str = "DOCK_HOME";

/// Errors raised while resolving or preparing the dock home.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum HomeError {
    /// Raised when no home directory can be determined.
    #[error("cannot determine the home directory: set HOME or DOCK_HOME")]
    NoHomeDirectory,
    /// Raised when a path is not valid UTF-8.
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
    /// Raised when the directory tree cannot be written.
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Returns the user's home directory.
///
/// # Errors
///
/// Returns [`HomeError`] when it cannot be resolved or is not UTF-8.
pub fn user_home() -> Result<Utf8PathBuf, HomeError> {
    let home = dirs::home_dir().ok_or(HomeError::NoHomeDirectory)?;
    Utf8PathBuf::from_path_buf(home)
        .map_err(|path| HomeError::NonUtf8Path(path.display().to_string()))
}

/// Layout of the dock home directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DockHome {
    root: Utf8PathBuf,
}

impl DockHome {
    /// Uses `root` as the dock home.
    #[must_use]
    pub fn at(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `$DOCK_HOME`, falling back to `~/.dock`.
    ///
    /// # Errors
    ///
    /// Returns [`HomeError`] when neither location can be determined.
    pub fn discover() -> Result<Self, HomeError> {
        if let Some(raw) = env::var_os(DOCK_HOME_ENV).filter(|value| !value.is_empty()) {
            let root = Utf8PathBuf::from_path_buf(raw.into())
                .map_err(|path| HomeError::NonUtf8Path(path.display().to_string()))?;
            return Ok(Self::at(root));
        }
        Ok(Self::at(user_home()?.join(".dock")))
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// `.env` file merged into the environment.
    #[must_use]
    pub fn env_file(&self) -> Utf8PathBuf {
        self.root.join(".env")
    }

    /// Terraform working directory for `kind`.
    #[must_use]
    pub fn terraform_dir(&self, kind: ProviderKind) -> Utf8PathBuf {
        self.root.join("terraform").join(kind.as_str())
    }

    /// Analytics CSV log.
    #[must_use]
    pub fn analytics_file(&self) -> Utf8PathBuf {
        self.root.join("analytics.csv")
    }

    /// Snapshot metadata store.
    #[must_use]
    pub fn snapshots_file(&self) -> Utf8PathBuf {
        self.root.join("snapshots.json")
    }

    /// Auto-pilot state file.
    #[must_use]
    pub fn state_file(&self) -> Utf8PathBuf {
        self.root.join("state")
    }

    /// Shell init script sourced by the auto-pilot integration.
    #[must_use]
    pub fn init_script(&self) -> Utf8PathBuf {
        self.root.join("dock.init")
    }

    /// Port-forward tunnel record.
    #[must_use]
    pub fn portforward_record(&self) -> Utf8PathBuf {
        self.root.join("portforward.json")
    }

    /// Docker socket tunnel record.
    #[must_use]
    pub fn docker_tunnel_record(&self) -> Utf8PathBuf {
        self.root.join("docker-tunnel.json")
    }

    /// Directory holding forwarded sockets.
    #[must_use]
    pub fn sockets_dir(&self) -> Utf8PathBuf {
        self.root.join("sockets")
    }

    /// Local end of the forwarded Docker socket.
    #[must_use]
    pub fn docker_socket(&self) -> Utf8PathBuf {
        self.sockets_dir().join("docker.sock")
    }

    /// Generated shell completion scripts.
    #[must_use]
    pub fn completions_dir(&self) -> Utf8PathBuf {
        self.root.join("completions")
    }

    /// Scratch space for downloads.
    #[must_use]
    pub fn tmp_dir(&self) -> Utf8PathBuf {
        self.root.join("tmp")
    }

    /// Creates the directory tree and syncs the embedded Terraform files for
    /// `kind`, overwriting local copies.
    ///
    /// # Errors
    ///
    /// Returns [`HomeError::Fs`] when a directory or file cannot be written.
    pub fn ensure(&self, kind: ProviderKind) -> Result<(), HomeError> {
        files::create_dir_all(&self.root)?;
        files::create_dir_all(&self.sockets_dir())?;
        let tf_dir = self.terraform_dir(kind);
        for file in embedded::for_provider(kind) {
            files::write(&tf_dir.join(file.path), file.contents)?;
        }
        debug!(dir = %tf_dir, "synced terraform files");
        Ok(())
    }
}
