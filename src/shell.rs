//! Login shell detection and rc file resolution.

use std::env;

use camino::{Utf8Path, Utf8PathBuf};

use crate::files::{self, FsError};

/// Shells with rc-file integration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShellKind {
    /// GNU bash; also the fallback.
    Bash,
    /// Z shell.
    Zsh,
    /// fish.
    Fish,
}

impl ShellKind {
    /// Classifies a `$SHELL` value.
    #[must_use]
    pub fn from_shell_path(shell: &str) -> Self {
        if shell.contains("zsh") {
            Self::Zsh
        } else if shell.contains("fish") {
            Self::Fish
        } else {
            Self::Bash
        }
    }

    /// Classifies the current `$SHELL`.
    #[must_use]
    pub fn detect() -> Self {
        Self::from_shell_path(&env::var("SHELL").unwrap_or_default())
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Zsh => "zsh",
            Self::Fish => "fish",
        }
    }

    /// The rc file to append integrations to.
    ///
    /// zsh prefers `.zshrc` over `.zprofile` and bash `.bashrc` over
    /// `.bash_profile`, choosing the first that exists.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when existence cannot be probed.
    pub fn rc_file(self, home: &Utf8Path) -> Result<Utf8PathBuf, FsError> {
        let (preferred, fallback) = match self {
            Self::Fish => return Ok(home.join(".config/fish/config.fish")),
            Self::Zsh => (".zshrc", ".zprofile"),
            Self::Bash => (".bashrc", ".bash_profile"),
        };
        let candidate = home.join(preferred);
        if files::exists(&candidate)? {
            Ok(candidate)
        } else {
            Ok(home.join(fallback))
        }
    }
}
