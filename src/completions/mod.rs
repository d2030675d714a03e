//! Shell completion scripts generated from the clap definition.

use camino::{Utf8Path, Utf8PathBuf};
use clap::CommandFactory;
use clap_complete::{Shell, generate};
use thiserror::Error;
use tracing::info;

use crate::cli::Cli;
use crate::files::{self, FsError};
use crate::shell::ShellKind;

const RC_MARKER: &str = "# dock autocompletion";

/// Errors raised while installing completions.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CompletionError {
    /// Raised when the script or rc file cannot be written.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Raised for shells without a completion script.
    #[error("autocompletion is not supported for {shell}; use --bash or --zsh")]
    Unsupported {
        /// Shell name.
        shell: &'static str,
    },
}

/// Picks the target shell from explicit flags, falling back to `$SHELL`.
///
/// # Errors
///
/// Returns [`CompletionError::Unsupported`] when the detected shell is fish.
pub fn select_shell(
    bash: bool,
    zsh: bool,
    detected: ShellKind,
) -> Result<ShellKind, CompletionError> {
    if bash {
        return Ok(ShellKind::Bash);
    }
    if zsh {
        return Ok(ShellKind::Zsh);
    }
    match detected {
        ShellKind::Fish => Err(CompletionError::Unsupported { shell: "fish" }),
        other => Ok(other),
    }
}

/// Renders the completion script for `shell`.
///
/// # Errors
///
/// Returns [`CompletionError::Unsupported`] for fish.
pub fn render_script(shell: ShellKind) -> Result<String, CompletionError> {
    let target = match shell {
        ShellKind::Bash => Shell::Bash,
        ShellKind::Zsh => Shell::Zsh,
        ShellKind::Fish => return Err(CompletionError::Unsupported { shell: "fish" }),
    };
    let mut command = Cli::command();
    let mut buffer = Vec::new();
    generate(target, &mut command, "dock", &mut buffer);
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Writes completion scripts into a directory and wires them into rc files.
#[derive(Clone, Debug)]
pub struct Completions {
    dir: Utf8PathBuf,
}

impl Completions {
    /// Completions stored under `dir` (normally `~/.dock/completions`).
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Script path for `shell`.
    #[must_use]
    pub fn script_path(&self, shell: ShellKind) -> Utf8PathBuf {
        match shell {
            ShellKind::Zsh => self.dir.join("_dock"),
            ShellKind::Bash | ShellKind::Fish => self.dir.join("dock.bash"),
        }
    }

    /// rc text loading the script.
    #[must_use]
    pub fn rc_snippet(&self, shell: ShellKind) -> String {
        match shell {
            ShellKind::Zsh => format!(
                "\n{RC_MARKER}\nfpath=({} $fpath)\nautoload -Uz compinit && compinit\n",
                self.dir
            ),
            ShellKind::Bash | ShellKind::Fish => {
                format!("\n{RC_MARKER}\nsource {}\n", self.script_path(shell))
            }
        }
    }

    /// Writes the script and, unless `generate_only`, appends the rc
    /// snippet to `rc_file` once. Returns the lines to show the user.
    ///
    /// # Errors
    ///
    /// Returns [`CompletionError`] when files cannot be written.
    pub fn install(
        &self,
        shell: ShellKind,
        rc_file: &Utf8Path,
        generate_only: bool,
    ) -> Result<Vec<String>, CompletionError> {
        let script = render_script(shell)?;
        let path = self.script_path(shell);
        files::write(&path, script)?;
        info!(path = %path, shell = shell.as_str(), "completion script written");

        let mut lines = vec![format!("Generated {} completion script: {path}", shell.as_str())];
        if generate_only {
            return Ok(lines);
        }

        let existing = files::read_optional(rc_file)?.unwrap_or_default();
        if existing.contains(RC_MARKER) || existing.contains("dock/completions") {
            lines.push(format!("Autocompletion already configured in {rc_file}"));
        } else {
            files::append(rc_file, &self.rc_snippet(shell))?;
            lines.push(format!("Added autocompletion to {rc_file}"));
        }
        lines.push(format!("Restart your shell or run: source {rc_file}"));
        Ok(lines)
    }
}
