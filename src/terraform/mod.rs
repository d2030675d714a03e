//! Terraform CLI adapter.
//!
//! Mutating commands (`init`, `apply`, `destroy`, `refresh`) inherit the
//! terminal so the user sees Terraform's own progress output; `output -json`
//! is captured and flattened into [`TerraformOutputs`].

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::files::{self, FsError};
use crate::process::{CommandRunner, CommandSpec, ProcessError};

pub mod embedded;

const STATE_FILE: &str = "terraform.tfstate";

/// Errors raised by Terraform invocations.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum TerraformError {
    /// Raised when the Terraform binary cannot be started.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when a mutating subcommand exits unsuccessfully.
    #[error("terraform {subcommand} exited with code {status}")]
    Failed {
        /// Subcommand that failed.
        subcommand: &'static str,
        /// Exit code text.
        status: String,
    },
    /// Raised when the working directory cannot be inspected.
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Ordered `-var` assignments.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TerraformVars {
    entries: Vec<(String, String)>,
}

impl TerraformVars {
    /// Creates an empty variable set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces `key`.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let name = key.into();
        let rendered = value.into();
        if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == name) {
            existing.1 = rendered;
        } else {
            self.entries.push((name, rendered));
        }
    }

    /// Adds `key` only when `value` is present.
    pub fn push_opt(&mut self, key: impl Into<String>, value: Option<impl Into<String>>) {
        if let Some(present) = value {
            self.push(key, present);
        }
    }

    /// Renders `-var=key=value` arguments in insertion order.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(key, value)| format!("-var={key}={value}"))
            .collect()
    }
}

/// Flattened `terraform output -json` values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TerraformOutputs {
    values: BTreeMap<String, Value>,
}

impl TerraformOutputs {
    /// Flattens `{key: {value: x}}` into `{key: x}`.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when `raw` is not an object of outputs.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let parsed: BTreeMap<String, Value> = serde_json::from_str(raw)?;
        let values = parsed
            .into_iter()
            .map(|(key, entry)| {
                let value = match entry {
                    Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
                    other => other,
                };
                (key, value)
            })
            .collect();
        Ok(Self { values })
    }

    /// Returns a string or numeric output as text.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }

    /// Provider instance id (`zone/uuid` for Scaleway).
    #[must_use]
    pub fn instance_id(&self) -> Option<String> {
        self.get_str("instance_id")
    }

    /// Public IPv4 address reported at apply time.
    #[must_use]
    pub fn public_ip(&self) -> Option<String> {
        self.get_str("public_ip")
    }

    /// Zone or region of the instance.
    #[must_use]
    pub fn zone(&self) -> Option<String> {
        self.get_str("zone")
    }

    /// Private key path recorded in the outputs.
    #[must_use]
    pub fn ssh_key_path(&self) -> Option<String> {
        self.get_str("ssh_key_path")
    }
}

/// Runs Terraform in a fixed working directory.
#[derive(Clone, Debug)]
pub struct Terraform<R> {
    bin: String,
    dir: Utf8PathBuf,
    runner: R,
}

impl<R: CommandRunner> Terraform<R> {
    /// Creates an adapter for the working directory `dir`.
    pub fn new(bin: impl Into<String>, dir: impl Into<Utf8PathBuf>, runner: R) -> Self {
        Self {
            bin: bin.into(),
            dir: dir.into(),
            runner,
        }
    }

    /// Working directory holding the configuration and state.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn spec(&self) -> CommandSpec {
        CommandSpec::new(self.bin.clone()).current_dir(self.dir.clone())
    }

    fn run_inherited(
        &self,
        subcommand: &'static str,
        extra: &[&str],
        vars: &TerraformVars,
    ) -> Result<(), TerraformError> {
        let spec = self
            .spec()
            .arg(subcommand)
            .arg("-input=false")
            .args(extra.iter().copied())
            .args(vars.to_args());
        info!(subcommand, dir = %self.dir, "running terraform");
        let code = self.runner.run_interactive(&spec)?;
        if code == Some(0) {
            return Ok(());
        }
        Err(TerraformError::Failed {
            subcommand,
            status: code.map_or_else(|| String::from("unknown"), |c| c.to_string()),
        })
    }

    /// Runs `terraform init -input=false`.
    ///
    /// # Errors
    ///
    /// Returns [`TerraformError`] when Terraform fails.
    pub fn init(&self) -> Result<(), TerraformError> {
        self.run_inherited("init", &[], &TerraformVars::new())
    }

    /// Runs `terraform apply -auto-approve` with `vars`.
    ///
    /// # Errors
    ///
    /// Returns [`TerraformError`] when Terraform fails.
    pub fn apply(&self, vars: &TerraformVars) -> Result<(), TerraformError> {
        self.run_inherited("apply", &["-auto-approve"], vars)
    }

    /// Runs `terraform destroy -auto-approve` with `vars`.
    ///
    /// # Errors
    ///
    /// Returns [`TerraformError`] when Terraform fails.
    pub fn destroy(&self, vars: &TerraformVars) -> Result<(), TerraformError> {
        self.run_inherited("destroy", &["-auto-approve"], vars)
    }

    /// Runs `terraform refresh` with `vars`.
    ///
    /// # Errors
    ///
    /// Returns [`TerraformError`] when Terraform fails.
    pub fn refresh(&self, vars: &TerraformVars) -> Result<(), TerraformError> {
        self.run_inherited("refresh", &[], vars)
    }

    /// Reads outputs; `None` when Terraform fails or prints invalid JSON.
    #[must_use]
    pub fn output(&self) -> Option<TerraformOutputs> {
        let spec = self.spec().args(["output", "-json"]);
        let output = match self.runner.run(&spec) {
            Ok(output) if output.is_success() => output,
            Ok(output) => {
                debug!(status = %output.status_text(), "terraform output failed");
                return None;
            }
            Err(err) => {
                debug!(error = %err, "terraform output could not run");
                return None;
            }
        };
        TerraformOutputs::parse(&output.stdout)
            .map_err(|err| debug!(error = %err, "terraform output is not valid JSON"))
            .ok()
    }

    /// Returns `true` when `terraform.tfstate` exists.
    ///
    /// # Errors
    ///
    /// Returns [`TerraformError::Fs`] when the directory cannot be read.
    pub fn state_exists(&self) -> Result<bool, TerraformError> {
        Ok(files::exists(&self.dir.join(STATE_FILE))?)
    }
}
