//! Test doubles and fixtures shared by the unit tests.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::rc::Rc;

use camino::Utf8PathBuf;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::{
    DEFAULT_FORWARD_PORTS, DigitalOceanConfig, DockConfig, ScalewayConfig,
};
use crate::process::{CommandOutput, CommandRunner, CommandSpec, ProcessError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Captured, interactive, and background invocations all consume the same
/// queue, so a test scripts the exact sequence of tool calls it expects.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// How a recorded command was launched.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvocationMode {
    /// Output captured.
    Captured,
    /// Stdio inherited.
    Interactive,
    /// Detached background process.
    Background,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables.
    pub envs: Vec<(String, String)>,
    /// Working directory override.
    pub cwd: Option<Utf8PathBuf>,
    /// Launch mode.
    pub mode: InvocationMode,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the value of an environment override, if set.
    #[must_use]
    pub fn env(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Returns the recorded command lines.
    #[must_use]
    pub fn command_strings(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(CommandInvocation::command_string)
            .collect()
    }

    /// Number of responses not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a successful response whose stdout is `stdout`.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Queues the PID handed out by the next background spawn.
    pub fn push_pid(&self, pid: u32) {
        self.push_output(Some(0), pid.to_string(), "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    fn next(
        &self,
        spec: &CommandSpec,
        mode: InvocationMode,
    ) -> Result<CommandOutput, ProcessError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: spec.program.clone(),
            args: spec.args.clone(),
            envs: spec.envs.clone(),
            cwd: spec.cwd.clone(),
            mode,
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ProcessError::Spawn {
                program: spec.program.clone(),
                message: String::from("no scripted response available"),
            })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.next(spec, InvocationMode::Captured)
    }

    fn run_interactive(&self, spec: &CommandSpec) -> Result<Option<i32>, ProcessError> {
        self.next(spec, InvocationMode::Interactive)
            .map(|output| output.code)
    }

    fn spawn_background(&self, spec: &CommandSpec) -> Result<u32, ProcessError> {
        let output = self.next(spec, InvocationMode::Background)?;
        if !output.is_success() {
            return Err(ProcessError::Spawn {
                program: spec.program.clone(),
                message: output.stderr,
            });
        }
        output
            .stdout
            .trim()
            .parse::<u32>()
            .map_err(|err| ProcessError::Spawn {
                program: spec.program.clone(),
                message: format!("scripted pid is not a number: {err}"),
            })
    }
}

/// A PID that is guaranteed not to belong to a live process.
pub const DEAD_PID: u32 = 2_147_483_000;

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        Self::apply(pairs, &[]).await
    }

    /// Sets `pairs` and removes `removed` while holding the global mutex.
    pub async fn apply(pairs: &[(&str, &str)], removed: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs
                    .iter()
                    .map(|(key, _)| *key)
                    .chain(removed.iter().copied())
                    .all(|key| seen.insert(key))
            },
            "duplicate environment variable keys passed to EnvGuard"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len() + removed.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }
        for key in removed {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Produces a `terraform output -json` payload from flat key/value pairs.
#[must_use]
pub fn json_terraform_outputs(pairs: &[(&str, &str)]) -> String {
    let items = pairs
        .iter()
        .map(|(key, value)| {
            format!("\"{key}\":{{\"sensitive\":false,\"type\":\"string\",\"value\":\"{value}\"}}")
        })
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{items}}}")
}

/// Produces a minimal `scw instance server get -o json` payload.
#[must_use]
pub fn json_scw_server(state: &str, public_ip: Option<&str>, root_volume: Option<&str>) -> String {
    let ips = public_ip.map_or_else(String::new, |ip| {
        format!("{{\"id\":\"ip-1\",\"address\":\"{ip}\"}}")
    });
    let volumes = root_volume.map_or_else(String::new, |id| {
        format!("\"0\":{{\"id\":\"{id}\",\"volume_type\":\"l_ssd\"}}")
    });
    format!(
        "{{\"id\":\"srv-1\",\"state\":\"{state}\",\"public_ips\":[{ips}],\"public_ip\":null,\"volumes\":{{{volumes}}}}}"
    )
}

/// Produces a minimal `doctl compute droplet get -o json` payload.
#[must_use]
pub fn json_droplet(status: &str, public_ip: Option<&str>) -> String {
    let mut networks = vec![String::from(
        "{\"ip_address\":\"10.0.0.2\",\"type\":\"private\"}",
    )];
    if let Some(ip) = public_ip {
        networks.push(format!("{{\"ip_address\":\"{ip}\",\"type\":\"public\"}}"));
    }
    format!(
        "[{{\"id\":123,\"status\":\"{status}\",\"networks\":{{\"v4\":[{}]}}}}]",
        networks.join(",")
    )
}

/// Scaleway settings with complete credentials.
#[must_use]
pub fn sample_scaleway_config() -> ScalewayConfig {
    ScalewayConfig {
        access_key: Some(String::from("SCWACCESS")),
        secret_key: Some(String::from("scw-secret")),
        project_id: Some(String::from("project-1")),
        organization_id: None,
        region: String::from("fr-par"),
        zone: String::from("fr-par-1"),
        instance_type: String::from("DEV1-M"),
        instance_image: String::new(),
        instance_name: String::from("dock-env"),
    }
}

/// DigitalOcean settings with a token.
#[must_use]
pub fn sample_digitalocean_config() -> DigitalOceanConfig {
    DigitalOceanConfig {
        token: Some(String::from("do-token")),
        region: String::from("nyc1"),
        droplet_size: String::from("s-2vcpu-4gb"),
        droplet_name: String::from("dock-env"),
    }
}

/// Provider-neutral settings using absolute key paths.
#[must_use]
pub fn sample_dock_config() -> DockConfig {
    DockConfig {
        provider: String::from("scaleway"),
        ssh_public_key_path: String::from("/keys/id_ed25519.pub"),
        ssh_private_key_path: String::from("/keys/id_ed25519"),
        ssh_user: String::from("root"),
        kubernetes_engine: String::from("k3s"),
        use_reserved_ip: false,
        forward_ports: String::from(DEFAULT_FORWARD_PORTS),
        ssh_max_startups: String::from("100:30:200"),
        ssh_max_sessions: 100,
        auto_pilot: String::from("true"),
        scw_bin: String::from("scw"),
        doctl_bin: String::from("doctl"),
        terraform_bin: String::from("terraform"),
        ssh_bin: String::from("ssh"),
        scp_bin: String::from("scp"),
    }
}
