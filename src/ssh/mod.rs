//! SSH invocations against the managed instance.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::info;

use crate::config::DockConfig;
use crate::process::{CommandRunner, CommandSpec, ProcessError, check_output};

static MAX_STARTUPS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\d+(:\d+:\d+)?$").ok());

const SSHD_CONFIG: &str = "/etc/ssh/sshd_config";

/// Errors raised by remote SSH operations.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SshError {
    /// Raised when `ssh` cannot be started or exits unsuccessfully.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised for sshd settings that would corrupt `sshd_config`.
    #[error("invalid {name} value '{value}' (DOCK_SSH_MAX_STARTUPS expects N or N:N:N)")]
    InvalidSetting {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },
}

/// Client-side SSH settings shared by every connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// `ssh` executable.
    pub ssh_bin: String,
    /// `scp` executable.
    pub scp_bin: String,
    /// Remote login user.
    pub user: String,
    /// Private key path with `~/` expanded.
    pub key_path: String,
}

impl SshSettings {
    /// Builds settings from the provider-neutral configuration.
    #[must_use]
    pub fn from_config(config: &DockConfig) -> Self {
        Self {
            ssh_bin: config.ssh_bin.clone(),
            scp_bin: config.scp_bin.clone(),
            user: config.ssh_user.clone(),
            key_path: config.private_key_path(),
        }
    }

    /// `-i <key>` plus host-key and log-level options.
    #[must_use]
    pub fn common_options(&self) -> Vec<String> {
        vec![
            String::from("-i"),
            self.key_path.clone(),
            String::from("-o"),
            String::from("StrictHostKeyChecking=accept-new"),
            String::from("-o"),
            String::from("UserKnownHostsFile=/dev/null"),
            String::from("-o"),
            String::from("LogLevel=ERROR"),
        ]
    }

    /// `user@ip`.
    #[must_use]
    pub fn destination(&self, ip: &str) -> String {
        format!("{}@{ip}", self.user)
    }

    /// `DOCKER_HOST` value for a direct connection.
    #[must_use]
    pub fn docker_host(&self, ip: &str) -> String {
        format!("ssh://{}", self.destination(ip))
    }

    /// `ssh` with common options and `extra` before the destination.
    #[must_use]
    pub fn ssh_spec(&self, extra: &[&str], ip: &str) -> CommandSpec {
        CommandSpec::new(self.ssh_bin.clone())
            .args(self.common_options())
            .args(extra.iter().copied())
            .arg(self.destination(ip))
    }
}

/// Runs commands on the instance over SSH.
#[derive(Clone, Debug)]
pub struct Remote<R> {
    settings: SshSettings,
    runner: R,
}

impl<R: CommandRunner> Remote<R> {
    /// Creates a remote shell helper.
    pub const fn new(settings: SshSettings, runner: R) -> Self {
        Self { settings, runner }
    }

    /// Opens an interactive session, passing `args` through, and returns the
    /// remote exit code.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::Process`] when `ssh` cannot be started.
    pub fn session(&self, ip: &str, args: &[String]) -> Result<i32, SshError> {
        let spec = self.settings.ssh_spec(&[], ip).args(args.iter().cloned());
        let code = self.runner.run_interactive(&spec)?;
        Ok(code.unwrap_or(255))
    }

    /// Runs `command` remotely and returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::Process`] when the command fails.
    pub fn run(&self, ip: &str, command: &str) -> Result<String, SshError> {
        let spec = self.settings.ssh_spec(&[], ip).arg(command);
        let output = self.runner.run(&spec)?;
        Ok(check_output(&self.settings.ssh_bin, output)?.stdout)
    }

    /// Rewrites sshd `MaxStartups` and `MaxSessions` and restarts sshd.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::InvalidSetting`] for malformed values and
    /// [`SshError::Process`] when the remote command fails.
    pub fn configure_sshd(
        &self,
        ip: &str,
        max_startups: &str,
        max_sessions: u32,
    ) -> Result<(), SshError> {
        let valid = MAX_STARTUPS
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(max_startups));
        if !valid {
            return Err(SshError::InvalidSetting {
                name: "MaxStartups",
                value: max_startups.to_owned(),
            });
        }
        info!(max_startups, max_sessions, "configuring remote sshd");
        self.run(ip, &sshd_script(max_startups, max_sessions))
            .map(drop)
    }

    /// Reads the effective sshd limits; `None` when the host is unreachable.
    #[must_use]
    pub fn sshd_settings(&self, ip: &str) -> Option<String> {
        self.run(
            ip,
            &format!("grep -E '^(MaxStartups|MaxSessions)' {SSHD_CONFIG} || echo 'Using defaults'"),
        )
        .ok()
        .map(|stdout| stdout.trim().to_owned())
    }
}

fn sshd_script(max_startups: &str, max_sessions: u32) -> String {
    [
        format!("sed -i 's/^#*MaxStartups.*/MaxStartups {max_startups}/' {SSHD_CONFIG}"),
        format!("sed -i 's/^#*MaxSessions.*/MaxSessions {max_sessions}/' {SSHD_CONFIG}"),
        format!(
            "grep -q '^MaxStartups' {SSHD_CONFIG} || echo 'MaxStartups {max_startups}' >> {SSHD_CONFIG}"
        ),
        format!(
            "grep -q '^MaxSessions' {SSHD_CONFIG} || echo 'MaxSessions {max_sessions}' >> {SSHD_CONFIG}"
        ),
        String::from("systemctl restart sshd"),
    ]
    .join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{InvocationMode, ScriptedRunner, sample_dock_config};
    use rstest::{fixture, rstest};

    #[fixture]
    fn settings() -> SshSettings {
        SshSettings::from_config(&sample_dock_config())
    }

    #[rstest]
    fn max_startups_pattern_compiles() {
        assert!(MAX_STARTUPS.is_some());
    }

    #[rstest]
    fn session_passes_extra_args_and_returns_exit_code(settings: SshSettings) {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(3), "", "");
        let remote = Remote::new(settings, runner.clone());

        let code = remote
            .session("10.0.0.1", &[String::from("uptime")])
            .expect("session");

        assert_eq!(code, 3);
        let invocation = runner.invocations().remove(0);
        assert_eq!(invocation.mode, InvocationMode::Interactive);
        assert_eq!(
            invocation.command_string(),
            "ssh -i /keys/id_ed25519 -o StrictHostKeyChecking=accept-new -o UserKnownHostsFile=/dev/null -o LogLevel=ERROR root@10.0.0.1 uptime"
        );
    }

    #[rstest]
    fn configure_sshd_sends_one_compound_command(settings: SshSettings) {
        let runner = ScriptedRunner::new();
        runner.push_success();
        Remote::new(settings, runner.clone())
            .configure_sshd("10.0.0.1", "50:30:100", 64)
            .expect("configure");

        let command = runner.command_strings().remove(0);
        assert!(command.contains("MaxStartups 50:30:100"));
        assert!(command.contains("MaxSessions 64"));
        assert!(command.ends_with("systemctl restart sshd"));
    }

    #[rstest]
    #[case("100")]
    #[case("10:30:60")]
    fn valid_max_startups_values(settings: SshSettings, #[case] value: &str) {
        let runner = ScriptedRunner::new();
        runner.push_success();
        assert!(
            Remote::new(settings, runner)
                .configure_sshd("h", value, 10)
                .is_ok()
        );
    }

    #[rstest]
    #[case("10:30")]
    #[case("100; rm -rf /")]
    fn malformed_max_startups_is_rejected(settings: SshSettings, #[case] value: &str) {
        let runner = ScriptedRunner::new();
        let err = Remote::new(settings, runner.clone())
            .configure_sshd("h", value, 10)
            .expect_err("should reject");
        assert!(matches!(err, SshError::InvalidSetting { .. }));
        assert!(runner.invocations().is_empty());
    }

    #[rstest]
    fn sshd_settings_is_none_when_unreachable(settings: SshSettings) {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(255), "", "Connection refused");
        assert_eq!(Remote::new(settings, runner).sshd_settings("h"), None);
    }

    #[rstest]
    fn docker_host_uses_user_and_ip(settings: SshSettings) {
        assert_eq!(settings.docker_host("1.2.3.4"), "ssh://root@1.2.3.4");
    }
}
