//! DigitalOcean adapter over the `doctl` CLI.

use serde::Deserialize;
use tracing::{info, warn};

use super::{InstanceInfo, InstanceRef, Provider, ProviderError, common_vars};
use crate::config::{DigitalOceanConfig, DockConfig};
use crate::process::{CommandRunner, CommandSpec, check_output};
use crate::state::EnvironmentState;
use crate::terraform::TerraformVars;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
struct Droplet {
    status: String,
    #[serde(default)]
    networks: Networks,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
struct Networks {
    #[serde(default)]
    v4: Vec<Network>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
struct Network {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Drives `doctl` with the configured API token.
#[derive(Clone, Debug)]
pub struct DigitalOceanProvider<R> {
    config: DigitalOceanConfig,
    token: String,
    doctl_bin: String,
    runner: R,
}

impl<R: CommandRunner> DigitalOceanProvider<R> {
    /// Validates the token and builds the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] when the token is missing.
    pub fn new(
        config: DigitalOceanConfig,
        doctl_bin: impl Into<String>,
        runner: R,
    ) -> Result<Self, ProviderError> {
        let token = config.require_token()?;
        Ok(Self {
            config,
            token,
            doctl_bin: doctl_bin.into(),
            runner,
        })
    }

    fn run_doctl(&self, args: &[&str]) -> Result<String, ProviderError> {
        let spec = CommandSpec::new(self.doctl_bin.clone())
            .args(args.iter().copied())
            .env("DIGITALOCEAN_ACCESS_TOKEN", self.token.clone());
        let output = self.runner.run(&spec)?;
        Ok(check_output(&self.doctl_bin, output)?.stdout)
    }

    fn droplet_action(&self, action: &str, instance: &InstanceRef) -> Result<(), ProviderError> {
        self.run_doctl(&["compute", "droplet-action", action, &instance.id, "--wait"])
            .map(drop)
    }
}

fn parse_droplet(raw: &str) -> Result<InstanceInfo, ProviderError> {
    let droplets: Vec<Droplet> =
        serde_json::from_str(raw).map_err(|err| ProviderError::parse("droplet", &err))?;
    let droplet = droplets
        .into_iter()
        .next()
        .ok_or(ProviderError::MissingField {
            resource: String::from("droplet"),
            field: "status",
        })?;
    let public_ip = droplet
        .networks
        .v4
        .into_iter()
        .find(|network| network.kind == "public" && !network.ip_address.is_empty())
        .map(|network| network.ip_address);
    Ok(InstanceInfo {
        status: droplet.status,
        public_ip,
        root_volume_id: None,
    })
}

impl<R: CommandRunner> Provider for DigitalOceanProvider<R> {
    fn describe(&self, instance: &InstanceRef) -> Result<InstanceInfo, ProviderError> {
        let stdout = self.run_doctl(&["compute", "droplet", "get", &instance.id, "-o", "json"])?;
        parse_droplet(&stdout)
    }

    fn power_on(&self, instance: &InstanceRef) -> Result<(), ProviderError> {
        info!(droplet = %instance.id, "powering on droplet");
        self.droplet_action("power-on", instance)
    }

    fn shutdown(&self, instance: &InstanceRef) -> Result<(), ProviderError> {
        info!(droplet = %instance.id, "shutting down droplet");
        if let Err(err) = self.droplet_action("shutdown", instance) {
            warn!(error = %err, "graceful shutdown failed, forcing power off");
            return self.droplet_action("power-off", instance);
        }
        Ok(())
    }

    fn map_status(&self, status: &str) -> EnvironmentState {
        match status {
            "active" => EnvironmentState::Running,
            "off" => EnvironmentState::Stopped,
            "new" => EnvironmentState::Provisioning,
            "archive" => EnvironmentState::Destroyed,
            _ => EnvironmentState::Absent,
        }
    }

    fn terraform_vars(&self, dock: &DockConfig) -> TerraformVars {
        let mut vars = TerraformVars::new();
        vars.push("do_token", self.token.clone());
        vars.push("region", self.config.region.clone());
        vars.push("droplet_size", self.config.droplet_size.clone());
        vars.push("droplet_name", self.config.droplet_name.clone());
        common_vars(&mut vars, dock);
        vars
    }

    fn instance_type(&self) -> &str {
        &self.config.droplet_size
    }

    fn instance_image(&self) -> &str {
        ""
    }

    fn zone(&self) -> &str {
        &self.config.region
    }
}
