//! Scaleway adapter over the `scw` CLI.

use serde_json::Value;
use tracing::{info, warn};

use super::{InstanceInfo, InstanceRef, Provider, ProviderError, common_vars};
use crate::config::{DockConfig, ScalewayConfig, ScalewayCredentials};
use crate::process::{CommandRunner, CommandSpec, check_output};
use crate::state::EnvironmentState;
use crate::terraform::TerraformVars;

/// Drives `scw` with credentials taken from configuration.
#[derive(Clone, Debug)]
pub struct ScalewayProvider<R> {
    config: ScalewayConfig,
    credentials: ScalewayCredentials,
    scw_bin: String,
    runner: R,
}

impl<R: CommandRunner> ScalewayProvider<R> {
    /// Validates credentials and builds the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] when a credential is missing.
    pub fn new(
        config: ScalewayConfig,
        scw_bin: impl Into<String>,
        runner: R,
    ) -> Result<Self, ProviderError> {
        let credentials = config.credentials()?;
        Ok(Self {
            config,
            credentials,
            scw_bin: scw_bin.into(),
            runner,
        })
    }

    fn spec<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        CommandSpec::new(self.scw_bin.clone())
            .args(args)
            .env("SCW_ACCESS_KEY", self.credentials.access_key.clone())
            .env("SCW_SECRET_KEY", self.credentials.secret_key.clone())
            .env("SCW_DEFAULT_PROJECT_ID", self.credentials.project_id.clone())
            .env(
                "SCW_DEFAULT_ORGANIZATION_ID",
                self.credentials.organization_id.clone(),
            )
    }

    fn run_scw(&self, args: Vec<String>) -> Result<String, ProviderError> {
        let output = self.runner.run(&self.spec(args))?;
        Ok(check_output(&self.scw_bin, output)?.stdout)
    }

    fn run_json(&self, args: Vec<String>, resource: &str) -> Result<Value, ProviderError> {
        let stdout = self.run_scw(args)?;
        serde_json::from_str(&stdout).map_err(|err| ProviderError::parse(resource, &err))
    }

    fn zone_of<'a>(&'a self, instance: &'a InstanceRef) -> &'a str {
        instance.zone.as_deref().unwrap_or(&self.config.zone)
    }

    fn server_action(&self, action: &str, instance: &InstanceRef) -> Result<(), ProviderError> {
        self.run_scw(vec![
            String::from("instance"),
            String::from("server"),
            String::from("action"),
            action.to_owned(),
            instance.id.clone(),
            format!("zone={}", self.zone_of(instance)),
            String::from("--wait"),
        ])
        .map(drop)
    }

    /// Snapshots `volume_id` and waits for completion, returning the
    /// snapshot id.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when `scw` fails or prints no id.
    pub fn create_snapshot(
        &self,
        volume_id: &str,
        name: &str,
        zone: &str,
    ) -> Result<String, ProviderError> {
        let value = self.run_json(
            vec![
                String::from("instance"),
                String::from("snapshot"),
                String::from("create"),
                format!("volume-id={volume_id}"),
                format!("name={name}"),
                format!("zone={zone}"),
                String::from("-o"),
                String::from("json"),
                String::from("--wait"),
            ],
            "snapshot",
        )?;
        nested_id(&value, "snapshot")
    }

    /// Registers a bootable x86_64 image from `snapshot_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when `scw` fails or prints no id.
    pub fn create_image(
        &self,
        snapshot_id: &str,
        name: &str,
        zone: &str,
    ) -> Result<String, ProviderError> {
        let value = self.run_json(
            vec![
                String::from("instance"),
                String::from("image"),
                String::from("create"),
                format!("snapshot-id={snapshot_id}"),
                format!("name={name}"),
                String::from("arch=x86_64"),
                format!("zone={zone}"),
                String::from("-o"),
                String::from("json"),
            ],
            "image",
        )?;
        nested_id(&value, "image")
    }

    /// Deletes an image.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when `scw` fails.
    pub fn delete_image(&self, image_id: &str, zone: &str) -> Result<(), ProviderError> {
        self.delete("image", image_id, zone)
    }

    /// Deletes a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when `scw` fails.
    pub fn delete_snapshot(&self, snapshot_id: &str, zone: &str) -> Result<(), ProviderError> {
        self.delete("snapshot", snapshot_id, zone)
    }

    fn delete(&self, resource: &str, id: &str, zone: &str) -> Result<(), ProviderError> {
        self.run_scw(vec![
            String::from("instance"),
            resource.to_owned(),
            String::from("delete"),
            id.to_owned(),
            format!("zone={zone}"),
            String::from("--force"),
        ])
        .map(drop)
    }
}

fn nested_id(value: &Value, resource: &str) -> Result<String, ProviderError> {
    value
        .get(resource)
        .and_then(|inner| inner.get("id"))
        .or_else(|| value.get("id"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| ProviderError::MissingField {
            resource: resource.to_owned(),
            field: "id",
        })
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

/// Extracts the root volume id from a server description.
///
/// Newer API responses key volumes by index (`{"0": {...}}`), older ones use
/// an array or `root_volume` fields.
pub(crate) fn root_volume_id(server: &Value) -> Option<String> {
    let volumes = server.get("volumes");
    [
        volumes.and_then(|v| v.get("0")),
        volumes.and_then(|v| v.get(0)),
        server.get("root_volume"),
        server.pointer("/image/root_volume"),
    ]
    .into_iter()
    .flatten()
    .find_map(|volume| non_empty(volume.get("id")))
}

pub(crate) fn parse_server(raw: &str) -> Result<InstanceInfo, ProviderError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| ProviderError::parse("server", &err))?;
    let server = value.get("server").filter(|s| s.is_object()).unwrap_or(&value);
    let status = non_empty(server.get("state")).ok_or(ProviderError::MissingField {
        resource: String::from("server"),
        field: "state",
    })?;
    let public_ip = non_empty(server.pointer("/public_ips/0/address"))
        .or_else(|| non_empty(server.pointer("/public_ip/address")));
    Ok(InstanceInfo {
        status,
        public_ip,
        root_volume_id: root_volume_id(server),
    })
}

impl<R: CommandRunner> Provider for ScalewayProvider<R> {
    fn describe(&self, instance: &InstanceRef) -> Result<InstanceInfo, ProviderError> {
        let stdout = self.run_scw(vec![
            String::from("instance"),
            String::from("server"),
            String::from("get"),
            instance.id.clone(),
            format!("zone={}", self.zone_of(instance)),
            String::from("-o"),
            String::from("json"),
        ])?;
        parse_server(&stdout)
    }

    fn power_on(&self, instance: &InstanceRef) -> Result<(), ProviderError> {
        info!(instance = %instance.id, "powering on instance");
        self.server_action("poweron", instance)
    }

    fn shutdown(&self, instance: &InstanceRef) -> Result<(), ProviderError> {
        info!(instance = %instance.id, "shutting down instance");
        if let Err(err) = self.server_action("poweroff", instance) {
            warn!(error = %err, "graceful shutdown failed, forcing termination");
            return self.server_action("terminate", instance);
        }
        Ok(())
    }

    fn map_status(&self, status: &str) -> EnvironmentState {
        match status {
            "running" => EnvironmentState::Running,
            "stopped" | "stopped in place" => EnvironmentState::Stopped,
            "starting" | "stopping" | "locked" => EnvironmentState::Provisioning,
            _ => EnvironmentState::Absent,
        }
    }

    fn terraform_vars(&self, dock: &DockConfig) -> TerraformVars {
        let mut vars = TerraformVars::new();
        vars.push("scw_access_key", self.credentials.access_key.clone());
        vars.push("scw_secret_key", self.credentials.secret_key.clone());
        vars.push("scw_project_id", self.credentials.project_id.clone());
        vars.push("region", self.config.region.clone());
        vars.push("zone", self.config.zone.clone());
        vars.push("instance_type", self.config.instance_type.clone());
        vars.push_opt(
            "instance_image",
            Some(self.config.instance_image.clone()).filter(|image| !image.is_empty()),
        );
        vars.push("instance_name", self.config.instance_name.clone());
        common_vars(&mut vars, dock);
        vars
    }

    fn instance_type(&self) -> &str {
        &self.config.instance_type
    }

    fn instance_image(&self) -> &str {
        &self.config.instance_image
    }

    fn zone(&self) -> &str {
        &self.config.zone
    }
}
