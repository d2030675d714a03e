//! `create`, `start`, `stop`, `destroy` and `status`.

use std::io::Write;

use tracing::warn;

use super::{CommandError, boxed, current_state, emit, instance_ref};
use crate::analytics::{TrackedCommand, track};
use crate::autopilot::DockState;
use crate::cli::CreateCommand;
use crate::process::CommandRunner;
use crate::provider::Provider;
use crate::state::{self, EnvironmentState};
use crate::terraform::TerraformOutputs;
use crate::workspace::Workspace;

fn ssh_line<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    outputs: Option<&TerraformOutputs>,
    ip: &str,
) -> String {
    let settings = ws.ssh();
    let key = outputs
        .and_then(TerraformOutputs::ssh_key_path)
        .map_or_else(|| settings.key_path.clone(), |path| crate::config::expand_home(&path));
    format!("ssh -i {key} {}", settings.destination(ip))
}

pub(super) async fn create<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    args: &CreateCommand,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    writeln!(out, "Creating remote development environment...")?;
    writeln!(out)?;

    let provider = ws.provider()?;
    let status = ws.detect_state(provider.as_ref())?;
    match status.state {
        EnvironmentState::Running => {
            let details = status.details.unwrap_or_default();
            writeln!(out, "Environment already running.")?;
            writeln!(out, "IP: {}", details.ip.as_deref().unwrap_or("unknown"))?;
            if let Some(ssh) = details.ssh_command {
                writeln!(out, "SSH: {ssh}")?;
            }
            return Ok(0);
        }
        EnvironmentState::Stopped => {
            writeln!(
                out,
                "Environment exists but is stopped. Use 'dock start' to power on."
            )?;
            return Ok(0);
        }
        EnvironmentState::Provisioning => {
            return Err(CommandError::InvalidState {
                action: "create",
                state: status.state,
            });
        }
        EnvironmentState::Absent | EnvironmentState::Destroyed => {}
    }

    let mut vars = provider.terraform_vars(ws.dock());
    let meta = ws.track_meta();
    let from_snapshot = match &args.snapshot {
        None => false,
        Some(requested) => {
            ws.scaleway_provider("snapshot boot")?;
            let snapshot =
                ws.snapshots()
                    .resolve(requested.as_deref(), &meta.instance_type, &meta.zone)?;
            writeln!(out, "Using snapshot: {}", snapshot.name)?;
            writeln!(out, "  Image ID: {}", snapshot.image_id)?;
            writeln!(out)?;
            vars.push("snapshot_image_id", snapshot.image_id);
            vars.push("skip_provisioning", "true");
            true
        }
    };

    let terraform = ws.terraform();
    let kubeconfig = ws.kubeconfig();
    let tracked = track(&ws.analytics(), TrackedCommand::Create, &meta, async {
        writeln!(out, "Initializing Terraform...")?;
        terraform.init()?;
        writeln!(out)?;
        writeln!(out, "Applying infrastructure...")?;
        terraform.apply(&vars)?;

        let outputs = terraform.output().ok_or(CommandError::MissingOutputs)?;
        let ip = outputs.public_ip().ok_or(CommandError::MissingOutputs)?;
        writeln!(out)?;
        if from_snapshot {
            writeln!(out, "Waiting for the instance to boot from snapshot...")?;
            kubeconfig.wait_until_reachable(&ip).await?;
        } else {
            writeln!(out, "Waiting for provisioning to complete...")?;
            kubeconfig.wait_until_ready(&ip).await?;
        }
        writeln!(out)?;
        writeln!(out, "Fetching kubeconfig...")?;
        kubeconfig.fetch(&ip)?;
        Ok::<_, CommandError>((ip, outputs))
    })
    .await;
    writeln!(out)?;
    writeln!(out, "{}", tracked.summary)?;
    let (ip, outputs) = tracked.result?;

    let settings = ws.ssh();
    boxed(
        out,
        "Environment ready!",
        &[
            format!("IP:         {ip}"),
            format!("SSH:        {}", ssh_line(ws, Some(&outputs), &ip)),
            format!("Docker:     export DOCKER_HOST={}", settings.docker_host(&ip)),
            format!("Kubeconfig: export KUBECONFIG={}", kubeconfig.path()),
        ],
    )?;

    let autopilot = ws.autopilot()?;
    emit(out, &autopilot.setup(&ip).await?)?;
    Ok(0)
}

pub(super) async fn start<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let provider = ws.provider()?;
    let status = ws.detect_state(provider.as_ref())?;
    match status.state {
        EnvironmentState::Absent => {
            writeln!(out, "No environment exists. Run 'dock create' first.")?;
            return Ok(0);
        }
        EnvironmentState::Running => {
            writeln!(out, "Environment is already running.")?;
            writeln!(out, "IP: {}", status.ip().unwrap_or("unknown"))?;
            return Ok(0);
        }
        EnvironmentState::Stopped => {}
        other @ (EnvironmentState::Provisioning | EnvironmentState::Destroyed) => {
            return Err(CommandError::InvalidState {
                action: "start",
                state: other,
            });
        }
    }
    let instance = instance_ref(&status)?;

    let terraform = ws.terraform();
    let kubeconfig = ws.kubeconfig();
    let vars = provider.terraform_vars(ws.dock());
    let tracked = track(&ws.analytics(), TrackedCommand::Start, &ws.track_meta(), async {
        writeln!(out, "Powering on instance {}...", instance.id)?;
        provider.power_on(&instance)?;
        if let Err(err) = terraform.refresh(&vars) {
            warn!(error = %err, "terraform refresh failed; outputs may list a stale IP");
        }
        let ip = provider
            .describe(&instance)?
            .public_ip
            .or_else(|| terraform.output().and_then(|outputs| outputs.public_ip()))
            .ok_or(CommandError::NoAddress)?;

        writeln!(out)?;
        writeln!(out, "Waiting for the instance to accept connections...")?;
        kubeconfig.wait_until_reachable(&ip).await?;
        writeln!(out, "Updating kubeconfig with new IP...")?;
        kubeconfig.fetch(&ip)?;
        Ok::<_, CommandError>(ip)
    })
    .await;
    writeln!(out)?;
    writeln!(out, "{}", tracked.summary)?;
    let ip = tracked.result?;

    let outputs = terraform.output();
    boxed(
        out,
        "Environment started!",
        &[
            format!("IP:     {ip}"),
            format!("SSH:    {}", ssh_line(ws, outputs.as_ref(), &ip)),
            format!("Docker: export DOCKER_HOST={}", ws.ssh().docker_host(&ip)),
        ],
    )?;

    let autopilot = ws.autopilot()?;
    emit(out, &autopilot.setup(&ip).await?)?;
    Ok(0)
}

pub(super) async fn stop<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let provider = ws.provider()?;
    let status = ws.detect_state(provider.as_ref())?;
    match status.state {
        EnvironmentState::Absent => {
            writeln!(out, "No environment exists. Nothing to stop.")?;
            return Ok(0);
        }
        EnvironmentState::Stopped => {
            writeln!(out, "Environment is already stopped.")?;
            return Ok(0);
        }
        EnvironmentState::Running => {}
        other @ (EnvironmentState::Provisioning | EnvironmentState::Destroyed) => {
            return Err(CommandError::InvalidState {
                action: "stop",
                state: other,
            });
        }
    }
    let instance = instance_ref(&status)?;

    let autopilot = ws.autopilot()?;
    emit(out, &autopilot.cleanup()?)?;

    let tracked = track(&ws.analytics(), TrackedCommand::Stop, &ws.track_meta(), async {
        writeln!(out, "Stopping instance {}...", instance.id)?;
        provider.shutdown(&instance)?;
        Ok::<_, CommandError>(())
    })
    .await;
    writeln!(out)?;
    writeln!(out, "{}", tracked.summary)?;
    tracked.result?;

    boxed(
        out,
        "Environment stopped.",
        &[
            String::from("Data is preserved. Run 'dock start' to resume."),
            String::from("Run 'dock destroy' to delete everything."),
        ],
    )?;
    Ok(0)
}

pub(super) async fn destroy<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let terraform = ws.terraform();
    if !terraform.state_exists()? {
        writeln!(out, "No environment exists. Nothing to destroy.")?;
        return Ok(0);
    }
    let provider = ws.provider()?;
    let vars = provider.terraform_vars(ws.dock());

    writeln!(out, "Destroying remote development environment...")?;
    writeln!(out)?;
    emit(
        out,
        &[
            "This will delete:",
            "  - Instance and all data",
            "  - SSH key",
            "  - Security group rules",
            "  - Reserved IP (if any)",
            "",
        ],
    )?;

    let autopilot = ws.autopilot()?;
    emit(out, &autopilot.cleanup()?)?;
    if ws.docker_tunnel().stop()? {
        writeln!(out, "Docker tunnel stopped.")?;
    }

    let tracked = track(&ws.analytics(), TrackedCommand::Destroy, &ws.track_meta(), async {
        terraform.destroy(&vars)?;
        Ok::<_, CommandError>(())
    })
    .await;
    writeln!(out)?;
    writeln!(out, "{}", tracked.summary)?;
    tracked.result?;

    autopilot.remove_init()?;
    autopilot.set_state(DockState::Absent)?;
    boxed(out, "Environment destroyed. Zero resources remaining.", &[])?;
    Ok(0)
}

pub(super) fn status<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let status = current_state(ws)?;
    writeln!(out, "{}", state::format_state(&status))?;
    Ok(0)
}
