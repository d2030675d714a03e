//! Commands that talk to a running instance: SSH, tunnels, kubeconfig,
//! sshd tuning and the auto-pilot connection set.

use std::io::Write;

use super::{CommandError, current_state, emit};
use crate::cli::{
    ConfigureCommand, ConnectionCommand, InitCommand, PortforwardCommand, SshCommand,
    SshConfigCommand, TunnelCommand,
};
use crate::process::CommandRunner;
use crate::ssh_config::MasterStatus;
use crate::state;
use crate::tunnel::{TunnelError, TunnelRecord, TunnelStart};
use crate::workspace::Workspace;

fn running_ip<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    action: &str,
) -> Result<String, CommandError> {
    Ok(state::require_running(&current_state(ws)?, action)?)
}

fn port_list(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub(super) fn ssh<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    args: &SshCommand,
) -> Result<i32, CommandError> {
    let ip = running_ip(ws, "connect")?;
    Ok(ws.remote().session(&ip, &args.args)?)
}

pub(super) fn ssh_config<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    args: &SshConfigCommand,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let master = ws.control_master();
    if args.show {
        let Some(block) = master.show()? else {
            emit(
                out,
                &[
                    "No dock SSH config found.",
                    "Run 'dock ssh-config' to set up connection multiplexing.",
                ],
            )?;
            return Ok(0);
        };
        writeln!(out, "Current dock SSH config:")?;
        writeln!(out)?;
        writeln!(out, "{block}")?;
        writeln!(out)?;
        match master.check_master()? {
            MasterStatus::Active(socket) => {
                writeln!(out, "Master connection: active")?;
                writeln!(out, "  Socket: {socket}")?;
            }
            MasterStatus::Stale | MasterStatus::NotRunning => {
                writeln!(out, "Master connection: not active")?;
                writeln!(out, "Run 'dock ssh-config --start-master' to start it.")?;
            }
        }
        return Ok(0);
    }
    if args.remove {
        master.stop_master()?;
        if master.remove_config()? {
            writeln!(out, "Dock SSH config removed.")?;
        } else {
            writeln!(out, "No dock SSH config found to remove.")?;
        }
        return Ok(0);
    }
    if args.stop_master {
        writeln!(out, "Stopping SSH master connection...")?;
        master.stop_master()?;
        writeln!(out, "SSH master connection stopped.")?;
        return Ok(0);
    }

    let ip = running_ip(ws, "configure SSH")?;
    if args.start_master {
        writeln!(out, "Starting SSH master connection...")?;
        master.start_master(&ip)?;
        writeln!(out, "SSH master connection started.")?;
        return Ok(0);
    }
    master.write_config(&ip)?;
    emit(
        out,
        &[
            String::from("SSH config updated with ControlMaster support."),
            format!("  Host: dock -> {ip}"),
            format!("  Config: {}", master.paths().config_file),
            String::new(),
            String::from("Usage:"),
            String::from("  ssh dock                       # Connect via multiplexed connection"),
            String::from("  export DOCKER_HOST=ssh://dock  # Docker over the shared connection"),
            String::from("  dock ssh-config --start-master # Pre-open the master connection"),
        ],
    )?;
    Ok(0)
}

pub(super) fn kubeconfig<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let ip = running_ip(ws, "fetch kubeconfig")?;
    writeln!(out, "Fetching kubeconfig from {ip}...")?;
    let path = ws.kubeconfig().fetch(&ip)?;
    emit(
        out,
        &[
            format!("Kubeconfig saved to {path}"),
            String::new(),
            String::from("To use kubectl with this environment:"),
            format!("  export KUBECONFIG={path}"),
            String::new(),
            String::from("Or run directly:"),
            format!("  KUBECONFIG={path} kubectl get nodes"),
        ],
    )?;
    Ok(0)
}

pub(super) fn docker_env<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let ip = running_ip(ws, "get Docker environment")?;
    writeln!(out, "export DOCKER_HOST={}", ws.ssh().docker_host(&ip))?;
    Ok(0)
}

pub(super) async fn docker_tunnel<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    args: &TunnelCommand,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let tunnel = ws.docker_tunnel();
    let socket = ws.home().docker_socket();
    let export = format!("export DOCKER_HOST=unix://{socket}");

    if args.status {
        match tunnel.status()? {
            Some(record) => emit(
                out,
                &[
                    String::from("Docker tunnel: running"),
                    format!("  PID: {}", record.pid),
                    format!("  Socket: {socket}"),
                    String::new(),
                    format!("Use: {export}"),
                ],
            )?,
            None => emit(
                out,
                &[
                    "Docker tunnel: not running",
                    "Run 'dock docker-tunnel -d' to start it in the background.",
                ],
            )?,
        }
        return Ok(0);
    }
    if args.stop {
        if tunnel.stop()? {
            writeln!(out, "Docker tunnel stopped.")?;
        } else {
            writeln!(out, "No Docker tunnel is running.")?;
        }
        return Ok(0);
    }

    let ip = running_ip(ws, "start Docker tunnel")?;
    if tunnel.status()?.is_some() {
        writeln!(out, "Docker tunnel is already running.")?;
        writeln!(out, "Use: {export}")?;
        return Ok(0);
    }
    emit(
        out,
        &[
            String::from("Starting Docker socket tunnel..."),
            format!("  Remote: {}:/var/run/docker.sock", ws.ssh().destination(&ip)),
            format!("  Local:  {socket}"),
            String::new(),
        ],
    )?;

    if !args.background {
        emit(
            out,
            &[
                String::from("Docker tunnel active! In another shell run:"),
                format!("  {export}"),
                String::new(),
                String::from("Press Ctrl+C to stop"),
            ],
        )?;
        out.flush()?;
        if let Some(code) = tunnel.run_foreground(&ip, &[])?.filter(|code| *code != 0) {
            writeln!(out, "SSH tunnel exited with code {code}")?;
            return Ok(code);
        }
        return Ok(0);
    }

    match tunnel.start_background(&ip, &[]).await? {
        TunnelStart::Started(record) => emit(
            out,
            &[
                format!("Docker tunnel started in background (PID {}).", record.pid),
                String::new(),
                String::from("To use Docker:"),
                format!("  {export}"),
                String::new(),
                String::from("To stop:"),
                String::from("  dock docker-tunnel --stop"),
            ],
        )?,
        TunnelStart::AlreadyRunning(_) => emit(
            out,
            &[String::from("Docker tunnel is already running."), format!("Use: {export}")],
        )?,
    }
    Ok(0)
}

fn running_tunnel_lines(heading: &str, record: &TunnelRecord) -> Vec<String> {
    vec![
        String::from(heading),
        format!("  PID: {}", record.pid),
        format!("  Remote: {}", record.ip),
        format!("  Ports: {}", port_list(&record.ports)),
        format!("  Started: {}", record.started_at),
    ]
}

fn active_forward_lines(ip: &str, ports: &[u16]) -> Vec<String> {
    let mut lines = vec![String::new(), String::from("Port forwarding active!")];
    lines.extend(ports.iter().map(|port| format!("  localhost:{port} -> {ip}:{port}")));
    lines.push(String::new());
    lines
}

pub(super) async fn portforward<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    args: &PortforwardCommand,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let tunnel = ws.port_forward();
    if args.mode.status {
        match tunnel.status()? {
            Some(record) => {
                emit(out, &running_tunnel_lines("Port forwarding is running:", &record))?;
            }
            None => writeln!(out, "No port forwarding tunnel is running.")?,
        }
        return Ok(0);
    }
    if args.mode.stop {
        if tunnel.stop()? {
            writeln!(out, "Port forwarding stopped.")?;
        } else {
            writeln!(out, "No port forwarding tunnel is running.")?;
        }
        return Ok(0);
    }

    let ip = running_ip(ws, "forward ports")?;
    if let Some(record) = tunnel.status()? {
        emit(out, &running_tunnel_lines("Port forwarding is already running:", &record))?;
        writeln!(out)?;
        writeln!(out, "Use 'dock portforward --stop' to stop it first.")?;
        return Ok(0);
    }

    let ports: Vec<u16> = if args.ports.is_empty() {
        ws.dock().forward_ports()
    } else {
        args.ports.iter().copied().filter(|port| *port > 0).collect()
    };
    if ports.is_empty() {
        writeln!(out, "No ports configured for forwarding.")?;
        writeln!(
            out,
            "Set DOCK_FORWARD_PORTS with 'dock env --set DOCK_FORWARD_PORTS=8080,3000' or pass ports as arguments."
        )?;
        return Err(TunnelError::NoPorts.into());
    }

    emit(
        out,
        &[
            String::from("Starting port forwarding..."),
            format!("  Remote: {ip}"),
            format!("  Ports: {}", port_list(&ports)),
            format!(
                "  Mode: {}",
                if args.mode.background { "background" } else { "foreground" }
            ),
            String::new(),
            String::from("Equivalent command:"),
            format!("  {}", tunnel.spec(&ip, &ports).command_line()),
        ],
    )?;

    if !args.mode.background {
        emit(out, &active_forward_lines(&ip, &ports))?;
        writeln!(out, "Press Ctrl+C to stop")?;
        out.flush()?;
        if let Some(code) = tunnel.run_foreground(&ip, &ports)?.filter(|code| *code != 0) {
            writeln!(out, "SSH tunnel exited with code {code}")?;
            return Ok(code);
        }
        return Ok(0);
    }

    match tunnel.start_background(&ip, &ports).await? {
        TunnelStart::Started(record) => {
            emit(out, &active_forward_lines(&ip, &ports))?;
            writeln!(out, "PID: {}", record.pid)?;
            writeln!(
                out,
                "Running in background. Use 'dock portforward --stop' to stop."
            )?;
        }
        TunnelStart::AlreadyRunning(record) => {
            emit(out, &running_tunnel_lines("Port forwarding is already running:", &record))?;
        }
    }
    Ok(0)
}

pub(super) fn configure<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    args: &ConfigureCommand,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let ip = running_ip(ws, "configure SSH server")?;
    let remote = ws.remote();
    if !args.show {
        let dock = ws.dock();
        emit(
            out,
            &[
                String::from("Configuring remote SSH server..."),
                format!("  MaxStartups: {}", dock.ssh_max_startups),
                format!("  MaxSessions: {}", dock.ssh_max_sessions),
                String::new(),
            ],
        )?;
        remote.configure_sshd(&ip, &dock.ssh_max_startups, dock.ssh_max_sessions)?;
        writeln!(out, "SSH server configured successfully.")?;
        writeln!(out)?;
    }
    writeln!(out, "Remote SSH config:")?;
    match remote.sshd_settings(&ip) {
        Some(settings) => writeln!(out, "{settings}")?,
        None => writeln!(out, "  Could not read remote SSH config")?,
    }
    Ok(0)
}

pub(super) async fn connection<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    args: &ConnectionCommand,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let autopilot = ws.autopilot()?;
    let lines = if args.refresh {
        let ip = running_ip(ws, "refresh")?;
        autopilot.refresh(&ip).await?
    } else if args.clean {
        autopilot.clean()?
    } else {
        autopilot.connection_status(&current_state(ws)?)?
    };
    emit(out, &lines)?;
    Ok(0)
}

pub(super) fn init<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    args: &InitCommand,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let autopilot = ws.autopilot()?;
    let integration = autopilot.integration();
    let rc = integration.rc_file();

    if args.remove {
        if integration.remove()? {
            writeln!(out, "Shell integration removed from {rc}")?;
        } else {
            writeln!(out, "No shell integration found in {rc}")?;
        }
        return Ok(0);
    }

    autopilot.write_init()?;
    if integration.is_installed()? {
        writeln!(out, "Shell integration is already installed.")?;
        writeln!(out, "Config file: {rc}")?;
        return Ok(0);
    }
    writeln!(out, "This will add the following to {rc}:")?;
    writeln!(out, "{}", integration.snippet())?;
    integration.install()?;
    emit(
        out,
        &[
            String::from("Shell integration installed successfully."),
            String::new(),
            String::from("Restart your shell or run:"),
            format!("  source {rc}"),
        ],
    )?;
    Ok(0)
}
