//! Local bookkeeping: env file, analytics, snapshots, upgrades, version
//! and shell completions.

use std::io::Write;

use camino::Utf8Path;

use super::{CommandError, current_state, emit, instance_ref};
use crate::analytics::{self, AnalyticsLog};
use crate::cli::{
    AnalyticsCommand, AutocompleteCommand, EnvCommand, SnapshotCommand, UpgradeCommand,
};
use crate::completions::{self, Completions};
use crate::config::env_file::{self, EnvFile};
use crate::files;
use crate::home::DockHome;
use crate::process::CommandRunner;
use crate::shell::ShellKind;
use crate::snapshot;
use crate::state;
use crate::upgrade::{self, CURRENT_VERSION, RELEASES_PAGE};
use crate::workspace::Workspace;

pub(super) fn version(out: &mut dyn Write) -> Result<i32, CommandError> {
    writeln!(out, "dock {CURRENT_VERSION}")?;
    Ok(0)
}

pub(super) fn env(
    home: &DockHome,
    args: &EnvCommand,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let file = EnvFile::new(home.env_file());
    if let Some(assignments) = &args.set {
        let updated = file.set(assignments)?;
        writeln!(out, "Environment variables updated:")?;
        for entry in updated {
            writeln!(out, "  {}={}", entry.key, entry.value)?;
        }
        return Ok(0);
    }
    if let Some(keys) = &args.unset {
        let removed = file.unset(keys)?;
        if removed.is_empty() {
            writeln!(out, "No matching keys found to remove.")?;
            return Ok(0);
        }
        writeln!(out, "Environment variables removed:")?;
        for key in removed {
            writeln!(out, "  {key}")?;
        }
        return Ok(0);
    }
    writeln!(out, "{}", env_file::render_table(&file.entries()?))?;
    Ok(0)
}

pub(super) fn analytics(
    home: &DockHome,
    args: &AnalyticsCommand,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let entries = AnalyticsLog::new(home.analytics_file()).entries()?;
    if entries.is_empty() {
        writeln!(out, "No analytics data yet. Run some dock commands first.")?;
        return Ok(0);
    }
    let report = if args.last || args.all {
        analytics::render_history(&entries, args.all)
    } else {
        analytics::render_summary(&entries)
    };
    writeln!(out, "{report}")?;
    Ok(0)
}

pub(super) fn snapshot<R: CommandRunner + Clone + 'static>(
    ws: &Workspace<R>,
    args: &SnapshotCommand,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let catalog = ws.snapshots();
    if let Some(name) = &args.delete {
        let provider = ws.scaleway_provider("snapshots")?;
        writeln!(out, "Deleting snapshot: {name}...")?;
        snapshot::delete(&catalog, &provider, name)?;
        writeln!(out, "Snapshot deleted: {name}")?;
        return Ok(0);
    }
    if !args.create {
        writeln!(out, "{}", snapshot::render_table(&catalog.list()?))?;
        return Ok(0);
    }

    let provider = ws.scaleway_provider("snapshots")?;
    let status = current_state(ws)?;
    state::require_running(&status, "create snapshot")?;
    let instance = instance_ref(&status)?;
    writeln!(out, "\u{1F4F8} Creating snapshot from running instance...")?;
    let created = snapshot::create(&catalog, &provider, &instance)?;
    emit(
        out,
        &[
            String::new(),
            String::from("\u{2705} Snapshot created successfully!"),
            format!("  Name:     {}", created.name),
            format!("  Image ID: {}", created.image_id),
            format!("  Zone:     {}", created.zone),
            String::new(),
            String::from("To create a new environment from this snapshot:"),
            format!("  dock create --snapshot {}", created.name),
            String::new(),
            String::from("Or use the latest snapshot for the configured type and zone:"),
            String::from("  dock create --snapshot"),
        ],
    )?;
    Ok(0)
}

pub(super) async fn upgrade(
    home: &DockHome,
    args: &UpgradeCommand,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    writeln!(out, "Current version: {CURRENT_VERSION}")?;
    writeln!(out, "Checking for updates...")?;
    let info = upgrade::check().await?;
    if !info.update_available {
        writeln!(
            out,
            "You're already on the latest version ({})",
            info.latest_version
        )?;
        return Ok(0);
    }
    writeln!(out, "New version available: {}", info.latest_version)?;
    if args.check {
        writeln!(out)?;
        writeln!(out, "Run 'dock upgrade' to install the update.")?;
        writeln!(out, "Release notes: {RELEASES_PAGE}")?;
        return Ok(0);
    }

    let tmp = home.tmp_dir();
    files::create_dir_all(&tmp)?;
    writeln!(out, "Downloading {}...", info.asset)?;
    let installed = upgrade::install(&info, &tmp).await?;
    writeln!(out, "Upgraded dock to {} at {installed}", info.latest_version)?;
    Ok(0)
}

pub(super) fn autocomplete(
    home: &DockHome,
    user_home: &Utf8Path,
    args: &AutocompleteCommand,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    let shell = completions::select_shell(args.bash, args.zsh, ShellKind::detect())?;
    let rc_file = shell.rc_file(user_home)?;
    let lines = Completions::new(home.completions_dir()).install(shell, &rc_file, args.generate)?;
    emit(out, &lines)?;
    Ok(0)
}
