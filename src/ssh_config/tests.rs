//! Tests for the managed SSH config block and master connection.

use std::os::unix::fs::PermissionsExt;

use super::*;
use crate::test_support::{InvocationMode, ScriptedRunner, sample_dock_config};
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Harness {
    _tmp: TempDir,
    runner: ScriptedRunner,
    master: ControlMaster<ScriptedRunner>,
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().expect("tempdir");
    let home = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8");
    let runner = ScriptedRunner::new();
    let master = ControlMaster::new(
        SshConfigPaths::for_home(&home),
        SshSettings::from_config(&sample_dock_config()),
        runner.clone(),
    );
    Harness {
        _tmp: tmp,
        runner,
        master,
    }
}

fn read_config(harness: &Harness) -> String {
    std::fs::read_to_string(&harness.master.paths().config_file).expect("read config")
}

#[rstest]
fn strip_block_removes_markers_and_collapses_blank_lines() {
    let content = format!(
        "Host a\n  User x\n\n\n{}\n\n\nHost b\n",
        render_block("1.1.1.1", "root", "/k", "/s/dock-%r@%h-%p")
    );
    assert_eq!(strip_block(&content), "Host a\n  User x\n\nHost b\n");
}

#[rstest]
fn strip_block_ignores_unterminated_blocks() {
    let content = format!("{MARKER_START}\nHost dock\n");
    assert_eq!(strip_block(&content), content);
}

#[rstest]
fn write_config_preserves_other_hosts_and_replaces_block(harness: Harness) {
    let paths = harness.master.paths().clone();
    std::fs::create_dir_all(&paths.ssh_dir).expect("mkdir");
    std::fs::write(&paths.config_file, "Host work\n  User me\n").expect("seed");

    harness.master.write_config("1.1.1.1").expect("first write");
    harness.master.write_config("2.2.2.2").expect("second write");

    let config = read_config(&harness);
    assert!(config.starts_with("Host work\n  User me\n\n# dock-managed-start"));
    assert_eq!(config.matches(MARKER_START).count(), 1);
    assert!(config.contains("HostName 2.2.2.2"));
    assert!(!config.contains("1.1.1.1"));
    assert!(config.contains(&format!("ControlPath {}", paths.control_path())));

    let mode = std::fs::metadata(&paths.config_file)
        .expect("metadata")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
    let dir_mode = std::fs::metadata(&paths.sockets_dir)
        .expect("metadata")
        .permissions()
        .mode();
    assert_eq!(dir_mode & 0o777, 0o700);
}

#[rstest]
fn remove_config_reports_whether_anything_changed(harness: Harness) {
    assert!(!harness.master.remove_config().expect("no config"));
    harness.master.write_config("1.1.1.1").expect("write");
    let socket = harness.master.paths().sockets_dir.join("dock-root@1.1.1.1-22");
    std::fs::write(&socket, "").expect("fake socket");

    assert!(harness.master.remove_config().expect("remove"));
    assert!(!read_config(&harness).contains(MARKER_START));
    assert!(!socket.exists());
    assert!(!harness.master.remove_config().expect("second remove"));
}

#[rstest]
fn show_extracts_block(harness: Harness) {
    assert_eq!(harness.master.show().expect("show"), None);
    harness.master.write_config("3.3.3.3").expect("write");
    let block = harness.master.show().expect("show").expect("block");
    assert!(block.starts_with(MARKER_START));
    assert!(block.ends_with(MARKER_END));
}

#[rstest]
fn start_master_runs_backgrounded_ssh(harness: Harness) {
    harness.runner.push_success();
    harness.master.start_master("4.4.4.4").expect("start");

    let invocation = harness.runner.invocations().remove(0);
    assert_eq!(invocation.mode, InvocationMode::Interactive);
    assert_eq!(
        invocation.command_string(),
        format!(
            "ssh -f -N -M -o ControlPath={} dock",
            harness.master.paths().control_path()
        )
    );
}

#[rstest]
fn start_master_failure_is_reported(harness: Harness) {
    harness.runner.push_failure(255);
    let err = harness
        .master
        .start_master("4.4.4.4")
        .expect_err("should fail");
    assert_eq!(
        err,
        SshConfigError::MasterFailed {
            status: String::from("255")
        }
    );
}

#[rstest]
fn stop_master_tolerates_missing_master_and_cleans_sockets(harness: Harness) {
    let sockets = harness.master.paths().sockets_dir.clone();
    std::fs::create_dir_all(&sockets).expect("mkdir");
    std::fs::write(sockets.join("dock-root@h-22"), "").expect("socket");
    std::fs::write(sockets.join("other"), "").expect("other");
    harness.runner.push_failure(255);

    harness.master.stop_master().expect("stop");

    assert!(harness.runner.command_strings().remove(0).contains("-O exit"));
    assert!(!sockets.join("dock-root@h-22").exists());
    assert!(sockets.join("other").exists());
}

#[rstest]
fn check_master_without_socket_skips_ssh(harness: Harness) {
    assert_eq!(
        harness.master.check_master().expect("check"),
        MasterStatus::NotRunning
    );
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
#[case::alive(Some(0), true)]
#[case::stale(Some(255), false)]
fn check_master_probes_socket(harness: Harness, #[case] code: Option<i32>, #[case] alive: bool) {
    let sockets = harness.master.paths().sockets_dir.clone();
    std::fs::create_dir_all(&sockets).expect("mkdir");
    let socket = sockets.join("dock-root@h-22");
    std::fs::write(&socket, "").expect("socket");
    harness.runner.push_output(code, "", "");

    let status = harness.master.check_master().expect("check");

    if alive {
        assert_eq!(status, MasterStatus::Active(socket));
    } else {
        assert_eq!(status, MasterStatus::Stale);
        assert!(!socket.exists());
    }
}

#[rstest]
fn blank_run_pattern_compiles() {
    assert!(BLANK_RUNS.is_some());
}
