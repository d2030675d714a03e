//! Tests for the provider adapters.

use super::scaleway::{parse_server, root_volume_id};
use super::*;
use crate::config::ScalewayConfig;
use crate::test_support::{
    ScriptedRunner, json_droplet, json_scw_server, sample_digitalocean_config,
    sample_dock_config, sample_scaleway_config,
};
use rstest::{fixture, rstest};
use serde_json::json;

#[fixture]
fn runner() -> ScriptedRunner {
    ScriptedRunner::new()
}

fn scaleway(runner: &ScriptedRunner) -> ScalewayProvider<ScriptedRunner> {
    ScalewayProvider::new(sample_scaleway_config(), "scw", runner.clone()).expect("provider")
}

#[rstest]
#[case("fr-par-1/11111111-2222", Some("fr-par-1"), "11111111-2222")]
#[case("12345", None, "12345")]
#[case("/dangling", None, "/dangling")]
fn instance_refs_split_zone(
    #[case] raw: &str,
    #[case] zone: Option<&str>,
    #[case] id: &str,
) {
    let parsed = InstanceRef::parse(raw);
    assert_eq!(parsed.zone.as_deref(), zone);
    assert_eq!(parsed.id, id);
}

#[rstest]
fn default_zone_only_fills_gaps() {
    let qualified = InstanceRef::parse("nl-ams-1/abc").with_default_zone(Some(String::from("x")));
    assert_eq!(qualified.zone.as_deref(), Some("nl-ams-1"));
    let bare = InstanceRef::parse("abc").with_default_zone(Some(String::from("fr-par-2")));
    assert_eq!(bare.zone.as_deref(), Some("fr-par-2"));
}

#[rstest]
fn describe_passes_credentials_and_zone(runner: ScriptedRunner) {
    runner.push_stdout(json_scw_server("running", Some("51.15.9.9"), Some("vol-1")));

    let info = scaleway(&runner)
        .describe(&InstanceRef::parse("fr-par-2/abc"))
        .expect("describe");

    assert_eq!(info.status, "running");
    assert_eq!(info.public_ip.as_deref(), Some("51.15.9.9"));
    assert_eq!(info.root_volume_id.as_deref(), Some("vol-1"));
    let invocation = runner.invocations().remove(0);
    assert_eq!(
        invocation.command_string(),
        "scw instance server get abc zone=fr-par-2 -o json"
    );
    assert_eq!(invocation.env("SCW_ACCESS_KEY"), Some("SCWACCESS"));
    assert_eq!(invocation.env("SCW_DEFAULT_ORGANIZATION_ID"), Some("project-1"));
}

#[rstest]
fn describe_failure_surfaces_stderr(runner: ScriptedRunner) {
    runner.push_failure(1);
    let err = scaleway(&runner)
        .describe(&InstanceRef::parse("abc"))
        .expect_err("describe should fail");
    assert!(err.to_string().contains("simulated failure"), "{err}");
}

#[rstest]
fn legacy_public_ip_field_is_used_as_fallback() {
    let raw = json!({
        "state": "running",
        "public_ips": [],
        "public_ip": {"address": "163.172.1.1"},
    })
    .to_string();
    let info = parse_server(&raw).expect("parse");
    assert_eq!(info.public_ip.as_deref(), Some("163.172.1.1"));
}

#[rstest]
fn wrapped_server_objects_are_unwrapped() {
    let raw = json!({"server": {"state": "stopped", "public_ip": null}}).to_string();
    let info = parse_server(&raw).expect("parse");
    assert_eq!(info.status, "stopped");
    assert_eq!(info.public_ip, None);
}

#[rstest]
#[case::indexed_map(json!({"volumes": {"0": {"id": "v-map"}}}), Some("v-map"))]
#[case::array(json!({"volumes": [{"id": "v-array"}]}), Some("v-array"))]
#[case::root_volume(json!({"volumes": {}, "root_volume": {"id": "v-root"}}), Some("v-root"))]
#[case::image_root(json!({"image": {"root_volume": {"id": "v-image"}}}), Some("v-image"))]
#[case::none(json!({"volumes": {}}), None)]
fn root_volume_lookup_order(#[case] server: serde_json::Value, #[case] expected: Option<&str>) {
    assert_eq!(root_volume_id(&server).as_deref(), expected);
}

#[rstest]
fn shutdown_falls_back_to_terminate(runner: ScriptedRunner) {
    runner.push_failure(1);
    runner.push_success();

    scaleway(&runner)
        .shutdown(&InstanceRef::parse("fr-par-1/abc"))
        .expect("fallback should succeed");

    assert_eq!(
        runner.command_strings(),
        vec![
            "scw instance server action poweroff abc zone=fr-par-1 --wait",
            "scw instance server action terminate abc zone=fr-par-1 --wait",
        ]
    );
}

#[rstest]
fn power_on_waits(runner: ScriptedRunner) {
    runner.push_success();
    scaleway(&runner)
        .power_on(&InstanceRef::parse("abc"))
        .expect("power on");
    assert_eq!(
        runner.command_strings(),
        vec!["scw instance server action poweron abc zone=fr-par-1 --wait"]
    );
}

#[rstest]
#[case("running", EnvironmentState::Running)]
#[case("stopped", EnvironmentState::Stopped)]
#[case("stopped in place", EnvironmentState::Stopped)]
#[case("starting", EnvironmentState::Provisioning)]
#[case("stopping", EnvironmentState::Provisioning)]
#[case("locked", EnvironmentState::Provisioning)]
#[case("archived", EnvironmentState::Absent)]
fn scaleway_status_mapping(
    runner: ScriptedRunner,
    #[case] status: &str,
    #[case] expected: EnvironmentState,
) {
    assert_eq!(scaleway(&runner).map_status(status), expected);
}

#[rstest]
fn snapshot_and_image_ids_are_read_from_nested_objects(runner: ScriptedRunner) {
    runner.push_stdout(json!({"snapshot": {"id": "snap-1"}, "task": {}}).to_string());
    runner.push_stdout(json!({"id": "img-1"}).to_string());
    let provider = scaleway(&runner);

    let snapshot = provider
        .create_snapshot("vol-1", "DEV1-M-auto", "fr-par-1")
        .expect("snapshot");
    let image = provider
        .create_image(&snapshot, "DEV1-M-auto", "fr-par-1")
        .expect("image");

    assert_eq!((snapshot.as_str(), image.as_str()), ("snap-1", "img-1"));
    let commands = runner.command_strings();
    assert_eq!(
        commands.first().map(String::as_str),
        Some("scw instance snapshot create volume-id=vol-1 name=DEV1-M-auto zone=fr-par-1 -o json --wait")
    );
    assert!(
        commands
            .get(1)
            .is_some_and(|cmd| cmd.contains("snapshot-id=snap-1") && cmd.contains("arch=x86_64"))
    );
}

#[rstest]
fn scaleway_vars_skip_auto_image(runner: ScriptedRunner) {
    let vars = scaleway(&runner).terraform_vars(&sample_dock_config());
    let args = vars.to_args();
    assert!(!args.iter().any(|arg| arg.starts_with("-var=instance_image=")));
    for expected in [
        "-var=scw_project_id=project-1",
        "-var=ssh_max_sessions=100",
        "-var=use_reserved_ip=false",
    ] {
        assert!(args.iter().any(|arg| arg == expected), "missing {expected}");
    }
}

#[rstest]
fn missing_credentials_fail_construction(runner: ScriptedRunner) {
    let config = ScalewayConfig {
        secret_key: None,
        ..sample_scaleway_config()
    };
    let result = ScalewayProvider::new(config, "scw", runner);
    assert!(matches!(result, Err(ProviderError::Config(_))));
}

#[rstest]
fn digitalocean_describe_and_shutdown_fallback(runner: ScriptedRunner) {
    runner.push_stdout(json_droplet("active", Some("164.90.1.2")));
    runner.push_failure(1);
    runner.push_success();
    let provider =
        DigitalOceanProvider::new(sample_digitalocean_config(), "doctl", runner.clone())
            .expect("provider");
    let droplet = InstanceRef::parse("123");

    let info = provider.describe(&droplet).expect("describe");
    provider.shutdown(&droplet).expect("shutdown");

    assert_eq!(provider.map_status(&info.status), EnvironmentState::Running);
    assert_eq!(
        runner.command_strings(),
        vec![
            "doctl compute droplet get 123 -o json",
            "doctl compute droplet-action shutdown 123 --wait",
            "doctl compute droplet-action power-off 123 --wait",
        ]
    );
    assert_eq!(
        runner.invocations().remove(0).env("DIGITALOCEAN_ACCESS_TOKEN"),
        Some("do-token")
    );
}

#[rstest]
#[case("active", EnvironmentState::Running)]
#[case("off", EnvironmentState::Stopped)]
#[case("new", EnvironmentState::Provisioning)]
#[case("archive", EnvironmentState::Destroyed)]
#[case("mystery", EnvironmentState::Absent)]
fn digitalocean_status_mapping(
    runner: ScriptedRunner,
    #[case] status: &str,
    #[case] expected: EnvironmentState,
) {
    let provider =
        DigitalOceanProvider::new(sample_digitalocean_config(), "doctl", runner).expect("provider");
    assert_eq!(provider.map_status(status), expected);
}
