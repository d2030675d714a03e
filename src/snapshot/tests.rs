//! Tests for the snapshot store and Scaleway snapshot workflow.

use super::*;
use crate::test_support::{ScriptedRunner, json_scw_server, sample_scaleway_config};
use chrono::TimeZone;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Harness {
    _tmp: TempDir,
    catalog: SnapshotCatalog,
    runner: ScriptedRunner,
}

impl Harness {
    fn provider(&self) -> ScalewayProvider<ScriptedRunner> {
        ScalewayProvider::new(sample_scaleway_config(), "scw", self.runner.clone())
            .expect("provider")
    }
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8");
    Harness {
        catalog: SnapshotCatalog::new(root.join("snapshots.json")),
        runner: ScriptedRunner::new(),
        _tmp: tmp,
    }
}

fn metadata(name: &str, instance_type: &str, zone: &str, created_at: &str) -> SnapshotMetadata {
    SnapshotMetadata {
        id: format!("snap-{name}"),
        name: name.to_owned(),
        image_id: format!("img-{name}"),
        created_at: created_at.to_owned(),
        instance_type: instance_type.to_owned(),
        base_image: String::from("auto"),
        zone: zone.to_owned(),
    }
}

#[rstest]
#[case("ubuntu_jammy", "DEV1-M-ubuntu-jammy-fr-par-1-20260210T120005")]
#[case("", "DEV1-M-auto-fr-par-1-20260210T120005")]
#[case("debian/12.x", "DEV1-M-debian-12-x-fr-par-1-20260210T120005")]
fn names_are_sanitised_and_timestamped(#[case] image: &str, #[case] expected: &str) {
    let at = Utc
        .with_ymd_and_hms(2026, 2, 10, 12, 0, 5)
        .single()
        .expect("valid time");
    assert_eq!(snapshot_name("DEV1-M", image, "fr-par-1", at), expected);
}

#[rstest]
fn store_uses_camel_case_wrapper(harness: Harness) {
    harness
        .catalog
        .add(metadata("a", "DEV1-M", "fr-par-1", "2026-01-01T00:00:00.000Z"))
        .expect("add");
    let raw = std::fs::read_to_string(harness.catalog.path()).expect("store");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value.pointer("/snapshots/0/imageId").and_then(|v| v.as_str()), Some("img-a"));
    assert!(value.pointer("/snapshots/0/createdAt").is_some());
}

#[rstest]
fn missing_store_is_empty(harness: Harness) {
    assert!(harness.catalog.list().expect("list").is_empty());
}

#[rstest]
fn corrupt_store_is_reported(harness: Harness) {
    std::fs::write(harness.catalog.path(), "{").expect("seed");
    assert!(matches!(
        harness.catalog.list(),
        Err(SnapshotError::Store { .. })
    ));
}

#[rstest]
fn latest_match_filters_by_type_and_zone(harness: Harness) {
    for snap in [
        metadata("old", "DEV1-M", "fr-par-1", "2026-01-01T00:00:00.000Z"),
        metadata("new", "DEV1-M", "fr-par-1", "2026-02-01T00:00:00.000Z"),
        metadata("mid", "DEV1-M", "fr-par-1", "2026-01-15T00:00:00.000Z"),
        metadata("other-zone", "DEV1-M", "nl-ams-1", "2026-03-01T00:00:00.000Z"),
        metadata("other-type", "GP1-S", "fr-par-1", "2026-03-01T00:00:00.000Z"),
    ] {
        harness.catalog.add(snap).expect("add");
    }

    let latest = harness
        .catalog
        .find_latest("DEV1-M", "fr-par-1")
        .expect("find")
        .expect("match");
    assert_eq!(latest.name, "new");
    assert_eq!(harness.catalog.find_latest("DEV1-L", "fr-par-1").expect("find"), None);
}

#[rstest]
fn resolve_prefers_requested_name(harness: Harness) {
    harness
        .catalog
        .add(metadata("pinned", "GP1-S", "fr-par-1", "2026-01-01T00:00:00.000Z"))
        .expect("add");

    let chosen = harness
        .catalog
        .resolve(Some("pinned"), "DEV1-M", "fr-par-1")
        .expect("resolve");
    assert_eq!(chosen.image_id, "img-pinned");

    assert_eq!(
        harness.catalog.resolve(Some("missing"), "DEV1-M", "fr-par-1"),
        Err(SnapshotError::NotFound {
            name: String::from("missing")
        })
    );
    assert!(matches!(
        harness.catalog.resolve(None, "DEV1-M", "fr-par-1"),
        Err(SnapshotError::NoMatch { .. })
    ));
}

#[rstest]
fn create_runs_volume_snapshot_then_image(harness: Harness) {
    harness
        .runner
        .push_stdout(json_scw_server("running", Some("51.0.0.1"), Some("vol-9")));
    harness.runner.push_stdout(r#"{"snapshot":{"id":"snap-9"}}"#);
    harness.runner.push_stdout(r#"{"image":{"id":"img-9"}}"#);

    let created = create(
        &harness.catalog,
        &harness.provider(),
        &InstanceRef::parse("fr-par-1/srv-1"),
    )
    .expect("create");

    assert_eq!(created.id, "snap-9");
    assert_eq!(created.image_id, "img-9");
    assert_eq!(created.base_image, "auto");
    assert!(created.name.starts_with("DEV1-M-auto-fr-par-1-"));
    let commands = harness.runner.command_strings();
    assert!(commands.get(1).is_some_and(|c| c.contains("snapshot create volume-id=vol-9")));
    assert!(commands.get(2).is_some_and(|c| c.contains("image create snapshot-id=snap-9")));
    assert_eq!(harness.catalog.list().expect("list"), vec![created]);
}

#[rstest]
fn create_requires_root_volume(harness: Harness) {
    harness
        .runner
        .push_stdout(json_scw_server("running", Some("51.0.0.1"), None));
    let err = create(
        &harness.catalog,
        &harness.provider(),
        &InstanceRef::parse("fr-par-1/srv-1"),
    )
    .expect_err("no volume");
    assert_eq!(
        err,
        SnapshotError::NoRootVolume {
            instance: String::from("srv-1")
        }
    );
}

#[rstest]
fn delete_tolerates_missing_provider_resources(harness: Harness) {
    harness
        .catalog
        .add(metadata("gone", "DEV1-M", "fr-par-1", "2026-01-01T00:00:00.000Z"))
        .expect("add");
    harness.runner.push_failure(1);
    harness.runner.push_failure(1);

    let removed = delete(&harness.catalog, &harness.provider(), "gone").expect("delete");

    assert_eq!(removed.name, "gone");
    assert!(harness.catalog.list().expect("list").is_empty());
    assert_eq!(
        harness.runner.command_strings(),
        vec![
            "scw instance image delete img-gone zone=fr-par-1 --force",
            "scw instance snapshot delete snap-gone zone=fr-par-1 --force",
        ]
    );
}

#[rstest]
fn delete_unknown_name_runs_nothing(harness: Harness) {
    assert!(matches!(
        delete(&harness.catalog, &harness.provider(), "nope"),
        Err(SnapshotError::NotFound { .. })
    ));
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
fn table_lists_rows_and_total() {
    let table = render_table(&[metadata("a", "DEV1-M", "fr-par-1", "2026-01-01T00:00:00.000Z")]);
    assert!(table.starts_with("Available Snapshots:"));
    assert!(table.contains("DEV1-M      fr-par-1    auto"));
    assert!(table.ends_with("Total: 1 snapshot(s)"));
    assert!(render_table(&[]).starts_with("No snapshots found."));
}
