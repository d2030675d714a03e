//! Tests for analytics recording and reporting.

use super::*;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Harness {
    _tmp: TempDir,
    log: AnalyticsLog,
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8");
    Harness {
        log: AnalyticsLog::new(root.join("analytics.csv")),
        _tmp: tmp,
    }
}

fn meta() -> TrackMeta {
    TrackMeta {
        instance_type: String::from("DEV1-M"),
        instance_image: String::new(),
        zone: String::from("fr-par-1"),
    }
}

fn entry(command: &str, duration: &str, status: &str) -> AnalyticsEntry {
    AnalyticsEntry {
        start_timestamp: String::from("2026-03-01T10:00:00.000Z"),
        command: command.to_owned(),
        instance_type: String::from("DEV1-M"),
        instance_image: String::from("auto"),
        zone: String::from("fr-par-1"),
        duration: duration.to_owned(),
        status: status.to_owned(),
    }
}

#[rstest]
#[case(0, "00:00:00")]
#[case(59, "00:00:59")]
#[case(3_725, "01:02:05")]
#[case(360_000, "100:00:00")]
fn durations_render_as_clock(#[case] seconds: u64, #[case] expected: &str) {
    assert_eq!(format_duration(seconds), expected);
}

#[rstest]
#[case("01:02:05", 3_725)]
#[case("garbage", 0)]
#[case("10:00", 0)]
fn durations_parse_back(#[case] raw: &str, #[case] expected: u64) {
    assert_eq!(parse_duration(raw), expected);
}

#[tokio::test]
async fn successful_operation_is_recorded_with_auto_image() {
    let harness = harness();
    let tracked = track(&harness.log, TrackedCommand::Create, &meta(), async {
        Ok::<_, String>(42)
    })
    .await;

    assert_eq!(tracked.result, Ok(42));
    assert!(tracked.summary.starts_with("\u{2705} Instance created successfully in 00:00:"));

    let content = std::fs::read_to_string(harness.log.path()).expect("csv");
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some(HEADER));
    let row = lines.next().expect("row");
    assert!(row.ends_with(",create,DEV1-M,auto,fr-par-1,00:00:00,success"));
}

#[tokio::test]
async fn failed_operation_is_recorded_and_error_returned() {
    let harness = harness();
    let tracked = track(&harness.log, TrackedCommand::Stop, &meta(), async {
        Err::<(), _>(String::from("boom"))
    })
    .await;

    assert_eq!(tracked.result, Err(String::from("boom")));
    assert_eq!(tracked.summary, "\u{274C} Command failed after 00:00:00");
    let entries = harness.log.entries().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries.first().map(|e| e.status.as_str()), Some("error"));
}

#[tokio::test]
async fn unwritable_log_does_not_mask_result() {
    let log = AnalyticsLog::new("/nonexistent-dir/for/dock/analytics.csv");
    let tracked = track(&log, TrackedCommand::Start, &meta(), async {
        Ok::<_, String>(())
    })
    .await;
    assert!(tracked.result.is_ok());
    assert!(tracked.summary.contains("Instance started"));
}

#[rstest]
fn header_is_written_once(harness: Harness) {
    harness.log.append(&entry("start", "00:01:00", "success")).expect("first");
    harness.log.append(&entry("stop", "00:00:30", "success")).expect("second");

    let content = std::fs::read_to_string(harness.log.path()).expect("csv");
    assert_eq!(content.matches("startTimestamp").count(), 1);
    assert_eq!(harness.log.entries().expect("entries").len(), 2);
}

#[rstest]
fn missing_file_has_no_entries(harness: Harness) {
    assert!(harness.log.entries().expect("entries").is_empty());
}

#[rstest]
fn stats_aggregate_counts_durations_and_success() {
    let entries = vec![
        entry("create", "00:05:00", "success"),
        entry("create", "00:03:00", "error"),
        entry("create", "00:04:01", "success"),
        entry("start", "00:01:00", "success"),
    ];
    let stats = stats_for(&entries, TrackedCommand::Create);
    assert_eq!(
        stats,
        CommandStats {
            count: 3,
            total_seconds: 721,
            successes: 2,
        }
    );
    assert_eq!(stats.average_seconds(), 240);
    assert_eq!(stats.success_rate(), 67);
    assert_eq!(stats_for(&entries, TrackedCommand::Destroy).count, 0);
}

#[rstest]
fn summary_skips_unused_commands() {
    let entries = vec![
        entry("create", "00:05:00", "success"),
        entry("stop", "00:00:20", "success"),
    ];
    let summary = render_summary(&entries);
    assert!(summary.starts_with("Dock Analytics Summary"));
    assert!(summary.contains("create      1         00:05:00      00:05:00      100%"));
    assert!(summary.contains("stop        1"));
    assert!(!summary.contains("destroy "));
    assert!(summary.contains("Total operations: 2"));
}

#[rstest]
#[case(false, 10)]
#[case(true, 12)]
fn history_shows_recent_or_all(#[case] all: bool, #[case] rows: usize) {
    let entries: Vec<_> = (0..12)
        .map(|n| entry("start", &format!("00:00:{n:02}"), "success"))
        .collect();
    let history = render_history(&entries, all);
    assert_eq!(history.matches("start ").count(), rows);
    assert!(history.contains("00:00:11"));
    assert_eq!(history.contains("00:00:01"), all);
}
