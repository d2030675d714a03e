//! Usage analytics for lifecycle commands.
//!
//! Each tracked command appends one row to `~/.dock/analytics.csv`, whether
//! it succeeds or fails. The `analytics` command reads the file back and
//! renders either per-command totals or the recent history.

use std::future::Future;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use tracing::warn;

use crate::files::{self, FsError};

/// First line of the CSV file.
pub const HEADER: &str = "startTimestamp,command,instanceType,instanceImage,zone,duration,status";

const RECENT_ROWS: usize = 10;
const SUMMARY_RULE: usize = 60;
const HISTORY_RULE: usize = 80;

/// Commands whose duration is recorded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrackedCommand {
    /// `dock create`.
    Create,
    /// `dock start`.
    Start,
    /// `dock stop`.
    Stop,
    /// `dock destroy`.
    Destroy,
}

impl TrackedCommand {
    /// All tracked commands in summary order.
    pub const ALL: [Self; 4] = [Self::Create, Self::Start, Self::Stop, Self::Destroy];

    /// Name written to the CSV.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Destroy => "destroy",
        }
    }

    const fn emoji(self) -> &'static str {
        match self {
            Self::Create => "\u{2705}",
            Self::Start => "\u{25B6}\u{FE0F}",
            Self::Stop => "\u{1F6D1}",
            Self::Destroy => "\u{1F5D1}\u{FE0F}",
        }
    }

    const fn message(self) -> &'static str {
        match self {
            Self::Create => "Instance created successfully",
            Self::Start => "Instance started",
            Self::Stop => "Instance stopped",
            Self::Destroy => "Instance destroyed",
        }
    }
}

/// Instance attributes recorded with each row.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrackMeta {
    /// Instance type or droplet size.
    pub instance_type: String,
    /// Base image; empty means provider default.
    pub instance_image: String,
    /// Zone or region.
    pub zone: String,
}

/// One CSV row.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AnalyticsEntry {
    /// RFC 3339 start time.
    pub start_timestamp: String,
    /// Command name.
    pub command: String,
    /// Instance type.
    pub instance_type: String,
    /// Image, `auto` for the provider default.
    pub instance_image: String,
    /// Zone or region.
    pub zone: String,
    /// `HH:MM:SS`.
    pub duration: String,
    /// `success` or `error`.
    pub status: String,
}

impl AnalyticsEntry {
    fn to_csv(&self) -> String {
        [
            self.start_timestamp.as_str(),
            &self.command,
            &self.instance_type,
            &self.instance_image,
            &self.zone,
            &self.duration,
            &self.status,
        ]
        .join(",")
    }

    fn from_csv(line: &str) -> Self {
        let mut fields = line.split(',').map(str::to_owned);
        let mut next = || fields.next().unwrap_or_default();
        Self {
            start_timestamp: next(),
            command: next(),
            instance_type: next(),
            instance_image: next(),
            zone: next(),
            duration: next(),
            status: next(),
        }
    }
}

/// Formats whole seconds as `HH:MM:SS`.
#[must_use]
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds.div_euclid(3600);
    let minutes = seconds.rem_euclid(3600).div_euclid(60);
    let secs = seconds.rem_euclid(60);
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// Parses `HH:MM:SS`; anything else counts as zero.
#[must_use]
pub fn parse_duration(raw: &str) -> u64 {
    let parts: Vec<u64> = raw
        .split(':')
        .map(|part| part.trim().parse().unwrap_or(0))
        .collect();
    match parts.as_slice() {
        [hours, minutes, seconds] => hours * 3600 + minutes * 60 + seconds,
        _ => 0,
    }
}

/// The analytics CSV file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AnalyticsLog {
    path: Utf8PathBuf,
}

impl AnalyticsLog {
    /// Log stored at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// CSV location.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Appends `entry`, writing the header first for a new file.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the file cannot be written.
    pub fn append(&self, entry: &AnalyticsEntry) -> Result<(), FsError> {
        if !files::exists(&self.path)? {
            files::write(&self.path, format!("{HEADER}\n"))?;
        }
        files::append(&self.path, &format!("{}\n", entry.to_csv()))
    }

    /// Rows in file order; empty when the file is missing.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the file cannot be read.
    pub fn entries(&self) -> Result<Vec<AnalyticsEntry>, FsError> {
        let Some(content) = files::read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        Ok(content
            .lines()
            .skip(1)
            .filter(|line| !line.trim().is_empty())
            .map(AnalyticsEntry::from_csv)
            .collect())
    }
}

/// Result of a tracked operation plus the line to show the user.
#[derive(Debug)]
pub struct Tracked<T, E> {
    /// The operation's own result, unchanged.
    pub result: Result<T, E>,
    /// `<emoji> <message> in HH:MM:SS` or the failure line.
    pub summary: String,
}

/// Times `operation` and records a row for it.
///
/// Recording failures are logged and never mask the operation's result.
pub async fn track<T, E, F>(
    log: &AnalyticsLog,
    command: TrackedCommand,
    meta: &TrackMeta,
    operation: F,
) -> Tracked<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let start_timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let started = Instant::now();
    let result = operation.await;
    let duration = format_duration(started.elapsed().as_secs());

    let status = if result.is_ok() { "success" } else { "error" };
    let entry = AnalyticsEntry {
        start_timestamp,
        command: command.as_str().to_owned(),
        instance_type: meta.instance_type.clone(),
        instance_image: if meta.instance_image.is_empty() {
            String::from("auto")
        } else {
            meta.instance_image.clone()
        },
        zone: meta.zone.clone(),
        duration: duration.clone(),
        status: status.to_owned(),
    };
    if let Err(err) = log.append(&entry) {
        warn!(path = %log.path(), error = %err, "could not record analytics");
    }

    let summary = if result.is_ok() {
        format!("{} {} in {duration}", command.emoji(), command.message())
    } else {
        format!("\u{274C} Command failed after {duration}")
    };
    Tracked { result, summary }
}

/// Per-command totals.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CommandStats {
    /// Number of runs.
    pub count: u64,
    /// Sum of durations in seconds.
    pub total_seconds: u64,
    /// Number of successful runs.
    pub successes: u64,
}

impl CommandStats {
    /// Mean duration in whole seconds.
    #[must_use]
    pub const fn average_seconds(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_seconds.div_euclid(self.count)
        }
    }

    /// Success rate rounded to a whole percentage.
    #[must_use]
    pub const fn success_rate(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            (self.successes * 200 + self.count).div_euclid(self.count * 2)
        }
    }
}

/// Aggregates `entries` for `command`.
#[must_use]
pub fn stats_for(entries: &[AnalyticsEntry], command: TrackedCommand) -> CommandStats {
    entries
        .iter()
        .filter(|entry| entry.command == command.as_str())
        .fold(CommandStats::default(), |mut stats, entry| {
            stats.count += 1;
            stats.total_seconds += parse_duration(&entry.duration);
            if entry.status == "success" {
                stats.successes += 1;
            }
            stats
        })
}

/// Renders the per-command summary table.
#[must_use]
pub fn render_summary(entries: &[AnalyticsEntry]) -> String {
    let rule = "\u{2500}".repeat(SUMMARY_RULE);
    let mut lines = vec![
        String::from("Dock Analytics Summary"),
        rule.clone(),
        format!(
            "{:<12}{:<10}{:<14}{:<14}Success Rate",
            "Command", "Count", "Total Time", "Avg Time"
        ),
        rule.clone(),
    ];
    for command in TrackedCommand::ALL {
        let stats = stats_for(entries, command);
        if stats.count == 0 {
            continue;
        }
        lines.push(format!(
            "{:<12}{:<10}{:<14}{:<14}{}%",
            command.as_str(),
            stats.count,
            format_duration(stats.total_seconds),
            format_duration(stats.average_seconds()),
            stats.success_rate()
        ));
    }
    lines.push(rule);
    lines.push(String::new());
    lines.push(format!("Total operations: {}", entries.len()));
    lines.push(String::new());
    lines.push(String::from(
        "Use 'dock analytics --last' to see recent operations",
    ));
    lines.push(String::from("Use 'dock analytics --all' to see all operations"));
    lines.join("\n")
}

fn local_time(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp).map_or_else(
        |_| timestamp.to_owned(),
        |at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

/// Renders the history table: the last ten rows, or every row with `all`.
#[must_use]
pub fn render_history(entries: &[AnalyticsEntry], all: bool) -> String {
    let shown = if all {
        entries.len()
    } else {
        RECENT_ROWS.min(entries.len())
    };
    let rule = "\u{2500}".repeat(HISTORY_RULE);
    let mut lines = vec![
        String::from("Recent Operations:"),
        rule.clone(),
        format!(
            "{:<22}{:<10}{:<12}{:<12}{:<12}Status",
            "Timestamp", "Command", "Type", "Zone", "Duration"
        ),
        rule.clone(),
    ];
    lines.extend(entries.iter().skip(entries.len().saturating_sub(shown)).map(|entry| {
        format!(
            "{:<22}{:<10}{:<12}{:<12}{:<12}{}",
            local_time(&entry.start_timestamp),
            entry.command,
            entry.instance_type,
            entry.zone,
            entry.duration,
            entry.status
        )
    }));
    lines.push(rule);
    lines.join("\n")
}

#[cfg(test)]
mod tests;
