//! Editing of the dock home `.env` file behind `dock env`.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt::Write as _;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::files::{self, FsError};

/// Defaults shown by `dock env --list` when not overridden.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("SCW_REGION", "fr-par"),
    ("SCW_ZONE", "fr-par-1"),
    ("SCW_INSTANCE_TYPE", "DEV1-M"),
    ("SCW_INSTANCE_IMAGE", "(auto)"),
    ("SCW_INSTANCE_NAME", "dock-env"),
    ("DOCK_PROVIDER", "scaleway"),
    ("DOCK_KUBERNETES_ENGINE", "k3s"),
    ("DOCK_USE_RESERVED_IP", "false"),
    ("DOCK_FORWARD_PORTS", super::DEFAULT_FORWARD_PORTS),
    ("DOCK_SSH_MAX_STARTUPS", "100:30:200"),
    ("DOCK_SSH_MAX_SESSIONS", "100"),
    ("DOCK_AUTO_PILOT", "true"),
];

const MAX_VALUE_WIDTH: usize = 42;
const SOURCE_WIDTH: usize = 10;

/// One `KEY=value` line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvEntry {
    /// Variable name.
    pub key: String,
    /// Unquoted value.
    pub value: String,
}

/// Errors raised while editing the dotenv file.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EnvFileError {
    /// Raised for assignments without `=` or with an empty key.
    #[error("invalid format: {pair} (expected KEY=value)")]
    InvalidAssignment {
        /// Offending fragment.
        pair: String,
    },
    /// Raised when no keys or assignments were supplied.
    #[error("nothing to {action}: pass a comma separated list")]
    Empty {
        /// `set` or `unset`.
        action: &'static str,
    },
    /// Raised when the file cannot be read or written.
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Handle on the `.env` file and its backup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvFile {
    path: Utf8PathBuf,
    backup: Utf8PathBuf,
}

impl EnvFile {
    /// Creates a handle for `path`, backing up to `path.backup`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        let file = path.into();
        let backup = Utf8PathBuf::from(format!("{file}.backup"));
        Self { path: file, backup }
    }

    /// Reads all entries; a missing file has none.
    ///
    /// # Errors
    ///
    /// Returns [`EnvFileError::Fs`] when the file cannot be read.
    pub fn entries(&self) -> Result<Vec<EnvEntry>, EnvFileError> {
        Ok(self
            .lines()?
            .into_iter()
            .filter_map(Line::into_entry)
            .collect())
    }

    /// Applies `KEY=value,KEY2=value2`, updating keys in place or appending.
    ///
    /// # Errors
    ///
    /// Returns [`EnvFileError`] for malformed input or I/O failures.
    pub fn set(&self, assignments: &str) -> Result<Vec<EnvEntry>, EnvFileError> {
        let updates = parse_assignments(assignments)?;
        let mut lines = self.lines()?;
        for update in &updates {
            let existing = lines.iter_mut().find_map(|line| match line {
                Line::Entry(entry) if entry.key == update.key => Some(entry),
                _ => None,
            });
            match existing {
                Some(entry) => entry.value.clone_from(&update.value),
                None => lines.push(Line::Entry(update.clone())),
            }
        }
        self.write(&lines)?;
        Ok(updates)
    }

    /// Removes `KEY1,KEY2`, returning the keys actually removed.
    ///
    /// # Errors
    ///
    /// Returns [`EnvFileError`] for empty input or I/O failures.
    pub fn unset(&self, keys: &str) -> Result<Vec<String>, EnvFileError> {
        let wanted: BTreeSet<&str> = keys
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .collect();
        if wanted.is_empty() {
            return Err(EnvFileError::Empty { action: "unset" });
        }

        let (removed, kept): (Vec<Line>, Vec<Line>) = self.lines()?.into_iter().partition(
            |line| matches!(line, Line::Entry(entry) if wanted.contains(entry.key.as_str())),
        );
        if removed.is_empty() {
            return Ok(Vec::new());
        }
        self.write(&kept)?;
        Ok(removed
            .into_iter()
            .filter_map(Line::into_entry)
            .map(|entry| entry.key)
            .collect())
    }

    fn lines(&self) -> Result<Vec<Line>, EnvFileError> {
        Ok(files::read_optional(&self.path)?
            .map(|content| content.lines().map(Line::parse).collect())
            .unwrap_or_default())
    }

    fn write(&self, lines: &[Line]) -> Result<(), EnvFileError> {
        if files::exists(&self.path)? {
            files::copy(&self.path, &self.backup)?;
        }
        let mut content = String::new();
        for line in lines {
            // Writing to a String cannot fail.
            match line {
                Line::Entry(entry) => {
                    writeln!(content, "{}={}", entry.key, quote(&entry.value)).ok()
                }
                Line::Verbatim(text) => writeln!(content, "{text}").ok(),
            };
        }
        files::write(&self.path, content)?;
        Ok(())
    }
}

/// A dotenv line: an assignment, or anything else kept as written.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Line {
    Entry(EnvEntry),
    Verbatim(String),
}

impl Line {
    fn parse(raw: &str) -> Self {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            return Self::Verbatim(raw.to_owned());
        }
        line.split_once('=').map_or_else(
            || Self::Verbatim(raw.to_owned()),
            |(key, value)| {
                Self::Entry(EnvEntry {
                    key: key.trim().to_owned(),
                    value: unquote(value.trim()).into_owned(),
                })
            },
        )
    }

    fn into_entry(self) -> Option<EnvEntry> {
        match self {
            Self::Entry(entry) => Some(entry),
            Self::Verbatim(_) => None,
        }
    }
}

/// Parses dotenv content, skipping blanks and comments and stripping quotes.
#[must_use]
pub fn parse_entries(content: &str) -> Vec<EnvEntry> {
    content
        .lines()
        .map(Line::parse)
        .filter_map(Line::into_entry)
        .collect()
}

fn unquote(value: &str) -> Cow<'_, str> {
    if let Some(inner) = value.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')) {
        return Cow::Borrowed(inner);
    }
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .map_or(Cow::Borrowed(value), |inner| Cow::Owned(unescape(inner)))
}

fn unescape(inner: &str) -> String {
    let mut unescaped = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(current) = chars.next() {
        if current != '\\' {
            unescaped.push(current);
            continue;
        }
        match chars.next() {
            Some('n') => unescaped.push('\n'),
            Some(escaped) => unescaped.push(escaped),
            None => unescaped.push('\\'),
        }
    }
    unescaped
}

const fn is_plain(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(ch, '-' | '_' | '.' | ',' | ':' | '/' | '@' | '+' | '%' | '~')
}

/// Renders `value` so dotenv loaders read it back unchanged.
///
/// Plain values stay bare. Anything else is single quoted (literal, no
/// `$` expansion) unless it contains a single quote or newline, in which
/// case it is double quoted with `\`, `"` and `$` escaped.
fn quote(value: &str) -> Cow<'_, str> {
    if value.chars().all(is_plain) {
        return Cow::Borrowed(value);
    }
    if !value.contains(['\'', '\n']) {
        return Cow::Owned(format!("'{value}'"));
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '"' | '\\' | '$' => {
                quoted.push('\\');
                quoted.push(ch);
            }
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('"');
    Cow::Owned(quoted)
}

/// Parses `KEY=value,KEY2=value2`.
///
/// # Errors
///
/// Returns [`EnvFileError::InvalidAssignment`] for fragments without `=` or
/// with an empty key, and [`EnvFileError::Empty`] for empty input.
pub fn parse_assignments(raw: &str) -> Result<Vec<EnvEntry>, EnvFileError> {
    if raw.trim().is_empty() {
        return Err(EnvFileError::Empty { action: "set" });
    }
    raw.split(',')
        .map(|pair| {
            let (key, value) =
                pair.split_once('=')
                    .ok_or_else(|| EnvFileError::InvalidAssignment {
                        pair: pair.to_owned(),
                    })?;
            let trimmed_key = key.trim();
            if trimmed_key.is_empty() {
                return Err(EnvFileError::InvalidAssignment {
                    pair: pair.to_owned(),
                });
            }
            Ok(EnvEntry {
                key: trimmed_key.to_owned(),
                value: value.trim().to_owned(),
            })
        })
        .collect()
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_owned();
    }
    let mut shortened: String = value.chars().take(width.saturating_sub(3)).collect();
    shortened.push_str("...");
    shortened
}

/// Renders the `dock env --list` table of configured values and defaults.
#[must_use]
pub fn render_table(entries: &[EnvEntry]) -> String {
    let key_width = entries
        .iter()
        .map(|entry| entry.key.len())
        .chain(DEFAULTS.iter().map(|(key, _)| key.len()))
        .fold(20, usize::max);
    let value_width = entries
        .iter()
        .map(|entry| entry.value.chars().count())
        .chain(DEFAULTS.iter().map(|(_, value)| value.len()))
        .fold(15, usize::max)
        .min(MAX_VALUE_WIDTH - 2);

    let divider = format!(
        "+{}+{}+{}+",
        "-".repeat(key_width + 2),
        "-".repeat(value_width + 2),
        "-".repeat(SOURCE_WIDTH)
    );
    let source_width = SOURCE_WIDTH - 2;

    let mut table = String::new();
    let mut row = |key: &str, value: &str, source: &str| {
        writeln!(
            table,
            "| {key:<key_width$} | {:<value_width$} | {source:<source_width$} |",
            truncate(value, value_width)
        )
        .ok();
    };

    let configured: BTreeSet<&str> = entries.iter().map(|entry| entry.key.as_str()).collect();
    let mut body = Vec::new();
    for entry in entries {
        body.push((entry.key.as_str(), entry.value.as_str(), "~/.dock"));
    }
    for (key, value) in DEFAULTS {
        if !configured.contains(key) {
            body.push((key, value, "default"));
        }
    }

    row("Key", "Value", "Source");
    for (key, value, source) in body {
        row(key, value, source);
    }

    format!(
        "Dock Environment Configuration\n{divider}\n{}{divider}\n\nNote: Values from ~/.dock/.env override defaults.\n      System environment variables override both.\n",
        insert_header_divider(&table, &divider)
    )
}

fn insert_header_divider(table: &str, divider: &str) -> String {
    let mut lines = table.lines();
    let mut rendered = String::new();
    if let Some(header) = lines.next() {
        writeln!(rendered, "{header}\n{divider}").ok();
    }
    for line in lines {
        writeln!(rendered, "{line}").ok();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;
    use rstest::rstest;

    fn temp_env_file() -> (tempfile::TempDir, Utf8PathBuf, EnvFile) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join(".env")).expect("utf8 path");
        let env = EnvFile::new(path.clone());
        (tmp, path, env)
    }

    #[rstest]
    fn parse_entries_skips_comments_and_strips_quotes() {
        let entries = parse_entries("# comment\n\nA=1\nB=\"two words\"\nC='x'\nBROKEN\nD=\"unterminated\n");
        let pairs: Vec<(&str, &str)> = entries
            .iter()
            .map(|entry| (entry.key.as_str(), entry.value.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("A", "1"), ("B", "two words"), ("C", "x"), ("D", "\"unterminated")]
        );
    }

    #[rstest]
    #[case("NOVALUE")]
    #[case("=value")]
    #[case("")]
    fn parse_assignments_rejects_malformed_input(#[case] raw: &str) {
        assert!(parse_assignments(raw).is_err());
    }

    #[rstest]
    fn set_updates_in_place_appends_and_backs_up() {
        let (_tmp, path, env) = temp_env_file();
        env.set("SCW_ZONE=fr-par-2,DOCK_AUTO_PILOT=false").expect("first set");
        env.set("SCW_ZONE=nl-ams-1,SCW_REGION=nl-ams").expect("second set");

        let content = std::fs::read_to_string(&path).expect("read env");
        assert_eq!(
            content,
            "SCW_ZONE=nl-ams-1\nDOCK_AUTO_PILOT=false\nSCW_REGION=nl-ams\n"
        );
        let backup = std::fs::read_to_string(format!("{path}.backup")).expect("backup");
        assert_eq!(backup, "SCW_ZONE=fr-par-2\nDOCK_AUTO_PILOT=false\n");
    }

    #[rstest]
    fn unset_removes_only_listed_keys() {
        let (_tmp, path, env) = temp_env_file();
        env.set("A=1,B=2,C=3").expect("set");
        let removed = env.unset("A, C ,Z").expect("unset");
        assert_eq!(removed, vec!["A", "C"]);
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "B=2\n");
    }

    #[rstest]
    fn set_keeps_comments_and_blank_lines() {
        let (_tmp, path, env) = temp_env_file();
        let seeded = "# scaleway\nSCW_ZONE=fr-par-1\n\n# dock\nDOCK_SSH_USER=root\n";
        std::fs::write(&path, seeded).expect("seed env");
        env.set("SCW_ZONE=nl-ams-1").expect("set");
        env.unset("DOCK_SSH_USER").expect("unset");
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            "# scaleway\nSCW_ZONE=nl-ams-1\n\n# dock\n"
        );
    }

    #[rstest]
    #[case("fr-par-1", "fr-par-1")]
    #[case("", "")]
    #[case("two words", "'two words'")]
    #[case("x#y", "'x#y'")]
    #[case("$HOME", "'$HOME'")]
    #[case("it's", "\"it's\"")]
    #[case("it's \"$5\"", "\"it's \\\"\\$5\\\"\"")]
    fn values_are_quoted_when_needed(#[case] value: &str, #[case] rendered: &str) {
        assert_eq!(quote(value), rendered);
        assert_eq!(unquote(rendered), value);
    }

    #[tokio::test]
    async fn set_values_load_back_through_dotenv() {
        let (_tmp, path, env) = temp_env_file();
        std::fs::write(&path, "# managed by dock env\n").expect("seed env");
        env.set("DOCK_ENV_RT_SPACE=a b,DOCK_ENV_RT_HASH=x#y,DOCK_ENV_RT_PLAIN=1")
            .expect("first set");
        env.set("DOCK_ENV_RT_QUOTE=it's $HOME").expect("second set");

        let keys = [
            "DOCK_ENV_RT_SPACE",
            "DOCK_ENV_RT_HASH",
            "DOCK_ENV_RT_PLAIN",
            "DOCK_ENV_RT_QUOTE",
        ];
        let _guard = EnvGuard::apply(&[], &keys).await;
        assert!(crate::config::load_env_file(&path).expect("dotenv should parse"));

        let loaded: Vec<String> = keys
            .iter()
            .map(|key| std::env::var(key).expect("loaded key"))
            .collect();
        assert_eq!(loaded, vec!["a b", "x#y", "1", "it's $HOME"]);
        let reread: Vec<String> = env
            .entries()
            .expect("entries")
            .into_iter()
            .map(|entry| entry.value)
            .collect();
        assert_eq!(reread, loaded);
    }

    #[rstest]
    fn unset_without_matches_leaves_file_untouched() {
        let (_tmp, path, env) = temp_env_file();
        env.set("A=1").expect("set");
        assert!(env.unset("Z").expect("unset").is_empty());
        let backup = Utf8PathBuf::from(format!("{path}.backup"));
        assert!(!backup.exists());
    }

    #[rstest]
    fn table_marks_configured_and_default_sources() {
        let entries = vec![EnvEntry {
            key: String::from("SCW_ZONE"),
            value: String::from("nl-ams-1"),
        }];
        let table = render_table(&entries);
        let zone_line = table
            .lines()
            .find(|line| line.contains("SCW_ZONE"))
            .expect("zone row");
        assert!(zone_line.contains("nl-ams-1"));
        assert!(zone_line.contains("~/.dock"));
        let region_line = table
            .lines()
            .find(|line| line.contains("SCW_REGION"))
            .expect("region row");
        assert!(region_line.contains("default"));
        assert_eq!(table.matches("SCW_ZONE").count(), 1);
    }

    #[rstest]
    fn table_truncates_long_values() {
        let entries = vec![EnvEntry {
            key: String::from("SCW_SECRET_KEY"),
            value: "x".repeat(80),
        }];
        let table = render_table(&entries);
        let line = table
            .lines()
            .find(|line| line.contains("SCW_SECRET_KEY"))
            .expect("secret row");
        assert!(line.contains("..."));
        assert!(!line.contains(&"x".repeat(41)));
    }
}
