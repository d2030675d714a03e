//! Snapshot-based fast boot (Scaleway only).
//!
//! A snapshot is the running instance's root volume captured with `scw`,
//! registered as a bootable image, and recorded in
//! `~/.dock/snapshots.json`. `dock create --snapshot` boots from the image
//! and skips cloud-init provisioning.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::files::{self, FsError};
use crate::process::CommandRunner;
use crate::provider::{InstanceRef, Provider, ProviderError, ScalewayProvider};

const TABLE_RULE: usize = 100;

/// Persisted description of one snapshot image.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Volume snapshot id.
    pub id: String,
    /// Generated name shared by snapshot and image.
    pub name: String,
    /// Bootable image id.
    pub image_id: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// Instance type the snapshot was taken from.
    pub instance_type: String,
    /// Base image, `auto` for the provider default.
    pub base_image: String,
    /// Zone holding the snapshot and image.
    pub zone: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct SnapshotStore {
    #[serde(default)]
    snapshots: Vec<SnapshotMetadata>,
}

/// Errors raised by snapshot operations.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SnapshotError {
    /// Raised when the store cannot be read or written.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Raised when the store is not valid JSON.
    #[error("invalid snapshot store {path}: {message}")]
    Store {
        /// Store path.
        path: Utf8PathBuf,
        /// Parser error.
        message: String,
    },
    /// Raised when `scw` fails.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Raised when a named snapshot is not in the store.
    #[error("Snapshot not found: {name}")]
    NotFound {
        /// Requested name.
        name: String,
    },
    /// Raised when no snapshot matches the configured type and zone.
    #[error(
        "No snapshot found for {instance_type} in {zone}. Create one with 'dock snapshot --create'."
    )]
    NoMatch {
        /// Configured instance type.
        instance_type: String,
        /// Configured zone.
        zone: String,
    },
    /// Raised when the server description lists no root volume.
    #[error("Could not find root volume for instance {instance}")]
    NoRootVolume {
        /// Instance id.
        instance: String,
    },
}

/// Builds `<type>-<image>-<zone>-<YYYYMMDDTHHMMSS>` with the image reduced
/// to ASCII alphanumerics and dashes.
#[must_use]
pub fn snapshot_name(
    instance_type: &str,
    base_image: &str,
    zone: &str,
    at: DateTime<Utc>,
) -> String {
    let image = if base_image.is_empty() { "auto" } else { base_image };
    let clean: String = image
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!(
        "{instance_type}-{clean}-{zone}-{}",
        at.format("%Y%m%dT%H%M%S")
    )
}

/// The JSON snapshot store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotCatalog {
    path: Utf8PathBuf,
}

impl SnapshotCatalog {
    /// Catalog stored at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store location.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// All snapshots in insertion order; empty when the store is missing.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] when the store is unreadable.
    pub fn list(&self) -> Result<Vec<SnapshotMetadata>, SnapshotError> {
        let Some(raw) = files::read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        let store: SnapshotStore =
            serde_json::from_str(&raw).map_err(|err| SnapshotError::Store {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        Ok(store.snapshots)
    }

    fn save(&self, snapshots: Vec<SnapshotMetadata>) -> Result<(), SnapshotError> {
        let json = serde_json::to_string_pretty(&SnapshotStore { snapshots }).map_err(|err| {
            SnapshotError::Store {
                path: self.path.clone(),
                message: err.to_string(),
            }
        })?;
        files::write(&self.path, json)?;
        Ok(())
    }

    /// Appends `metadata` to the store.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] when the store cannot be updated.
    pub fn add(&self, metadata: SnapshotMetadata) -> Result<(), SnapshotError> {
        let mut snapshots = self.list()?;
        snapshots.push(metadata);
        self.save(snapshots)
    }

    /// Removes the snapshot called `name`, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::NotFound`] when no snapshot has that name.
    pub fn remove(&self, name: &str) -> Result<SnapshotMetadata, SnapshotError> {
        let (removed, kept): (Vec<_>, Vec<_>) =
            self.list()?.into_iter().partition(|snap| snap.name == name);
        let found = removed.into_iter().next().ok_or_else(|| SnapshotError::NotFound {
            name: name.to_owned(),
        })?;
        self.save(kept)?;
        Ok(found)
    }

    /// Snapshot called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] when the store is unreadable.
    pub fn find_by_name(&self, name: &str) -> Result<Option<SnapshotMetadata>, SnapshotError> {
        Ok(self.list()?.into_iter().find(|snap| snap.name == name))
    }

    /// Newest snapshot taken from `instance_type` in `zone`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] when the store is unreadable.
    pub fn find_latest(
        &self,
        instance_type: &str,
        zone: &str,
    ) -> Result<Option<SnapshotMetadata>, SnapshotError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|snap| snap.instance_type == instance_type && snap.zone == zone)
            .max_by_key(|snap| DateTime::parse_from_rfc3339(&snap.created_at).ok()))
    }

    /// Chooses the snapshot to boot: the named one, or the latest match.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::NotFound`] or [`SnapshotError::NoMatch`]
    /// when nothing suitable exists.
    pub fn resolve(
        &self,
        requested: Option<&str>,
        instance_type: &str,
        zone: &str,
    ) -> Result<SnapshotMetadata, SnapshotError> {
        match requested {
            Some(name) => self.find_by_name(name)?.ok_or_else(|| SnapshotError::NotFound {
                name: name.to_owned(),
            }),
            None => self
                .find_latest(instance_type, zone)?
                .ok_or_else(|| SnapshotError::NoMatch {
                    instance_type: instance_type.to_owned(),
                    zone: zone.to_owned(),
                }),
        }
    }
}

/// Snapshots the instance's root volume and registers a bootable image.
///
/// # Errors
///
/// Returns [`SnapshotError`] when `scw` fails, the root volume is unknown,
/// or the store cannot be updated.
pub fn create<R: CommandRunner>(
    catalog: &SnapshotCatalog,
    provider: &ScalewayProvider<R>,
    instance: &InstanceRef,
) -> Result<SnapshotMetadata, SnapshotError> {
    let zone = provider.zone().to_owned();
    let server = provider.describe(instance)?;
    let volume_id = server
        .root_volume_id
        .ok_or_else(|| SnapshotError::NoRootVolume {
            instance: instance.id.clone(),
        })?;

    let now = Utc::now();
    let name = snapshot_name(provider.instance_type(), provider.instance_image(), &zone, now);
    info!(volume = %volume_id, name, "creating snapshot");
    let snapshot_id = provider.create_snapshot(&volume_id, &name, &zone)?;
    info!(snapshot = %snapshot_id, "creating bootable image");
    let image_id = provider.create_image(&snapshot_id, &name, &zone)?;

    let base_image = provider.instance_image();
    let metadata = SnapshotMetadata {
        id: snapshot_id,
        name,
        image_id,
        created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        instance_type: provider.instance_type().to_owned(),
        base_image: if base_image.is_empty() {
            String::from("auto")
        } else {
            base_image.to_owned()
        },
        zone,
    };
    catalog.add(metadata.clone())?;
    Ok(metadata)
}

/// Deletes the image and snapshot called `name` and forgets them.
///
/// Provider deletions that fail are logged; the resource is assumed gone.
///
/// # Errors
///
/// Returns [`SnapshotError::NotFound`] for unknown names.
pub fn delete<R: CommandRunner>(
    catalog: &SnapshotCatalog,
    provider: &ScalewayProvider<R>,
    name: &str,
) -> Result<SnapshotMetadata, SnapshotError> {
    let snapshot = catalog
        .find_by_name(name)?
        .ok_or_else(|| SnapshotError::NotFound {
            name: name.to_owned(),
        })?;
    if let Err(err) = provider.delete_image(&snapshot.image_id, &snapshot.zone) {
        warn!(image = %snapshot.image_id, error = %err, "image already deleted or not found");
    }
    if let Err(err) = provider.delete_snapshot(&snapshot.id, &snapshot.zone) {
        warn!(snapshot = %snapshot.id, error = %err, "snapshot already deleted or not found");
    }
    catalog.remove(name)
}

fn local_date(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp).map_or_else(
        |_| timestamp.to_owned(),
        |at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
    )
}

/// Renders the `dock snapshot --list` table.
#[must_use]
pub fn render_table(snapshots: &[SnapshotMetadata]) -> String {
    if snapshots.is_empty() {
        return String::from("No snapshots found.\n\nCreate one with: dock snapshot --create");
    }
    let rule = "\u{2500}".repeat(TABLE_RULE);
    let mut lines = vec![
        String::from("Available Snapshots:"),
        rule.clone(),
        format!(
            "{:<45}{:<20}{:<12}{:<12}IMAGE",
            "NAME", "CREATED", "TYPE", "ZONE"
        ),
        rule.clone(),
    ];
    lines.extend(snapshots.iter().map(|snap| {
        format!(
            "{:<45}{:<20}{:<12}{:<12}{}",
            snap.name,
            local_date(&snap.created_at),
            snap.instance_type,
            snap.zone,
            snap.base_image
        )
    }));
    lines.push(rule);
    lines.push(String::new());
    lines.push(format!("Total: {} snapshot(s)", snapshots.len()));
    lines.join("\n")
}

#[cfg(test)]
mod tests;
