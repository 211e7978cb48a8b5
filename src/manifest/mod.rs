//! Backup manifest data model and destination file layout.
//!
//! A manifest describes one backup layer: its time window, the exported
//! files, the schema objects current at the end of the window and the
//! chronological change log that enables point-in-time reconstruction.
//! Manifests are owned by the layer that wrote them and immutable once
//! finalized; the checkpoint variant is the only one legitimately
//! overwritten (once, at completion, by the final manifest).

pub mod descriptor;
pub mod io;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timestamp::Timestamp;
use descriptor::{ObjectDescriptor, ObjectId};

/// File name used for the serialized manifest of a completed backup.
pub const BACKUP_MANIFEST_NAME: &str = "BACKUP_MANIFEST";
/// Older manifest file name, still recognized as a read fallback.
pub const BACKUP_MANIFEST_LEGACY_NAME: &str = "BACKUP";
/// File name prefix for serialized per-locality partition descriptors.
pub const BACKUP_PARTITION_DESCRIPTOR_PREFIX: &str = "BACKUP_PART";
/// File name of the manifest placeholder written while a backup is in
/// progress, advisory-claiming the destination.
pub const BACKUP_CHECKPOINT_NAME: &str = "BACKUP-CHECKPOINT";
/// File name used for serialized table statistics.
pub const BACKUP_STATISTICS_NAME: &str = "BACKUP-STATISTICS";
/// Sentinel written (and best-effort deleted) to probe write access. Nothing
/// checks for its existence afterwards; destinations without delete
/// permission may keep it around.
pub const BACKUP_SENTINEL_WRITE_FILE: &str = "BACKUP-SENTINEL";
/// Sidecar recording which encryption mode a backup was written with.
pub const ENCRYPTION_INFO_NAME: &str = "encryption-info";

/// Glob matching the two-level date/time subdirectories (`YYYYMMDD/HHMMSS.ss`)
/// that hold auto-appended incremental layers.
pub const INCREMENTAL_LAYER_GLOB: &str = "[0-9]*/[0-9]*.[0-9][0-9]";

/// Which revisions of the backed-up data a layer captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MvccFilter {
    None,
    #[default]
    Latest,
    /// Every revision within the layer window; required for restoring to an
    /// arbitrary time strictly inside the window.
    All,
}

/// Key span covered by an exported file, `[key, end_key)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpan {
    pub key: Vec<u8>,
    pub end_key: Vec<u8>,
}

/// One exported data file recorded in a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupFile {
    pub span: KeySpan,
    /// Path of the exported file relative to the layer directory.
    pub path: String,
    pub size_bytes: u64,
}

/// One entry of a layer's schema change log. A `None` descriptor is a
/// tombstone: the object was dropped at `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorChange {
    pub id: ObjectId,
    pub time: Timestamp,
    pub desc: Option<ObjectDescriptor>,
}

/// Serialized metadata describing one backup layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub id: Uuid,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    /// Earliest instant from which the captured revision history is
    /// complete. The layer window may extend earlier (a full backup starts
    /// at zero) without history reaching back that far.
    pub revision_start_time: Timestamp,
    pub mvcc_filter: MvccFilter,
    /// Schema objects current as of `end_time`.
    pub descriptors: Vec<ObjectDescriptor>,
    /// Chronological log of schema-object changes within the layer window.
    pub descriptor_changes: Vec<DescriptorChange>,
    /// Exported files; persisted in normalized span order.
    pub files: Vec<BackupFile>,
    /// File names of the per-locality partition descriptors to resolve on
    /// restore.
    pub partition_descriptor_filenames: Vec<String>,
    pub format_version: u32,
    /// URI of the directory the manifest was read from. Set on read, not
    /// meaningful when writing.
    #[serde(default)]
    pub dir: String,
}

impl BackupManifest {
    /// Whether a restore at `t` reads from this layer's window.
    pub fn covers(&self, t: Timestamp) -> bool {
        self.start_time < t && t <= self.end_time
    }
}

/// Metadata for one locality partition of a layer. Written to the store that
/// holds that partition's data; references its owning manifest by ID so a
/// mismatched partition is detectable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    pub backup_id: Uuid,
    /// Locality tier this partition was written for, e.g. `region=us-east`.
    pub locality_kv: String,
    pub files: Vec<BackupFile>,
}

/// Table statistics captured alongside a backup; carried through the same
/// envelope codec as manifests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStatistics {
    pub statistics: Vec<TableStatistic>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStatistic {
    pub table_id: ObjectId,
    pub row_count: u64,
    pub distinct_count: u64,
    pub created_at: Timestamp,
}

/// Mapping from locality tier to the URI holding that partition's manifest,
/// scoped to one layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalityInfo {
    pub uris_by_original_locality_kv: HashMap<String, String>,
}

/// Returns a copy of `files` ordered by (span start key, span end key).
/// Range lookups over a persisted manifest assume this ordering, so it is an
/// invariant of the on-disk format. Pure: the caller's slice is never
/// mutated.
pub fn normalize_files(files: &[BackupFile]) -> Vec<BackupFile> {
    let mut sorted = files.to_vec();
    sorted.sort_by(|a, b| {
        a.span
            .key
            .cmp(&b.span.key)
            .then_with(|| a.span.end_key.cmp(&b.span.end_key))
    });
    sorted
}

/// Replace every character that is not alphanumeric, `-` or `=` with `_`,
/// making a locality tier usable inside a file name.
pub fn sanitize_locality_kv(kv: &str) -> String {
    kv.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '=' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File name under which the partition descriptor for a locality tier is
/// written.
pub fn partition_descriptor_filename(locality_kv: &str) -> String {
    format!(
        "{}_{}",
        BACKUP_PARTITION_DESCRIPTOR_PREFIX,
        sanitize_locality_kv(locality_kv)
    )
}
