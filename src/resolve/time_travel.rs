//! Point-in-time reconstruction of the schema-object set.

use std::collections::HashMap;

use crate::error::{BackupError, Result};
use crate::manifest::descriptor::{ObjectDescriptor, ObjectId};
use crate::manifest::BackupManifest;
use crate::timestamp::Timestamp;

/// Index of the layer a restore at `as_of` reads schema state from: the last
/// layer whose window starts at or before `as_of`, or the last layer overall
/// when no time is given.
pub fn backup_index_at_time(
    manifests: &[BackupManifest],
    as_of: Option<Timestamp>,
) -> Result<usize> {
    if manifests.is_empty() {
        return Err(BackupError::Storage(
            "expected a nonempty backup chain, got an empty one".into(),
        ));
    }
    let mut index = manifests.len() - 1;
    let Some(as_of) = as_of else {
        return Ok(index);
    };
    for (i, manifest) in manifests.iter().enumerate() {
        if as_of < manifest.start_time {
            break;
        }
        index = i;
    }
    Ok(index)
}

/// Reconstruct the schema objects that existed at `as_of`.
///
/// Without a target time (or when the covering layer recorded no change
/// log), the layer's descriptor set is returned verbatim. Otherwise the
/// layer's chronological change log is replayed up to `as_of`, upserting
/// descriptors and removing tombstoned IDs; tables and types whose
/// containing database was not itself captured as of `as_of` are dropped.
/// The result is keyed by unique object ID with no further ordering
/// guarantee.
pub fn descriptors_at_time<'a>(
    manifests: &'a [BackupManifest],
    as_of: Option<Timestamp>,
) -> Result<(Vec<ObjectDescriptor>, &'a BackupManifest)> {
    let index = backup_index_at_time(manifests, as_of)?;
    let layer = &manifests[index];

    let Some(as_of) = as_of else {
        return Ok((layer.descriptors.clone(), layer));
    };
    if layer.descriptor_changes.is_empty() {
        return Ok((layer.descriptors.clone(), layer));
    }

    let mut by_id: HashMap<ObjectId, &ObjectDescriptor> =
        HashMap::with_capacity(layer.descriptors.len());
    for change in &layer.descriptor_changes {
        if as_of < change.time {
            break;
        }
        match &change.desc {
            Some(desc) => {
                by_id.insert(change.id, desc);
            }
            None => {
                by_id.remove(&change.id);
            }
        }
    }

    // A revision may have been captured before its containing database was
    // in the backup; filter such orphans out.
    let descriptors = by_id
        .values()
        .filter(|desc| match desc.parent_id() {
            Some(parent) if desc.requires_parent() => by_id.contains_key(&parent),
            _ => true,
        })
        .map(|desc| (*desc).clone())
        .collect();

    Ok((descriptors, layer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::descriptor::{DatabaseDescriptor, TableDescriptor};
    use crate::manifest::DescriptorChange;

    fn database(id: ObjectId) -> ObjectDescriptor {
        ObjectDescriptor::Database(DatabaseDescriptor {
            id,
            name: format!("db{id}"),
            version: 2,
            modification_time: Timestamp::MIN,
        })
    }

    fn table(id: ObjectId, parent_id: ObjectId) -> ObjectDescriptor {
        ObjectDescriptor::Table(TableDescriptor {
            id,
            parent_id,
            name: format!("t{id}"),
            version: 2,
            modification_time: Timestamp::MIN,
        })
    }

    fn upsert(id: ObjectId, time: i64, desc: ObjectDescriptor) -> DescriptorChange {
        DescriptorChange {
            id,
            time: Timestamp(time),
            desc: Some(desc),
        }
    }

    fn tombstone(id: ObjectId, time: i64) -> DescriptorChange {
        DescriptorChange {
            id,
            time: Timestamp(time),
            desc: None,
        }
    }

    fn ids(descs: &[ObjectDescriptor]) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = descs.iter().map(|d| d.id()).collect();
        ids.sort_unstable();
        ids
    }

    /// Layer [0, 100) capturing database 1 with tables 2 and 3 from t=10,
    /// table 2 dropped at t=40, table 4 added at t=60.
    fn layer_with_changes() -> BackupManifest {
        BackupManifest {
            start_time: Timestamp(0),
            end_time: Timestamp(100),
            descriptors: vec![database(1), table(3, 1), table(4, 1)],
            descriptor_changes: vec![
                upsert(1, 10, database(1)),
                upsert(2, 10, table(2, 1)),
                upsert(3, 10, table(3, 1)),
                tombstone(2, 40),
                upsert(4, 60, table(4, 1)),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_no_target_returns_last_layer_verbatim() {
        let layers = vec![layer_with_changes()];
        let (descs, layer) = descriptors_at_time(&layers, None).unwrap();
        assert_eq!(ids(&descs), vec![1, 3, 4]);
        assert_eq!(layer.end_time, Timestamp(100));
    }

    #[test]
    fn test_replay_windows() {
        let layers = vec![layer_with_changes()];

        // After the final upsert.
        let (descs, _) = descriptors_at_time(&layers, Some(Timestamp(60))).unwrap();
        assert_eq!(ids(&descs), vec![1, 3, 4]);

        // Between the tombstone and the upsert of table 4.
        let (descs, _) = descriptors_at_time(&layers, Some(Timestamp(50))).unwrap();
        assert_eq!(ids(&descs), vec![1, 3]);

        // Before the tombstone.
        let (descs, _) = descriptors_at_time(&layers, Some(Timestamp(20))).unwrap();
        assert_eq!(ids(&descs), vec![1, 2, 3]);

        // Before anything was captured.
        let (descs, _) = descriptors_at_time(&layers, Some(Timestamp(5))).unwrap();
        assert!(descs.is_empty());
    }

    #[test]
    fn test_layer_without_change_log_returns_set_verbatim() {
        let mut layer = layer_with_changes();
        layer.descriptor_changes.clear();
        let layers = vec![layer];
        let (descs, _) = descriptors_at_time(&layers, Some(Timestamp(20))).unwrap();
        assert_eq!(ids(&descs), vec![1, 3, 4]);
    }

    #[test]
    fn test_orphaned_table_is_dropped() {
        let layers = vec![BackupManifest {
            start_time: Timestamp(0),
            end_time: Timestamp(100),
            descriptor_changes: vec![
                upsert(1, 10, database(1)),
                upsert(2, 10, table(2, 1)),
                // Table 5 references database 9, which was never captured.
                upsert(5, 20, table(5, 9)),
            ],
            ..Default::default()
        }];
        let (descs, _) = descriptors_at_time(&layers, Some(Timestamp(30))).unwrap();
        assert_eq!(ids(&descs), vec![1, 2]);
    }

    #[test]
    fn test_selects_covering_layer() {
        let mut first = layer_with_changes();
        first.end_time = Timestamp(100);
        let second = BackupManifest {
            start_time: Timestamp(100),
            end_time: Timestamp(200),
            descriptors: vec![database(1), table(7, 1)],
            ..Default::default()
        };
        let layers = vec![first, second];

        assert_eq!(backup_index_at_time(&layers, Some(Timestamp(50))).unwrap(), 0);
        assert_eq!(backup_index_at_time(&layers, Some(Timestamp(150))).unwrap(), 1);
        assert_eq!(backup_index_at_time(&layers, None).unwrap(), 1);

        let (descs, layer) = descriptors_at_time(&layers, Some(Timestamp(150))).unwrap();
        assert_eq!(layer.start_time, Timestamp(100));
        assert_eq!(ids(&descs), vec![1, 7]);
    }

    #[test]
    fn test_empty_chain_is_an_error() {
        assert!(backup_index_at_time(&[], None).is_err());
    }
}
