//! Backup chain resolution.
//!
//! Assembles the ordered list of backup layers (a full backup plus any
//! incremental layers, explicit or auto-discovered), resolves per-locality
//! partition descriptors for each layer, and truncates the chain to the
//! layer covering a requested restore time.

pub mod time_travel;

use std::collections::HashMap;

use futures_util::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::encryption::{EncryptionOptions, KmsConnector};
use crate::error::{BackupError, Result};
use crate::manifest::io::{
    read_backup_manifest, read_backup_manifest_from_store, read_backup_manifest_from_uri,
    read_partition_descriptor,
};
use crate::manifest::{
    BackupManifest, LocalityInfo, MvccFilter, BACKUP_MANIFEST_NAME, INCREMENTAL_LAYER_GLOB,
};
use crate::storage::{append_path_to_uri, ExternalStorage, StorageFactory};
use crate::timestamp::Timestamp;

/// A fully resolved backup chain. All three lists are indexed by layer
/// position, base layer first.
#[derive(Debug, Default)]
pub struct ResolvedChain {
    /// Primary manifest URI of each layer.
    pub default_uris: Vec<String>,
    /// Decoded manifest of each layer.
    pub manifests: Vec<BackupManifest>,
    /// Per-locality partition URIs of each layer.
    pub locality_info: Vec<LocalityInfo>,
}

impl ResolvedChain {
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

/// Discovers and assembles the chain of backup layers behind a restore.
pub struct ManifestResolver<'a> {
    factory: &'a dyn StorageFactory,
    encryption: Option<&'a EncryptionOptions>,
    kms: &'a dyn KmsConnector,
    cancel: CancellationToken,
}

impl<'a> ManifestResolver<'a> {
    pub fn new(
        factory: &'a dyn StorageFactory,
        encryption: Option<&'a EncryptionOptions>,
        kms: &'a dyn KmsConnector,
    ) -> Self {
        Self {
            factory,
            encryption,
            kms,
            cancel: CancellationToken::new(),
        }
    }

    /// Resolver whose I/O can be aborted through `cancel`.
    pub fn with_cancel(
        factory: &'a dyn StorageFactory,
        encryption: Option<&'a EncryptionOptions>,
        kms: &'a dyn KmsConnector,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            encryption,
            kms,
            cancel,
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(BackupError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve the layer URI lists in `from` into manifests and locality
    /// metadata, in layer order.
    ///
    /// Each layer's first URI holds its primary manifest; any further URIs
    /// are candidate per-locality partition locations. `base_stores` are
    /// open handles on the base layer's locations, aligned with `from[0]`.
    /// When only the base layer is given, incremental layers appended
    /// beneath it are discovered automatically. When `end_time` is given
    /// the chain is truncated to the layer covering it.
    pub async fn resolve(
        &self,
        base_stores: &[Box<dyn ExternalStorage>],
        from: &[Vec<String>],
        end_time: Option<Timestamp>,
    ) -> Result<ResolvedChain> {
        if from.is_empty() || from[0].is_empty() || base_stores.is_empty() {
            return Err(BackupError::Storage("no backup locations provided".into()));
        }

        let mut chain = if from.len() > 1 {
            self.resolve_explicit(from).await?
        } else {
            let base_manifest =
                read_backup_manifest_from_store(base_stores[0].as_ref(), self.encryption, self.kms)
                    .await?;
            self.resolve_discovered(base_stores, &from[0], base_manifest)
                .await?
        };

        if let Some(end_time) = end_time {
            truncate_to_time(&mut chain, end_time)?;
        }
        Ok(chain)
    }

    /// Load each explicitly listed layer. Per-layer loads run concurrently;
    /// results stay indexed by layer position regardless of completion
    /// order.
    async fn resolve_explicit(&self, from: &[Vec<String>]) -> Result<ResolvedChain> {
        let layers = try_join_all(from.iter().map(|uris| self.load_layer(uris))).await?;

        let mut chain = ResolvedChain::default();
        for (uri, manifest, locality) in layers {
            chain.default_uris.push(uri);
            chain.manifests.push(manifest);
            chain.locality_info.push(locality);
        }
        Ok(chain)
    }

    /// Load one layer: read the primary manifest and, when the layer is
    /// partitioned, resolve its locality info against the remaining URIs.
    async fn load_layer(
        &self,
        uris: &[String],
    ) -> Result<(String, BackupManifest, LocalityInfo)> {
        self.check_cancelled()?;
        if uris.is_empty() {
            return Err(BackupError::Storage("backup layer has no locations".into()));
        }

        let mut stores = Vec::with_capacity(uris.len());
        for uri in uris {
            let store = self.factory.open(uri).await.map_err(|e| {
                BackupError::Storage(format!("opening backup location {uri}: {e}"))
            })?;
            stores.push(store);
        }

        let manifest =
            read_backup_manifest_from_store(stores[0].as_ref(), self.encryption, self.kms).await?;
        let locality = if uris.len() > 1 {
            self.locality_info(&stores, uris, &manifest, "").await?
        } else {
            LocalityInfo::default()
        };
        Ok((uris[0].clone(), manifest, locality))
    }

    /// Expand a single base layer by discovering incremental layers appended
    /// beneath it. Backends that cannot list degrade to resolving only the
    /// base layer.
    async fn resolve_discovered(
        &self,
        base_stores: &[Box<dyn ExternalStorage>],
        base_uris: &[String],
        base_manifest: BackupManifest,
    ) -> Result<ResolvedChain> {
        let prev = match find_prior_backup_names(base_stores[0].as_ref()).await {
            Ok(prev) => prev,
            Err(BackupError::ListingUnsupported(msg)) => {
                warn!(
                    "storage sink does not support listing ({msg}), only resolving the base backup"
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut chain = ResolvedChain::default();
        let locality = self
            .locality_info(base_stores, base_uris, &base_manifest, "")
            .await?;
        chain.default_uris.push(base_uris[0].clone());
        chain.manifests.push(base_manifest);
        chain.locality_info.push(locality);

        for name in prev {
            self.check_cancelled()?;
            let manifest =
                read_backup_manifest(base_stores[0].as_ref(), &name, self.encryption, self.kms)
                    .await?;

            // The dirname of the listed manifest path is the subdirectory in
            // which every partition stores this layer's metadata.
            let subdir = parent_dir(&name);
            let partition_uris: Vec<String> = base_uris
                .iter()
                .map(|uri| append_path_to_uri(uri, &subdir))
                .collect();
            let locality = self
                .locality_info(base_stores, &partition_uris, &manifest, &subdir)
                .await?;

            chain.default_uris.push(partition_uris[0].clone());
            chain.manifests.push(manifest);
            chain.locality_info.push(locality);
        }
        Ok(chain)
    }

    /// Match each partition descriptor named by the manifest against the
    /// candidate locations, in order. The first candidate that decodes and
    /// references the owning manifest's ID wins; a locality tier may appear
    /// only once per layer.
    async fn locality_info(
        &self,
        stores: &[Box<dyn ExternalStorage>],
        uris: &[String],
        manifest: &BackupManifest,
        prefix: &str,
    ) -> Result<LocalityInfo> {
        let mut uris_by_locality = HashMap::new();
        for filename in &manifest.partition_descriptor_filenames {
            let path = if prefix.is_empty() {
                filename.clone()
            } else {
                format!("{prefix}/{filename}")
            };

            let mut found = false;
            for (store, uri) in stores.iter().zip(uris) {
                self.check_cancelled()?;
                let desc = match read_partition_descriptor(
                    store.as_ref(),
                    &path,
                    self.encryption,
                    self.kms,
                )
                .await
                {
                    Ok(desc) => desc,
                    Err(_) => continue,
                };
                if desc.backup_id != manifest.id {
                    continue;
                }
                if uris_by_locality.contains_key(&desc.locality_kv) {
                    return Err(BackupError::DuplicateLocality(desc.locality_kv));
                }
                uris_by_locality.insert(desc.locality_kv, uri.clone());
                found = true;
                break;
            }
            if !found {
                return Err(BackupError::MissingPartitionDescriptor(path));
            }
        }
        Ok(LocalityInfo {
            uris_by_original_locality_kv: uris_by_locality,
        })
    }
}

/// List manifests of incremental layers appended beneath the base location.
/// The date-based directory naming makes lexicographic order chronological.
pub async fn find_prior_backup_names(store: &dyn ExternalStorage) -> Result<Vec<String>> {
    let pattern = format!("{INCREMENTAL_LAYER_GLOB}/{BACKUP_MANIFEST_NAME}");
    let mut names = store.list_files(&pattern).await.map_err(|e| match e {
        BackupError::ListingUnsupported(_) => e,
        other => BackupError::Storage(format!("reading previous backup layers: {other}")),
    })?;
    names.sort();
    Ok(names)
}

/// Read manifests from each URI in turn. No layer chaining or locality
/// resolution; used when callers already hold the full list.
pub async fn load_backup_manifests(
    factory: &dyn StorageFactory,
    uris: &[String],
    encryption: Option<&EncryptionOptions>,
    kms: &dyn KmsConnector,
) -> Result<Vec<BackupManifest>> {
    if uris.is_empty() {
        return Err(BackupError::Storage("no backups found".into()));
    }
    try_join_all(uris.iter().map(|uri| async move {
        read_backup_manifest_from_uri(factory, uri, encryption, kms)
            .await
            .map_err(|e| BackupError::Storage(format!("failed to read backup manifest from {uri}: {e}")))
    }))
    .await
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// Truncate the chain to the unique layer whose window covers `end_time`,
/// validating revision-history coverage for restores strictly inside that
/// layer's window.
fn truncate_to_time(chain: &mut ResolvedChain, end_time: Timestamp) -> Result<()> {
    for i in 0..chain.manifests.len() {
        let layer = &chain.manifests[i];
        if !layer.covers(end_time) {
            continue;
        }

        if end_time != layer.end_time {
            // Restoring to a point strictly inside the window replays the
            // layer's revision history, so the layer must have captured all
            // revisions.
            if layer.mvcc_filter != MvccFilter::All {
                const PREFIX: &str = "invalid restore timestamp: restoring to an arbitrary time \
                                      requires the backup be created with revision history.";
                let msg = if i == 0 {
                    format!("{PREFIX} nearest backup time is {}", layer.end_time)
                } else {
                    format!(
                        "{PREFIX} nearest backup times are {} or {}",
                        chain.manifests[i - 1].end_time,
                        layer.end_time
                    )
                };
                return Err(BackupError::RevisionHistoryRequired(msg));
            }
            // The window can extend past the captured history (a full
            // backup's start time is zero); the requested time must fall
            // inside the captured range.
            if end_time <= layer.revision_start_time {
                return Err(BackupError::RevisionHistoryTooShort(
                    layer.revision_start_time,
                ));
            }
        }

        chain.manifests.truncate(i + 1);
        chain.default_uris.truncate(i + 1);
        chain.locality_info.truncate(i + 1);
        return Ok(());
    }
    Err(BackupError::TimeNotCovered)
}
