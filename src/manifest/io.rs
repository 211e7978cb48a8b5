//! Reading and writing persisted backup metadata.
//!
//! All payloads go through the envelope codec; encryption keys are resolved
//! per operation from the caller's options so reads can replay the exact
//! derivation a backup was written with.

use bytes::Bytes;

use crate::codec::{self, CodecSettings};
use crate::encryption::{resolve_encryption_key, EncryptionInfo, EncryptionOptions, KmsConnector};
use crate::error::{BackupError, Result};
use crate::manifest::{
    normalize_files, BackupManifest, PartitionDescriptor, TableStatistics,
    BACKUP_MANIFEST_LEGACY_NAME, BACKUP_MANIFEST_NAME, ENCRYPTION_INFO_NAME,
};
use crate::storage::{ExternalStorage, StorageFactory};

async fn data_key(
    encryption: Option<&EncryptionOptions>,
    kms: &dyn KmsConnector,
) -> Result<Option<Vec<u8>>> {
    match encryption {
        Some(options) => Ok(Some(resolve_encryption_key(Some(options), kms).await?)),
        None => Ok(None),
    }
}

/// Read and decode the manifest stored under `filename`.
pub async fn read_backup_manifest(
    store: &dyn ExternalStorage,
    filename: &str,
    encryption: Option<&EncryptionOptions>,
    kms: &dyn KmsConnector,
) -> Result<BackupManifest> {
    let bytes = store.read_file(filename).await?;
    let key = data_key(encryption, kms).await?;
    let mut manifest: BackupManifest = codec::decode_payload(&bytes, key.as_deref())?;
    for desc in &mut manifest.descriptors {
        desc.backfill_modification_time();
    }
    Ok(manifest)
}

/// Read the manifest at the standard location, falling back to the legacy
/// file name. The origin directory is recorded on the returned manifest.
pub async fn read_backup_manifest_from_store(
    store: &dyn ExternalStorage,
    encryption: Option<&EncryptionOptions>,
    kms: &dyn KmsConnector,
) -> Result<BackupManifest> {
    let mut manifest = match read_backup_manifest(store, BACKUP_MANIFEST_NAME, encryption, kms).await
    {
        Ok(manifest) => manifest,
        Err(err) => {
            match read_backup_manifest(store, BACKUP_MANIFEST_LEGACY_NAME, encryption, kms).await {
                Ok(manifest) => manifest,
                // Report the failure against the primary name.
                Err(_) => return Err(err),
            }
        }
    };
    manifest.dir = store.conf().uri;
    Ok(manifest)
}

/// Open storage at `uri` and read the manifest at the standard location.
pub async fn read_backup_manifest_from_uri(
    factory: &dyn StorageFactory,
    uri: &str,
    encryption: Option<&EncryptionOptions>,
    kms: &dyn KmsConnector,
) -> Result<BackupManifest> {
    let store = factory.open(uri).await?;
    read_backup_manifest_from_store(store.as_ref(), encryption, kms).await
}

/// Whether the destination already holds a completed manifest.
pub async fn contains_manifest(store: &dyn ExternalStorage) -> Result<bool> {
    match store.read_file(BACKUP_MANIFEST_NAME).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Encode and persist a manifest. Files are written in normalized span
/// order; the caller's manifest is left untouched.
pub async fn write_backup_manifest(
    store: &dyn ExternalStorage,
    filename: &str,
    settings: CodecSettings,
    encryption: Option<&EncryptionOptions>,
    kms: &dyn KmsConnector,
    manifest: &BackupManifest,
) -> Result<()> {
    let mut ordered = manifest.clone();
    ordered.files = normalize_files(&manifest.files);
    let key = data_key(encryption, kms).await?;
    let bytes = codec::encode_payload(&ordered, settings, key.as_deref())?;
    store.write_file(filename, Bytes::from(bytes)).await
}

/// Read and decode the partition descriptor stored under `filename`.
pub async fn read_partition_descriptor(
    store: &dyn ExternalStorage,
    filename: &str,
    encryption: Option<&EncryptionOptions>,
    kms: &dyn KmsConnector,
) -> Result<PartitionDescriptor> {
    let bytes = store.read_file(filename).await?;
    let key = data_key(encryption, kms).await?;
    codec::decode_payload(&bytes, key.as_deref())
}

/// Encode and persist a per-locality partition descriptor.
pub async fn write_partition_descriptor(
    store: &dyn ExternalStorage,
    filename: &str,
    settings: CodecSettings,
    encryption: Option<&EncryptionOptions>,
    kms: &dyn KmsConnector,
    desc: &PartitionDescriptor,
) -> Result<()> {
    let key = data_key(encryption, kms).await?;
    let bytes = codec::encode_payload(desc, settings, key.as_deref())?;
    store.write_file(filename, Bytes::from(bytes)).await
}

/// Read and decode table statistics stored under `filename`.
pub async fn read_table_statistics(
    store: &dyn ExternalStorage,
    filename: &str,
    encryption: Option<&EncryptionOptions>,
    kms: &dyn KmsConnector,
) -> Result<TableStatistics> {
    let bytes = store.read_file(filename).await?;
    let key = data_key(encryption, kms).await?;
    codec::decode_payload(&bytes, key.as_deref())
}

/// Encode and persist table statistics.
pub async fn write_table_statistics(
    store: &dyn ExternalStorage,
    filename: &str,
    settings: CodecSettings,
    encryption: Option<&EncryptionOptions>,
    kms: &dyn KmsConnector,
    stats: &TableStatistics,
) -> Result<()> {
    let key = data_key(encryption, kms).await?;
    let bytes = codec::encode_payload(stats, settings, key.as_deref())?;
    store.write_file(filename, Bytes::from(bytes)).await
}

/// Read the `encryption-info` sidecar recording which encryption mode a
/// destination was written with.
pub async fn read_encryption_info(store: &dyn ExternalStorage) -> Result<EncryptionInfo> {
    let bytes = store.read_file(ENCRYPTION_INFO_NAME).await.map_err(|e| {
        BackupError::Storage(format!("could not find or read encryption information: {e}"))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| BackupError::Serialization(e.to_string()))
}

/// Persist the `encryption-info` sidecar.
pub async fn write_encryption_info(
    store: &dyn ExternalStorage,
    info: &EncryptionInfo,
) -> Result<()> {
    let bytes =
        serde_json::to_vec(info).map_err(|e| BackupError::Serialization(e.to_string()))?;
    store.write_file(ENCRYPTION_INFO_NAME, Bytes::from(bytes)).await
}
