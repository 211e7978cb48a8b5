//! Advisory concurrency guard for backup destinations.
//!
//! Exclusion is checkpoint-file based and advisory only: two backups can
//! both observe an empty destination before either writes its checkpoint. A
//! storage backend with a conditional-put primitive could close that race;
//! until then it is an accepted limitation, not something to paper over with
//! a stronger lock.

use bytes::Bytes;
use tracing::warn;

use crate::codec::CodecSettings;
use crate::encryption::{EncryptionOptions, KmsConnector};
use crate::error::{BackupError, Result};
use crate::manifest::io::write_backup_manifest;
use crate::manifest::{
    BackupManifest, BACKUP_CHECKPOINT_NAME, BACKUP_MANIFEST_NAME, BACKUP_SENTINEL_WRITE_FILE,
};
use crate::storage::{ExternalStorage, StorageFactory};

/// Ensure the destination does not already hold a completed backup or an
/// in-progress checkpoint. `readable` names the destination in errors.
pub async fn check_for_previous_backup(
    store: &dyn ExternalStorage,
    readable: &str,
) -> Result<()> {
    probe_absent(store, readable, BACKUP_MANIFEST_NAME, "").await?;
    probe_absent(
        store,
        readable,
        BACKUP_CHECKPOINT_NAME,
        " (is another backup already in progress?)",
    )
    .await
}

async fn probe_absent(
    store: &dyn ExternalStorage,
    readable: &str,
    filename: &str,
    hint: &str,
) -> Result<()> {
    match store.read_file(filename).await {
        Ok(_) => Err(BackupError::AlreadyExists(format!(
            "{readable} already contains a {filename} file{hint}"
        ))),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(BackupError::Storage(format!(
            "{readable} returned an unexpected error when checking for the existence of {filename}: {e}"
        ))),
    }
}

/// Write the checkpoint placeholder unless one is already present, claiming
/// the destination for this backup. The placeholder is an empty manifest
/// written through the normal encode path; it is replaced by the final
/// manifest at completion.
pub async fn create_checkpoint_if_not_exists(
    store: &dyn ExternalStorage,
    settings: CodecSettings,
    encryption: Option<&EncryptionOptions>,
    kms: &dyn KmsConnector,
) -> Result<()> {
    match store.read_file(BACKUP_CHECKPOINT_NAME).await {
        // Already claimed, nothing to do.
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => write_backup_manifest(
            store,
            BACKUP_CHECKPOINT_NAME,
            settings,
            encryption,
            kms,
            &BackupManifest::default(),
        )
        .await
        .map_err(|e| {
            BackupError::Storage(format!(
                "writing checkpoint file {BACKUP_CHECKPOINT_NAME}: {e}"
            ))
        }),
        Err(e) => Err(BackupError::Storage(format!(
            "unexpected error when checking for the existence of {BACKUP_CHECKPOINT_NAME}: {e}"
        ))),
    }
}

/// Probe that the destination is writable by writing a sentinel file.
/// Clean-up is best effort: destinations without delete permission are an
/// accepted configuration, so deletion failures are only logged.
pub async fn verify_writable_destination(
    factory: &dyn StorageFactory,
    base_uri: &str,
) -> Result<()> {
    let store = factory.open(base_uri).await?;

    store
        .write_file(
            BACKUP_SENTINEL_WRITE_FILE,
            Bytes::from_static(b"backup write probe"),
        )
        .await
        .map_err(|e| BackupError::Storage(format!("writing sentinel file to {base_uri}: {e}")))?;

    if let Err(e) = store.delete(BACKUP_SENTINEL_WRITE_FILE).await {
        warn!(
            "could not clean up sentinel file {BACKUP_SENTINEL_WRITE_FILE} in {base_uri}: {e}"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::NoKmsConnector;
    use crate::storage::local::{LocalStorage, LocalStorageFactory};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_empty_destination_passes() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());
        check_for_previous_backup(&store, "test destination")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_existing_manifest_rejected() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());
        store
            .write_file(BACKUP_MANIFEST_NAME, Bytes::from_static(b"x"))
            .await
            .unwrap();

        let err = check_for_previous_backup(&store, "dest")
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::AlreadyExists(_)), "{err}");
        assert!(err.to_string().contains(BACKUP_MANIFEST_NAME));
    }

    #[tokio::test]
    async fn test_existing_checkpoint_rejected() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());
        store
            .write_file(BACKUP_CHECKPOINT_NAME, Bytes::from_static(b"x"))
            .await
            .unwrap();

        let err = check_for_previous_backup(&store, "dest")
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::AlreadyExists(_)), "{err}");
        assert!(err.to_string().contains(BACKUP_CHECKPOINT_NAME));
    }

    #[tokio::test]
    async fn test_create_checkpoint_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());

        create_checkpoint_if_not_exists(&store, CodecSettings::default(), None, &NoKmsConnector)
            .await
            .unwrap();
        let first = store.read_file(BACKUP_CHECKPOINT_NAME).await.unwrap();

        // A second call observes the existing checkpoint and leaves it alone.
        create_checkpoint_if_not_exists(&store, CodecSettings::default(), None, &NoKmsConnector)
            .await
            .unwrap();
        let second = store.read_file(BACKUP_CHECKPOINT_NAME).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_verify_writable_destination() {
        let dir = TempDir::new().unwrap();
        verify_writable_destination(&LocalStorageFactory, &dir.path().display().to_string())
            .await
            .unwrap();
        // Best-effort cleanup removed the sentinel.
        assert!(!dir.path().join(BACKUP_SENTINEL_WRITE_FILE).exists());
    }
}
