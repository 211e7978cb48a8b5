//! Custom error types for the backup metadata layer.

use thiserror::Error;

use crate::timestamp::Timestamp;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An I/O failure wrapped with destination or operation context.
    #[error("{0}")]
    Storage(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("listing not supported: {0}")]
    ListingUnsupported(String),

    #[error("corrupt manifest: {0}")]
    CorruptManifest(String),

    #[error("file appears encrypted -- try specifying one of \"encryption_passphrase\" or \"kms\"")]
    LikelyEncrypted,

    #[error("{0}")]
    AlreadyExists(String),

    #[error("expected partition descriptor {0} not found in backup locations")]
    MissingPartitionDescriptor(String),

    #[error("duplicate locality {0} found in backup")]
    DuplicateLocality(String),

    #[error("{0}")]
    RevisionHistoryRequired(String),

    #[error("invalid restore timestamp: backup for requested time only has revision history from {0}")]
    RevisionHistoryTooShort(Timestamp),

    #[error("invalid restore timestamp: supplied backups do not cover requested time")]
    TimeNotCovered,

    #[error("invalid encryption mode: {0}")]
    InvalidEncryptionMode(String),

    #[error("encryption options required but not provided")]
    MissingEncryptionOptions,

    #[error("failed to decrypt data key: {0}")]
    EncryptionKey(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl BackupError {
    /// Whether this is the storage collaborator's "file does not exist"
    /// result, the only non-fatal outcome for existence probes.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackupError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
