//! Encryption configuration and key resolution.
//!
//! Options are supplied per-operation by the caller and never persisted in a
//! manifest. The `encryption-info` sidecar records which mode a destination
//! was written with so later reads can replay the same derivation.

pub mod cipher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BackupError, Result};

/// How the data-encryption key for a backup is supplied.
#[derive(Debug, Clone, PartialEq)]
pub enum EncryptionOptions {
    /// Raw passphrase-derived key embedded in the options.
    Passphrase { key: Vec<u8> },
    /// Key wrapped by an external KMS; unwrapped on use.
    Kms(KmsInfo),
}

#[derive(Debug, Clone, PartialEq)]
pub struct KmsInfo {
    pub uri: String,
    pub encrypted_data_key: Vec<u8>,
}

/// An open connection to a key-management service.
#[async_trait]
pub trait Kms: Send + Sync {
    /// Unwrap an encrypted data key into its plaintext form.
    async fn decrypt(&self, encrypted_data_key: &[u8]) -> Result<Vec<u8>>;
    /// Release the underlying connection.
    async fn close(&mut self) -> Result<()>;
}

/// Opens KMS connections from their URIs.
#[async_trait]
pub trait KmsConnector: Send + Sync {
    async fn open(&self, uri: &str) -> Result<Box<dyn Kms>>;
}

/// Connector for deployments without a KMS; opening always fails.
pub struct NoKmsConnector;

#[async_trait]
impl KmsConnector for NoKmsConnector {
    async fn open(&self, uri: &str) -> Result<Box<dyn Kms>> {
        Err(BackupError::EncryptionKey(format!(
            "no KMS configured, cannot open {uri}"
        )))
    }
}

/// Derive the usable data key from the caller's encryption options.
///
/// Passphrase mode returns the embedded key unchanged. KMS mode opens a
/// scoped client against the configured URI, unwraps the data key and closes
/// the client on every exit path.
pub async fn resolve_encryption_key(
    options: Option<&EncryptionOptions>,
    connector: &dyn KmsConnector,
) -> Result<Vec<u8>> {
    let options = options.ok_or(BackupError::MissingEncryptionOptions)?;
    match options {
        EncryptionOptions::Passphrase { key } => Ok(key.clone()),
        EncryptionOptions::Kms(info) => {
            let mut kms = connector.open(&info.uri).await?;
            let decrypted = kms.decrypt(&info.encrypted_data_key).await;
            if let Err(e) = kms.close().await {
                warn!("failed to close KMS connection to {}: {e}", info.uri);
            }
            decrypted.map_err(|e| BackupError::EncryptionKey(e.to_string()))
        }
    }
}

/// Persisted record of the encryption parameters a destination was written
/// with; stored as the `encryption-info` sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_uri: Option<String>,
}

impl EncryptionInfo {
    pub const MODE_PASSPHRASE: &'static str = "passphrase";
    pub const MODE_KMS: &'static str = "kms";

    /// Sidecar record for the options a backup is being written with.
    pub fn for_options(options: &EncryptionOptions) -> Self {
        match options {
            EncryptionOptions::Passphrase { .. } => EncryptionInfo {
                mode: Self::MODE_PASSPHRASE.into(),
                salt: None,
                kms_uri: None,
            },
            EncryptionOptions::Kms(info) => EncryptionInfo {
                mode: Self::MODE_KMS.into(),
                salt: None,
                kms_uri: Some(info.uri.clone()),
            },
        }
    }

    /// Validate the recorded mode before replaying a derivation from it.
    pub fn validate_mode(&self) -> Result<()> {
        match self.mode.as_str() {
            Self::MODE_PASSPHRASE | Self::MODE_KMS => Ok(()),
            other => Err(BackupError::InvalidEncryptionMode(other.to_string())),
        }
    }
}
