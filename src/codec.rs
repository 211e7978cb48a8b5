//! Envelope codec for persisted backup metadata.
//!
//! On-disk layout: an optional encryption envelope wrapping a
//! zstd-compressed, bincode-serialized message. Compression is detected by
//! content-sniffing whatever bytes remain after decryption (or the raw bytes
//! when no encryption is configured) rather than assumed. The same envelope
//! rules apply to manifests, partition descriptors and table statistics.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::encryption::cipher;
use crate::error::{BackupError, Result};

/// zstd frame magic, little-endian 0xFD2FB528.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Settings applied when encoding payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecSettings {
    /// zstd compression level; 0 selects the library default.
    pub compression_level: i32,
}

/// Serialize, compress and (when a key is given) encrypt a metadata payload.
pub fn encode_payload<T: Serialize>(
    msg: &T,
    settings: CodecSettings,
    key: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let raw = bincode::serialize(msg).map_err(|e| BackupError::Serialization(e.to_string()))?;
    let compressed = compress(&raw, settings.compression_level)?;
    match key {
        Some(key) => cipher::encrypt_payload(&compressed, key),
        None => Ok(compressed),
    }
}

/// Decrypt (when a key is given), decompress and deserialize a metadata
/// payload. Deserialization failures on raw bytes that carry the encryption
/// header get the actionable "likely encrypted" error instead of a generic
/// corruption one.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8], key: Option<&[u8]>) -> Result<T> {
    let decrypted = match key {
        Some(key) => cipher::decrypt_payload(bytes, key)?,
        None => bytes.to_vec(),
    };
    let plain = if is_compressed(&decrypted) {
        decompress(&decrypted)?
    } else {
        decrypted
    };
    match bincode::deserialize(&plain) {
        Ok(msg) => Ok(msg),
        Err(e) => {
            if key.is_none() && cipher::appears_encrypted(bytes) {
                return Err(BackupError::LikelyEncrypted);
            }
            Err(BackupError::CorruptManifest(e.to_string()))
        }
    }
}

/// Whether the bytes start with a zstd frame.
pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.len() >= ZSTD_MAGIC.len() && bytes[..ZSTD_MAGIC.len()] == ZSTD_MAGIC
}

fn compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
    zstd::stream::encode_all(data, level)
        .map_err(|e| BackupError::Compression(format!("compressing payload: {e}")))
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    zstd::stream::decode_all(data)
        .map_err(|e| BackupError::Compression(format!("decompressing payload: {e}")))
}
