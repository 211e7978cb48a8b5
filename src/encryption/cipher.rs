//! Encryption primitive for metadata payloads.
//!
//! ChaCha20-Poly1305 AEAD behind a fixed magic header; key material of any
//! length is conditioned through SHA-256. The header makes encrypted
//! payloads recognizable without attempting decryption.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::{BackupError, Result};

/// Magic prefix identifying an encrypted metadata payload.
const ENCRYPTION_MAGIC: &[u8; 4] = b"ENCB";
const NONCE_LEN: usize = 12;

/// Whether the bytes carry the encryption envelope header.
pub fn appears_encrypted(bytes: &[u8]) -> bool {
    bytes.len() >= ENCRYPTION_MAGIC.len() && &bytes[..ENCRYPTION_MAGIC.len()] == ENCRYPTION_MAGIC
}

fn conditioned_key(key_material: &[u8]) -> Key {
    let digest = Sha256::digest(key_material);
    *Key::from_slice(digest.as_slice())
}

/// Encrypt a payload under the given key material, prepending the envelope
/// header and a fresh nonce.
pub fn encrypt_payload(plaintext: &[u8], key_material: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(&conditioned_key(key_material));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| BackupError::Encryption("encrypting payload".into()))?;

    let mut out = Vec::with_capacity(ENCRYPTION_MAGIC.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(ENCRYPTION_MAGIC);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an enveloped payload.
pub fn decrypt_payload(bytes: &[u8], key_material: &[u8]) -> Result<Vec<u8>> {
    if !appears_encrypted(bytes) {
        return Err(BackupError::Encryption(
            "payload is missing the encryption header".into(),
        ));
    }
    let rest = &bytes[ENCRYPTION_MAGIC.len()..];
    if rest.len() < NONCE_LEN {
        return Err(BackupError::Encryption("truncated encrypted payload".into()));
    }
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let cipher = ChaCha20Poly1305::new(&conditioned_key(key_material));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| BackupError::Encryption("decrypting payload (wrong key?)".into()))
}
