//! AES-256-GCM authenticated encryption
//!
//! Envelope format: `{nonce_hex}:{auth_tag_hex}:{ciphertext_hex}`
//! - Nonce: 16 bytes (128 bits), fresh per call
//! - Auth tag: 16 bytes (128 bits)
//! - Ciphertext: variable length

use aes_gcm::{
    aead::{consts::U16, Aead, KeyInit},
    aes::Aes256,
    AesGcm, Nonce,
};
use rand::RngCore;
use tracing::warn;

use super::MasterKey;
use crate::error::{Result, VaultError};

/// Nonce length in bytes
pub const NONCE_LEN: usize = 16;

/// Authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// AES-256-GCM with a 128-bit nonce
type VaultCipher = AesGcm<Aes256, U16>;

/// Encrypted data with nonce and auth tag
#[derive(Debug, Clone)]
pub struct EncryptedData {
    /// Random nonce (16 bytes)
    pub nonce: [u8; NONCE_LEN],
    /// Authentication tag (16 bytes)
    pub auth_tag: [u8; TAG_LEN],
    /// Encrypted ciphertext
    pub ciphertext: Vec<u8>,
}

impl std::fmt::Display for EncryptedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            hex::encode(self.nonce),
            hex::encode(self.auth_tag),
            hex::encode(&self.ciphertext)
        )
    }
}

impl EncryptedData {
    /// Parse from the format: `{nonce_hex}:{auth_tag_hex}:{ciphertext_hex}`
    pub fn from_string(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(VaultError::DecryptionError(
                "Invalid envelope format: expected nonce:tag:ciphertext".to_string(),
            ));
        }

        let nonce_bytes = hex::decode(parts[0])
            .map_err(|e| VaultError::DecryptionError(format!("Invalid nonce hex: {}", e)))?;
        let auth_tag_bytes = hex::decode(parts[1])
            .map_err(|e| VaultError::DecryptionError(format!("Invalid auth tag hex: {}", e)))?;
        let ciphertext = hex::decode(parts[2])
            .map_err(|e| VaultError::DecryptionError(format!("Invalid ciphertext hex: {}", e)))?;

        let nonce: [u8; NONCE_LEN] = nonce_bytes.as_slice().try_into().map_err(|_| {
            VaultError::DecryptionError(format!(
                "Invalid nonce length: expected {}, got {}",
                NONCE_LEN,
                nonce_bytes.len()
            ))
        })?;
        let auth_tag: [u8; TAG_LEN] = auth_tag_bytes.as_slice().try_into().map_err(|_| {
            VaultError::DecryptionError(format!(
                "Invalid auth tag length: expected {}, got {}",
                TAG_LEN,
                auth_tag_bytes.len()
            ))
        })?;

        Ok(Self {
            nonce,
            auth_tag,
            ciphertext,
        })
    }
}

/// Encrypt plaintext using AES-256-GCM
///
/// # Arguments
/// * `plaintext` - The data to encrypt
/// * `key` - The 256-bit encryption key
///
/// # Returns
/// Encrypted data containing nonce, auth tag, and ciphertext
pub fn encrypt(plaintext: &[u8], key: &MasterKey) -> Result<EncryptedData> {
    let cipher = VaultCipher::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::EncryptionError(e.to_string()))?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    // aes-gcm appends the auth tag to the ciphertext
    let ciphertext_with_tag = cipher
        .encrypt(Nonce::<U16>::from_slice(&nonce), plaintext)
        .map_err(|e| VaultError::EncryptionError(e.to_string()))?;

    if ciphertext_with_tag.len() < TAG_LEN {
        return Err(VaultError::EncryptionError(
            "Ciphertext too short".to_string(),
        ));
    }

    let tag_start = ciphertext_with_tag.len() - TAG_LEN;
    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(&ciphertext_with_tag[tag_start..]);

    Ok(EncryptedData {
        nonce,
        auth_tag,
        ciphertext: ciphertext_with_tag[..tag_start].to_vec(),
    })
}

/// Encrypt a string and return the serialized envelope
pub fn encrypt_string(plaintext: &str, key: &MasterKey) -> Result<String> {
    let encrypted = encrypt(plaintext.as_bytes(), key)?;
    Ok(encrypted.to_string())
}

/// Encrypt an optional secret. Absent and empty values have no envelope.
pub fn encrypt_optional(plaintext: Option<&str>, key: &MasterKey) -> Result<Option<String>> {
    match plaintext {
        Some(value) if !value.is_empty() => encrypt_string(value, key).map(Some),
        _ => Ok(None),
    }
}

/// Decrypt ciphertext using AES-256-GCM
///
/// Fails if the auth tag does not match, so a tampered envelope never
/// yields plaintext.
pub fn decrypt(encrypted: &EncryptedData, key: &MasterKey) -> Result<Vec<u8>> {
    let cipher = VaultCipher::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::DecryptionError(e.to_string()))?;

    // Reconstruct ciphertext with tag appended (as expected by aes-gcm)
    let mut ciphertext_with_tag = encrypted.ciphertext.clone();
    ciphertext_with_tag.extend_from_slice(&encrypted.auth_tag);

    cipher
        .decrypt(Nonce::<U16>::from_slice(&encrypted.nonce), ciphertext_with_tag.as_slice())
        .map_err(|_| VaultError::DecryptionError("authentication failed".to_string()))
}

/// Decrypt from the serialized envelope and return as string
pub fn decrypt_string(envelope: &str, key: &MasterKey) -> Result<String> {
    let encrypted = EncryptedData::from_string(envelope)?;
    let plaintext = decrypt(&encrypted, key)?;
    String::from_utf8(plaintext)
        .map_err(|e| VaultError::DecryptionError(format!("Invalid UTF-8: {}", e)))
}

/// Decrypt an envelope, reporting any failure only as `None`.
///
/// The reason is logged; callers cannot tell a malformed envelope from a
/// wrong key.
pub fn open_envelope(envelope: &str, key: &MasterKey) -> Option<String> {
    match decrypt_string(envelope, key) {
        Ok(plaintext) => Some(plaintext),
        Err(e) => {
            warn!("Could not recover credential value: {}", e);
            None
        }
    }
}

/// Whether a stored value is a well-formed envelope
pub fn is_envelope(value: &str) -> bool {
    EncryptedData::from_string(value).is_ok()
}
