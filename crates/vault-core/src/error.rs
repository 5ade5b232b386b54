//! Error types for vault-core

use thiserror::Error;

use crate::credential::{FieldRef, ServerId};

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Master password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("Vault is already enabled")]
    AlreadyEnabled,

    #[error("Vault is not enabled")]
    VaultNotEnabled,

    #[error("Invalid master password")]
    InvalidPassword,

    #[error("{} credential(s) could not be decrypted and need manual recovery", .0.len())]
    RecoveryRequired(Vec<FieldRef>),

    #[error("Server not found: {0}")]
    ServerNotFound(ServerId),

    #[error("Setting '{0}' is managed by the vault and cannot be set directly")]
    ReservedSetting(String),

    #[error("Encryption failed: {0}")]
    EncryptionError(String),

    #[error("Decryption failed: {0}")]
    DecryptionError(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
