//! # vault-core
//!
//! Credential vault for PolarOps including:
//! - AES-256-GCM envelope encryption under a PBKDF2-SHA512 derived key
//! - Setup, unlock/lock, master password rotation and disable transitions
//! - Server credential store that encrypts new secrets while unlocked
//! - Pluggable persistence of the whole document (JSON file, in-memory)

pub mod credential;
pub mod crypto;
pub mod document;
pub mod error;
pub mod session;
pub mod settings;
pub mod storage;
mod vault;

pub use credential::{
    ClearedField, CredentialKind, CredentialStore, FieldRef, ServerId, ServerInput, ServerRecord,
};
pub use crypto::{KeyDerivationParams, SecretString, VerifierFormat};
pub use document::{Document, VaultMetadata};
pub use error::{Result, VaultError};
pub use session::VaultSession;
pub use settings::Settings;
pub use storage::{DocumentInfo, JsonFileStore, MemoryStore, PersistenceAdapter, SharedDocument};
pub use vault::{DisableReport, RotationReport, SetupReport, Vault, VaultState, MIN_PASSWORD_LEN};
