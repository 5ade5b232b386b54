//! The persisted document: servers, settings and vault metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::credential::{ServerId, ServerRecord};
use crate::crypto::{KeyDerivationParams, VerifierFormat, DEFAULT_ITERATIONS};
use crate::error::{Result, VaultError};
use crate::settings::Settings;

/// Top-level key of the per-server ping history
pub const PING_HISTORY_KEY: &str = "pingHistory";

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

/// Non-secret vault metadata. Present only while the vault is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultMetadata {
    /// Hex-encoded 32-byte salt
    pub salt: String,
    /// Hex-encoded verification hash of the master password
    pub password_hash: String,
    /// PBKDF2 iteration count used for `salt`
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Derivation of `password_hash`. Absent in files that predate it.
    #[serde(default, skip_serializing_if = "VerifierFormat::is_legacy")]
    pub verifier: VerifierFormat,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl VaultMetadata {
    /// Decoded salt bytes
    pub fn salt_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.salt)
            .map_err(|e| VaultError::StorageError(format!("Vault metadata has an invalid salt: {}", e)))
    }

    /// Derivation parameters the metadata was created with
    pub fn params(&self) -> KeyDerivationParams {
        KeyDerivationParams::from_stored(self.iterations)
    }
}

/// Whole-document model handed to the persistence adapter
///
/// Top-level keys this crate does not model (ping history, dashboard
/// counters) are carried in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub servers: Vec<ServerRecord>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultMetadata>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    /// Find a server record
    pub fn server(&self, id: ServerId) -> Option<&ServerRecord> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub(crate) fn server_mut(&mut self, id: ServerId) -> Option<&mut ServerRecord> {
        self.servers.iter_mut().find(|s| s.id == id)
    }

    /// Fresh server id: the current time in milliseconds, bumped past any
    /// existing id
    pub(crate) fn next_server_id(&self) -> Result<ServerId> {
        let now = Utc::now().timestamp_millis().max(0) as ServerId;
        match self.servers.iter().map(|s| s.id).max() {
            None => Ok(now),
            Some(max_existing) => max_existing
                .checked_add(1)
                .map(|next| next.max(now))
                .ok_or_else(|| VaultError::StorageError("Server id space exhausted".to_string())),
        }
    }

    /// Number of ping history records
    pub fn ping_record_count(&self) -> usize {
        self.extra
            .get(PING_HISTORY_KEY)
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }

    /// Drop the ping history of one server. Returns the number of records
    /// removed.
    pub(crate) fn remove_ping_history(&mut self, id: ServerId) -> usize {
        let Some(Value::Array(history)) = self.extra.get_mut(PING_HISTORY_KEY) else {
            return 0;
        };
        let before = history.len();
        history.retain(|record| record.get("server_id").and_then(Value::as_u64) != Some(id));
        before - history.len()
    }

    /// Fill defaults and reconcile the vault flag with the metadata.
    /// Returns true if anything changed.
    pub fn normalize(&mut self) -> bool {
        let mut changed = self.settings.fill_defaults();

        let has_metadata = self.vault.is_some();
        if self.settings.vault_enabled() != has_metadata
            || self.settings.get(crate::settings::VAULT_ENABLED_KEY).is_none()
        {
            if self.settings.vault_enabled() && !has_metadata {
                warn!("vaultEnabled is set but vault metadata is missing; marking vault disabled");
            } else if has_metadata && !self.settings.vault_enabled() {
                warn!("Vault metadata present but vaultEnabled is not set; marking vault enabled");
            }
            self.settings.set_vault_enabled(has_metadata);
            changed = true;
        }

        changed
    }
}
