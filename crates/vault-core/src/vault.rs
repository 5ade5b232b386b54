//! Vault state machine
//!
//! `Disabled` → `setup` → `Unlocked` ⇄ `lock`/`unlock` ⇄ `Locked`, and back
//! to `Disabled` through `disable`. The starting state comes from the loaded
//! document: no metadata means `Disabled`, otherwise `Locked`.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::credential::rekey::{self, RekeyPlan};
use crate::credential::{ClearedField, CredentialKind, CredentialStore, FieldRef, ServerId};
use crate::crypto::{
    derive_key, generate_salt, hash_password, open_envelope, verify_password, KeyDerivationParams,
    MasterKey, SecretString, VerifierFormat,
};
use crate::document::VaultMetadata;
use crate::error::{Result, VaultError};
use crate::session::VaultSession;
use crate::settings::{Settings, VAULT_ENABLED_KEY};
use crate::storage::{PersistenceAdapter, SharedDocument};

/// Minimum master password length, in characters
pub const MIN_PASSWORD_LEN: usize = 4;

/// Vault state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultState {
    /// No vault metadata; credentials are plaintext
    Disabled,
    /// Vault enabled, key not in memory
    Locked,
    /// Vault enabled, key in memory
    Unlocked,
}

/// Result of `setup`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupReport {
    /// Plaintext fields that were encrypted
    pub sealed: usize,
    /// Fields already marked encrypted and left as they were
    pub already_sealed: usize,
}

/// Result of `change_master_password`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationReport {
    /// Fields re-encrypted under the new key
    pub rotated: usize,
    /// Fields that could not be decrypted and still carry the old key.
    /// These need the disable-then-reset recovery path.
    pub unrecoverable: Vec<FieldRef>,
}

/// Result of `disable` / `force_disable`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisableReport {
    /// Fields decrypted back to plaintext
    pub unsealed: usize,
    /// Undecryptable fields that were cleared, with the envelope they held.
    /// The user must re-enter them.
    pub cleared: Vec<ClearedField>,
}

/// The credential vault
pub struct Vault {
    document: SharedDocument,
    session: VaultSession,
    params: KeyDerivationParams,
    /// Server records and their credentials
    pub servers: CredentialStore,
}

impl Vault {
    /// Open the vault over a persistence backend
    pub async fn open(adapter: Arc<dyn PersistenceAdapter>) -> Result<Self> {
        Self::open_with_params(adapter, KeyDerivationParams::default()).await
    }

    /// Open with explicit key derivation parameters for new salts
    pub async fn open_with_params(
        adapter: Arc<dyn PersistenceAdapter>,
        params: KeyDerivationParams,
    ) -> Result<Self> {
        let document = SharedDocument::open(adapter).await?;
        let session = VaultSession::new();
        let servers = CredentialStore::new(document.clone(), session.clone());

        let vault = Self {
            document,
            session,
            params,
            servers,
        };
        info!("Vault opened ({:?})", vault.state().await);
        Ok(vault)
    }

    /// Get the current vault state
    pub async fn state(&self) -> VaultState {
        let document = self.document.read().await;
        if document.vault.is_none() {
            VaultState::Disabled
        } else if self.session.is_unlocked().await {
            VaultState::Unlocked
        } else {
            VaultState::Locked
        }
    }

    /// Check if the vault is enabled
    pub async fn is_vault_enabled(&self) -> bool {
        self.state().await != VaultState::Disabled
    }

    /// Check if the vault is enabled and unlocked
    pub async fn is_vault_unlocked(&self) -> bool {
        self.state().await == VaultState::Unlocked
    }

    /// Enable the vault: encrypt every plaintext credential under a key
    /// derived from `master_password`, and leave the vault unlocked.
    pub async fn setup(&self, master_password: &str) -> Result<SetupReport> {
        check_strength(master_password)?;

        let _writer = self.document.begin_write().await;
        if self.document.read().await.vault.is_some() {
            return Err(VaultError::AlreadyEnabled);
        }

        info!("Setting up vault");

        let salt = generate_salt();
        let password_hash = hash_password(master_password, &salt, &self.params, VerifierFormat::CURRENT)?;
        let key = derive_key(master_password, &salt, &self.params)?;

        let plan = rekey::plan_seal(&self.document.read().await.servers, &key)?;
        let report = SetupReport {
            sealed: plan.updates.len(),
            already_sealed: plan.untouched,
        };

        {
            let mut document = self.document.write().await;
            rekey::apply(&mut document.servers, plan.updates);
            document.vault = Some(VaultMetadata {
                salt: hex::encode(salt),
                password_hash,
                iterations: self.params.iterations(),
                verifier: VerifierFormat::CURRENT,
                created_at: Some(Utc::now()),
                updated_at: None,
            });
            document.settings.set_vault_enabled(true);
            self.session.install(key).await;
        }

        self.document.flush().await?;

        info!(
            "Vault setup complete: {} credentials encrypted, {} already encrypted",
            report.sealed, report.already_sealed
        );
        Ok(report)
    }

    /// Unlock with the master password. Does not touch persisted data.
    pub async fn unlock(&self, master_password: &str) -> Result<()> {
        let _writer = self.document.begin_write().await;
        let metadata = self.metadata().await?;

        let key = authenticate(&metadata, master_password)?;
        self.session.install(key).await;

        info!("Vault unlocked");
        Ok(())
    }

    /// Drop the key from memory. Safe to call when already locked.
    pub async fn lock(&self) {
        self.session.clear().await;
        info!("Vault locked");
    }

    /// Re-encrypt every credential under a new password and salt.
    ///
    /// Works from `Locked` too; the vault is unlocked with the new key
    /// afterwards. Fields that fail to decrypt keep their old envelope and
    /// are listed in the report.
    pub async fn change_master_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<RotationReport> {
        let _writer = self.document.begin_write().await;
        let metadata = self.metadata().await?;

        let current_key = authenticate(&metadata, current_password)?;
        check_strength(new_password)?;

        let new_salt = generate_salt();
        let new_hash = hash_password(new_password, &new_salt, &self.params, VerifierFormat::CURRENT)?;
        let new_key = derive_key(new_password, &new_salt, &self.params)?;

        let plan = rekey::plan_rotation(&self.document.read().await.servers, &current_key, &new_key)?;
        let report = RotationReport {
            rotated: plan.updates.len(),
            unrecoverable: plan.unrecoverable,
        };

        {
            let mut document = self.document.write().await;
            rekey::apply(&mut document.servers, plan.updates);
            document.vault = Some(VaultMetadata {
                salt: hex::encode(new_salt),
                password_hash: new_hash,
                iterations: self.params.iterations(),
                verifier: VerifierFormat::CURRENT,
                created_at: metadata.created_at,
                updated_at: Some(Utc::now()),
            });
            self.session.install(new_key).await;
        }

        self.document.flush().await?;

        if !report.unrecoverable.is_empty() {
            warn!(
                "Master password changed, but {} credentials could not be re-encrypted: {}",
                report.unrecoverable.len(),
                join_fields(&report.unrecoverable)
            );
        }
        info!("Master password changed: {} credentials re-encrypted", report.rotated);
        Ok(report)
    }

    /// Disable the vault, decrypting every credential back to plaintext.
    ///
    /// If any encrypted field cannot be decrypted nothing is changed and
    /// `RecoveryRequired` lists the affected fields.
    pub async fn disable(&self, master_password: &str) -> Result<DisableReport> {
        self.disable_inner(master_password, false).await
    }

    /// Disable the vault even if some fields cannot be decrypted. Those
    /// fields are cleared and listed in the report.
    pub async fn force_disable(&self, master_password: &str) -> Result<DisableReport> {
        self.disable_inner(master_password, true).await
    }

    async fn disable_inner(&self, master_password: &str, discard_unrecoverable: bool) -> Result<DisableReport> {
        let _writer = self.document.begin_write().await;
        let metadata = self.metadata().await?;

        let key = authenticate(&metadata, master_password)?;

        let plan: RekeyPlan =
            rekey::plan_unseal(&self.document.read().await.servers, &key, discard_unrecoverable);

        if !discard_unrecoverable && !plan.unrecoverable.is_empty() {
            warn!(
                "Vault not disabled: {} credentials could not be decrypted: {}",
                plan.unrecoverable.len(),
                join_fields(&plan.unrecoverable)
            );
            return Err(VaultError::RecoveryRequired(plan.unrecoverable));
        }

        let report = DisableReport {
            unsealed: plan.opened,
            cleared: plan.cleared,
        };

        {
            let mut document = self.document.write().await;
            rekey::apply(&mut document.servers, plan.updates);
            document.vault = None;
            document.settings.set_vault_enabled(false);
            self.session.clear().await;
        }

        self.document.flush().await?;

        if !report.cleared.is_empty() {
            let fields: Vec<FieldRef> = report.cleared.iter().map(|c| c.field.clone()).collect();
            warn!(
                "Cleared {} undecryptable credentials: {}",
                fields.len(),
                join_fields(&fields)
            );
        }
        info!("Vault disabled: {} credentials decrypted", report.unsealed);
        Ok(report)
    }

    /// Usable password for a server.
    ///
    /// Plaintext when the field is unencrypted or the vault is unlocked. With
    /// a locked vault the stored envelope is returned unchanged. `None` if
    /// the server or value is missing or the envelope does not open.
    pub async fn get_decrypted_password(&self, id: ServerId) -> Option<SecretString> {
        self.get_decrypted(id, CredentialKind::Password).await
    }

    /// Usable private key for a server; see `get_decrypted_password`
    pub async fn get_decrypted_private_key(&self, id: ServerId) -> Option<SecretString> {
        self.get_decrypted(id, CredentialKind::PrivateKey).await
    }

    async fn get_decrypted(&self, id: ServerId, kind: CredentialKind) -> Option<SecretString> {
        let document = self.document.read().await;
        let server = document.server(id)?;
        let stored = server.credential(kind)?;

        if !server.is_encrypted(kind) {
            return Some(SecretString::new(stored.to_string()));
        }

        match self.session.key().await {
            Some(key) => open_envelope(stored, &key).map(SecretString::new),
            None => {
                debug!("Vault locked; returning stored envelope for server {}", id);
                Some(SecretString::new(stored.to_string()))
            }
        }
    }

    /// Snapshot of the settings
    pub async fn settings(&self) -> Settings {
        self.document.read().await.settings.clone()
    }

    /// One setting; empty values read as unset
    pub async fn setting(&self, key: &str) -> Option<String> {
        self.document
            .read()
            .await
            .settings
            .get(key)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Set a setting. `vaultEnabled` is reserved for the vault itself.
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        if key == VAULT_ENABLED_KEY {
            return Err(VaultError::ReservedSetting(key.to_string()));
        }

        let _writer = self.document.begin_write().await;
        self.document.write().await.settings.set(key, value);
        self.document.flush().await
    }

    /// The shared document backing this vault
    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    async fn metadata(&self) -> Result<VaultMetadata> {
        self.document
            .read()
            .await
            .vault
            .clone()
            .ok_or(VaultError::VaultNotEnabled)
    }
}

fn check_strength(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(VaultError::WeakPassword(MIN_PASSWORD_LEN));
    }
    Ok(())
}

/// Verify a password against stored metadata and derive its key
fn authenticate(metadata: &VaultMetadata, password: &str) -> Result<MasterKey> {
    let salt = metadata.salt_bytes()?;
    let params = metadata.params();

    if !verify_password(password, &salt, &metadata.password_hash, &params, metadata.verifier)? {
        debug!("Master password verification failed");
        return Err(VaultError::InvalidPassword);
    }
    if metadata.verifier.is_legacy() {
        debug!("Vault uses the legacy verifier; it is replaced on the next password change");
    }

    derive_key(password, &salt, &params)
}

fn join_fields(fields: &[FieldRef]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{ServerInput, ServerRecord};
    use crate::crypto::{decrypt_string, encrypt_string, is_envelope};
    use crate::document::Document;
    use crate::storage::{JsonFileStore, MemoryStore};
    use tempfile::TempDir;

    fn fast() -> KeyDerivationParams {
        KeyDerivationParams::from_stored(1_000)
    }

    fn server(id: ServerId, password: Option<&str>, private_key: Option<&str>) -> ServerRecord {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": format!("srv{}", id),
            "host": "10.1.1.1",
            "username": "root",
            "password": password,
            "passwordEncrypted": false,
            "privateKey": private_key,
            "privateKeyEncrypted": false,
        }))
        .unwrap()
    }

    async fn vault_with(servers: Vec<ServerRecord>) -> (Vault, Arc<MemoryStore>) {
        let document = Document {
            servers,
            ..Default::default()
        };
        let backend = Arc::new(MemoryStore::with_document(document));
        let vault = Vault::open_with_params(backend.clone(), fast()).await.unwrap();
        (vault, backend)
    }

    #[tokio::test]
    async fn test_setup_encrypts_plaintext_credentials() {
        let (vault, backend) = vault_with(vec![server(1, Some("plaintext1"), None)]).await;
        assert_eq!(vault.state().await, VaultState::Disabled);

        let report = vault.setup("hunter2").await.unwrap();
        assert_eq!(report.sealed, 1);
        assert_eq!(vault.state().await, VaultState::Unlocked);

        let stored = backend.stored().await.unwrap();
        let record = &stored.servers[0];
        assert!(record.password_encrypted);
        assert!(is_envelope(record.password.as_deref().unwrap()));
        assert!(record.private_key.is_none());
        assert!(!record.private_key_encrypted);
        assert_eq!(stored.settings.get("vaultEnabled"), Some("true"));

        let metadata = stored.vault.unwrap();
        assert_eq!(metadata.salt.len(), 64);
        assert_eq!(metadata.password_hash.len(), 128);
        assert_eq!(metadata.verifier, VerifierFormat::Separated);
        assert_eq!(metadata.iterations, 1_000);
        assert!(metadata.created_at.is_some());

        assert_eq!(vault.get_decrypted_password(1).await.unwrap().expose(), "plaintext1");
    }

    #[tokio::test]
    async fn test_setup_rejects_weak_password() {
        let (vault, backend) = vault_with(vec![server(1, Some("plaintext1"), None)]).await;
        let saves = backend.save_count();

        assert!(matches!(vault.setup("ab").await, Err(VaultError::WeakPassword(4))));

        assert_eq!(vault.state().await, VaultState::Disabled);
        assert_eq!(backend.save_count(), saves);
        let stored = backend.stored().await.unwrap();
        assert!(stored.vault.is_none());
        assert_eq!(stored.servers[0].password.as_deref(), Some("plaintext1"));
    }

    #[tokio::test]
    async fn test_setup_twice_fails() {
        let (vault, _) = vault_with(vec![]).await;
        vault.setup("hunter2").await.unwrap();

        assert!(matches!(vault.setup("hunter2").await, Err(VaultError::AlreadyEnabled)));
    }

    #[tokio::test]
    async fn test_setup_leaves_already_encrypted_fields() {
        let foreign_key = MasterKey::new([5; 32]);
        let mut partial = server(1, None, Some("pem-body"));
        partial.password = Some(encrypt_string("legacy", &foreign_key).unwrap());
        partial.password_encrypted = true;
        let legacy_envelope = partial.password.clone();

        let (vault, _) = vault_with(vec![partial]).await;
        let report = vault.setup("hunter2").await.unwrap();

        assert_eq!(report, SetupReport { sealed: 1, already_sealed: 1 });
        let record = vault.servers.get_server(1).await.unwrap();
        assert_eq!(record.password, legacy_envelope);
        assert_eq!(decrypt_string(record.password.as_deref().unwrap(), &foreign_key).unwrap(), "legacy");
        assert_eq!(vault.get_decrypted_private_key(1).await.unwrap().expose(), "pem-body");
    }

    #[tokio::test]
    async fn test_unlock_with_wrong_password() {
        let (vault, _) = vault_with(vec![server(1, Some("plaintext1"), None)]).await;
        vault.setup("hunter2").await.unwrap();
        vault.lock().await;

        let err = vault.unlock("wrong").await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidPassword));
        assert_eq!(err.to_string(), "Invalid master password");
        assert!(!vault.is_vault_unlocked().await);
    }

    #[tokio::test]
    async fn test_unlock_disabled_vault() {
        let (vault, _) = vault_with(vec![]).await;
        assert!(matches!(vault.unlock("hunter2").await, Err(VaultError::VaultNotEnabled)));
    }

    #[tokio::test]
    async fn test_lock_hides_secrets_without_losing_them() {
        let (vault, backend) = vault_with(vec![server(1, Some("plaintext1"), Some("pem"))]).await;
        vault.setup("hunter2").await.unwrap();
        let saves = backend.save_count();

        vault.lock().await;
        vault.lock().await;
        assert_eq!(vault.state().await, VaultState::Locked);
        assert_eq!(backend.save_count(), saves);

        let locked = vault.get_decrypted_password(1).await.unwrap();
        assert_ne!(locked.expose(), "plaintext1");
        assert!(is_envelope(locked.expose()));

        vault.unlock("hunter2").await.unwrap();
        assert_eq!(vault.get_decrypted_password(1).await.unwrap().expose(), "plaintext1");
        assert_eq!(vault.get_decrypted_private_key(1).await.unwrap().expose(), "pem");
        assert_eq!(backend.save_count(), saves);
    }

    #[tokio::test]
    async fn test_change_password_rotates_all_fields() {
        let (vault, backend) = vault_with(vec![
            server(1, Some("alpha"), Some("alpha-key")),
            server(2, Some("beta"), None),
        ])
        .await;
        vault.setup("hunter2").await.unwrap();
        let old_metadata = backend.stored().await.unwrap().vault.unwrap();

        let report = vault.change_master_password("hunter2", "correct horse").await.unwrap();
        assert_eq!(report.rotated, 3);
        assert!(report.unrecoverable.is_empty());

        let metadata = backend.stored().await.unwrap().vault.unwrap();
        assert_ne!(metadata.salt, old_metadata.salt);
        assert_eq!(metadata.created_at, old_metadata.created_at);
        assert!(metadata.updated_at.is_some());

        // Decryptable with the new password and new salt
        let new_key = derive_key("correct horse", &metadata.salt_bytes().unwrap(), &fast()).unwrap();
        let stored = backend.stored().await.unwrap();
        assert_eq!(decrypt_string(stored.servers[0].password.as_deref().unwrap(), &new_key).unwrap(), "alpha");
        assert_eq!(decrypt_string(stored.servers[0].private_key.as_deref().unwrap(), &new_key).unwrap(), "alpha-key");
        assert_eq!(decrypt_string(stored.servers[1].password.as_deref().unwrap(), &new_key).unwrap(), "beta");

        vault.lock().await;
        assert!(matches!(vault.unlock("hunter2").await, Err(VaultError::InvalidPassword)));
        vault.unlock("correct horse").await.unwrap();
        assert_eq!(vault.get_decrypted_password(2).await.unwrap().expose(), "beta");
    }

    #[tokio::test]
    async fn test_change_password_from_locked_state() {
        let (vault, _) = vault_with(vec![server(1, Some("alpha"), None)]).await;
        vault.setup("hunter2").await.unwrap();
        vault.lock().await;

        assert!(matches!(
            vault.change_master_password("nope", "new-password").await,
            Err(VaultError::InvalidPassword)
        ));
        assert!(matches!(
            vault.change_master_password("hunter2", "abc").await,
            Err(VaultError::WeakPassword(_))
        ));
        assert_eq!(vault.state().await, VaultState::Locked);

        vault.change_master_password("hunter2", "new-password").await.unwrap();
        assert_eq!(vault.state().await, VaultState::Unlocked);
        assert_eq!(vault.get_decrypted_password(1).await.unwrap().expose(), "alpha");
    }

    #[tokio::test]
    async fn test_change_password_reports_undecryptable_fields() {
        let (vault, _) = vault_with(vec![server(1, Some("alpha"), None)]).await;
        vault.setup("hunter2").await.unwrap();

        let foreign = encrypt_string("lost", &MasterKey::new([9; 32])).unwrap();
        {
            let mut document = vault.document().write().await;
            let record = document.server_mut(1).unwrap();
            record.private_key = Some(foreign.clone());
            record.private_key_encrypted = true;
        }

        let report = vault.change_master_password("hunter2", "next-password").await.unwrap();
        assert_eq!(report.rotated, 1);
        assert_eq!(report.unrecoverable.len(), 1);
        assert_eq!(report.unrecoverable[0].kind, CredentialKind::PrivateKey);

        let record = vault.servers.get_server(1).await.unwrap();
        assert_eq!(record.private_key.as_deref(), Some(foreign.as_str()));
        assert!(vault.get_decrypted_private_key(1).await.is_none());
        assert_eq!(vault.get_decrypted_password(1).await.unwrap().expose(), "alpha");
    }

    #[tokio::test]
    async fn test_disable_restores_plaintext() {
        let (vault, backend) = vault_with(vec![server(1, Some("alpha"), Some("alpha-key"))]).await;
        vault.setup("hunter2").await.unwrap();
        vault.lock().await;

        assert!(matches!(vault.disable("wrong").await, Err(VaultError::InvalidPassword)));

        let report = vault.disable("hunter2").await.unwrap();
        assert_eq!(report.unsealed, 2);
        assert!(report.cleared.is_empty());

        assert!(!vault.is_vault_enabled().await);
        assert_eq!(vault.state().await, VaultState::Disabled);

        let stored = backend.stored().await.unwrap();
        assert!(stored.vault.is_none());
        assert_eq!(stored.settings.get("vaultEnabled"), Some("false"));
        let record = &stored.servers[0];
        assert_eq!(record.password.as_deref(), Some("alpha"));
        assert!(!record.password_encrypted);
        assert_eq!(record.private_key.as_deref(), Some("alpha-key"));
        assert!(!record.private_key_encrypted);

        assert!(matches!(vault.disable("hunter2").await, Err(VaultError::VaultNotEnabled)));
    }

    #[tokio::test]
    async fn test_disable_with_undecryptable_field_requires_recovery() {
        let (vault, backend) = vault_with(vec![server(1, Some("alpha"), None), server(2, None, None)]).await;
        vault.setup("hunter2").await.unwrap();
        {
            let mut document = vault.document().write().await;
            let record = document.server_mut(2).unwrap();
            record.password = Some("deadbeef:00:00".to_string());
            record.password_encrypted = true;
        }
        let saves = backend.save_count();

        match vault.disable("hunter2").await {
            Err(VaultError::RecoveryRequired(fields)) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].server_id, 2);
            }
            other => panic!("expected RecoveryRequired, got {:?}", other),
        }
        assert!(vault.is_vault_enabled().await);
        assert_eq!(backend.save_count(), saves);

        let report = vault.force_disable("hunter2").await.unwrap();
        assert_eq!(report.unsealed, 1);
        assert_eq!(report.cleared.len(), 1);
        assert_eq!(report.cleared[0].field.server_id, 2);
        assert_eq!(report.cleared[0].envelope, "deadbeef:00:00");

        let stored = backend.stored().await.unwrap();
        assert!(stored.vault.is_none());
        assert!(stored
            .servers
            .iter()
            .all(|s| !s.password_encrypted && !s.private_key_encrypted));
        assert_eq!(stored.servers[0].password.as_deref(), Some("alpha"));
        assert!(stored.servers[1].password.is_none());
    }

    #[tokio::test]
    async fn test_new_servers_follow_vault_state() {
        let (vault, _) = vault_with(vec![]).await;
        vault.setup("hunter2").await.unwrap();

        let sealed = vault
            .servers
            .add_server(ServerInput {
                host: "a".to_string(),
                username: "u".to_string(),
                password: Some("while-unlocked".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        vault.lock().await;
        let open = vault
            .servers
            .add_server(ServerInput {
                host: "b".to_string(),
                username: "u".to_string(),
                password: Some("while-locked".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(vault.servers.get_server(sealed).await.unwrap().password_encrypted);
        assert!(!vault.servers.get_server(open).await.unwrap().password_encrypted);
        assert_eq!(vault.get_decrypted_password(open).await.unwrap().expose(), "while-locked");

        vault.unlock("hunter2").await.unwrap();
        assert_eq!(vault.get_decrypted_password(sealed).await.unwrap().expose(), "while-unlocked");
    }

    #[tokio::test]
    async fn test_missing_server_or_value() {
        let (vault, _) = vault_with(vec![server(1, None, None)]).await;

        assert!(vault.get_decrypted_password(99).await.is_none());
        assert!(vault.get_decrypted_password(1).await.is_none());
    }

    #[tokio::test]
    async fn test_reserved_setting() {
        let (vault, _) = vault_with(vec![]).await;

        assert!(matches!(
            vault.set_setting("vaultEnabled", "true").await,
            Err(VaultError::ReservedSetting(_))
        ));
        vault.set_setting("theme", "light").await.unwrap();
        vault.set_setting("shell", "").await.unwrap();
        assert_eq!(vault.settings().await.get("theme"), Some("light"));
        assert!(!vault.settings().await.vault_enabled());

        assert_eq!(vault.setting("theme").await.as_deref(), Some("light"));
        assert_eq!(vault.setting("shell").await, None);
        assert_eq!(vault.setting("noSuchKey").await, None);
        let all: Vec<_> = vault.settings().await.iter().map(|(k, _)| k.to_string()).collect();
        assert!(all.contains(&"theme".to_string()));
        assert!(all.contains(&"vaultEnabled".to_string()));
    }

    #[tokio::test]
    async fn test_failed_flush_is_reported() {
        let (vault, backend) = vault_with(vec![server(1, Some("alpha"), None)]).await;
        backend.set_fail_saves(true);

        assert!(matches!(vault.setup("hunter2").await, Err(VaultError::StorageError(_))));
        // In-memory state is consistent even though it was not persisted
        assert_eq!(vault.state().await, VaultState::Unlocked);
        assert!(backend.stored().await.unwrap().vault.is_none());

        backend.set_fail_saves(false);
        vault.set_setting("theme", "light").await.unwrap();
        assert!(backend.stored().await.unwrap().vault.is_some());
    }

    #[tokio::test]
    async fn test_reopen_from_file_starts_locked() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("polarops-data.json");

        {
            let vault = Vault::open_with_params(Arc::new(JsonFileStore::with_path(&path)), fast())
                .await
                .unwrap();
            let id = vault
                .servers
                .add_server(ServerInput {
                    host: "db.internal".to_string(),
                    username: "admin".to_string(),
                    password: Some("s3cret".to_string()),
                    ..Default::default()
                })
                .await
                .unwrap();
            vault.setup("hunter2").await.unwrap();
            assert_eq!(vault.get_decrypted_password(id).await.unwrap().expose(), "s3cret");
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("s3cret"));

        // A different default iteration count must not affect the stored vault
        let vault = Vault::open(Arc::new(JsonFileStore::with_path(&path))).await.unwrap();
        assert_eq!(vault.state().await, VaultState::Locked);

        vault.unlock("hunter2").await.unwrap();
        let id = vault.servers.list_servers().await[0].id;
        assert_eq!(vault.get_decrypted_password(id).await.unwrap().expose(), "s3cret");
    }

    #[tokio::test]
    async fn test_concurrent_reads_during_rotation() {
        let (vault, _) = vault_with(vec![server(1, Some("alpha"), None)]).await;
        vault.setup("hunter2").await.unwrap();
        let vault = Arc::new(vault);

        let reader = {
            let vault = vault.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let value = vault.get_decrypted_password(1).await.unwrap();
                    assert_eq!(value.expose(), "alpha");
                    tokio::task::yield_now().await;
                }
            })
        };

        vault.change_master_password("hunter2", "rotated-1").await.unwrap();
        vault.change_master_password("rotated-1", "rotated-2").await.unwrap();

        reader.await.unwrap();
    }

    /// Document laid out the way older PolarOps builds wrote it: bare-salt
    /// verifier, no `iterations` or `verifier` keys.
    fn legacy_document(password: &str, secret: &str) -> Document {
        use pbkdf2::pbkdf2_hmac;
        use sha2::Sha512;

        let salt = generate_salt();
        let mut hash = [0u8; 64];
        pbkdf2_hmac::<Sha512>(password.as_bytes(), &salt, crate::crypto::DEFAULT_ITERATIONS, &mut hash);
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha512>(password.as_bytes(), &salt, crate::crypto::DEFAULT_ITERATIONS, &mut key);
        let envelope = encrypt_string(secret, &MasterKey::new(key)).unwrap();

        serde_json::from_value(serde_json::json!({
            "servers": [{
                "id": 1700000000000u64,
                "name": "legacy",
                "host": "10.2.2.2",
                "port": 22,
                "username": "root",
                "password": envelope,
                "passwordEncrypted": true,
                "privateKey": null,
                "privateKeyEncrypted": false
            }],
            "settings": { "vaultEnabled": "true" },
            "vault": {
                "salt": hex::encode(salt),
                "passwordHash": hex::encode(hash),
                "createdAt": "2024-03-01T12:00:00.000Z"
            },
            "pingHistory": []
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_legacy_vault_unlocks_and_upgrades_on_rotation() {
        let backend = Arc::new(MemoryStore::with_document(legacy_document("hunter2", "old-secret")));
        let vault = Vault::open_with_params(backend.clone(), fast()).await.unwrap();
        assert_eq!(vault.state().await, VaultState::Locked);

        assert!(matches!(vault.unlock("wrong").await, Err(VaultError::InvalidPassword)));
        vault.unlock("hunter2").await.unwrap();
        assert_eq!(
            vault.get_decrypted_password(1700000000000).await.unwrap().expose(),
            "old-secret"
        );

        let report = vault.change_master_password("hunter2", "fresh-password").await.unwrap();
        assert_eq!(report.rotated, 1);

        let metadata = backend.stored().await.unwrap().vault.unwrap();
        assert_eq!(metadata.verifier, VerifierFormat::Separated);

        vault.lock().await;
        vault.unlock("fresh-password").await.unwrap();
        assert_eq!(
            vault.get_decrypted_password(1700000000000).await.unwrap().expose(),
            "old-secret"
        );
    }

    #[tokio::test]
    async fn test_legacy_vault_disables() {
        let backend = Arc::new(MemoryStore::with_document(legacy_document("hunter2", "old-secret")));
        let vault = Vault::open(backend.clone()).await.unwrap();

        let report = vault.disable("hunter2").await.unwrap();
        assert_eq!(report.unsealed, 1);

        let stored = backend.stored().await.unwrap();
        assert_eq!(stored.servers[0].password.as_deref(), Some("old-secret"));
        assert!(stored.vault.is_none());
    }

    #[tokio::test]
    async fn test_disable_does_not_count_empty_flags() {
        let (vault, _) = vault_with(vec![server(1, Some("alpha"), None), server(2, None, None)]).await;
        vault.setup("hunter2").await.unwrap();
        vault.document().write().await.server_mut(2).unwrap().private_key_encrypted = true;

        let report = vault.disable("hunter2").await.unwrap();
        assert_eq!(report.unsealed, 1);
        assert!(report.cleared.is_empty());
        assert!(!vault.servers.get_server(2).await.unwrap().private_key_encrypted);
    }
}
