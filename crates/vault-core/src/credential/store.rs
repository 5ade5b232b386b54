//! Server records and their credentials
//!
//! Secrets written while the vault is enabled and unlocked are encrypted
//! before they reach the document. While the vault is disabled or locked they
//! are stored as plaintext; a write never waits for an unlock.

use chrono::Utc;
use serde_json::Map;
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{CredentialKind, ServerId, ServerInput, ServerRecord, DEFAULT_PORT};
use crate::crypto::{encrypt_optional, MasterKey};
use crate::document::Document;
use crate::error::{Result, VaultError};
use crate::session::VaultSession;
use crate::storage::SharedDocument;

/// CRUD over server records
#[derive(Clone)]
pub struct CredentialStore {
    document: SharedDocument,
    session: VaultSession,
}

impl CredentialStore {
    /// Create a credential store over a shared document and session
    pub fn new(document: SharedDocument, session: VaultSession) -> Self {
        Self { document, session }
    }

    /// All server records, credentials as stored
    pub async fn list_servers(&self) -> Vec<ServerRecord> {
        self.document.read().await.servers.clone()
    }

    /// One server record, credentials as stored
    pub async fn get_server(&self, id: ServerId) -> Option<ServerRecord> {
        self.document.read().await.server(id).cloned()
    }

    /// Add a server. Returns the new id.
    pub async fn add_server(&self, input: ServerInput) -> Result<ServerId> {
        let _writer = self.document.begin_write().await;

        let id = {
            let mut document = self.document.write().await;
            let key = self.sealing_key(&document).await;

            let now = Utc::now();
            let mut record = ServerRecord {
                id: document.next_server_id()?,
                name: input.display_name(),
                host: input.host.clone(),
                port: input.port.unwrap_or(DEFAULT_PORT),
                username: input.username.clone(),
                password: None,
                password_encrypted: false,
                private_key: None,
                private_key_encrypted: false,
                color: input.color.clone(),
                created_at: Some(now),
                updated_at: Some(now),
                last_connected_at: None,
                extra: Map::new(),
            };
            store_secrets(&mut record, &input, key.as_deref())?;

            let id = record.id;
            document.servers.push(record);
            id
        };

        self.document.flush().await?;

        info!("Added server {}", id);
        Ok(id)
    }

    /// Replace a server's connection fields and credentials. Unmodelled
    /// fields are kept; the colour is kept when the input has none.
    pub async fn update_server(&self, id: ServerId, input: ServerInput) -> Result<()> {
        let _writer = self.document.begin_write().await;

        {
            let mut document = self.document.write().await;
            let key = self.sealing_key(&document).await;

            let record = document
                .server_mut(id)
                .ok_or(VaultError::ServerNotFound(id))?;

            record.name = input.display_name();
            record.host = input.host.clone();
            record.port = input.port.unwrap_or(DEFAULT_PORT);
            record.username = input.username.clone();
            if input.color.is_some() {
                record.color = input.color.clone();
            }
            record.updated_at = Some(Utc::now());
            store_secrets(record, &input, key.as_deref())?;
        }

        self.document.flush().await?;

        info!("Updated server {}", id);
        Ok(())
    }

    /// Set or clear a server's colour
    pub async fn update_server_color(&self, id: ServerId, color: Option<String>) -> Result<()> {
        self.touch(id, |record| record.color = color).await?;
        debug!("Updated colour of server {}", id);
        Ok(())
    }

    /// Record that a connection to the server was just opened
    pub async fn update_server_last_connected(&self, id: ServerId) -> Result<()> {
        self.touch(id, |record| record.last_connected_at = Some(Utc::now()))
            .await?;
        debug!("Recorded connection to server {}", id);
        Ok(())
    }

    /// Delete a server and its ping history. Deleting an unknown id is a
    /// no-op.
    pub async fn delete_server(&self, id: ServerId) -> Result<()> {
        let _writer = self.document.begin_write().await;

        let (removed, pings) = {
            let mut document = self.document.write().await;
            let before = document.servers.len();
            document.servers.retain(|s| s.id != id);
            let pings = document.remove_ping_history(id);
            (before != document.servers.len(), pings)
        };

        if removed || pings > 0 {
            self.document.flush().await?;
            info!("Deleted server {} ({} ping records)", id, pings);
        } else {
            debug!("Delete of unknown server {}", id);
        }
        Ok(())
    }

    /// Apply a non-secret change to one record and bump `updated_at`
    async fn touch(&self, id: ServerId, change: impl FnOnce(&mut ServerRecord)) -> Result<()> {
        let _writer = self.document.begin_write().await;

        {
            let mut document = self.document.write().await;
            let record = document
                .server_mut(id)
                .ok_or(VaultError::ServerNotFound(id))?;
            change(record);
            record.updated_at = Some(Utc::now());
        }

        self.document.flush().await
    }

    /// Key for new secrets: only when the vault is enabled and unlocked
    async fn sealing_key(&self, document: &Document) -> Option<Arc<MasterKey>> {
        if document.vault.is_none() {
            return None;
        }
        self.session.key().await
    }
}

fn store_secrets(record: &mut ServerRecord, input: &ServerInput, key: Option<&MasterKey>) -> Result<()> {
    for kind in CredentialKind::ALL {
        let secret = input.secret(kind);
        match key {
            Some(key) => {
                let envelope = encrypt_optional(secret, key)?;
                let encrypted = envelope.is_some();
                record.set_credential(kind, envelope, encrypted);
            }
            None => record.set_credential(kind, secret.map(str::to_string), false),
        }
    }
    Ok(())
}
