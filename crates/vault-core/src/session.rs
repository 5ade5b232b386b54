//! In-memory vault session
//!
//! Holds the derived key while the vault is unlocked. The key is never
//! persisted; it is dropped (and zeroized) on lock, on disable, and when the
//! process exits. Replacing the key swaps the `Arc`, so a concurrent reader
//! sees either the old key or the new one.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::crypto::MasterKey;

/// Unlocked key holder, shared by the vault and the credential store
#[derive(Clone, Default)]
pub struct VaultSession {
    key: Arc<RwLock<Option<Arc<MasterKey>>>>,
}

impl VaultSession {
    /// A locked session
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a key is held
    pub async fn is_unlocked(&self) -> bool {
        self.key.read().await.is_some()
    }

    /// Current key, if unlocked
    pub async fn key(&self) -> Option<Arc<MasterKey>> {
        self.key.read().await.clone()
    }

    /// Install a key, replacing any previous one
    pub(crate) async fn install(&self, key: MasterKey) {
        *self.key.write().await = Some(Arc::new(key));
        debug!("Session key installed");
    }

    /// Drop the key
    pub(crate) async fn clear(&self) {
        if self.key.write().await.take().is_some() {
            debug!("Session key cleared");
        }
    }
}
