//! In-memory persistence backend

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::PersistenceAdapter;
use crate::document::Document;
use crate::error::{Result, VaultError};

/// Keeps the last saved document in memory
#[derive(Default)]
pub struct MemoryStore {
    document: RwLock<Option<Document>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a document
    pub fn with_document(document: Document) -> Self {
        Self {
            document: RwLock::new(Some(document)),
            ..Self::default()
        }
    }

    /// Last saved document
    pub async fn stored(&self) -> Option<Document> {
        self.document.read().await.clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail with a storage error
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryStore {
    async fn load(&self) -> Result<Option<Document>> {
        Ok(self.document.read().await.clone())
    }

    async fn save(&self, document: &Document) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(VaultError::StorageError("save rejected".to_string()));
        }
        *self.document.write().await = Some(document.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "Memory"
    }

    async fn stored_size(&self) -> Result<Option<u64>> {
        match self.document.read().await.as_ref() {
            Some(document) => Ok(Some(serde_json::to_vec(document)?.len() as u64)),
            None => Ok(None),
        }
    }
}
