//! Shared in-memory document with a single writer lane

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error};

use super::PersistenceAdapter;
use crate::document::Document;
use crate::error::Result;

/// Summary of the stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub backend: &'static str,
    pub location: Option<String>,
    pub size_bytes: Option<u64>,
    pub servers: usize,
    pub ping_records: usize,
}

/// The loaded document plus the adapter that persists it.
///
/// Every mutation takes `begin_write` first, so read-modify-write sequences
/// over the whole credential collection never interleave. Readers only take
/// the document read lock.
#[derive(Clone)]
pub struct SharedDocument {
    document: Arc<RwLock<Document>>,
    adapter: Arc<dyn PersistenceAdapter>,
    writer: Arc<Mutex<()>>,
}

impl SharedDocument {
    /// Load the document through the adapter, normalize it, and flush if
    /// normalization changed anything.
    pub async fn open(adapter: Arc<dyn PersistenceAdapter>) -> Result<Self> {
        let loaded = adapter.load().await?;
        let existed = loaded.is_some();

        let mut document = loaded.unwrap_or_default();
        let changed = document.normalize();

        let shared = Self {
            document: Arc::new(RwLock::new(document)),
            adapter,
            writer: Arc::new(Mutex::new(())),
        };

        if changed || !existed {
            shared.flush().await?;
        }

        debug!("Opened document via {} backend", shared.adapter.backend_name());
        Ok(shared)
    }

    /// Read access to the document
    pub async fn read(&self) -> RwLockReadGuard<'_, Document> {
        self.document.read().await
    }

    /// Backend, location, size and record counts of the document
    pub async fn info(&self) -> Result<DocumentInfo> {
        let size_bytes = self.adapter.stored_size().await?;
        let document = self.document.read().await;
        Ok(DocumentInfo {
            backend: self.adapter.backend_name(),
            location: self.adapter.location(),
            size_bytes,
            servers: document.servers.len(),
            ping_records: document.ping_record_count(),
        })
    }

    /// Serialize with every other mutation. Hold the guard across the
    /// read-plan-write-flush sequence.
    pub(crate) async fn begin_write(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Document> {
        self.document.write().await
    }

    /// Persist the current document. A failure is logged and returned; the
    /// in-memory document is kept as is.
    pub(crate) async fn flush(&self) -> Result<()> {
        let document = self.document.read().await;
        if let Err(e) = self.adapter.save(&document).await {
            error!("Failed to save document: {}", e);
            return Err(e);
        }
        Ok(())
    }
}
