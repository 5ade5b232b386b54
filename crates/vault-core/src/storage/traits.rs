//! Persistence adapter trait

use crate::document::Document;
use crate::error::Result;
use async_trait::async_trait;

/// Durable load/save of the whole document
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Load the document, or `None` if nothing has been saved yet
    async fn load(&self) -> Result<Option<Document>>;

    /// Replace the stored document
    async fn save(&self, document: &Document) -> Result<()>;

    /// Get a human-readable name for this backend
    fn backend_name(&self) -> &'static str;

    /// Where the document is kept, if it has a location worth showing
    fn location(&self) -> Option<String> {
        None
    }

    /// Size of the stored document in bytes, `None` if nothing is stored
    async fn stored_size(&self) -> Result<Option<u64>> {
        Ok(None)
    }
}
