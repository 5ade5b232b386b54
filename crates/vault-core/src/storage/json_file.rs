//! JSON file persistence backend
//!
//! Stores the whole document as one pretty-printed JSON file in the user's
//! data directory. Writes go through a temp file and a rename.

use async_trait::async_trait;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::PersistenceAdapter;
use crate::document::Document;
use crate::error::{Result, VaultError};

/// Data file name inside the data directory
const DATA_FILE: &str = "polarops-data.json";

/// JSON file storage backend
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store at the default location in the user's data directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            path: Self::default_path()?,
        })
    }

    /// Store at a custom file path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default data file path
    pub fn default_path() -> Result<PathBuf> {
        ProjectDirs::from("com", "polarops", "PolarOps")
            .map(|dirs| dirs.data_dir().join(DATA_FILE))
            .ok_or_else(|| VaultError::StorageError("Could not determine data directory".to_string()))
    }

    /// Path of the data file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceAdapter for JsonFileStore {
    async fn load(&self) -> Result<Option<Document>> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!("No data file at {:?}", self.path);
            return Ok(None);
        }

        let contents = tokio::fs::read_to_string(&self.path).await?;
        let document: Document = serde_json::from_str(&contents)?;

        debug!("Loaded {} servers from {:?}", document.servers.len(), self.path);
        Ok(Some(document))
    }

    async fn save(&self, document: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(document)?;

        // Write atomically using a temp file
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!("Saved {} servers to {:?}", document.servers.len(), self.path);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "JSON File"
    }

    fn location(&self) -> Option<String> {
        Some(self.path.display().to_string())
    }

    async fn stored_size(&self) -> Result<Option<u64>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        Ok(Some(tokio::fs::metadata(&self.path).await?.len()))
    }
}
