//! Local filesystem cursor storage.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::provider::{CursorKey, CursorStorage};
use airweave_common::{Error, Result, SyncCursor};

/// Local filesystem cursor storage.
///
/// Stores one pretty-printed JSON file per cursor key under a root directory.
pub struct LocalCursorStorage {
    root: PathBuf,
}

impl LocalCursorStorage {
    /// Create a new local storage with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this storage.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cursor_path(&self, key: &CursorKey) -> PathBuf {
        self.root.join(format!("{}.json", key.file_stem()))
    }
}

#[async_trait]
impl CursorStorage for LocalCursorStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn load(&self, key: &CursorKey) -> Result<Option<SyncCursor>> {
        let path = self.cursor_path(key);

        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path).await?;
        let cursor = serde_json::from_slice(&data)?;
        Ok(Some(cursor))
    }

    async fn save(&self, key: &CursorKey, cursor: &SyncCursor) -> Result<()> {
        let path = self.cursor_path(key);
        let tmp_path = path.with_extension("json.tmp");

        let data = serde_json::to_vec_pretty(cursor)?;

        // Readers see either the old or the new cursor, never a torn write.
        fs::write(&tmp_path, &data).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!("Saved cursor {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn delete(&self, key: &CursorKey) -> Result<()> {
        let path = self.cursor_path(key);

        if !path.exists() {
            return Err(Error::NotFound(format!("No cursor stored for {}", key)));
        }

        fs::remove_file(&path).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CursorKey>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(CursorKey::from_file_stem)
            {
                keys.push(key);
            }
        }

        Ok(keys)
    }
}
