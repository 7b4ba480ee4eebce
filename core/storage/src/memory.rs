//! In-memory cursor storage for tests and validation runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use airweave_common::{Error, Result, SyncCursor};
use crate::provider::{CursorKey, CursorStorage};

/// In-memory cursor storage.
///
/// All cursors are lost on drop. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryCursorStorage {
    cursors: Arc<RwLock<HashMap<CursorKey, SyncCursor>>>,
}

impl MemoryCursorStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::Io(std::io::Error::other("cursor map lock poisoned"))
    }
}

#[async_trait]
impl CursorStorage for MemoryCursorStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, key: &CursorKey) -> Result<Option<SyncCursor>> {
        let cursors = self.cursors.read().map_err(|_| Self::poisoned())?;
        Ok(cursors.get(key).cloned())
    }

    async fn save(&self, key: &CursorKey, cursor: &SyncCursor) -> Result<()> {
        let mut cursors = self.cursors.write().map_err(|_| Self::poisoned())?;
        cursors.insert(key.clone(), cursor.clone());
        Ok(())
    }

    async fn delete(&self, key: &CursorKey) -> Result<()> {
        let mut cursors = self.cursors.write().map_err(|_| Self::poisoned())?;
        cursors
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("No cursor stored for {}", key)))
    }

    async fn list(&self) -> Result<Vec<CursorKey>> {
        let cursors = self.cursors.read().map_err(|_| Self::poisoned())?;
        Ok(cursors.keys().cloned().collect())
    }
}
