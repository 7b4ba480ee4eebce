//! Cursor storage trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use airweave_common::{ConnectionId, Result, SyncCursor};

/// Identifies the cursor of one connection of one source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorKey {
    /// Source short name (e.g., "asana", "outlook_mail").
    pub source: String,
    /// Connection the cursor belongs to.
    pub connection: ConnectionId,
}

impl CursorKey {
    pub fn new(source: impl Into<String>, connection: ConnectionId) -> Self {
        Self {
            source: source.into(),
            connection,
        }
    }

    /// Flat, filesystem-safe representation (`<source>__<connection>`).
    pub fn file_stem(&self) -> String {
        format!("{}__{}", self.source, self.connection)
    }

    /// Parse a key back from [`CursorKey::file_stem`].
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let (source, connection) = stem.split_once("__")?;
        let connection = ConnectionId::new(connection).ok()?;
        Some(Self::new(source, connection))
    }
}

impl fmt::Display for CursorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.connection)
    }
}

/// Durable home for sync cursors between runs.
///
/// Cursor data is treated as opaque: implementations store and return it
/// without inspecting its schema.
#[async_trait]
pub trait CursorStorage: Send + Sync {
    /// Get the backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Load the cursor for `key`.
    ///
    /// # Returns
    /// `None` when no cursor was ever saved (first sync).
    async fn load(&self, key: &CursorKey) -> Result<Option<SyncCursor>>;

    /// Save (replace) the cursor for `key`.
    async fn save(&self, key: &CursorKey, cursor: &SyncCursor) -> Result<()>;

    /// Delete the cursor for `key`.
    ///
    /// # Errors
    /// - Cursor not found
    async fn delete(&self, key: &CursorKey) -> Result<()>;

    /// List keys with a stored cursor.
    async fn list(&self) -> Result<Vec<CursorKey>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_key_file_stem_round_trip() {
        let key = CursorKey::new("outlook_mail", ConnectionId::new("conn-7").unwrap());
        assert_eq!(key.file_stem(), "outlook_mail__conn-7");
        assert_eq!(CursorKey::from_file_stem(&key.file_stem()), Some(key));
    }

    #[test]
    fn test_cursor_key_rejects_malformed_stem() {
        assert!(CursorKey::from_file_stem("no-separator").is_none());
        assert!(CursorKey::from_file_stem("asana__").is_none());
    }
}
