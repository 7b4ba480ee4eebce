//! Translation of provider removal markers into tombstones.

use serde_json::Value;

use airweave_common::{Error, Result};

use crate::mode::SyncMode;

/// Recognizes items a delta feed reports as removed.
pub trait RemovalMarker: Send + Sync {
    fn is_removed(&self, item: &Value) -> bool;
}

/// Microsoft Graph style: the item carries an `@removed` object.
#[derive(Debug, Clone, Copy, Default)]
pub struct ODataRemoved;

impl RemovalMarker for ODataRemoved {
    fn is_removed(&self, item: &Value) -> bool {
        item.get("@removed").is_some()
    }
}

/// Change-feed style: `changeType == "removed"` (or `"deleted"`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeTypeRemoved;

impl RemovalMarker for ChangeTypeRemoved {
    fn is_removed(&self, item: &Value) -> bool {
        matches!(
            item.get("changeType").and_then(Value::as_str),
            Some("removed") | Some("deleted")
        )
    }
}

impl<F> RemovalMarker for F
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn is_removed(&self, item: &Value) -> bool {
        self(item)
    }
}

/// What to do with one delta item.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// Emit a tombstone for this ID.
    Removed(String),
    /// Parse the item as content.
    Content(Value),
    /// Removal seen outside an incremental walk; nothing to emit.
    Ignored,
}

/// Sorts delta items into tombstones and content before any content parsing.
#[derive(Debug, Clone)]
pub struct DeletionReconciler<M> {
    mode: SyncMode,
    marker: M,
    id_field: &'static str,
}

impl<M: RemovalMarker> DeletionReconciler<M> {
    pub fn new(mode: SyncMode, marker: M) -> Self {
        Self {
            mode,
            marker,
            id_field: "id",
        }
    }

    /// Read the removed item's ID from a different key.
    pub fn with_id_field(mut self, id_field: &'static str) -> Self {
        self.id_field = id_field;
        self
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Classify `item`.
    ///
    /// Removed items never reach content parsing. A removed item without an
    /// ID is an item-level payload error.
    pub fn reconcile(&self, item: Value) -> Result<Reconciled> {
        if !self.marker.is_removed(&item) {
            return Ok(Reconciled::Content(item));
        }

        if self.mode != SyncMode::Incremental {
            return Ok(Reconciled::Ignored);
        }

        match item.get(self.id_field).and_then(Value::as_str) {
            Some(id) if !id.is_empty() => Ok(Reconciled::Removed(id.to_string())),
            _ => Err(Error::Payload(format!(
                "Removed item without '{}' field",
                self.id_field
            ))),
        }
    }
}
