//! Outlook cursor shape and the per-run delta links waiting to be committed.
//!
//! The canonical cursor holds one delta link per folder:
//!
//! ```json
//! {"folder_delta_links": {"<folder id>": "https://graph.microsoft.com/...deltatoken=..."}}
//! ```
//!
//! Older cursors carried a single mailbox-wide token. It cannot be mapped to
//! any folder, so it is dropped and the run walks every folder from scratch.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use airweave_sync::CursorStore;

pub const CURSOR_FIELD: &str = "folder_delta_links";

/// Single-token fields written by older cursor formats.
pub(crate) const LEGACY_FIELDS: &[&str] = &["delta_token", "deltaToken"];

/// Drop legacy single-token fields. Returns true if any were present.
pub(crate) fn migrate_legacy_cursor(cursor: &CursorStore) -> bool {
    let mut migrated = false;
    for field in LEGACY_FIELDS {
        if cursor.remove_field(field).is_some() {
            warn!(
                field = %field,
                "Dropping legacy mailbox-wide delta token; folders will be walked in full"
            );
            migrated = true;
        }
    }
    migrated
}

/// Delta links seen during the run, held until their folder completes.
///
/// A link is only committed to the cursor once every message and child
/// folder under it was processed.
#[derive(Debug, Default)]
pub(crate) struct PendingLinks {
    links: Mutex<HashMap<String, String>>,
}

impl PendingLinks {
    pub fn stage(&self, folder_id: &str, link: String) {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(folder_id.to_string(), link);
    }

    pub fn take(&self, folder_id: &str) -> Option<String> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(folder_id)
    }
}
