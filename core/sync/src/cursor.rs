//! Live cursor state for one sync run.
//!
//! A `CursorStore` wraps the connector's `SyncCursor` while a run is in
//! progress. Connectors read it once to pick a sync mode and write back
//! resumption tokens as scopes complete. Handles are cheap to clone and
//! share the same underlying cursor.
//!
//! A detached store (no sync context, e.g. for `validate()` calls) accepts
//! every operation and returns empty results.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::debug;

use airweave_common::{Result, SyncCursor};
use airweave_storage::{CursorKey, CursorStorage};

struct Persistence {
    storage: Arc<dyn CursorStorage>,
    key: CursorKey,
}

struct Inner {
    cursor: RwLock<SyncCursor>,
    persistence: Option<Persistence>,
}

/// Shared handle to the cursor of the current sync run.
#[derive(Clone)]
pub struct CursorStore {
    inner: Option<Arc<Inner>>,
}

impl CursorStore {
    /// Wrap a cursor for an in-memory run without checkpointing.
    pub fn new(cursor: SyncCursor) -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                cursor: RwLock::new(cursor),
                persistence: None,
            })),
        }
    }

    /// Store without a sync context. All operations are no-ops.
    pub fn detached() -> Self {
        Self { inner: None }
    }

    /// Wrap a cursor that checkpoints through `storage` under `key`.
    pub fn with_persistence(cursor: SyncCursor, storage: Arc<dyn CursorStorage>, key: CursorKey) -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                cursor: RwLock::new(cursor),
                persistence: Some(Persistence { storage, key }),
            })),
        }
    }

    /// Load the stored cursor for `key`, or start an empty one.
    pub async fn load(
        storage: Arc<dyn CursorStorage>,
        key: CursorKey,
        cursor_field: Option<String>,
    ) -> Result<Self> {
        let cursor = match storage.load(&key).await? {
            Some(cursor) => {
                debug!("Loaded cursor {} ({} fields)", key, cursor.cursor_data.len());
                cursor
            }
            None => {
                debug!("No cursor stored for {}, starting fresh", key);
                SyncCursor::new(cursor_field)
            }
        };
        Ok(Self::with_persistence(cursor, storage, key))
    }

    /// Whether this store belongs to a sync run.
    pub fn is_attached(&self) -> bool {
        self.inner.is_some()
    }

    /// Field name the cursor was created for, if any.
    pub fn cursor_field(&self) -> Option<String> {
        self.read(|cursor| cursor.cursor_field.clone()).flatten()
    }

    pub fn set_cursor_field(&self, field: &str) {
        self.write(|cursor| cursor.cursor_field = Some(field.to_string()));
    }

    /// Current cursor data, or an empty map.
    pub fn get_cursor_data(&self) -> Map<String, Value> {
        self.read(|cursor| cursor.cursor_data.clone()).unwrap_or_default()
    }

    /// Merge `fields` into the cursor data. Unrelated keys are kept.
    pub fn update_cursor_data(&self, fields: Map<String, Value>) {
        self.write(|cursor| {
            for (key, value) in fields {
                cursor.cursor_data.insert(key, value);
            }
        });
    }

    pub fn get_field(&self, key: &str) -> Option<Value> {
        self.read(|cursor| cursor.cursor_data.get(key).cloned()).flatten()
    }

    pub fn remove_field(&self, key: &str) -> Option<Value> {
        self.write(|cursor| cursor.cursor_data.remove(key)).flatten()
    }

    /// Set `cursor_data[field][scope] = value`, creating the map if needed.
    ///
    /// Per-scope entries are independent: writing one scope never touches
    /// another scope's value.
    pub fn set_scope_entry(&self, field: &str, scope: &str, value: Value) {
        self.write(|cursor| {
            let slot = cursor
                .cursor_data
                .entry(field.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(map) = slot {
                map.insert(scope.to_string(), value);
            }
        });
    }

    /// Remove `cursor_data[field][scope]`.
    pub fn remove_scope_entry(&self, field: &str, scope: &str) -> Option<Value> {
        self.write(|cursor| {
            cursor
                .cursor_data
                .get_mut(field)
                .and_then(Value::as_object_mut)
                .and_then(|map| map.remove(scope))
        })
        .flatten()
    }

    /// Copy of the cursor as it stands now.
    pub fn snapshot(&self) -> Option<SyncCursor> {
        self.read(SyncCursor::clone)
    }

    /// Persist the current cursor through the storage collaborator.
    ///
    /// Does nothing for detached or in-memory stores.
    pub async fn checkpoint(&self) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        let Some(persistence) = &inner.persistence else {
            return Ok(());
        };

        let snapshot = inner
            .cursor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        persistence.storage.save(&persistence.key, &snapshot).await?;
        debug!("Checkpointed cursor {}", persistence.key);
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&SyncCursor) -> T) -> Option<T> {
        let inner = self.inner.as_ref()?;
        let guard = inner.cursor.read().unwrap_or_else(PoisonError::into_inner);
        Some(f(&guard))
    }

    fn write<T>(&self, f: impl FnOnce(&mut SyncCursor) -> T) -> Option<T> {
        let inner = self.inner.as_ref()?;
        let mut guard = inner.cursor.write().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut guard))
    }
}

impl std::fmt::Debug for CursorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorStore")
            .field("cursor", &self.snapshot())
            .finish()
    }
}
