//! Storage registry for resolving cursor backends by name.

use std::collections::HashMap;
use std::sync::Arc;
use serde_json::Value;

use airweave_common::{Error, Result};
use crate::provider::CursorStorage;

/// Factory function type for creating cursor storages.
pub type StorageFactory = Box<dyn Fn(Value) -> Result<Arc<dyn CursorStorage>> + Send + Sync>;

/// Registry for cursor storage factories.
pub struct StorageRegistry {
    factories: HashMap<String, StorageFactory>,
}

impl StorageRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a storage factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StorageFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Storage '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a storage by name and configuration.
    ///
    /// # Errors
    /// - Storage not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn CursorStorage>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::NotFound(format!("Storage '{}' is not registered", name))
        })?;
        factory(config)
    }

    /// Get list of registered storage names.
    pub fn storages(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Check if a storage is registered.
    pub fn has_storage(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in storages.
pub fn create_default_registry() -> StorageRegistry {
    let mut factories: HashMap<String, StorageFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|_config| Ok(Arc::new(crate::memory::MemoryCursorStorage::new()))),
    );

    factories.insert(
        "local".to_string(),
        Box::new(|config| {
            let root = config
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::InvalidInput("Local storage requires 'root' path".to_string()))?;
            Ok(Arc::new(crate::local::LocalCursorStorage::new(root)?))
        }),
    );

    StorageRegistry { factories }
}
