//! Source registry for resolving connectors by short name.

use std::collections::HashMap;

use airweave_common::{Error, Result};

use crate::asana::AsanaSource;
use crate::outlook::OutlookMailSource;
use crate::source::{Source, SourceContext};

/// Factory function type for creating connectors.
pub type SourceFactory = Box<dyn Fn(SourceContext) -> Result<Box<dyn Source>> + Send + Sync>;

/// Registry for source connector factories.
pub struct SourceRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a connector factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: SourceFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!("Source '{}' is already registered", name)));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build the connector registered under `name` for one run.
    pub fn create(&self, name: &str, ctx: SourceContext) -> Result<Box<dyn Source>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Source '{}' is not registered", name)))?;
        factory(ctx)
    }

    /// Registered short names, sorted.
    pub fn sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in connectors.
pub fn create_default_registry() -> SourceRegistry {
    let mut factories: HashMap<String, SourceFactory> = HashMap::new();

    factories.insert(
        "asana".to_string(),
        Box::new(|ctx| Ok(Box::new(AsanaSource::new(ctx)?))),
    );
    factories.insert(
        "outlook_mail".to_string(),
        Box::new(|ctx| Ok(Box::new(OutlookMailSource::new(ctx)?))),
    );

    SourceRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    use airweave_sync::PageFetcher;

    struct NoFetch;

    #[async_trait]
    impl PageFetcher for NoFetch {
        async fn fetch_page(&self, url: &str, _params: &[(String, String)]) -> Result<Value> {
            Err(Error::NotFound(url.to_string()))
        }
    }

    fn ctx() -> SourceContext {
        SourceContext::detached(Arc::new(NoFetch))
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        assert_eq!(registry.sources(), vec!["asana", "outlook_mail"]);

        let asana = registry.create("asana", ctx()).unwrap();
        assert_eq!(asana.short_name(), "asana");
        assert_eq!(asana.default_cursor_field(), "workspace_synced_at");

        let outlook = registry.create("outlook_mail", ctx()).unwrap();
        assert_eq!(outlook.default_cursor_field(), "folder_delta_links");
    }

    #[test]
    fn test_unknown_source() {
        let registry = create_default_registry();
        assert!(matches!(registry.create("attio", ctx()), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = create_default_registry();
        let result = registry.register(
            "asana",
            Box::new(|ctx| Ok(Box::new(AsanaSource::new(ctx)?))),
        );
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_invalid_base_url_fails_creation() {
        let registry = create_default_registry();
        let ctx = ctx().with_settings(serde_json::json!({"base_url": "localhost:8080"}));
        assert!(matches!(registry.create("asana", ctx), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_validate_surfaces_fetch_error() {
        let registry = create_default_registry();
        let source = registry.create("outlook_mail", ctx()).unwrap();
        assert!(matches!(source.validate().await, Err(Error::NotFound(_))));
    }
}
