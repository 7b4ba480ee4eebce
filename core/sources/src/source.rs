//! Source connector trait and the context each connector runs in.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use airweave_common::{Error, Result};
use airweave_sync::{
    select_mode, CursorStore, EntityStream, ModeDecision, PageFetcher, SyncConfig, SyncEntity,
};

use crate::entities::EntityPayload;

/// Entity produced by the built-in connectors.
pub type Entity = SyncEntity<EntityPayload>;

/// Stream returned by [`Source::generate_entities`].
pub type SourceStream = EntityStream<EntityPayload>;

/// Everything a connector instance needs for one run.
#[derive(Clone)]
pub struct SourceContext {
    pub fetcher: Arc<dyn PageFetcher>,
    pub cursor: CursorStore,
    pub config: SyncConfig,
    /// Connector-specific settings, e.g. `{"base_url": "..."}`.
    pub settings: Value,
}

impl SourceContext {
    pub fn new(fetcher: Arc<dyn PageFetcher>, cursor: CursorStore, config: SyncConfig) -> Self {
        Self {
            fetcher,
            cursor,
            config,
            settings: Value::Null,
        }
    }

    /// Context for one-off calls such as `validate()`, without a sync run.
    pub fn detached(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self::new(fetcher, CursorStore::detached(), SyncConfig::default())
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    /// Provider base URL, honouring a `base_url` setting.
    ///
    /// # Errors
    /// - Returns a configuration error if the setting is not an http(s) URL
    pub fn base_url(&self, default: &str) -> Result<String> {
        let raw = self.setting_str("base_url").unwrap_or(default);
        let parsed = Url::parse(raw).map_err(|e| Error::Config(format!("Invalid base_url '{}': {}", raw, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!("base_url must be http(s), got '{}'", raw)));
        }
        Ok(raw.trim_end_matches('/').to_string())
    }

    /// Decide the run's mode from the stored cursor.
    pub fn select_mode(&self, default_field: &str) -> Result<ModeDecision> {
        let data = self.cursor.get_cursor_data();
        let decision = select_mode(&data, default_field, self.config.cursor_field.as_deref())?;
        self.cursor.set_cursor_field(default_field);
        Ok(decision)
    }
}

/// A source connector.
#[async_trait]
pub trait Source: Send + Sync {
    /// Registry name, e.g. `"asana"`.
    fn short_name(&self) -> &'static str;

    /// Cursor field this connector resumes from.
    fn default_cursor_field(&self) -> &'static str;

    /// Make one cheap authenticated call to check the credentials.
    async fn validate(&self) -> Result<()>;

    /// Start a run.
    ///
    /// Configuration errors surface here, before any entity is produced.
    fn generate_entities(&self) -> Result<SourceStream>;
}

/// Parse one provider item, treating a mismatch as an item-level error.
pub(crate) fn parse_item<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Payload(format!("Malformed {}: {}", what, e)))
}
