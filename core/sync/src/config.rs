//! Sync run configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use airweave_common::{Error, Result};

use crate::retry::RetryConfig;

/// Settings shared by every connector run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Items requested per page where the provider lets us choose.
    pub page_size: usize,
    /// Timeout for each HTTP call.
    pub request_timeout_secs: u64,
    pub retry: RetryConfig,
    /// Skip any item whose name contains this substring, with its subtree.
    pub exclude_path: Option<String>,
    /// Cursor field the caller expects; must match the connector's own.
    pub cursor_field: Option<String>,
    /// Persist the cursor after each completed scope, not only at the end.
    pub checkpoint_scopes: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            request_timeout_secs: 30,
            retry: RetryConfig::default(),
            exclude_path: None,
            cursor_field: None,
            checkpoint_scopes: true,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid sync config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be greater than zero".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
