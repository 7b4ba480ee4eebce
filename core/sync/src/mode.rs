//! Full vs. incremental sync decision.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use airweave_common::{Error, Result};

/// How a sync run traverses the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Walk the whole hierarchy from scratch.
    Full,
    /// Walk only what changed since the stored resumption token(s).
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Outcome of mode selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeDecision {
    pub mode: SyncMode,
    /// Resumption token(s) to feed the page walker. `None` for full runs.
    ///
    /// For connectors with per-scope tokens this is the whole scope map.
    pub token: Option<Value>,
}

impl ModeDecision {
    pub fn full() -> Self {
        Self {
            mode: SyncMode::Full,
            token: None,
        }
    }

    pub fn is_incremental(&self) -> bool {
        self.mode == SyncMode::Incremental
    }

    /// Populated per-scope token for `scope`, if the token is a scope map.
    pub fn scope_token(&self, scope: &str) -> Option<&str> {
        self.token
            .as_ref()?
            .get(scope)?
            .as_str()
            .filter(|s| !s.is_empty())
    }
}

/// Decide between a full and an incremental run.
///
/// `requested_field` is the field the caller expects the connector to resume
/// from. Any value other than the connector's `default_field` is a
/// configuration error.
pub fn select_mode(
    cursor_data: &Map<String, Value>,
    default_field: &str,
    requested_field: Option<&str>,
) -> Result<ModeDecision> {
    if let Some(requested) = requested_field {
        if requested != default_field {
            return Err(Error::Config(format!(
                "Cursor field '{}' does not match this connector's cursor field '{}'",
                requested, default_field
            )));
        }
    }

    match cursor_data.get(default_field) {
        Some(value) if is_populated(value) => Ok(ModeDecision {
            mode: SyncMode::Incremental,
            token: Some(value.clone()),
        }),
        _ => Ok(ModeDecision::full()),
    }
}

/// Whether a stored token carries anything to resume from.
///
/// A scope map counts as populated when any of its entries is.
fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => map.values().any(is_populated),
        Value::Bool(_) | Value::Number(_) => true,
    }
}
