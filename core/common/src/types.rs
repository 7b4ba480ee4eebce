//! Common types used throughout the connector engine.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Identifier of one configured source connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new ConnectionId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or contains a path separator
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "ConnectionId cannot be empty".to_string(),
            ));
        }
        if id.contains('/') || id.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "ConnectionId cannot contain separators".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type tag for entities and breadcrumbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Workspace,
    Project,
    Section,
    Task,
    Comment,
    File,
    Folder,
    Message,
    Attachment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Workspace => "workspace",
            EntityKind::Project => "project",
            EntityKind::Section => "section",
            EntityKind::Task => "task",
            EntityKind::Comment => "comment",
            EntityKind::File => "file",
            EntityKind::Folder => "folder",
            EntityKind::Message => "message",
            EntityKind::Attachment => "attachment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ancestry marker attached to every synced entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Breadcrumb {
    /// External ID of the ancestor.
    pub entity_id: String,
    /// Display name of the ancestor.
    pub name: String,
    /// Type tag of the ancestor.
    #[serde(rename = "type")]
    pub kind: EntityKind,
}

impl Breadcrumb {
    pub fn new(entity_id: impl Into<String>, name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: name.into(),
            kind,
        }
    }
}

/// Immutable, ordered list of ancestors from the root down to an entity's parent.
///
/// Appending never mutates the receiver: sibling subtrees share the parent's
/// trail and each gets its own extended copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreadcrumbTrail(Arc<[Breadcrumb]>);

impl BreadcrumbTrail {
    /// Empty trail for root-level entities.
    pub fn root() -> Self {
        Self(Arc::from(Vec::new()))
    }

    /// Trail with `crumb` appended.
    pub fn child(&self, crumb: Breadcrumb) -> Self {
        let mut crumbs = Vec::with_capacity(self.0.len() + 1);
        crumbs.extend_from_slice(&self.0);
        crumbs.push(crumb);
        Self(Arc::from(crumbs))
    }

    pub fn as_slice(&self) -> &[Breadcrumb] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Immediate parent, if any.
    pub fn parent(&self) -> Option<&Breadcrumb> {
        self.0.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breadcrumb> {
        self.0.iter()
    }
}

impl Default for BreadcrumbTrail {
    fn default() -> Self {
        Self::root()
    }
}

impl From<Vec<Breadcrumb>> for BreadcrumbTrail {
    fn from(crumbs: Vec<Breadcrumb>) -> Self {
        Self(Arc::from(crumbs))
    }
}

impl Serialize for BreadcrumbTrail {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for BreadcrumbTrail {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<Breadcrumb>::deserialize(deserializer).map(Self::from)
    }
}

/// Opaque, connector-owned sync state carried between runs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Field driving incremental decisions (e.g. `"folder_delta_links"`).
    pub cursor_field: Option<String>,
    /// Connector-specific state: timestamps, delta links, per-scope maps.
    #[serde(default)]
    pub cursor_data: Map<String, Value>,
}

impl SyncCursor {
    /// Empty cursor for a first-ever sync.
    pub fn new(cursor_field: Option<String>) -> Self {
        Self {
            cursor_field,
            cursor_data: Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cursor_data.is_empty()
    }
}
