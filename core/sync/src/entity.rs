//! Entities yielded by a sync run.

use serde::{Deserialize, Serialize};

use airweave_common::{Breadcrumb, BreadcrumbTrail, EntityKind};

/// One unit of synced content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntity<P> {
    /// Stable external ID; downstream upserts key on it.
    pub entity_id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub name: String,
    /// Ancestors from the root down to the parent.
    pub breadcrumbs: BreadcrumbTrail,
    pub payload: P,
}

impl<P> ChunkEntity<P> {
    pub fn new(
        entity_id: impl Into<String>,
        kind: EntityKind,
        name: impl Into<String>,
        breadcrumbs: BreadcrumbTrail,
        payload: P,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind,
            name: name.into(),
            breadcrumbs,
            payload,
        }
    }

    /// Breadcrumb pointing at this entity, for its children's trails.
    pub fn as_breadcrumb(&self) -> Breadcrumb {
        Breadcrumb::new(self.entity_id.clone(), self.name.clone(), self.kind)
    }
}

/// Removal state carried by each tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStatus {
    Removed,
}

/// Tombstone for an item the provider reported as removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionEntity {
    pub entity_id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Trail of the scope in which the removal was observed.
    pub breadcrumbs: BreadcrumbTrail,
    pub deletion_status: DeletionStatus,
}

impl DeletionEntity {
    pub fn removed(entity_id: impl Into<String>, kind: EntityKind, breadcrumbs: BreadcrumbTrail) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind,
            breadcrumbs,
            deletion_status: DeletionStatus::Removed,
        }
    }
}

/// Anything a connector yields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncEntity<P> {
    Deletion(DeletionEntity),
    Chunk(ChunkEntity<P>),
}

impl<P> SyncEntity<P> {
    pub fn entity_id(&self) -> &str {
        match self {
            SyncEntity::Chunk(chunk) => &chunk.entity_id,
            SyncEntity::Deletion(deletion) => &deletion.entity_id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            SyncEntity::Chunk(chunk) => chunk.kind,
            SyncEntity::Deletion(deletion) => deletion.kind,
        }
    }

    pub fn breadcrumbs(&self) -> &BreadcrumbTrail {
        match self {
            SyncEntity::Chunk(chunk) => &chunk.breadcrumbs,
            SyncEntity::Deletion(deletion) => &deletion.breadcrumbs,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, SyncEntity::Deletion(_))
    }
}

impl<P> From<ChunkEntity<P>> for SyncEntity<P> {
    fn from(chunk: ChunkEntity<P>) -> Self {
        SyncEntity::Chunk(chunk)
    }
}

impl<P> From<DeletionEntity> for SyncEntity<P> {
    fn from(deletion: DeletionEntity) -> Self {
        SyncEntity::Deletion(deletion)
    }
}
