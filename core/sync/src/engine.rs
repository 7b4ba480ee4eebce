//! Sync job runner: drives one connector stream to completion.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::stream::{BoxStream, StreamExt};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use airweave_common::{EntityKind, Result};

use crate::cursor::CursorStore;
use crate::entity::SyncEntity;

/// Result of a sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Content entities yielded.
    pub entities: usize,
    /// Tombstones yielded.
    pub deletions: usize,
    /// Content entities per type.
    pub by_kind: HashMap<EntityKind, usize>,
    /// Time taken.
    pub duration: Duration,
}

impl SyncStats {
    pub fn total(&self) -> usize {
        self.entities + self.deletions
    }
}

/// One run of one connector.
pub struct SyncJob {
    id: Uuid,
    cursor: CursorStore,
}

impl SyncJob {
    pub fn new(cursor: CursorStore) -> Self {
        Self {
            id: Uuid::new_v4(),
            cursor,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cursor(&self) -> &CursorStore {
        &self.cursor
    }

    /// Pull every entity from `entities` into `sink`.
    ///
    /// The cursor is checkpointed once more at the end, whether the stream
    /// finished or failed. A sink error stops the run.
    pub async fn run<P, F>(&self, entities: BoxStream<'_, Result<SyncEntity<P>>>, sink: F) -> Result<SyncStats>
    where
        F: FnMut(SyncEntity<P>) -> Result<()>,
    {
        let span = info_span!("sync_job", id = %self.id);
        self.drive(entities, sink).instrument(span).await
    }

    async fn drive<P, F>(&self, mut entities: BoxStream<'_, Result<SyncEntity<P>>>, mut sink: F) -> Result<SyncStats>
    where
        F: FnMut(SyncEntity<P>) -> Result<()>,
    {
        let start = Instant::now();
        let mut stats = SyncStats::default();

        info!("Starting sync run");

        let outcome = loop {
            let Some(next) = entities.next().await else {
                break Ok(());
            };
            let entity = match next {
                Ok(entity) => entity,
                Err(err) => break Err(err),
            };

            match &entity {
                SyncEntity::Chunk(chunk) => {
                    stats.entities += 1;
                    *stats.by_kind.entry(chunk.kind).or_default() += 1;
                }
                SyncEntity::Deletion(_) => stats.deletions += 1,
            }

            if let Err(err) = sink(entity) {
                break Err(err);
            }
        };

        // Release the provider stream before persisting.
        drop(entities);
        let checkpoint = self.cursor.checkpoint().await;
        stats.duration = start.elapsed();

        if let Err(err) = outcome {
            error!(
                "Sync run failed after {} entities and {} deletions: {}",
                stats.entities, stats.deletions, err
            );
            return Err(err);
        }
        checkpoint?;

        info!(
            "Sync complete: {} entities, {} deletions in {:?}",
            stats.entities, stats.deletions, stats.duration
        );

        Ok(stats)
    }
}
