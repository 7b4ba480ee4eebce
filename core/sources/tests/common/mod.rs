//! Shared harness for connector tests against a wiremock server.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use serde_json::{json, Map, Value};
use wiremock::MockServer;

use airweave_common::SyncCursor;
use airweave_sources::{create_default_registry, Entity, Source, SourceContext};
use airweave_sync::{CursorStore, FetchClient, RetryConfig, StaticTokenProvider, SyncConfig};

pub fn fast_config() -> SyncConfig {
    SyncConfig {
        retry: RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(false),
        ..SyncConfig::default()
    }
}

pub fn cursor_with(data: Value) -> CursorStore {
    let cursor_data: Map<String, Value> = serde_json::from_value(data).expect("cursor data must be an object");
    CursorStore::new(SyncCursor {
        cursor_field: None,
        cursor_data,
    })
}

pub fn connector(name: &str, server: &MockServer, cursor: CursorStore, config: SyncConfig) -> Box<dyn Source> {
    let tokens = Arc::new(StaticTokenProvider::new("test-token"));
    let fetcher = FetchClient::new(tokens, &config).expect("client builds");
    let ctx = SourceContext::new(Arc::new(fetcher), cursor, config).with_settings(json!({"base_url": server.uri()}));
    create_default_registry().create(name, ctx).expect("connector is registered")
}

pub async fn collect(source: &dyn Source) -> Vec<Entity> {
    source
        .generate_entities()
        .expect("run starts")
        .try_collect()
        .await
        .expect("run completes")
}

pub fn ids(entities: &[Entity]) -> Vec<&str> {
    entities.iter().map(|e| e.entity_id()).collect()
}

pub fn trail_ids(entity: &Entity) -> Vec<&str> {
    entity.breadcrumbs().iter().map(|c| c.entity_id.as_str()).collect()
}

pub fn find<'a>(entities: &'a [Entity], id: &str) -> &'a Entity {
    entities
        .iter()
        .find(|e| e.entity_id() == id)
        .unwrap_or_else(|| panic!("no entity {}", id))
}
