//! Airweave Connector Sync Engine
//!
//! The shared machinery behind every incremental source connector:
//! - Cursor store carrying resumption tokens between runs
//! - Full vs. incremental mode selection
//! - Lazy page walking over next links, delta links and offset/limit APIs
//! - Deletion reconciliation for delta feeds
//! - Depth-first hierarchy traversal with breadcrumb trails
//! - Authenticated fetch client with refresh-on-401 and bounded retry
//! - Sync job runner

pub mod auth;
pub mod config;
pub mod cursor;
pub mod deletion;
pub mod engine;
pub mod entity;
pub mod fetch;
pub mod mode;
pub mod pagination;
pub mod retry;
pub mod traversal;

// Re-export main types
pub use auth::{OAuthConfig, OAuthTokenManager, StaticTokenProvider, TokenProvider, Tokens};
pub use config::SyncConfig;
pub use cursor::CursorStore;
pub use deletion::{ChangeTypeRemoved, DeletionReconciler, ODataRemoved, Reconciled, RemovalMarker};
pub use engine::{SyncJob, SyncStats};
pub use entity::{ChunkEntity, DeletionEntity, DeletionStatus, SyncEntity};
pub use fetch::FetchClient;
pub use mode::{select_mode, ModeDecision, SyncMode};
pub use pagination::{
    iterate_items, iterate_pages, with_fallback, AsanaLinks, AsanaSearchLinks, LinkFormat, ODataLinks,
    OffsetPaging, Page, PageFetcher, PageRequest, PageStart, PageStream,
};
pub use retry::{RetryConfig, RetryExecutor};
pub use traversal::{traverse, EntityStream, Hierarchy, NodeStream, TraversalOptions};
