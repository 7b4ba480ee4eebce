//! Common utilities and types shared across Airweave connector crates.
//!
//! This module provides the error taxonomy used by every crate and the
//! small data-model types (breadcrumbs, entity kinds, sync cursors) that
//! cross crate boundaries.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Breadcrumb, BreadcrumbTrail, ConnectionId, EntityKind, SyncCursor};
