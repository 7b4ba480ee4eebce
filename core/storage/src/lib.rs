//! Cursor persistence for Airweave connectors.
//!
//! Sync cursors are produced by connectors during a run and handed back to
//! them on the next run. This crate provides the durable side of that loop:
//! a trait-based interface for cursor backends and a registry for resolving
//! them by name.
//!
//! # Design Principles
//! - Opaque pass-through: cursor data is never validated or reshaped here
//! - Async operations: All I/O operations are async
//! - Atomic replacement: a saved cursor is never observed half-written

pub mod provider;
pub mod registry;
pub mod memory;
pub mod local;

pub use provider::{CursorKey, CursorStorage};
pub use registry::{StorageRegistry, StorageFactory, create_default_registry};
pub use memory::MemoryCursorStorage;
pub use local::LocalCursorStorage;
