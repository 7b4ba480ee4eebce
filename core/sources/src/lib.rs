//! Source connectors for the Airweave sync engine.
//!
//! Each connector adapts one provider's API to the engine's `Hierarchy`
//! seam and yields a lazy stream of typed entities.
//!
//! # Connectors
//! - `asana`: workspaces, projects, sections, tasks, comments, attachments
//! - `outlook_mail`: mail folders, messages, attachments

pub mod asana;
pub mod entities;
pub mod outlook;
pub mod registry;
pub mod source;

pub use asana::AsanaSource;
pub use entities::EntityPayload;
pub use outlook::OutlookMailSource;
pub use registry::{create_default_registry, SourceFactory, SourceRegistry};
pub use source::{Entity, Source, SourceContext, SourceStream};
