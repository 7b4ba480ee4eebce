//! Asana workspaces, projects, sections, tasks, comments and attachments.

pub mod api;
mod source;

pub use source::{AsanaSource, ASANA_API_BASE, CURSOR_FIELD};
