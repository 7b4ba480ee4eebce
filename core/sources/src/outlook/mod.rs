//! Outlook Mail folders, messages and attachments via Microsoft Graph.

pub mod api;
mod cursor;
mod source;

pub use cursor::CURSOR_FIELD;
pub use source::{OutlookMailSource, GRAPH_API_BASE};
