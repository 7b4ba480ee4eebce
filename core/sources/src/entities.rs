//! Typed payloads carried by connector entities.

use serde::{Deserialize, Serialize};

use crate::asana::api::{AsanaAttachment, AsanaProject, AsanaSection, AsanaStory, AsanaTask, AsanaWorkspace};
use crate::outlook::api::{MailAttachment, MailFolder, MailMessage};

/// Provider payload of a content entity, tagged with its entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum EntityPayload {
    AsanaWorkspace(AsanaWorkspace),
    AsanaProject(AsanaProject),
    AsanaSection(AsanaSection),
    AsanaTask(AsanaTask),
    AsanaComment(AsanaStory),
    AsanaFile(AsanaAttachment),
    OutlookMailFolder(MailFolder),
    OutlookMessage(MailMessage),
    OutlookAttachment(MailAttachment),
}
