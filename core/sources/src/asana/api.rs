//! Asana REST resources, as requested through `opt_fields`.
//!
//! Every field the API may omit is optional or defaulted, so a sparse
//! response still parses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) const WORKSPACE_FIELDS: &str = "gid,name,is_organization";
pub(crate) const PROJECT_FIELDS: &str =
    "gid,name,notes,archived,color,created_at,modified_at,due_on,owner.name,permalink_url";
pub(crate) const SECTION_FIELDS: &str = "gid,name,created_at";
pub(crate) const TASK_FIELDS: &str = "gid,name,notes,completed,completed_at,created_at,modified_at,due_on,\
assignee.name,memberships.project.name,memberships.section.name,num_subtasks,permalink_url,\
resource_subtype,tags.name,parent.name";
pub(crate) const STORY_FIELDS: &str = "gid,created_at,created_by.name,resource_subtype,text,is_pinned";
pub(crate) const ATTACHMENT_FIELDS: &str = "gid,name,created_at,download_url,permanent_url,host,size";

/// Reference to another Asana object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsanaRef {
    pub gid: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsanaWorkspace {
    pub gid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_organization: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsanaProject {
    pub gid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_on: Option<String>,
    #[serde(default)]
    pub owner: Option<AsanaRef>,
    #[serde(default)]
    pub permalink_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsanaSection {
    pub gid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Where a task lives; a task can be in several projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsanaMembership {
    #[serde(default)]
    pub project: Option<AsanaRef>,
    #[serde(default)]
    pub section: Option<AsanaRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsanaTask {
    pub gid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_on: Option<String>,
    #[serde(default)]
    pub assignee: Option<AsanaRef>,
    #[serde(default)]
    pub memberships: Vec<AsanaMembership>,
    #[serde(default)]
    pub num_subtasks: Option<u32>,
    #[serde(default)]
    pub permalink_url: Option<String>,
    #[serde(default)]
    pub resource_subtype: Option<String>,
    #[serde(default)]
    pub tags: Vec<AsanaRef>,
    #[serde(default)]
    pub parent: Option<AsanaRef>,
}

impl AsanaTask {
    pub fn has_subtasks(&self) -> bool {
        self.num_subtasks.unwrap_or(0) > 0
    }
}

/// A story on a task; only `comment_added` stories are synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsanaStory {
    pub gid: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<AsanaRef>,
    #[serde(default)]
    pub resource_subtype: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub is_pinned: bool,
}

impl AsanaStory {
    pub fn is_comment(&self) -> bool {
        self.resource_subtype.as_deref() == Some("comment_added")
    }

    /// Short display name derived from the comment text.
    pub fn display_name(&self) -> String {
        let text = self.text.as_deref().unwrap_or("").trim();
        if text.is_empty() {
            return "Comment".to_string();
        }
        text.chars().take(50).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsanaAttachment {
    pub gid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub permanent_url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}
