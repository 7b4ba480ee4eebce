//! Asana connector.
//!
//! Walks workspaces → projects → sections → tasks → subtasks, with comments
//! and attachments yielded right after their task.
//!
//! The cursor records, per workspace, when the last clean walk of that
//! workspace started:
//!
//! ```json
//! {"workspace_synced_at": {"<workspace gid>": "2024-05-01T10:00:00+00:00"}}
//! ```
//!
//! Workspaces with an entry are synced incrementally through the task search
//! API. Search is a premium feature; on a 402 the walk falls back to the
//! project enumeration. Fallback walks still list every task, since an edited
//! subtask leaves its parent's `modified_at` alone, but only emit tasks
//! modified after the workspace's sync time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use airweave_common::{Breadcrumb, BreadcrumbTrail, EntityKind, Error, Result};
use airweave_sync::{
    iterate_items, iterate_pages, traverse, with_fallback, AsanaLinks, AsanaSearchLinks, ChunkEntity, CursorStore,
    Hierarchy, LinkFormat, NodeStream, PageFetcher, PageRequest, PageStart, TraversalOptions,
};

use super::api::*;
use crate::entities::EntityPayload;
use crate::source::{parse_item, Entity, Source, SourceContext, SourceStream};

pub const ASANA_API_BASE: &str = "https://app.asana.com/api/1.0";

/// Per-workspace map of last clean walk start times.
pub const CURSOR_FIELD: &str = "workspace_synced_at";

/// Asana caps page size at 100.
const MAX_PAGE_SIZE: usize = 100;

/// Thin paging helper shared by the connector and its walks.
#[derive(Clone)]
struct AsanaApi {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
    page_size: usize,
}

impl AsanaApi {
    fn request(&self, path: &str, fields: &str) -> PageRequest {
        PageRequest::new(format!("{}{}", self.base_url, path))
            .param("opt_fields", fields)
            .param("limit", self.page_size.to_string())
    }

    fn walk(&self, request: PageRequest, format: Arc<dyn LinkFormat>) -> BoxStream<'static, Result<Value>> {
        iterate_items(iterate_pages(self.fetcher.clone(), PageStart::Link { request, format }))
    }

    fn list(&self, request: PageRequest) -> BoxStream<'static, Result<Value>> {
        self.walk(request, Arc::new(AsanaLinks))
    }

    fn nodes<T, F>(&self, request: PageRequest, what: &'static str, into_node: F) -> NodeStream<AsanaNode>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) -> AsanaNode + Send + 'static,
    {
        self.list(request)
            .map(move |item| item.and_then(|value| parse_item::<T>(value, what)).map(&into_node))
            .boxed()
    }

    fn projects(&self, workspace_gid: String, since: Option<String>) -> NodeStream<AsanaNode> {
        let request = self
            .request("/projects", PROJECT_FIELDS)
            .param("workspace", workspace_gid.clone());
        self.nodes(request, "project", move |project: AsanaProject| AsanaNode::Project {
            workspace_gid: workspace_gid.clone(),
            project,
            since: since.clone(),
        })
    }

    fn sections(&self, project_gid: &str, since: Option<String>) -> NodeStream<AsanaNode> {
        let request = self.request(&format!("/projects/{}/sections", project_gid), SECTION_FIELDS);
        self.nodes(request, "section", move |section: AsanaSection| AsanaNode::Section {
            section,
            since: since.clone(),
        })
    }

    fn section_tasks(&self, section_gid: &str, changed_after: Option<DateTime<Utc>>) -> NodeStream<AsanaNode> {
        let request = self.request("/tasks", TASK_FIELDS).param("section", section_gid);
        self.nodes(request, "task", move |task: AsanaTask| AsanaNode::listed(task, changed_after))
    }

    fn subtasks(&self, task_gid: &str, changed_after: Option<DateTime<Utc>>) -> NodeStream<AsanaNode> {
        let request = self.request(&format!("/tasks/{}/subtasks", task_gid), TASK_FIELDS);
        self.nodes(request, "subtask", move |task: AsanaTask| AsanaNode::listed(task, changed_after))
    }

    /// Tasks modified after `since`, oldest first, via the search API.
    fn search_tasks(&self, workspace_gid: &str, since: &str) -> NodeStream<AsanaNode> {
        let request = self
            .request(&format!("/workspaces/{}/tasks/search", workspace_gid), TASK_FIELDS)
            .param("modified_at.after", since)
            .param("sort_by", "created_at")
            .param("sort_ascending", "true");
        let format = Arc::new(AsanaSearchLinks { limit: self.page_size });

        // Consecutive pages overlap on their boundary second.
        let mut seen = HashSet::new();
        self.walk(request, format)
            .map(|item| {
                item.and_then(|value| parse_item::<AsanaTask>(value, "task"))
                    .map(|task| AsanaNode::Task {
                        task,
                        from_search: true,
                        changed_after: None,
                    })
            })
            .filter(move |node| {
                let repeat = matches!(node, Ok(AsanaNode::Task { task, .. }) if !seen.insert(task.gid.clone()));
                future::ready(!repeat)
            })
            .boxed()
    }

    async fn collect<T: DeserializeOwned>(&self, request: PageRequest, what: &str) -> Result<Vec<T>> {
        let items: Vec<Value> = self.list(request).try_collect().await?;
        let mut parsed = Vec::with_capacity(items.len());
        for item in items {
            match parse_item(item, what) {
                Ok(value) => parsed.push(value),
                Err(err) => warn!(error = %err, "Skipping malformed {}", what),
            }
        }
        Ok(parsed)
    }
}

/// A position in the Asana hierarchy.
#[derive(Debug, Clone)]
pub(crate) enum AsanaNode {
    Workspace {
        workspace: AsanaWorkspace,
        /// Start of the last clean walk; `None` for a full walk.
        since: Option<String>,
    },
    Project {
        workspace_gid: String,
        project: AsanaProject,
        since: Option<String>,
    },
    Section {
        section: AsanaSection,
        since: Option<String>,
    },
    Task {
        task: AsanaTask,
        /// Reached through the search API rather than its section.
        from_search: bool,
        /// Emit only if modified after this; set by fallback walks.
        changed_after: Option<DateTime<Utc>>,
    },
}

impl AsanaNode {
    fn listed(task: AsanaTask, changed_after: Option<DateTime<Utc>>) -> Self {
        AsanaNode::Task {
            task,
            from_search: false,
            changed_after,
        }
    }
}

/// Parse a stored sync time. Unparseable values emit everything.
fn parse_synced_at(since: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(since) {
        Ok(at) => Some(at.with_timezone(&Utc)),
        Err(err) => {
            warn!(since, error = %err, "Unparseable workspace sync time; emitting every task");
            None
        }
    }
}

/// State of one Asana sync run.
struct AsanaWalk {
    api: AsanaApi,
    cursor: CursorStore,
    synced_at: HashMap<String, String>,
    started_at: String,
    checkpoint_scopes: bool,
}

#[async_trait]
impl Hierarchy for AsanaWalk {
    type Node = AsanaNode;
    type Payload = EntityPayload;

    fn roots(&self) -> NodeStream<AsanaNode> {
        let synced_at = self.synced_at.clone();
        let request = self.api.request("/workspaces", WORKSPACE_FIELDS);
        self.api.nodes(request, "workspace", move |workspace: AsanaWorkspace| {
            let since = synced_at.get(&workspace.gid).cloned();
            AsanaNode::Workspace { workspace, since }
        })
    }

    fn children(&self, node: &AsanaNode, _trail: &BreadcrumbTrail) -> Option<NodeStream<AsanaNode>> {
        match node {
            AsanaNode::Workspace { workspace, since: None } => Some(self.api.projects(workspace.gid.clone(), None)),
            AsanaNode::Workspace {
                workspace,
                since: Some(since),
            } => {
                debug!(workspace = %workspace.name, since = %since, "Searching modified tasks");
                let api = self.api.clone();
                let gid = workspace.gid.clone();
                let since = since.clone();
                let search = self.api.search_tasks(&gid, &since);
                Some(with_fallback(
                    search,
                    move || api.projects(gid, Some(since)),
                    |err| matches!(err, Error::NotEntitled(_)),
                ))
            }
            AsanaNode::Project { project, since, .. } => Some(self.api.sections(&project.gid, since.clone())),
            AsanaNode::Section { section, since } => {
                let changed_after = since.as_deref().and_then(parse_synced_at);
                Some(self.api.section_tasks(&section.gid, changed_after))
            }
            AsanaNode::Task {
                task,
                from_search,
                changed_after,
            } => {
                // Search results already include modified subtasks.
                (!from_search && task.has_subtasks()).then(|| self.api.subtasks(&task.gid, *changed_after))
            }
        }
    }

    fn yields(&self, node: &AsanaNode) -> bool {
        match node {
            AsanaNode::Task {
                task,
                changed_after: Some(after),
                ..
            } => task.modified_at.map_or(true, |modified| modified > *after),
            _ => true,
        }
    }

    fn name<'n>(&self, node: &'n AsanaNode) -> &'n str {
        match node {
            AsanaNode::Workspace { workspace, .. } => &workspace.name,
            AsanaNode::Project { project, .. } => &project.name,
            AsanaNode::Section { section, .. } => &section.name,
            AsanaNode::Task { task, .. } => &task.name,
        }
    }

    fn breadcrumb(&self, node: &AsanaNode) -> Breadcrumb {
        let (gid, kind) = match node {
            AsanaNode::Workspace { workspace, .. } => (&workspace.gid, EntityKind::Workspace),
            AsanaNode::Project { project, .. } => (&project.gid, EntityKind::Project),
            AsanaNode::Section { section, .. } => (&section.gid, EntityKind::Section),
            AsanaNode::Task { task, .. } => (&task.gid, EntityKind::Task),
        };
        Breadcrumb::new(gid.clone(), self.name(node), kind)
    }

    fn breadcrumbs_for(&self, node: &AsanaNode, inherited: &BreadcrumbTrail) -> BreadcrumbTrail {
        let AsanaNode::Task {
            task, from_search: true, ..
        } = node
        else {
            return inherited.clone();
        };

        // Search hits sit directly under the workspace; rebuild their place.
        let mut trail = inherited.clone();
        if let Some(membership) = task.memberships.iter().find(|m| m.project.is_some()) {
            if let Some(project) = &membership.project {
                trail = trail.child(Breadcrumb::new(project.gid.clone(), project.name.clone(), EntityKind::Project));
            }
            if let Some(section) = &membership.section {
                trail = trail.child(Breadcrumb::new(section.gid.clone(), section.name.clone(), EntityKind::Section));
            }
        }
        if let Some(parent) = &task.parent {
            trail = trail.child(Breadcrumb::new(parent.gid.clone(), parent.name.clone(), EntityKind::Task));
        }
        trail
    }

    fn to_entity(&self, node: &AsanaNode, trail: &BreadcrumbTrail) -> Result<Entity> {
        let crumb = self.breadcrumb(node);
        let payload = match node {
            AsanaNode::Workspace { workspace, .. } => EntityPayload::AsanaWorkspace(workspace.clone()),
            AsanaNode::Project { project, .. } => EntityPayload::AsanaProject(project.clone()),
            AsanaNode::Section { section, .. } => EntityPayload::AsanaSection(section.clone()),
            AsanaNode::Task { task, .. } => EntityPayload::AsanaTask(task.clone()),
        };
        Ok(ChunkEntity::new(crumb.entity_id, crumb.kind, crumb.name, trail.clone(), payload).into())
    }

    async fn leaves(&self, node: &AsanaNode, trail: &BreadcrumbTrail) -> Result<Vec<Entity>> {
        let AsanaNode::Task { task, .. } = node else {
            return Ok(Vec::new());
        };

        let stories: Vec<AsanaStory> = self
            .api
            .collect(self.api.request(&format!("/tasks/{}/stories", task.gid), STORY_FIELDS), "story")
            .await?;
        let attachments: Vec<AsanaAttachment> = self
            .api
            .collect(
                self.api.request("/attachments", ATTACHMENT_FIELDS).param("parent", task.gid.clone()),
                "attachment",
            )
            .await?;

        let comments = stories.into_iter().filter(AsanaStory::is_comment).map(|story| {
            ChunkEntity::new(
                story.gid.clone(),
                EntityKind::Comment,
                story.display_name(),
                trail.clone(),
                EntityPayload::AsanaComment(story),
            )
            .into()
        });
        let files = attachments.into_iter().map(|file| {
            ChunkEntity::new(
                file.gid.clone(),
                EntityKind::File,
                file.name.clone(),
                trail.clone(),
                EntityPayload::AsanaFile(file),
            )
            .into()
        });

        Ok(comments.chain(files).collect())
    }

    async fn on_scope_complete(&self, node: &AsanaNode, clean: bool) -> Result<()> {
        let AsanaNode::Workspace { workspace, .. } = node else {
            return Ok(());
        };

        if !clean {
            warn!(workspace = %workspace.name, "Workspace had errors; keeping its previous sync time");
            return Ok(());
        }

        self.cursor
            .set_scope_entry(CURSOR_FIELD, &workspace.gid, Value::String(self.started_at.clone()));
        if self.checkpoint_scopes {
            self.cursor.checkpoint().await?;
        }
        info!(workspace = %workspace.name, "Workspace synced");
        Ok(())
    }
}

/// Asana source connector.
pub struct AsanaSource {
    ctx: SourceContext,
    api: AsanaApi,
}

impl AsanaSource {
    pub fn new(ctx: SourceContext) -> Result<Self> {
        let api = AsanaApi {
            fetcher: ctx.fetcher.clone(),
            base_url: ctx.base_url(ASANA_API_BASE)?,
            page_size: ctx.config.page_size.clamp(1, MAX_PAGE_SIZE),
        };
        Ok(Self { ctx, api })
    }
}

#[async_trait]
impl Source for AsanaSource {
    fn short_name(&self) -> &'static str {
        "asana"
    }

    fn default_cursor_field(&self) -> &'static str {
        CURSOR_FIELD
    }

    async fn validate(&self) -> Result<()> {
        let url = format!("{}/users/me", self.api.base_url);
        self.api.fetcher.fetch_page(&url, &[]).await.map(|_| ())
    }

    fn generate_entities(&self) -> Result<SourceStream> {
        let decision = self.ctx.select_mode(CURSOR_FIELD)?;

        let synced_at: HashMap<String, String> = decision
            .token
            .as_ref()
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(gid, at)| Some((gid.clone(), at.as_str()?.to_string())))
                    .filter(|(_, at)| !at.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        info!(mode = %decision.mode, workspaces = synced_at.len(), "Starting Asana sync");

        let walk = AsanaWalk {
            api: self.api.clone(),
            cursor: self.ctx.cursor.clone(),
            synced_at,
            started_at: Utc::now().to_rfc3339(),
            checkpoint_scopes: self.ctx.config.checkpoint_scopes,
        };
        let options = TraversalOptions::excluding(self.ctx.config.exclude_path.clone());

        Ok(traverse(Arc::new(walk), options))
    }
}
