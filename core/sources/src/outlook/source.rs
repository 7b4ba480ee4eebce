//! Outlook Mail connector over Microsoft Graph.
//!
//! Folders are listed with `$top`/`$skip`. Each folder's messages come from
//! its own delta query, so every folder resumes independently: a failure in
//! one folder leaves the others' links moving forward.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use airweave_common::{Breadcrumb, BreadcrumbTrail, EntityKind, Error, Result};
use airweave_sync::{
    iterate_items, iterate_pages, traverse, with_fallback, ChunkEntity, CursorStore, DeletionEntity,
    DeletionReconciler, Hierarchy, ModeDecision, NodeStream, ODataLinks, ODataRemoved, OffsetPaging,
    PageFetcher, PageRequest, PageStart, Reconciled, SyncMode, TraversalOptions,
};

use super::api::*;
use super::cursor::{migrate_legacy_cursor, PendingLinks, CURSOR_FIELD};
use crate::entities::EntityPayload;
use crate::source::{parse_item, Entity, Source, SourceContext, SourceStream};

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

#[derive(Clone)]
struct GraphApi {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
    page_size: usize,
}

impl GraphApi {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn folders_from(&self, request: PageRequest) -> NodeStream<MailNode> {
        let start = PageStart::Link {
            request,
            format: Arc::new(ODataLinks::collection()),
        };
        iterate_items(iterate_pages(self.fetcher.clone(), start))
            .map(|item| item.and_then(|value| parse_item(value, "mail folder")).map(MailNode::Folder))
            .boxed()
    }

    fn top_folders(&self) -> NodeStream<MailNode> {
        let paging = OffsetPaging {
            request: PageRequest::new(self.url("/me/mailFolders")),
            offset_param: "$skip".to_string(),
            limit_param: "$top".to_string(),
            page_size: self.page_size,
            items_key: "value".to_string(),
        };
        iterate_items(iterate_pages(self.fetcher.clone(), PageStart::Offset(paging)))
            .map(|item| item.and_then(|value| parse_item(value, "mail folder")).map(MailNode::Folder))
            .boxed()
    }

    fn child_folders(&self, folder_id: &str) -> NodeStream<MailNode> {
        let request = PageRequest::new(self.url(&format!("/me/mailFolders/{}/childFolders", folder_id)))
            .param("$top", self.page_size.to_string());
        self.folders_from(request)
    }

    fn fresh_delta_request(&self, folder_id: &str) -> PageRequest {
        PageRequest::new(self.url(&format!("/me/mailFolders/{}/messages/delta", folder_id)))
            .param("$select", MESSAGE_SELECT)
    }

    /// Walk one folder's delta pages, staging the final delta link.
    fn delta_walk(
        &self,
        folder_id: String,
        request: PageRequest,
        mode: SyncMode,
        pending: Arc<PendingLinks>,
    ) -> NodeStream<MailNode> {
        let start = PageStart::Link {
            request,
            format: Arc::new(ODataLinks::delta()),
        };
        let reconciler = Arc::new(DeletionReconciler::new(mode, ODataRemoved));

        iterate_pages(self.fetcher.clone(), start)
            .map_ok(move |page| {
                if let Some(link) = page.delta_link {
                    debug!(folder = %folder_id, "Staging delta link");
                    pending.stage(&folder_id, link);
                }
                let reconciler = reconciler.clone();
                stream::iter(
                    page.items
                        .into_iter()
                        .filter_map(move |item| message_node(&reconciler, item)),
                )
            })
            .try_flatten()
            .boxed()
    }

    async fn attachments(&self, message_id: &str) -> Result<Vec<MailAttachment>> {
        let request = PageRequest::new(self.url(&format!("/me/messages/{}/attachments", message_id)))
            .param("$select", ATTACHMENT_SELECT);
        let start = PageStart::Link {
            request,
            format: Arc::new(ODataLinks::collection()),
        };
        let items: Vec<Value> = iterate_items(iterate_pages(self.fetcher.clone(), start))
            .try_collect()
            .await?;

        let mut attachments = Vec::with_capacity(items.len());
        for item in items {
            match parse_item(item, "attachment") {
                Ok(attachment) => attachments.push(attachment),
                Err(err) => warn!(message = %message_id, error = %err, "Skipping malformed attachment"),
            }
        }
        Ok(attachments)
    }
}

fn message_node(reconciler: &DeletionReconciler<ODataRemoved>, item: Value) -> Option<Result<MailNode>> {
    match reconciler.reconcile(item) {
        Ok(Reconciled::Removed(id)) => Some(Ok(MailNode::Removed { id })),
        Ok(Reconciled::Content(value)) => Some(parse_item(value, "message").map(MailNode::Message)),
        Ok(Reconciled::Ignored) => None,
        Err(err) => Some(Err(err)),
    }
}

#[derive(Debug, Clone)]
pub(crate) enum MailNode {
    Folder(MailFolder),
    Message(MailMessage),
    /// A message the delta query reported as removed.
    Removed { id: String },
}

struct MailWalk {
    api: GraphApi,
    cursor: CursorStore,
    decision: ModeDecision,
    pending: Arc<PendingLinks>,
    checkpoint_scopes: bool,
}

impl MailWalk {
    fn messages(&self, folder: &MailFolder) -> NodeStream<MailNode> {
        let fresh = {
            let api = self.api.clone();
            let cursor = self.cursor.clone();
            let pending = self.pending.clone();
            let folder_id = folder.id.clone();
            move || {
                cursor.remove_scope_entry(CURSOR_FIELD, &folder_id);
                let request = api.fresh_delta_request(&folder_id);
                api.delta_walk(folder_id, request, SyncMode::Full, pending)
            }
        };

        match self.decision.scope_token(&folder.id) {
            Some(link) => {
                debug!(folder = %folder.display_name, "Resuming from stored delta link");
                let resumed = self.api.delta_walk(
                    folder.id.clone(),
                    PageRequest::new(link),
                    SyncMode::Incremental,
                    self.pending.clone(),
                );
                with_fallback(resumed, fresh, |err| matches!(err, Error::DeltaExpired(_)))
            }
            None => fresh(),
        }
    }
}

#[async_trait]
impl Hierarchy for MailWalk {
    type Node = MailNode;
    type Payload = EntityPayload;

    fn roots(&self) -> NodeStream<MailNode> {
        self.api.top_folders()
    }

    fn children(&self, node: &MailNode, _trail: &BreadcrumbTrail) -> Option<NodeStream<MailNode>> {
        let MailNode::Folder(folder) = node else {
            return None;
        };

        let messages = self.messages(folder);
        if folder.child_folder_count == 0 {
            return Some(messages);
        }
        Some(messages.chain(self.api.child_folders(&folder.id)).boxed())
    }

    fn name<'n>(&self, node: &'n MailNode) -> &'n str {
        match node {
            MailNode::Folder(folder) => &folder.display_name,
            MailNode::Message(message) => message.display_name(),
            MailNode::Removed { id } => id,
        }
    }

    fn breadcrumb(&self, node: &MailNode) -> Breadcrumb {
        match node {
            MailNode::Folder(folder) => Breadcrumb::new(folder.id.clone(), self.name(node), EntityKind::Folder),
            MailNode::Message(message) => Breadcrumb::new(message.id.clone(), self.name(node), EntityKind::Message),
            MailNode::Removed { id } => Breadcrumb::new(id.clone(), id.clone(), EntityKind::Message),
        }
    }

    fn to_entity(&self, node: &MailNode, trail: &BreadcrumbTrail) -> Result<Entity> {
        let entity = match node {
            MailNode::Folder(folder) => ChunkEntity::new(
                folder.id.clone(),
                EntityKind::Folder,
                folder.display_name.clone(),
                trail.clone(),
                EntityPayload::OutlookMailFolder(folder.clone()),
            )
            .into(),
            MailNode::Message(message) => ChunkEntity::new(
                message.id.clone(),
                EntityKind::Message,
                message.display_name(),
                trail.clone(),
                EntityPayload::OutlookMessage(message.clone()),
            )
            .into(),
            MailNode::Removed { id } => DeletionEntity::removed(id.clone(), EntityKind::Message, trail.clone()).into(),
        };
        Ok(entity)
    }

    async fn leaves(&self, node: &MailNode, trail: &BreadcrumbTrail) -> Result<Vec<Entity>> {
        let MailNode::Message(message) = node else {
            return Ok(Vec::new());
        };
        if !message.has_attachments {
            return Ok(Vec::new());
        }

        let attachments = self.api.attachments(&message.id).await?;
        Ok(attachments
            .into_iter()
            .map(|attachment| {
                ChunkEntity::new(
                    attachment.id.clone(),
                    EntityKind::Attachment,
                    attachment.name.clone(),
                    trail.clone(),
                    EntityPayload::OutlookAttachment(attachment),
                )
                .into()
            })
            .collect())
    }

    async fn on_scope_complete(&self, node: &MailNode, clean: bool) -> Result<()> {
        let MailNode::Folder(folder) = node else {
            return Ok(());
        };

        let staged = self.pending.take(&folder.id);
        if !clean {
            warn!(folder = %folder.display_name, "Folder had errors; keeping its previous delta link");
            return Ok(());
        }
        let Some(link) = staged else {
            return Ok(());
        };

        self.cursor.set_scope_entry(CURSOR_FIELD, &folder.id, Value::String(link));
        if self.checkpoint_scopes {
            self.cursor.checkpoint().await?;
        }
        debug!(folder = %folder.display_name, "Folder delta link updated");
        Ok(())
    }
}

/// Outlook Mail source connector.
pub struct OutlookMailSource {
    ctx: SourceContext,
    api: GraphApi,
}

impl OutlookMailSource {
    pub fn new(ctx: SourceContext) -> Result<Self> {
        let api = GraphApi {
            fetcher: ctx.fetcher.clone(),
            base_url: ctx.base_url(GRAPH_API_BASE)?,
            page_size: ctx.config.page_size,
        };
        Ok(Self { ctx, api })
    }
}

#[async_trait]
impl Source for OutlookMailSource {
    fn short_name(&self) -> &'static str {
        "outlook_mail"
    }

    fn default_cursor_field(&self) -> &'static str {
        CURSOR_FIELD
    }

    async fn validate(&self) -> Result<()> {
        let params = [("$top".to_string(), "1".to_string())];
        self.api
            .fetcher
            .fetch_page(&self.api.url("/me/mailFolders"), &params)
            .await
            .map(|_| ())
    }

    fn generate_entities(&self) -> Result<SourceStream> {
        migrate_legacy_cursor(&self.ctx.cursor);
        let decision = self.ctx.select_mode(CURSOR_FIELD)?;
        info!(mode = %decision.mode, "Starting Outlook Mail sync");

        let walk = MailWalk {
            api: self.api.clone(),
            cursor: self.ctx.cursor.clone(),
            decision,
            pending: Arc::new(PendingLinks::default()),
            checkpoint_scopes: self.ctx.config.checkpoint_scopes,
        };
        let options = TraversalOptions::excluding(self.ctx.config.exclude_path.clone());

        Ok(traverse(Arc::new(walk), options))
    }
}
