//! Depth-first entity traversal over a provider hierarchy.
//!
//! Connectors describe their hierarchy through [`Hierarchy`]; [`traverse`]
//! turns it into a lazy stream of entities. For every node the stream yields
//! the node's entity, then fetches and yields its leaf content, then walks its
//! children before moving on to the next sibling, so no entity ever precedes
//! its ancestors. Exclusion applies to a node's name and to every crumb of
//! its trail.
//!
//! Failures are contained where they happen:
//!
//! - a `Payload` error drops the offending item only, and does not count
//!   against its scope
//! - any other error while listing a node's children drops the rest of that
//!   node's subtree and traversal continues with the next sibling
//! - errors while listing the roots and fatal errors end the stream
//!
//! Each completed scope is reported back through
//! [`Hierarchy::on_scope_complete`] together with whether everything below it
//! succeeded, so connectors only advance cursors for clean scopes.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, warn};

use airweave_common::{Breadcrumb, BreadcrumbTrail, Error, Result};

use crate::entity::SyncEntity;

/// Lazy stream of hierarchy nodes.
pub type NodeStream<N> = BoxStream<'static, Result<N>>;

/// Lazy stream of entities.
pub type EntityStream<P> = BoxStream<'static, Result<SyncEntity<P>>>;

/// A connector's view of its provider hierarchy.
#[async_trait]
pub trait Hierarchy: Send + Sync + 'static {
    /// A node as returned by the provider (workspace, folder, task, ...).
    type Node: Send + Sync + 'static;
    /// Payload carried by the entities this hierarchy produces.
    type Payload: Send + 'static;

    /// Top-level nodes.
    fn roots(&self) -> NodeStream<Self::Node>;

    /// Children of `node`, or `None` for nodes that never nest.
    ///
    /// `trail` already ends with `node`'s own breadcrumb.
    fn children(&self, node: &Self::Node, trail: &BreadcrumbTrail) -> Option<NodeStream<Self::Node>>;

    /// Display name, matched against the exclusion filter.
    fn name<'n>(&self, node: &'n Self::Node) -> &'n str;

    /// Breadcrumb for `node` itself.
    fn breadcrumb(&self, node: &Self::Node) -> Breadcrumb;

    /// Trail to attach to `node`.
    ///
    /// Defaults to the trail inherited from the walk. Nodes reached through a
    /// flat search rebuild their real ancestry here.
    fn breadcrumbs_for(&self, _node: &Self::Node, inherited: &BreadcrumbTrail) -> BreadcrumbTrail {
        inherited.clone()
    }

    /// Whether `node` is emitted at all.
    ///
    /// Nodes that return `false` produce no entity and no leaves but are
    /// still descended into, so changed descendants stay reachable through
    /// unchanged ancestors.
    fn yields(&self, _node: &Self::Node) -> bool {
        true
    }

    fn to_entity(&self, node: &Self::Node, trail: &BreadcrumbTrail) -> Result<SyncEntity<Self::Payload>>;

    /// Leaf content (comments, attachments) yielded right after `node`.
    ///
    /// `trail` already ends with `node`'s own breadcrumb.
    async fn leaves(&self, _node: &Self::Node, _trail: &BreadcrumbTrail) -> Result<Vec<SyncEntity<Self::Payload>>> {
        Ok(Vec::new())
    }

    /// Called once all of `node`'s children have been walked.
    async fn on_scope_complete(&self, _node: &Self::Node, _clean: bool) -> Result<()> {
        Ok(())
    }
}

/// Options for one traversal.
#[derive(Debug, Clone, Default)]
pub struct TraversalOptions {
    /// Skip any node whose name contains this substring, with its subtree.
    pub exclude_path: Option<String>,
}

impl TraversalOptions {
    pub fn excluding(exclude_path: Option<String>) -> Self {
        Self {
            exclude_path: exclude_path.filter(|p| !p.is_empty()),
        }
    }
}

/// Walk `hierarchy` depth-first and stream its entities.
pub fn traverse<H: Hierarchy>(hierarchy: Arc<H>, options: TraversalOptions) -> EntityStream<H::Payload> {
    let roots = Frame {
        scope: None,
        trail: BreadcrumbTrail::root(),
        children: hierarchy.roots(),
        clean: true,
    };
    let walk = Walk {
        hierarchy,
        exclude_path: options.exclude_path,
        stack: vec![roots],
        ready: VecDeque::new(),
        descend: None,
        failure: None,
    };

    stream::unfold(walk, |mut walk| async move {
        let item = walk.next().await?;
        Some((item, walk))
    })
    .boxed()
}

struct Frame<N> {
    /// Node whose children this frame lists; `None` for the roots.
    scope: Option<N>,
    /// Trail handed to every child in this frame.
    trail: BreadcrumbTrail,
    children: NodeStream<N>,
    clean: bool,
}

/// A node whose entity is out; its leaves and children come next.
struct Descend<N> {
    node: N,
    /// Trail ending with the node's own breadcrumb.
    trail: BreadcrumbTrail,
    leaves: bool,
}

struct Walk<H: Hierarchy> {
    hierarchy: Arc<H>,
    exclude_path: Option<String>,
    stack: Vec<Frame<H::Node>>,
    ready: VecDeque<SyncEntity<H::Payload>>,
    descend: Option<Descend<H::Node>>,
    /// Error to surface once `ready` drains; the walk ends after it.
    failure: Option<Error>,
}

impl<H: Hierarchy> Walk<H> {
    async fn next(&mut self) -> Option<Result<SyncEntity<H::Payload>>> {
        loop {
            if let Some(entity) = self.ready.pop_front() {
                return Some(Ok(entity));
            }
            if let Some(err) = self.failure.take() {
                self.stack.clear();
                return Some(Err(err));
            }
            if let Some(pending) = self.descend.take() {
                self.descend_into(pending).await;
                continue;
            }

            let depth = self.stack.len();
            let frame = self.stack.last_mut()?;
            let next = frame.children.next().await;

            match next {
                None => self.close_frame().await,
                Some(Err(err)) if err.is_fatal() || (depth == 1 && !err.is_item_level()) => {
                    self.failure = Some(err);
                }
                Some(Err(err)) if err.is_item_level() => {
                    warn!(error = %err, "Skipping malformed item");
                }
                Some(Err(err)) => {
                    let scope = frame.trail.parent().map(|c| c.name.clone()).unwrap_or_default();
                    warn!(scope = %scope, error = %err, "Skipping rest of subtree after error");
                    frame.clean = false;
                    frame.children = stream::empty().boxed();
                }
                Some(Ok(node)) => {
                    let inherited = frame.trail.clone();
                    self.visit(node, &inherited);
                }
            }
        }
    }

    /// Queue `node`'s entity; its leaves and children follow once the entity
    /// has been handed out.
    fn visit(&mut self, node: H::Node, inherited: &BreadcrumbTrail) {
        let hierarchy = self.hierarchy.clone();
        if self.matches_exclusion(hierarchy.name(&node)) {
            debug!(name = hierarchy.name(&node), "Excluded by filter");
            return;
        }

        let trail = hierarchy.breadcrumbs_for(&node, inherited);
        // Rebuilt trails can place a node under an excluded ancestor.
        if let Some(crumb) = trail.iter().find(|c| self.matches_exclusion(&c.name)) {
            debug!(name = hierarchy.name(&node), ancestor = %crumb.name, "Excluded by filter");
            return;
        }

        let child_trail = trail.child(hierarchy.breadcrumb(&node));
        if !hierarchy.yields(&node) {
            self.descend = Some(Descend {
                node,
                trail: child_trail,
                leaves: false,
            });
            return;
        }

        match hierarchy.to_entity(&node, &trail) {
            Ok(entity) => self.ready.push_back(entity),
            Err(err) if err.is_fatal() => {
                self.failure = Some(err);
                return;
            }
            Err(err) if err.is_item_level() => {
                warn!(name = hierarchy.name(&node), error = %err, "Skipping malformed item");
                return;
            }
            Err(err) => {
                warn!(name = hierarchy.name(&node), error = %err, "Skipping item that could not be converted");
                self.mark_dirty();
                return;
            }
        }

        self.descend = Some(Descend {
            node,
            trail: child_trail,
            leaves: true,
        });
    }

    /// Fetch a node's leaves and push a frame for its children.
    async fn descend_into(&mut self, pending: Descend<H::Node>) {
        let Descend { node, trail, leaves } = pending;
        let hierarchy = self.hierarchy.clone();
        let mut clean = true;

        if leaves {
            match hierarchy.leaves(&node, &trail).await {
                Ok(leaves) => self.ready.extend(leaves),
                Err(err) if err.is_fatal() => {
                    self.failure = Some(err);
                    return;
                }
                Err(err) if err.is_item_level() => {
                    warn!(name = hierarchy.name(&node), error = %err, "Skipping malformed leaf content");
                }
                Err(err) => {
                    warn!(name = hierarchy.name(&node), error = %err, "Skipping leaf content");
                    clean = false;
                }
            }
        }

        match hierarchy.children(&node, &trail) {
            // A dirty frame propagates to its parent when it closes.
            Some(children) => self.stack.push(Frame {
                scope: Some(node),
                trail,
                children,
                clean,
            }),
            None if !clean => self.mark_dirty(),
            None => {}
        }
    }

    async fn close_frame(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        if !frame.clean {
            self.mark_dirty();
        }
        let Some(scope) = frame.scope else {
            return;
        };

        if let Err(err) = self.hierarchy.on_scope_complete(&scope, frame.clean).await {
            if err.is_fatal() {
                self.failure = Some(err);
            } else {
                warn!(name = self.hierarchy.name(&scope), error = %err, "Failed to record completed scope");
            }
        }
    }

    fn mark_dirty(&mut self) {
        if let Some(frame) = self.stack.last_mut() {
            frame.clean = false;
        }
    }

    fn matches_exclusion(&self, name: &str) -> bool {
        match &self.exclude_path {
            Some(pattern) => name.contains(pattern.as_str()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ChunkEntity;
    use airweave_common::EntityKind;
    use futures::TryStreamExt;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct TreeNode {
        id: String,
        name: String,
        kind: EntityKind,
    }

    /// In-memory hierarchy. Children keyed by parent ID, "" for roots.
    #[derive(Default)]
    struct Tree {
        children: HashMap<String, Vec<TreeNode>>,
        failing_children: HashMap<String, fn() -> Error>,
        leaves: HashMap<String, Vec<String>>,
        /// Trails replacing the inherited one, like search hits.
        rehomed: HashMap<String, Vec<Breadcrumb>>,
        hidden: Vec<String>,
        leaf_calls: Mutex<Vec<String>>,
        completed: Mutex<Vec<(String, bool)>>,
    }

    impl Tree {
        fn add(mut self, parent: &str, id: &str, name: &str, kind: EntityKind) -> Self {
            self.children.entry(parent.to_string()).or_default().push(TreeNode {
                id: id.to_string(),
                name: name.to_string(),
                kind,
            });
            self
        }

        fn fail_children(mut self, parent: &str, err: fn() -> Error) -> Self {
            self.failing_children.insert(parent.to_string(), err);
            self
        }

        fn leaf(mut self, parent: &str, id: &str) -> Self {
            self.leaves.entry(parent.to_string()).or_default().push(id.to_string());
            self
        }

        fn rehome(mut self, id: &str, trail: Vec<Breadcrumb>) -> Self {
            self.rehomed.insert(id.to_string(), trail);
            self
        }

        fn hide(mut self, id: &str) -> Self {
            self.hidden.push(id.to_string());
            self
        }

        fn leaf_calls(&self) -> Vec<String> {
            self.leaf_calls.lock().unwrap().clone()
        }

        fn completed(&self) -> Vec<(String, bool)> {
            self.completed.lock().unwrap().clone()
        }

        fn stream_for(&self, parent: &str) -> NodeStream<TreeNode> {
            let nodes = self.children.get(parent).cloned().unwrap_or_default();
            let mut items: Vec<Result<TreeNode>> = nodes.into_iter().map(Ok).collect();
            if let Some(err) = self.failing_children.get(parent) {
                // Fail after the first child, like a later page erroring.
                let at = items.len().min(1);
                items.insert(at, Err(err()));
            }
            stream::iter(items).boxed()
        }
    }

    #[async_trait]
    impl Hierarchy for Tree {
        type Node = TreeNode;
        type Payload = ();

        fn roots(&self) -> NodeStream<TreeNode> {
            self.stream_for("")
        }

        fn children(&self, node: &TreeNode, _trail: &BreadcrumbTrail) -> Option<NodeStream<TreeNode>> {
            (self.children.contains_key(&node.id) || self.failing_children.contains_key(&node.id))
                .then(|| self.stream_for(&node.id))
        }

        fn name<'n>(&self, node: &'n TreeNode) -> &'n str {
            &node.name
        }

        fn breadcrumb(&self, node: &TreeNode) -> Breadcrumb {
            Breadcrumb::new(node.id.clone(), node.name.clone(), node.kind)
        }

        fn breadcrumbs_for(&self, node: &TreeNode, inherited: &BreadcrumbTrail) -> BreadcrumbTrail {
            match self.rehomed.get(&node.id) {
                Some(crumbs) => BreadcrumbTrail::from(crumbs.clone()),
                None => inherited.clone(),
            }
        }

        fn yields(&self, node: &TreeNode) -> bool {
            !self.hidden.contains(&node.id)
        }

        fn to_entity(&self, node: &TreeNode, trail: &BreadcrumbTrail) -> Result<SyncEntity<()>> {
            if node.name.starts_with("bad") {
                return Err(Error::Payload(format!("cannot parse {}", node.id)));
            }
            Ok(ChunkEntity::new(node.id.clone(), node.kind, node.name.clone(), trail.clone(), ()).into())
        }

        async fn leaves(&self, node: &TreeNode, trail: &BreadcrumbTrail) -> Result<Vec<SyncEntity<()>>> {
            self.leaf_calls.lock().unwrap().push(node.id.clone());
            Ok(self
                .leaves
                .get(&node.id)
                .map(|ids| {
                    ids.iter()
                        .map(|id| ChunkEntity::new(id.clone(), EntityKind::Comment, id.clone(), trail.clone(), ()).into())
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn on_scope_complete(&self, node: &TreeNode, clean: bool) -> Result<()> {
            self.completed.lock().unwrap().push((node.id.clone(), clean));
            Ok(())
        }
    }

    async fn run(tree: Tree, exclude: Option<&str>) -> (Vec<SyncEntity<()>>, Arc<Tree>) {
        let tree = Arc::new(tree);
        let options = TraversalOptions::excluding(exclude.map(str::to_string));
        let entities = traverse(tree.clone(), options).try_collect().await.unwrap();
        (entities, tree)
    }

    fn ids(entities: &[SyncEntity<()>]) -> Vec<&str> {
        entities.iter().map(|e| e.entity_id()).collect()
    }

    fn workspace() -> Tree {
        Tree::default()
            .add("", "ws", "Workspace", EntityKind::Workspace)
            .add("ws", "p1", "Roadmap", EntityKind::Project)
            .add("ws", "p2", "Launch", EntityKind::Project)
            .add("p1", "s1", "Backlog", EntityKind::Section)
            .add("s1", "t1", "Write docs", EntityKind::Task)
            .add("s1", "t2", "Ship", EntityKind::Task)
            .add("p2", "t3", "Announce", EntityKind::Task)
            .leaf("t1", "c1")
            .leaf("t1", "c2")
    }

    #[tokio::test]
    async fn test_depth_first_order_with_leaves() {
        let (entities, _) = run(workspace(), None).await;
        assert_eq!(
            ids(&entities),
            vec!["ws", "p1", "s1", "t1", "c1", "c2", "t2", "p2", "t3"]
        );
    }

    #[tokio::test]
    async fn test_parent_before_child() {
        let (entities, _) = run(workspace(), None).await;
        let position: HashMap<&str, usize> =
            ids(&entities).into_iter().enumerate().map(|(i, id)| (id, i)).collect();

        for (i, entity) in entities.iter().enumerate() {
            for crumb in entity.breadcrumbs().iter() {
                assert!(position[crumb.entity_id.as_str()] < i, "{} before ancestor {}", entity.entity_id(), crumb.entity_id);
            }
        }
    }

    #[tokio::test]
    async fn test_breadcrumb_chains() {
        let (entities, _) = run(workspace(), None).await;
        let comment = entities.iter().find(|e| e.entity_id() == "c1").unwrap();
        let chain: Vec<&str> = comment.breadcrumbs().iter().map(|c| c.entity_id.as_str()).collect();
        assert_eq!(chain, vec!["ws", "p1", "s1", "t1"]);

        let sibling = entities.iter().find(|e| e.entity_id() == "t3").unwrap();
        let chain: Vec<&str> = sibling.breadcrumbs().iter().map(|c| c.entity_id.as_str()).collect();
        assert_eq!(chain, vec!["ws", "p2"]);
    }

    #[tokio::test]
    async fn test_exclusion_skips_subtree() {
        let mut tree = Tree::default()
            .add("", "ws", "Workspace", EntityKind::Workspace)
            .add("ws", "keep", "Roadmap", EntityKind::Project)
            .add("ws", "arch", "2024 Archive Projects", EntityKind::Project);
        for i in 0..5 {
            tree = tree.add("arch", &format!("a{i}"), &format!("Task {i}"), EntityKind::Task);
        }

        let (entities, _) = run(tree, Some("Archive")).await;
        assert_eq!(ids(&entities), vec!["ws", "keep"]);
    }

    #[tokio::test]
    async fn test_sibling_failure_is_isolated() {
        let tree = Tree::default()
            .add("", "ws", "Workspace", EntityKind::Workspace)
            .add("ws", "A", "A", EntityKind::Project)
            .add("ws", "B", "B", EntityKind::Project)
            .add("ws", "C", "C", EntityKind::Project)
            .add("A", "a1", "a1", EntityKind::Task)
            .add("B", "b1", "b1", EntityKind::Task)
            .add("B", "b2", "b2", EntityKind::Task)
            .add("C", "c1", "c1", EntityKind::Task)
            .fail_children("B", || Error::Http { status: 503, message: "unavailable".to_string() });

        let (entities, tree) = run(tree, None).await;

        // b1 comes before the error, b2 is dropped with the rest of B.
        assert_eq!(ids(&entities), vec!["ws", "A", "a1", "B", "b1", "C", "c1"]);
        let completed = tree.completed();
        assert!(completed.contains(&("A".to_string(), true)));
        assert!(completed.contains(&("B".to_string(), false)));
        assert!(completed.contains(&("C".to_string(), true)));
        assert!(completed.contains(&("ws".to_string(), false)));
    }

    #[tokio::test]
    async fn test_payload_error_skips_only_item() {
        let tree = Tree::default()
            .add("", "ws", "Workspace", EntityKind::Workspace)
            .add("ws", "p1", "Roadmap", EntityKind::Project)
            .add("ws", "p2", "bad project", EntityKind::Project)
            .add("ws", "p3", "Launch", EntityKind::Project)
            .add("p2", "t1", "orphan", EntityKind::Task);

        let (entities, tree) = run(tree, None).await;
        assert_eq!(ids(&entities), vec!["ws", "p1", "p3"]);
        // A malformed item does not hold back its scope's cursor.
        assert!(tree.completed().contains(&("ws".to_string(), true)));
    }

    #[tokio::test]
    async fn test_malformed_child_item_keeps_scope_clean() {
        let tree = Tree::default()
            .add("", "ws", "Workspace", EntityKind::Workspace)
            .add("ws", "p1", "Roadmap", EntityKind::Project)
            .add("p1", "t1", "Write docs", EntityKind::Task)
            .add("p1", "t2", "bad task", EntityKind::Task)
            .add("p1", "t3", "Ship", EntityKind::Task);

        let (entities, tree) = run(tree, None).await;
        assert_eq!(ids(&entities), vec!["ws", "p1", "t1", "t3"]);
        assert_eq!(
            tree.completed(),
            vec![("p1".to_string(), true), ("ws".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_exclusion_applies_to_rebuilt_trail() {
        let archive = Breadcrumb::new("p2", "2024 Archive Projects", EntityKind::Project);
        let roadmap = Breadcrumb::new("p1", "Roadmap", EntityKind::Project);
        let ws = Breadcrumb::new("ws", "Workspace", EntityKind::Workspace);
        let tree = Tree::default()
            .add("", "ws", "Workspace", EntityKind::Workspace)
            .add("ws", "t9", "Old launch", EntityKind::Task)
            .add("ws", "t1", "Write docs", EntityKind::Task)
            .rehome("t9", vec![ws.clone(), archive])
            .rehome("t1", vec![ws, roadmap]);

        let (entities, tree) = run(tree, Some("Archive")).await;
        assert_eq!(ids(&entities), vec!["ws", "t1"]);
        assert!(tree.completed().contains(&("ws".to_string(), true)));
    }

    #[tokio::test]
    async fn test_leaves_fetched_after_entity_is_handed_out() {
        let tree = Arc::new(workspace());
        let mut stream = traverse(tree.clone(), TraversalOptions::default());

        let mut seen = Vec::new();
        while seen.last().map(String::as_str) != Some("t1") {
            let entity = stream.next().await.unwrap().unwrap();
            seen.push(entity.entity_id().to_string());
        }
        assert!(!tree.leaf_calls().contains(&"t1".to_string()));

        let comment = stream.next().await.unwrap().unwrap();
        assert_eq!(comment.entity_id(), "c1");
        assert!(tree.leaf_calls().contains(&"t1".to_string()));
    }

    #[tokio::test]
    async fn test_hidden_node_is_descended_without_emitting() {
        let tree = workspace().add("t1", "st1", "Proofread", EntityKind::Task).hide("t1");

        let (entities, tree) = run(tree, None).await;
        assert_eq!(ids(&entities), vec!["ws", "p1", "s1", "st1", "t2", "p2", "t3"]);
        let chain: Vec<&str> = entities[3].breadcrumbs().iter().map(|c| c.entity_id.as_str()).collect();
        assert_eq!(chain, vec!["ws", "p1", "s1", "t1"]);
        assert!(!tree.leaf_calls().contains(&"t1".to_string()));
    }

    #[tokio::test]
    async fn test_root_listing_error_propagates() {
        let tree = Tree::default()
            .add("", "ws", "Workspace", EntityKind::Workspace)
            .add("", "ws2", "Other", EntityKind::Workspace)
            .fail_children("", || Error::Authentication("revoked".to_string()));

        let results: Vec<Result<SyncEntity<()>>> =
            traverse(Arc::new(tree), TraversalOptions::default()).collect().await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Authentication(_))));
    }

    #[tokio::test]
    async fn test_fatal_error_ends_stream() {
        let tree = Tree::default()
            .add("", "ws", "Workspace", EntityKind::Workspace)
            .add("ws", "p1", "Roadmap", EntityKind::Project)
            .add("ws", "p2", "Launch", EntityKind::Project)
            .fail_children("ws", || Error::Config("bad cursor".to_string()));

        let results: Vec<Result<SyncEntity<()>>> =
            traverse(Arc::new(tree), TraversalOptions::default()).collect().await;

        assert!(matches!(results.last(), Some(Err(Error::Config(_)))));
        assert!(!results.iter().any(|r| matches!(r, Ok(e) if e.entity_id() == "p2")));
    }

    #[tokio::test]
    async fn test_full_traversal_is_idempotent() {
        let (first, _) = run(workspace(), None).await;
        let (second, _) = run(workspace(), None).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_early_drop_leaves_later_scopes_incomplete() {
        let tree = Arc::new(workspace());
        let mut stream = traverse(tree.clone(), TraversalOptions::default());
        for _ in 0..3 {
            stream.next().await.unwrap().unwrap();
        }
        drop(stream);

        assert!(tree.completed().is_empty());
    }
}
