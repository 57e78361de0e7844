//! Module graph.
//!
//! Nodes live in an arena and are addressed by [`ModuleId`]. Two maps index
//! the arena: request url → node and resolved id → node. Several urls may
//! alias one node (`/src/logo.svg` and `/src/logo.svg?import` both resolve to
//! the same file), but an id always maps to exactly one node.
//!
//! Edges are stored on both ends. `imported_modules` and `importers` are only
//! ever changed together, under one write lock.

use super::plugin::{PluginError, TransformResult};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Resolves a request url to a module id. Implemented by the plugin container.
pub trait ResolveUrl {
    fn resolve_url(&self, url: &str) -> Result<Option<String>, PluginError>;
}

#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error(transparent)]
    Resolve(#[from] PluginError),

    #[error("module {0:?} is not in the graph")]
    UnknownModule(ModuleId),
}

/// Handle to a node in a [`ModuleGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

/// One module of the dev session.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    /// First url this module was requested under.
    pub url: String,
    /// Resolved id (the url itself when nothing resolved it).
    pub id: String,
    /// Modules that import this one.
    pub importers: FxHashSet<ModuleId>,
    /// Modules this one imports.
    pub imported_modules: FxHashSet<ModuleId>,
    pub transform_result: Option<Arc<TransformResult>>,
    /// Bumped on every invalidation; 0 until first invalidated.
    pub last_hmr_timestamp: u64,
}

#[derive(Default)]
struct GraphInner {
    nodes: Vec<ModuleNode>,
    url_to_module: FxHashMap<String, ModuleId>,
    id_to_module: FxHashMap<String, ModuleId>,
}

impl GraphInner {
    fn node_mut(&mut self, module: ModuleId) -> Result<&mut ModuleNode, GraphError> {
        self.nodes.get_mut(module.0).ok_or(GraphError::UnknownModule(module))
    }
}

/// The live dependency graph of the dev session.
#[derive(Default)]
pub struct ModuleGraph {
    inner: RwLock<GraphInner>,
    last_timestamp: AtomicU64,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct modules.
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct lookup by resolved id.
    pub fn get_module_by_id(&self, id: &str) -> Option<ModuleId> {
        self.inner.read().id_to_module.get(id).copied()
    }

    /// Lookup by url; an unknown url is resolved and looked up by its id.
    pub fn get_module_by_url(
        &self,
        url: &str,
        resolver: &dyn ResolveUrl,
    ) -> Result<Option<ModuleId>, GraphError> {
        if let Some(module) = self.inner.read().url_to_module.get(url).copied() {
            return Ok(Some(module));
        }
        let Some(id) = resolver.resolve_url(url)? else {
            return Ok(None);
        };
        Ok(self.get_module_by_id(&id))
    }

    /// Snapshot of a node.
    pub fn module(&self, module: ModuleId) -> Option<ModuleNode> {
        self.inner.read().nodes.get(module.0).cloned()
    }

    pub fn last_hmr_timestamp(&self, module: ModuleId) -> u64 {
        self.inner
            .read()
            .nodes
            .get(module.0)
            .map_or(0, |n| n.last_hmr_timestamp)
    }

    /// Cached transform output for `url`, if the module is known and valid.
    pub fn cached_transform(&self, url: &str) -> Option<Arc<TransformResult>> {
        let inner = self.inner.read();
        let module = inner.url_to_module.get(url)?;
        inner.nodes[module.0].transform_result.clone()
    }

    /// Return the node for `url`, creating it (under both maps) on first sight.
    ///
    /// A new url whose id already has a node becomes an alias of that node.
    pub fn ensure_entry_from_url(
        &self,
        url: &str,
        resolver: &dyn ResolveUrl,
    ) -> Result<ModuleId, GraphError> {
        if let Some(module) = self.inner.read().url_to_module.get(url).copied() {
            return Ok(module);
        }

        // Resolve outside the lock; resolvers may consult the graph.
        let id = resolver.resolve_url(url)?.unwrap_or_else(|| url.to_string());

        let mut inner = self.inner.write();
        if let Some(module) = inner.url_to_module.get(url).copied() {
            return Ok(module);
        }
        if let Some(module) = inner.id_to_module.get(&id).copied() {
            trace!(url, id = %id, "url aliases existing module");
            inner.url_to_module.insert(url.to_string(), module);
            return Ok(module);
        }

        let module = ModuleId(inner.nodes.len());
        inner.nodes.push(ModuleNode {
            url: url.to_string(),
            id: id.clone(),
            importers: FxHashSet::default(),
            imported_modules: FxHashSet::default(),
            transform_result: None,
            last_hmr_timestamp: 0,
        });
        inner.url_to_module.insert(url.to_string(), module);
        inner.id_to_module.insert(id, module);
        Ok(module)
    }

    /// Replace `module`'s import set with `imported_urls`, rewiring back-edges.
    pub fn update_module_info<I, S>(
        &self,
        module: ModuleId,
        imported_urls: I,
        resolver: &dyn ResolveUrl,
    ) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = FxHashSet::default();
        for url in imported_urls {
            next.insert(self.ensure_entry_from_url(url.as_ref(), resolver)?);
        }

        let mut inner = self.inner.write();
        let previous = std::mem::take(&mut inner.node_mut(module)?.imported_modules);
        for stale in previous.difference(&next) {
            inner.node_mut(*stale)?.importers.remove(&module);
        }
        for dep in &next {
            inner.node_mut(*dep)?.importers.insert(module);
        }
        inner.node_mut(module)?.imported_modules = next;
        Ok(())
    }

    /// Store `result` unless the module was invalidated after `seen_timestamp`.
    ///
    /// Returns whether the result was stored.
    pub fn set_transform_result(
        &self,
        module: ModuleId,
        result: Arc<TransformResult>,
        seen_timestamp: u64,
    ) -> bool {
        let mut inner = self.inner.write();
        let Some(node) = inner.nodes.get_mut(module.0) else {
            return false;
        };
        if node.last_hmr_timestamp != seen_timestamp {
            debug!(url = %node.url, "module invalidated during transform, not caching");
            return false;
        }
        node.transform_result = Some(result);
        true
    }

    /// Invalidate the module with `id` and, transitively, every importer.
    ///
    /// Each node is visited once per call, so cycles and diamonds terminate.
    /// Returns the urls of the invalidated modules.
    pub fn invalidate_module(&self, id: &str) -> Vec<String> {
        let start: Vec<ModuleId> = self.get_module_by_id(id).into_iter().collect();
        self.invalidate_from(start)
    }

    /// Invalidate every module whose id is `file` or `file?<query>`.
    pub fn invalidate_file(&self, file: &str) -> Vec<String> {
        let prefix = format!("{file}?");
        let start: Vec<ModuleId> = {
            let inner = self.inner.read();
            inner
                .id_to_module
                .iter()
                .filter(|(id, _)| id.as_str() == file || id.starts_with(&prefix))
                .map(|(_, module)| *module)
                .collect()
        };
        self.invalidate_from(start)
    }

    fn invalidate_from(&self, start: Vec<ModuleId>) -> Vec<String> {
        if start.is_empty() {
            return Vec::new();
        }
        let timestamp = self.next_timestamp();
        let mut inner = self.inner.write();
        let mut visited: FxHashSet<ModuleId> = FxHashSet::default();
        let mut queue = start;
        let mut invalidated = Vec::new();

        while let Some(module) = queue.pop() {
            if !visited.insert(module) {
                continue;
            }
            let Some(node) = inner.nodes.get_mut(module.0) else {
                continue;
            };
            node.transform_result = None;
            node.last_hmr_timestamp = timestamp;
            invalidated.push(node.url.clone());
            queue.extend(node.importers.iter().filter(|m| !visited.contains(m)));
        }

        debug!(count = invalidated.len(), "invalidated modules");
        invalidated
    }

    /// Wall-clock milliseconds, forced strictly increasing.
    fn next_timestamp(&self) -> u64 {
        let now = now_ms();
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        now.max(previous + 1)
    }
}

/// Milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Maps `/x` to `/project/x`, keeping queries.
    struct RootResolver;

    impl ResolveUrl for RootResolver {
        fn resolve_url(&self, url: &str) -> Result<Option<String>, PluginError> {
            let path = url.split('?').next().unwrap_or(url);
            if path.starts_with("/missing") {
                return Ok(None);
            }
            let clean = url.strip_suffix("?import").unwrap_or(url);
            Ok(Some(format!("/project{clean}")))
        }
    }

    fn entry(graph: &ModuleGraph, url: &str) -> ModuleId {
        graph.ensure_entry_from_url(url, &RootResolver).unwrap()
    }

    fn importers(graph: &ModuleGraph, module: ModuleId) -> FxHashSet<ModuleId> {
        graph.module(module).unwrap().importers
    }

    #[test]
    fn test_dual_maps_point_at_same_node() {
        let graph = ModuleGraph::new();
        let a = entry(&graph, "/src/main.ts");

        assert_eq!(graph.get_module_by_id("/project/src/main.ts"), Some(a));
        assert_eq!(graph.get_module_by_url("/src/main.ts", &RootResolver).unwrap(), Some(a));
        assert_eq!(entry(&graph, "/src/main.ts"), a);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_unresolved_url_falls_back_to_url_as_id() {
        let graph = ModuleGraph::new();
        let m = entry(&graph, "/missing.js");
        assert_eq!(graph.module(m).unwrap().id, "/missing.js");
        assert_eq!(graph.get_module_by_id("/missing.js"), Some(m));
    }

    #[test]
    fn test_url_alias_reuses_node() {
        let graph = ModuleGraph::new();
        let plain = entry(&graph, "/src/logo.svg");
        let marked = entry(&graph, "/src/logo.svg?import");

        assert_eq!(plain, marked);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.module(plain).unwrap().url, "/src/logo.svg");
    }

    #[test]
    fn test_get_module_by_url_resolves_unknown_url() {
        let graph = ModuleGraph::new();
        let m = entry(&graph, "/src/logo.svg");
        assert_eq!(
            graph.get_module_by_url("/src/logo.svg?import", &RootResolver).unwrap(),
            Some(m)
        );
        assert_eq!(graph.get_module_by_url("/missing/x.ts", &RootResolver).unwrap(), None);
    }

    #[test]
    fn test_edge_reconciliation() {
        let graph = ModuleGraph::new();
        let a = entry(&graph, "/a.ts");

        graph.update_module_info(a, ["/b.ts", "/c.ts"], &RootResolver).unwrap();
        let b = graph.get_module_by_id("/project/b.ts").unwrap();
        let c = graph.get_module_by_id("/project/c.ts").unwrap();
        assert!(importers(&graph, b).contains(&a));
        assert!(importers(&graph, c).contains(&a));

        graph.update_module_info(a, ["/c.ts", "/d.ts"], &RootResolver).unwrap();
        let d = graph.get_module_by_id("/project/d.ts").unwrap();

        assert!(!importers(&graph, b).contains(&a), "A removed from B's importers");
        assert!(importers(&graph, c).contains(&a), "A still imports C");
        assert!(importers(&graph, d).contains(&a), "A newly imports D");

        let imported = graph.module(a).unwrap().imported_modules;
        assert_eq!(imported.len(), 2);
        assert!(imported.contains(&c) && imported.contains(&d));
    }

    #[test]
    fn test_edges_are_symmetric() {
        let graph = ModuleGraph::new();
        let a = entry(&graph, "/a.ts");
        let b = entry(&graph, "/b.ts");
        graph.update_module_info(a, ["/b.ts", "/c.ts"], &RootResolver).unwrap();
        graph.update_module_info(b, ["/c.ts"], &RootResolver).unwrap();

        for m in [a, b, graph.get_module_by_id("/project/c.ts").unwrap()] {
            let node = graph.module(m).unwrap();
            for dep in &node.imported_modules {
                assert!(importers(&graph, *dep).contains(&m));
            }
            for importer in &node.importers {
                assert!(graph.module(*importer).unwrap().imported_modules.contains(&m));
            }
        }
    }

    fn cache(graph: &ModuleGraph, module: ModuleId) {
        let ts = graph.last_hmr_timestamp(module);
        assert!(graph.set_transform_result(module, Arc::new(TransformResult::code("x")), ts));
    }

    #[test]
    fn test_invalidation_walks_importer_chain() {
        let graph = ModuleGraph::new();
        let main = entry(&graph, "/src/main.tsx");
        graph.update_module_info(main, ["/src/App.tsx"], &RootResolver).unwrap();
        let app = graph.get_module_by_id("/project/src/App.tsx").unwrap();
        let other = entry(&graph, "/src/other.ts");
        for m in [main, app, other] {
            cache(&graph, m);
        }

        let mut urls = graph.invalidate_module("/project/src/App.tsx");
        urls.sort();
        assert_eq!(urls, vec!["/src/App.tsx", "/src/main.tsx"]);

        assert!(graph.cached_transform("/src/App.tsx").is_none());
        assert!(graph.cached_transform("/src/main.tsx").is_none());
        assert!(
            graph.cached_transform("/src/other.ts").is_some(),
            "unrelated module keeps its cache"
        );
        assert!(graph.last_hmr_timestamp(app) > 0);
        assert_eq!(graph.last_hmr_timestamp(app), graph.last_hmr_timestamp(main));
    }

    #[test]
    fn test_invalidation_terminates_on_cycle() {
        let graph = ModuleGraph::new();
        let a = entry(&graph, "/a.ts");
        let b = entry(&graph, "/b.ts");
        graph.update_module_info(a, ["/b.ts"], &RootResolver).unwrap();
        graph.update_module_info(b, ["/a.ts"], &RootResolver).unwrap();
        cache(&graph, a);
        cache(&graph, b);

        let urls = graph.invalidate_module("/project/a.ts");
        assert_eq!(urls.len(), 2);
        assert!(graph.cached_transform("/a.ts").is_none());
        assert!(graph.cached_transform("/b.ts").is_none());
    }

    #[test]
    fn test_invalidation_visits_diamond_once() {
        // top -> left -> bottom, top -> right -> bottom
        let graph = ModuleGraph::new();
        let top = entry(&graph, "/top.ts");
        let left = entry(&graph, "/left.ts");
        let right = entry(&graph, "/right.ts");
        graph.update_module_info(top, ["/left.ts", "/right.ts"], &RootResolver).unwrap();
        graph.update_module_info(left, ["/bottom.ts"], &RootResolver).unwrap();
        graph.update_module_info(right, ["/bottom.ts"], &RootResolver).unwrap();

        let urls = graph.invalidate_module("/project/bottom.ts");
        assert_eq!(urls.len(), 4, "each node exactly once: {urls:?}");
        assert_eq!(urls.iter().filter(|u| *u == "/top.ts").count(), 1);
    }

    #[test]
    fn test_timestamps_increase_across_passes() {
        let graph = ModuleGraph::new();
        let a = entry(&graph, "/a.ts");
        graph.invalidate_module("/project/a.ts");
        let first = graph.last_hmr_timestamp(a);
        graph.invalidate_module("/project/a.ts");
        assert!(graph.last_hmr_timestamp(a) > first);
    }

    #[test]
    fn test_invalidate_file_includes_query_ids() {
        let graph = ModuleGraph::new();
        let sfc = entry(&graph, "/src/App.vue");
        let style = entry(&graph, "/src/App.vue?vue&type=style&index=0&lang.css");
        let unrelated = entry(&graph, "/src/App.vue.bak");
        for m in [sfc, style, unrelated] {
            cache(&graph, m);
        }

        let urls = graph.invalidate_file("/project/src/App.vue");
        assert_eq!(urls.len(), 2);
        assert!(graph.cached_transform("/src/App.vue.bak").is_some());
    }

    #[test]
    fn test_stale_result_not_cached_after_invalidation() {
        let graph = ModuleGraph::new();
        let a = entry(&graph, "/a.ts");
        let seen = graph.last_hmr_timestamp(a);
        graph.invalidate_module("/project/a.ts");

        assert!(!graph.set_transform_result(a, Arc::new(TransformResult::code("old")), seen));
        assert!(graph.cached_transform("/a.ts").is_none());
    }

    #[test]
    fn test_invalidate_unknown_id_is_noop() {
        let graph = ModuleGraph::new();
        assert!(graph.invalidate_module("/nope.ts").is_empty());
        assert!(graph.is_empty());
    }
}
