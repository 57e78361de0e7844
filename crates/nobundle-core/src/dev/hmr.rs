//! HMR coordination.
//!
//! File-system events come in through [`HmrCoordinator::on_file_change`] and
//! [`HmrCoordinator::on_file_remove`]. The graph is always invalidated before
//! the payload is broadcast, so a request racing the notification either sees
//! the stale cache or recompiles.

use super::graph::{now_ms, ModuleGraph};
use super::utils::short_url;
use crate::compiler::CompileError;
use nobundle_util::path::to_slash;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Subprotocol the client and the HMR socket agree on.
pub const HMR_SUBPROTOCOL: &str = "nobundle-hmr";

/// Liveness message the client sends after the handshake.
pub const PING: &str = "ping";

const CHANNEL_CAPACITY: usize = 64;

/// Message pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrPayload {
    Connected,
    Update { updates: Vec<Update> },
    Error { err: CompileError },
    FullReload,
    Prune { paths: Vec<String> },
}

impl HmrPayload {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    JsUpdate,
    CssUpdate,
}

/// One entry of an `update` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub timestamp: u64,
    /// Root-relative url of the changed module.
    pub path: String,
    pub accepted_path: String,
}

/// Binds watch events to graph invalidation and the push channel.
pub struct HmrCoordinator {
    graph: Arc<ModuleGraph>,
    root: String,
    tx: broadcast::Sender<HmrPayload>,
}

impl HmrCoordinator {
    pub fn new(graph: Arc<ModuleGraph>, root: &Path) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            graph,
            root: to_slash(root),
            tx,
        }
    }

    pub fn root(&self) -> PathBuf {
        PathBuf::from(&self.root)
    }

    /// A receiver for every payload broadcast from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<HmrPayload> {
        self.tx.subscribe()
    }

    /// Handshake sent to a freshly connected client.
    #[must_use]
    pub fn connected(&self) -> HmrPayload {
        HmrPayload::Connected
    }

    /// Invalidate `file` and its importers, then notify clients.
    ///
    /// Files the graph has never seen produce no payload.
    pub fn on_file_change(&self, file: &Path) -> Option<HmrPayload> {
        let id = to_slash(file);
        let path = short_url(&id, &self.root);
        info!("[hmr] {path} changed");

        if id.ends_with(".html") {
            return Some(self.broadcast(HmrPayload::FullReload));
        }

        let invalidated = self.graph.invalidate_file(&id);
        if invalidated.is_empty() {
            debug!(file = %path, "not in the module graph, no update sent");
            return None;
        }
        debug!(file = %path, modules = ?invalidated, "invalidated");

        let timestamp = self
            .graph
            .get_module_by_id(&id)
            .map(|m| self.graph.last_hmr_timestamp(m))
            .filter(|ts| *ts > 0)
            .unwrap_or_else(now_ms);
        let kind = if id.ends_with(".css") {
            UpdateKind::CssUpdate
        } else {
            UpdateKind::JsUpdate
        };

        Some(self.broadcast(HmrPayload::Update {
            updates: vec![Update {
                kind,
                timestamp,
                accepted_path: path.clone(),
                path,
            }],
        }))
    }

    /// Invalidate a deleted file and ask clients to run its prune callbacks.
    pub fn on_file_remove(&self, file: &Path) -> HmrPayload {
        let id = to_slash(file);
        let path = short_url(&id, &self.root);
        info!("[hmr] {path} removed");
        self.graph.invalidate_file(&id);
        self.broadcast(HmrPayload::Prune { paths: vec![path] })
    }

    /// Push a compile failure to the client overlay.
    pub fn report_error(&self, error: &CompileError) -> HmrPayload {
        let mut err = error.clone();
        if let Some(file) = err.file.as_deref() {
            err.file = Some(short_url(file, &self.root));
        }
        self.broadcast(HmrPayload::Error { err })
    }

    fn broadcast(&self, payload: HmrPayload) -> HmrPayload {
        // Fails only when nobody is listening.
        let receivers = self.tx.send(payload.clone()).unwrap_or(0);
        debug!(receivers, "hmr payload sent");
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::graph::ResolveUrl;
    use crate::dev::plugin::{PluginError, TransformResult};

    struct RootResolver;

    impl ResolveUrl for RootResolver {
        fn resolve_url(&self, url: &str) -> Result<Option<String>, PluginError> {
            Ok(Some(format!("/project{url}")))
        }
    }

    /// main.tsx → App.tsx → utils.ts, all compiled.
    fn scenario_graph() -> Arc<ModuleGraph> {
        let graph = Arc::new(ModuleGraph::new());
        let main = graph.ensure_entry_from_url("/src/main.tsx", &RootResolver).unwrap();
        let app = graph.ensure_entry_from_url("/src/App.tsx", &RootResolver).unwrap();
        let utils = graph.ensure_entry_from_url("/src/utils.ts", &RootResolver).unwrap();
        graph.update_module_info(main, ["/src/App.tsx"], &RootResolver).unwrap();
        graph.update_module_info(app, ["/src/utils.ts"], &RootResolver).unwrap();
        for m in [main, app, utils] {
            graph.set_transform_result(m, Arc::new(TransformResult::code("//")), 0);
        }
        graph
    }

    #[tokio::test]
    async fn test_change_invalidates_chain_and_broadcasts() {
        let graph = scenario_graph();
        let hmr = HmrCoordinator::new(graph.clone(), Path::new("/project"));
        let mut rx = hmr.subscribe();

        hmr.on_file_change(Path::new("/project/src/utils.ts"));

        for url in ["/src/main.tsx", "/src/App.tsx", "/src/utils.ts"] {
            assert!(graph.cached_transform(url).is_none(), "{url} still cached");
        }

        let utils = graph.get_module_by_id("/project/src/utils.ts").unwrap();
        match rx.recv().await.unwrap() {
            HmrPayload::Update { updates } => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].kind, UpdateKind::JsUpdate);
                assert_eq!(updates[0].path, "/src/utils.ts");
                assert_eq!(updates[0].accepted_path, "/src/utils.ts");
                assert_eq!(updates[0].timestamp, graph.last_hmr_timestamp(utils));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_css_change_is_css_update() {
        let graph = Arc::new(ModuleGraph::new());
        graph.ensure_entry_from_url("/src/index.css", &RootResolver).unwrap();
        let hmr = HmrCoordinator::new(graph, Path::new("/project"));
        match hmr.on_file_change(Path::new("/project/src/index.css")) {
            Some(HmrPayload::Update { updates }) => {
                assert_eq!(updates[0].kind, UpdateKind::CssUpdate);
                assert_eq!(updates[0].path, "/src/index.css");
                assert!(updates[0].timestamp > 0);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_change_outside_graph_sends_nothing() {
        let graph = scenario_graph();
        let hmr = HmrCoordinator::new(graph.clone(), Path::new("/project"));
        let mut rx = hmr.subscribe();

        for file in [
            "/project/README.md",
            "/project/package.json",
            "/project/nobundle.config.json",
        ] {
            assert_eq!(hmr.on_file_change(Path::new(file)), None);
        }
        assert!(rx.try_recv().is_err());
        assert!(graph.cached_transform("/src/main.tsx").is_some());
    }

    #[test]
    fn test_html_change_full_reload() {
        let hmr = HmrCoordinator::new(Arc::new(ModuleGraph::new()), Path::new("/project"));
        assert_eq!(
            hmr.on_file_change(Path::new("/project/index.html")),
            Some(HmrPayload::FullReload)
        );
    }

    #[test]
    fn test_remove_prunes() {
        let graph = scenario_graph();
        let hmr = HmrCoordinator::new(graph.clone(), Path::new("/project"));
        let payload = hmr.on_file_remove(Path::new("/project/src/utils.ts"));
        assert_eq!(
            payload,
            HmrPayload::Prune {
                paths: vec!["/src/utils.ts".to_string()]
            }
        );
        assert!(graph.cached_transform("/src/App.tsx").is_none());
    }

    #[test]
    fn test_report_error_uses_root_relative_file() {
        let hmr = HmrCoordinator::new(Arc::new(ModuleGraph::new()), Path::new("/project"));
        let err = CompileError::new("Unexpected token")
            .with_file("/project/src/App.tsx")
            .with_position(3, 7);
        let json = hmr.report_error(&err).to_json().unwrap();
        assert_eq!(
            json,
            concat!(
                r#"{"type":"error","err":{"message":"Unexpected token","#,
                r#""file":"/src/App.tsx","line":3,"column":7}}"#
            )
        );
    }

    #[test]
    fn test_payload_json() {
        assert_eq!(HmrPayload::Connected.to_json().unwrap(), r#"{"type":"connected"}"#);
        assert_eq!(HmrPayload::FullReload.to_json().unwrap(), r#"{"type":"full-reload"}"#);

        let update = HmrPayload::Update {
            updates: vec![Update {
                kind: UpdateKind::JsUpdate,
                timestamp: 42,
                path: "/src/App.tsx".into(),
                accepted_path: "/src/App.tsx".into(),
            }],
        };
        assert_eq!(
            update.to_json().unwrap(),
            concat!(
                r#"{"type":"update","updates":[{"type":"js-update","timestamp":42,"#,
                r#""path":"/src/App.tsx","acceptedPath":"/src/App.tsx"}]}"#
            )
        );
    }
}
