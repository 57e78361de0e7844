//! Per-request module transformation pipeline.
//!
//! Handles: normalize → cache lookup → resolve → graph entry → load →
//! transform → cache store. Concurrent requests for one resolved id share a
//! single computation as long as the module was not invalidated in between.

use super::graph::{GraphError, ModuleId};
use super::plugin::{PluginContainer, PluginError, TransformResult};
use super::utils::normalize_url;
use crate::compiler::CompileError;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Output of one pipeline run; `None` means no plugin claimed the url.
pub type TransformOutcome = Result<Option<Arc<TransformResult>>, PipelineError>;

type InFlight = Shared<BoxFuture<'static, TransformOutcome>>;

/// Error from a pipeline run. Cloneable so every waiter of a shared
/// computation receives it.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Plugin(PluginError),

    #[error("{0}")]
    Compile(CompileError),

    #[error(transparent)]
    Graph(GraphError),

    #[error("transform task failed: {0}")]
    Join(String),
}

impl PipelineError {
    /// The structured compile error, for the browser overlay.
    #[must_use]
    pub fn compile_error(&self) -> Option<&CompileError> {
        match self {
            Self::Compile(error) => Some(error),
            Self::Plugin(error) => error.compile_error(),
            Self::Graph(GraphError::Resolve(error)) => error.compile_error(),
            _ => None,
        }
    }
}

impl From<PluginError> for PipelineError {
    fn from(error: PluginError) -> Self {
        match error {
            PluginError::Compile { error, .. } => Self::Compile(error),
            other => Self::Plugin(other),
        }
    }
}

impl From<GraphError> for PipelineError {
    fn from(error: GraphError) -> Self {
        Self::Graph(error)
    }
}

/// One running computation. `timestamp` is the module's `last_hmr_timestamp`
/// when it started; only requests that still see it may join.
struct InFlightEntry {
    generation: u64,
    timestamp: u64,
    future: InFlight,
}

type InFlightMap = Arc<Mutex<FxHashMap<String, InFlightEntry>>>;

/// Drives the plugin container for each request and caches results on the graph.
pub struct TransformPipeline {
    container: Arc<PluginContainer>,
    in_flight: InFlightMap,
    generation: AtomicU64,
}

impl TransformPipeline {
    pub fn new(container: Arc<PluginContainer>) -> Self {
        Self {
            container,
            in_flight: Arc::new(Mutex::new(FxHashMap::default())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn container(&self) -> &Arc<PluginContainer> {
        &self.container
    }

    /// Transform the module behind `url`.
    ///
    /// Repeated calls for a module that was not invalidated in between return
    /// the same `Arc`.
    pub async fn transform_request(&self, url: &str) -> TransformOutcome {
        let url = normalize_url(url);
        let graph = self.container.graph();

        if let Some(cached) = graph.cached_transform(&url) {
            debug!(url = %url, "transform cache hit");
            return Ok(Some(cached));
        }
        debug!(url = %url, "transform cache miss");

        let Some(resolved) = self.container.resolve_id(&url, None)? else {
            trace!(url = %url, "no plugin resolved url");
            return Ok(None);
        };
        let id = resolved.id;

        // The node exists before loading so an invalidation during the load
        // is visible as a timestamp change.
        let module = graph.ensure_entry_from_url(&url, self.container.as_ref())?;
        let timestamp = graph.last_hmr_timestamp(module);

        let future = {
            let mut in_flight = self.in_flight.lock();
            let joinable = in_flight
                .get(&id)
                .filter(|entry| entry.timestamp == timestamp)
                .map(|entry| entry.future.clone());
            match joinable {
                Some(future) => {
                    trace!(id = %id, "joining in-flight transform");
                    future
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let future = self.spawn_compute(id.clone(), module, timestamp, generation);
                    let entry = InFlightEntry {
                        generation,
                        timestamp,
                        future: future.clone(),
                    };
                    if in_flight.insert(id.clone(), entry).is_some() {
                        debug!(id = %id, "in-flight transform is stale, recomputing");
                    }
                    future
                }
            }
        };

        future.await
    }

    /// Runs on its own task so the computation finishes, and leaves the
    /// in-flight map, even when every waiter is dropped.
    fn spawn_compute(
        &self,
        id: String,
        module: ModuleId,
        timestamp: u64,
        generation: u64,
    ) -> InFlight {
        let container = Arc::clone(&self.container);
        let in_flight = Arc::clone(&self.in_flight);

        let handle = tokio::spawn(async move {
            let key = id.clone();
            let outcome =
                tokio::task::spawn_blocking(move || compute(&container, &id, module, timestamp))
                    .await
                    .unwrap_or_else(|e| Err(PipelineError::Join(e.to_string())));

            let mut in_flight = in_flight.lock();
            if in_flight.get(&key).is_some_and(|entry| entry.generation == generation) {
                in_flight.remove(&key);
            }
            outcome
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(PipelineError::Join(e.to_string())))
        }
        .boxed()
        .shared()
    }
}

/// Load and transform one resolved id. Runs on a blocking thread.
fn compute(
    container: &PluginContainer,
    id: &str,
    module: ModuleId,
    seen_timestamp: u64,
) -> TransformOutcome {
    let code = match container.load(id)? {
        Some(loaded) if !loaded.code.is_empty() => loaded.code,
        _ => {
            trace!(id, "nothing loaded");
            return Ok(None);
        }
    };

    let result = Arc::new(container.transform(&code, id)?);
    if !container.graph().set_transform_result(module, Arc::clone(&result), seen_timestamp) {
        debug!(id, "returning uncached result");
    }
    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::plugin::{HookResult, LoadResult, Plugin, PluginContext, ResolveIdResult};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        resolve: AtomicUsize,
        load: AtomicUsize,
        transform: AtomicUsize,
        version: AtomicUsize,
    }

    /// Resolves `/x.js` to `/project/x.js`; `/empty.js` loads as empty,
    /// `/broken.js` fails to compile, `/racy.js` is invalidated mid-transform,
    /// `/versioned.js` reads `counters.version` before the load delay.
    struct Fake {
        counters: Arc<Counters>,
        delay: Duration,
    }

    impl Plugin for Fake {
        fn name(&self) -> &str {
            "fake"
        }

        fn resolve_id(
            &self,
            spec: &str,
            _importer: Option<&str>,
            _ctx: &PluginContext<'_>,
        ) -> HookResult<Option<ResolveIdResult>> {
            self.counters.resolve.fetch_add(1, Ordering::SeqCst);
            if spec.starts_with("/missing") {
                return Ok(None);
            }
            Ok(Some(ResolveIdResult::new(format!("/project{spec}"))))
        }

        fn load(&self, id: &str, _ctx: &PluginContext<'_>) -> HookResult<Option<LoadResult>> {
            self.counters.load.fetch_add(1, Ordering::SeqCst);
            let version = self.counters.version.load(Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if id.ends_with("/versioned.js") {
                return Ok(Some(LoadResult::code(format!("version {version}"))));
            }
            if id.ends_with("/empty.js") {
                return Ok(Some(LoadResult::code("")));
            }
            Ok(Some(LoadResult::code(format!("// {id}"))))
        }

        fn transform(
            &self,
            code: &str,
            id: &str,
            ctx: &PluginContext<'_>,
        ) -> HookResult<Option<TransformResult>> {
            let n = self.counters.transform.fetch_add(1, Ordering::SeqCst);
            if id.ends_with("/broken.js") {
                let error = CompileError::new("Unexpected token")
                    .with_file(id)
                    .with_position(1, 4);
                return Err(PluginError::compile(self.name(), "transform", error));
            }
            if id.ends_with("/racy.js") {
                ctx.graph().invalidate_module(id);
            }
            Ok(Some(TransformResult::code(format!("{code}\n// pass {n}"))))
        }
    }

    fn pipeline(delay: Duration) -> (TransformPipeline, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let fake = Fake {
            counters: Arc::clone(&counters),
            delay,
        };
        let container =
            PluginContainer::new(PathBuf::from("/project")).with_plugins(vec![Box::new(fake)]);
        (TransformPipeline::new(Arc::new(container)), counters)
    }

    #[tokio::test]
    async fn test_cache_hit_returns_same_arc() {
        let (pipeline, counters) = pipeline(Duration::ZERO);

        let first = pipeline.transform_request("/src/a.js").await.unwrap().unwrap();
        let second = pipeline.transform_request("/src/a.js?t=123").await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let resolves = counters.resolve.load(Ordering::SeqCst);
        pipeline.transform_request("/src/a.js").await.unwrap();
        assert_eq!(counters.resolve.load(Ordering::SeqCst), resolves, "cache hit skips resolve");
        assert_eq!(counters.load.load(Ordering::SeqCst), 1);
        assert_eq!(counters.transform.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidation_forces_recompile() {
        let (pipeline, counters) = pipeline(Duration::ZERO);
        let first = pipeline.transform_request("/src/a.js").await.unwrap().unwrap();

        pipeline.container().graph().invalidate_file("/project/src/a.js");
        let second = pipeline.transform_request("/src/a.js").await.unwrap().unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(counters.transform.load(Ordering::SeqCst), 2);
        assert!(second.code.ends_with("// pass 1"));
    }

    #[tokio::test]
    async fn test_unresolved_url_is_none() {
        let (pipeline, counters) = pipeline(Duration::ZERO);
        assert!(pipeline.transform_request("/missing.js").await.unwrap().is_none());
        assert_eq!(counters.load.load(Ordering::SeqCst), 0);
        assert!(pipeline.container().graph().is_empty());
    }

    #[tokio::test]
    async fn test_empty_load_is_none() {
        let (pipeline, counters) = pipeline(Duration::ZERO);
        assert!(pipeline.transform_request("/empty.js").await.unwrap().is_none());
        assert_eq!(counters.transform.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compile_error_keeps_graph_entry() {
        let (pipeline, _) = pipeline(Duration::ZERO);
        let err = pipeline.transform_request("/broken.js").await.unwrap_err();

        let compile = err.compile_error().unwrap();
        assert_eq!(compile.message, "Unexpected token");
        assert_eq!(compile.line, Some(1));
        assert!(matches!(err, PipelineError::Compile(_)));

        let graph = pipeline.container().graph();
        assert!(graph.get_module_by_id("/project/broken.js").is_some());
        assert!(graph.cached_transform("/broken.js").is_none());
    }

    #[tokio::test]
    async fn test_result_across_invalidation_is_not_cached() {
        let (pipeline, counters) = pipeline(Duration::ZERO);

        let first = pipeline.transform_request("/racy.js").await.unwrap();
        assert!(first.is_some(), "result still returned to the caller");
        assert!(pipeline.container().graph().cached_transform("/racy.js").is_none());

        pipeline.transform_request("/racy.js").await.unwrap();
        assert_eq!(counters.transform.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_first_requests_share_one_computation() {
        let (pipeline, counters) = pipeline(Duration::from_millis(50));

        let (a, b, c) = tokio::join!(
            pipeline.transform_request("/src/shared.js"),
            pipeline.transform_request("/src/shared.js"),
            pipeline.transform_request("/src/shared.js?t=1"),
        );
        let (a, b, c) = (a.unwrap().unwrap(), b.unwrap().unwrap(), c.unwrap().unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(counters.load.load(Ordering::SeqCst), 1);
        assert_eq!(counters.transform.load(Ordering::SeqCst), 1);
        assert!(pipeline.in_flight.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_request_after_invalidation_does_not_join_older_load() {
        let (pipeline, counters) = pipeline(Duration::from_millis(100));
        let pipeline = Arc::new(pipeline);

        let early = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.transform_request("/versioned.js").await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        counters.version.store(1, Ordering::SeqCst);
        pipeline.container().graph().invalidate_file("/project/versioned.js");

        let fresh = pipeline.transform_request("/versioned.js?t=999").await.unwrap().unwrap();
        assert!(fresh.code.starts_with("version 1"), "got {}", fresh.code);

        let early = early.await.unwrap().unwrap().unwrap();
        assert!(early.code.starts_with("version 0"));

        let cached = pipeline.container().graph().cached_transform("/versioned.js").unwrap();
        assert!(Arc::ptr_eq(&cached, &fresh));
        assert!(pipeline.in_flight.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_request_clears_in_flight_entry() {
        let (pipeline, counters) = pipeline(Duration::from_millis(100));

        let dropped = tokio::time::timeout(
            Duration::from_millis(20),
            pipeline.transform_request("/versioned.js"),
        )
        .await;
        assert!(dropped.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(pipeline.in_flight.lock().is_empty());
        assert!(pipeline.container().graph().cached_transform("/versioned.js").is_some());

        counters.version.store(1, Ordering::SeqCst);
        pipeline.container().graph().invalidate_file("/project/versioned.js");
        let fresh = pipeline.transform_request("/versioned.js?t=5").await.unwrap().unwrap();
        assert!(fresh.code.starts_with("version 1"), "got {}", fresh.code);
    }
}
