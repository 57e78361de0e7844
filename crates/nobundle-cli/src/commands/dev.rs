//! `nobundle` dev server.
//!
//! Source files are served one module at a time:
//!
//! ```text
//! GET /src/App.tsx
//!   → transform middleware (TransformPipeline: resolve → load → transform)
//!   → "/" entry HTML through every transformIndexHtml hook
//!   → ServeDir(root) → ServeDir(root/public)
//! ```
//!
//! Bare imports are pre-bundled once at startup into `node_modules/.nobundle`.
//! HMR payloads go out over a separate WebSocket port.

use super::watch;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use miette::{IntoDiagnostic, Result};
use nobundle_core::dev::hmr::PING;
use nobundle_core::dev::utils::{
    clean_url, is_css_request, is_import_request, is_internal_request, is_js_request, is_vue,
    short_url,
};
use nobundle_core::dev::{
    resolve_plugins, DepCache, EsbuildBundler, HmrCoordinator, HmrPayload, PipelineError,
    PluginContainer, PluginError, PreBundleError, PreBundler, TransformPipeline, HMR_SUBPROTOCOL,
};
use nobundle_core::{DevConfig, Framework};
use nobundle_util::path::to_slash;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, trace, warn};

/// Dev server action. `None` fields fall back to `nobundle.config.json`.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub root: PathBuf,
    pub port: Option<u16>,
    pub hmr_port: Option<u16>,
    pub host: Option<String>,
    pub framework: Option<Framework>,
    pub open: bool,
}

impl DevAction {
    fn config(&self, root: &Path) -> Result<DevConfig> {
        let mut config = DevConfig::load(root).into_diagnostic()?;
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(port) = self.hmr_port {
            config = config.with_hmr_port(port);
        }
        if let Some(host) = &self.host {
            config = config.with_host(host.clone());
        }
        if let Some(framework) = self.framework {
            config = config.with_framework(framework);
        }
        if self.open {
            config = config.with_open(true);
        }
        Ok(config)
    }
}

/// Run the dev server until the process is stopped.
pub async fn run(action: DevAction) -> Result<()> {
    let root = action.root.canonicalize().into_diagnostic()?;
    let config = action.config(&root)?;

    let deps = prebundle(&config).await;
    let state = DevState::new(config.clone(), deps).into_diagnostic()?;

    tokio::spawn(serve_hmr(Arc::clone(&state.hmr), config.host.clone(), config.hmr_port));
    // Dropping the watcher stops it.
    let _watcher = watch::spawn(&root, Arc::clone(&state.hmr)).into_diagnostic()?;

    let addr: SocketAddr = format!("{}:{}", bind_host(&config.host), config.port)
        .parse()
        .into_diagnostic()?;
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;

    let url = format!("http://{}:{}", config.host, config.port);
    info!(framework = %config.framework, "dev server running at {url}");
    if config.open {
        if let Err(e) = open_browser(&url) {
            warn!(error = %e, "could not open browser");
        }
    }

    axum::serve(listener, router(state)).await.into_diagnostic()?;
    Ok(())
}

/// Scan the entry and pre-bundle its bare imports. Failures leave the cache empty.
async fn prebundle(config: &DevConfig) -> DepCache {
    let root = config.root.clone();
    let entry = config.entry_path();
    let react = config.framework == Framework::React;

    let result = tokio::task::spawn_blocking(move || -> Result<DepCache, PreBundleError> {
        let bundler = EsbuildBundler::locate(&root)?;
        PreBundler::new(root, bundler).with_react(react).run(&entry)
    })
    .await;

    match result {
        Ok(Ok(deps)) => deps,
        Ok(Err(err)) => {
            warn!(error = %err, "dependency pre-bundling skipped");
            DepCache::new()
        }
        Err(err) => {
            warn!(error = %err, "dependency pre-bundling task failed");
            DepCache::new()
        }
    }
}

/// Shared server state.
#[derive(Clone)]
pub(crate) struct DevState {
    pipeline: Arc<TransformPipeline>,
    hmr: Arc<HmrCoordinator>,
    config: Arc<DevConfig>,
}

impl DevState {
    pub(crate) fn new(config: DevConfig, deps: DepCache) -> Result<Self, PluginError> {
        let container = PluginContainer::new(config.root.clone())
            .with_plugins(resolve_plugins(&config, Arc::new(deps)));
        container.configure_server(&config)?;
        let container = Arc::new(container);
        let hmr = Arc::new(HmrCoordinator::new(Arc::clone(container.graph()), &config.root));
        Ok(Self {
            pipeline: Arc::new(TransformPipeline::new(container)),
            hmr,
            config: Arc::new(config),
        })
    }

    /// `None` means the request is not a module and falls through.
    async fn transform(&self, url: &str) -> Option<Response> {
        match self.pipeline.transform_request(url).await {
            Ok(Some(result)) => Some(js_response(StatusCode::OK, result.code.clone())),
            // Import-marker and internal requests never reach static serving.
            Ok(None) if is_import_request(url) || is_internal_request(url) => {
                Some(js_response(StatusCode::NOT_FOUND, format!("// not found: {url}\n")))
            }
            Ok(None) => None,
            Err(err) => {
                self.report(url, &err);
                Some(js_response(StatusCode::INTERNAL_SERVER_ERROR, error_module(&err)))
            }
        }
    }

    fn report(&self, url: &str, err: &PipelineError) {
        if is_missing_importer(err) {
            error!(url = %url, error = %err, "transform failed");
            return;
        }
        warn!(url = %url, error = %err, "transform failed");
        if let Some(compile_error) = err.compile_error() {
            self.hmr.report_error(compile_error);
        }
    }
}

pub(crate) fn router(state: DevState) -> Router {
    let static_files =
        ServeDir::new(&state.config.root).fallback(ServeDir::new(state.config.public_path()));

    Router::new()
        .route("/", get(serve_index))
        .fallback_service(static_files)
        .layer(middleware::from_fn_with_state(state.clone(), transform_middleware))
        .with_state(state)
}

/// Urls offered to the transform pipeline before anything else.
fn wants_transform(url: &str) -> bool {
    let path = clean_url(url);
    is_js_request(path)
        || is_css_request(path)
        || is_vue(path)
        || is_internal_request(url)
        || is_import_request(url)
}

async fn transform_middleware(State(state): State<DevState>, req: Request, next: Next) -> Response {
    let url = req
        .uri()
        .path_and_query()
        .map_or_else(|| req.uri().path().to_string(), |pq| pq.as_str().to_string());

    let handled = if req.method() == Method::GET && wants_transform(&url) {
        state.transform(&url).await
    } else {
        None
    };

    let mut response = match handled {
        Some(response) => response,
        None => next.run(req).await,
    };
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

async fn serve_index(State(state): State<DevState>) -> Response {
    let path = state.config.root.join("index.html");
    let html = match tokio::fs::read_to_string(&path).await {
        Ok(html) => html,
        Err(_) => {
            let entry = short_url(
                &to_slash(&state.config.entry_path()),
                &to_slash(&state.config.root),
            );
            fallback_index_html(&entry)
        }
    };

    match state.pipeline.container().transform_index_html(&html) {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            warn!(error = %err, "transformIndexHtml failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

fn js_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "application/javascript")], body).into_response()
}

/// Module body that rethrows a pipeline failure in the browser.
fn error_module(err: &PipelineError) -> String {
    let message = serde_json::to_string(&err.to_string())
        .unwrap_or_else(|_| "\"transform failed\"".to_string());
    format!("throw new Error({message});\n")
}

fn is_missing_importer(err: &PipelineError) -> bool {
    use nobundle_core::dev::GraphError;
    matches!(
        err,
        PipelineError::Plugin(PluginError::MissingImporter { .. })
            | PipelineError::Graph(GraphError::Resolve(PluginError::MissingImporter { .. }))
    )
}

fn bind_host(host: &str) -> &str {
    if host == "localhost" {
        "127.0.0.1"
    } else {
        host
    }
}

// ============================================================================
// WebSocket HMR
// ============================================================================

/// Serve the HMR socket on its own port. Address-in-use is tolerated.
pub(crate) async fn serve_hmr(hmr: Arc<HmrCoordinator>, host: String, port: u16) {
    let addr = format!("{}:{port}", bind_host(&host));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            debug!(addr = %addr, "hmr port already in use");
            return;
        }
        Err(e) => {
            error!(addr = %addr, error = %e, "hmr server failed to bind");
            return;
        }
    };

    let app = Router::new().route("/", get(hmr_websocket)).with_state(hmr);
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "hmr server stopped");
    }
}

async fn hmr_websocket(ws: WebSocketUpgrade, State(hmr): State<Arc<HmrCoordinator>>) -> Response {
    ws.protocols([HMR_SUBPROTOCOL])
        .on_upgrade(move |socket| handle_hmr_socket(socket, hmr))
}

async fn handle_hmr_socket(mut socket: WebSocket, hmr: Arc<HmrCoordinator>) {
    let mut rx = hmr.subscribe();
    if send_payload(&mut socket, &hmr.connected()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            payload = rx.recv() => match payload {
                Ok(payload) => {
                    if send_payload(&mut socket, &payload).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "hmr client lagged"),
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) if text == PING => trace!("hmr ping"),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "hmr socket error");
                    break;
                }
            },
        }
    }
}

async fn send_payload(socket: &mut WebSocket, payload: &HmrPayload) -> Result<(), axum::Error> {
    match payload.to_json() {
        Ok(json) => socket.send(Message::Text(json)).await,
        Err(e) => {
            error!(error = %e, "could not encode hmr payload");
            Ok(())
        }
    }
}

// ============================================================================
// Utilities
// ============================================================================

/// Entry HTML used when the project has no index.html.
fn fallback_index_html(entry_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>nobundle</title>
</head>
<body>
  <div id="root"></div>
  <div id="app"></div>
  <script type="module" src="{entry_url}"></script>
</body>
</html>"#
    )
}

/// Open a URL in the default browser.
fn open_browser(url: &str) -> io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd").args(["/C", "start", url]).spawn()?;
    }
    Ok(())
}
