//! Plugin container.
//!
//! Plugins are capability bags: every hook has a no-op default, so a plugin
//! implements only what it needs. The container walks its plugins in
//! registration order, which is fixed for the session:
//!
//! - `resolve_id` and `load` stop at the first plugin that returns `Some`.
//! - `transform` and `transform_index_html` chain: each plugin sees the
//!   previous plugin's output, and a plugin returning `None` passes it through.
//!
//! ## Example
//!
//! ```ignore
//! use nobundle_core::dev::{HookResult, Plugin, PluginContext, TransformResult};
//!
//! struct Banner;
//!
//! impl Plugin for Banner {
//!     fn name(&self) -> &str { "banner" }
//!
//!     fn transform(
//!         &self,
//!         code: &str,
//!         _id: &str,
//!         _ctx: &PluginContext<'_>,
//!     ) -> HookResult<Option<TransformResult>> {
//!         Ok(Some(TransformResult::code(format!("/* dev */\n{code}"))))
//!     }
//! }
//! ```

use super::graph::{ModuleGraph, ResolveUrl};
use crate::compiler::CompileError;
use crate::config::DevConfig;
use nobundle_util::path::slash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

/// Error raised by a plugin hook.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error("[{plugin}] {hook}: {message}")]
    Hook {
        plugin: String,
        hook: &'static str,
        message: String,
    },

    #[error("[{plugin}] {hook}: {error}")]
    Compile {
        plugin: String,
        hook: &'static str,
        error: CompileError,
    },

    /// A relative specifier reached resolution without an importing module.
    #[error("cannot resolve relative import '{specifier}' without an importer")]
    MissingImporter { specifier: String },
}

impl PluginError {
    #[must_use]
    pub fn hook(plugin: &str, hook: &'static str, message: impl Into<String>) -> Self {
        Self::Hook {
            plugin: plugin.to_string(),
            hook,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn compile(plugin: &str, hook: &'static str, error: CompileError) -> Self {
        Self::Compile {
            plugin: plugin.to_string(),
            hook,
            error,
        }
    }

    /// The structured compile error, if this is one.
    #[must_use]
    pub fn compile_error(&self) -> Option<&CompileError> {
        match self {
            Self::Compile { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Result of the `resolve_id` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveIdResult {
    /// Resolved module id: an absolute path, optionally with a query.
    pub id: String,
}

impl ResolveIdResult {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Result of the `load` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub code: String,
}

impl LoadResult {
    pub fn code(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// Result of the `transform` hook. Also the value cached on module nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
    pub code: String,
}

impl TransformResult {
    pub fn code(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// Passed to `configure_server` once, before the first request.
#[derive(Debug, Clone, Copy)]
pub struct ServerContext<'a> {
    pub config: &'a DevConfig,
}

/// Per-call context handed to resolve/load/transform hooks.
#[derive(Clone, Copy)]
pub struct PluginContext<'a> {
    container: &'a PluginContainer,
}

impl<'a> PluginContext<'a> {
    /// Project root.
    #[must_use]
    pub fn root(&self) -> &'a Path {
        &self.container.root
    }

    /// Project root as a forward-slash string.
    #[must_use]
    pub fn root_str(&self) -> &'a str {
        &self.container.root_str
    }

    #[must_use]
    pub fn graph(&self) -> &'a ModuleGraph {
        &self.container.graph
    }

    /// The container as a url resolver, for graph updates.
    #[must_use]
    pub fn resolver(&self) -> &'a dyn ResolveUrl {
        self.container
    }

    /// Resolve through the whole container, starting at the first plugin.
    pub fn resolve(
        &self,
        specifier: &str,
        importer: Option<&str>,
    ) -> HookResult<Option<ResolveIdResult>> {
        self.container.resolve_id(specifier, importer)
    }
}

/// The main plugin trait.
///
/// All hooks default to "not applicable".
pub trait Plugin: Send + Sync {
    /// Plugin name for logs and error messages.
    fn name(&self) -> &str;

    /// Called once with the server configuration before serving starts.
    fn configure_server(&self, _server: &ServerContext<'_>) -> HookResult<()> {
        Ok(())
    }

    /// Resolve a specifier (optionally relative to `importer`) to a module id.
    fn resolve_id(
        &self,
        _specifier: &str,
        _importer: Option<&str>,
        _ctx: &PluginContext<'_>,
    ) -> HookResult<Option<ResolveIdResult>> {
        Ok(None)
    }

    /// Load the source for a resolved id.
    fn load(&self, _id: &str, _ctx: &PluginContext<'_>) -> HookResult<Option<LoadResult>> {
        Ok(None)
    }

    /// Transform module code.
    fn transform(
        &self,
        _code: &str,
        _id: &str,
        _ctx: &PluginContext<'_>,
    ) -> HookResult<Option<TransformResult>> {
        Ok(None)
    }

    /// Transform the HTML entry document.
    fn transform_index_html(
        &self,
        _html: &str,
        _ctx: &PluginContext<'_>,
    ) -> HookResult<Option<String>> {
        Ok(None)
    }
}

/// Ordered plugin list plus the module graph the plugins share.
pub struct PluginContainer {
    plugins: Vec<Box<dyn Plugin>>,
    root: PathBuf,
    root_str: String,
    graph: Arc<ModuleGraph>,
}

impl PluginContainer {
    pub fn new(root: PathBuf) -> Self {
        let root_str = slash(&root.to_string_lossy());
        Self {
            plugins: Vec::new(),
            root,
            root_str,
            graph: Arc::new(ModuleGraph::new()),
        }
    }

    /// Append a plugin; plugins run in the order they were added.
    pub fn add(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    #[must_use]
    pub fn with_plugins(mut self, plugins: Vec<Box<dyn Plugin>>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn graph(&self) -> &Arc<ModuleGraph> {
        &self.graph
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    fn context(&self) -> PluginContext<'_> {
        PluginContext { container: self }
    }

    /// Run every plugin's `configure_server` hook.
    pub fn configure_server(&self, config: &DevConfig) -> HookResult<()> {
        let server = ServerContext { config };
        for plugin in &self.plugins {
            plugin.configure_server(&server)?;
        }
        Ok(())
    }

    /// First plugin to resolve `specifier` wins.
    pub fn resolve_id(
        &self,
        specifier: &str,
        importer: Option<&str>,
    ) -> HookResult<Option<ResolveIdResult>> {
        let ctx = self.context();
        for plugin in &self.plugins {
            if let Some(result) = plugin.resolve_id(specifier, importer, &ctx)? {
                return Ok(Some(ResolveIdResult::new(slash(&result.id))));
            }
        }
        Ok(None)
    }

    /// First plugin to load `id` wins.
    pub fn load(&self, id: &str) -> HookResult<Option<LoadResult>> {
        let ctx = self.context();
        for plugin in &self.plugins {
            if let Some(result) = plugin.load(id, &ctx)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    /// Chain `code` through every plugin's `transform`.
    pub fn transform(&self, code: &str, id: &str) -> HookResult<TransformResult> {
        let ctx = self.context();
        let mut current = code.to_string();
        for plugin in &self.plugins {
            if let Some(result) = plugin.transform(&current, id, &ctx)? {
                current = result.code;
            }
        }
        Ok(TransformResult::code(current))
    }

    /// Chain the HTML entry document through every plugin.
    pub fn transform_index_html(&self, html: &str) -> HookResult<String> {
        let ctx = self.context();
        let mut current = html.to_string();
        for plugin in &self.plugins {
            if let Some(next) = plugin.transform_index_html(&current, &ctx)? {
                current = next;
            }
        }
        Ok(current)
    }
}

impl ResolveUrl for PluginContainer {
    fn resolve_url(&self, url: &str) -> HookResult<Option<String>> {
        Ok(self.resolve_id(url, None)?.map(|r| r.id))
    }
}
