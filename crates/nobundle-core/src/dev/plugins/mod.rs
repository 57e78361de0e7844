//! Built-in plugins.
//!
//! Registration order is fixed: client-inject, resolve, transpile, the
//! framework plugin (react-refresh or vue), import-analysis, css, asset.

mod asset;
mod client_inject;
mod css;
mod import_analysis;
mod react_refresh;
mod resolve;
mod transpile;
mod vue;

pub use asset::AssetPlugin;
pub use client_inject::{ClientInjectPlugin, CLIENT_SOURCE};
pub use css::CssPlugin;
pub use import_analysis::ImportAnalysisPlugin;
pub use react_refresh::ReactRefreshPlugin;
pub use resolve::ResolvePlugin;
pub use transpile::TranspilePlugin;
pub use vue::{assemble as assemble_sfc, VuePlugin};

use super::plugin::Plugin;
use super::prebundle::DepCache;
use super::sfc::{NodeSfcCompiler, SfcCompiler};
use crate::config::{DevConfig, Framework};
use std::sync::Arc;
use tracing::warn;

/// The plugin list for `config`, with the node-backed Vue compiler.
pub fn resolve_plugins(config: &DevConfig, deps: Arc<DepCache>) -> Vec<Box<dyn Plugin>> {
    let compiler: Arc<dyn SfcCompiler> = match NodeSfcCompiler::locate(config.root.clone()) {
        Some(compiler) => Arc::new(compiler),
        None => {
            if config.framework == Framework::Vue {
                warn!("node not found; .vue files will fail to compile");
            }
            Arc::new(vue::MissingSfcCompiler)
        }
    };
    resolve_plugins_with(config, deps, compiler)
}

/// The plugin list for `config` with an explicit SFC compiler.
pub fn resolve_plugins_with(
    config: &DevConfig,
    deps: Arc<DepCache>,
    sfc_compiler: Arc<dyn SfcCompiler>,
) -> Vec<Box<dyn Plugin>> {
    let react = config.framework == Framework::React;
    let mut plugins: Vec<Box<dyn Plugin>> = vec![
        Box::new(ClientInjectPlugin::new()),
        Box::new(ResolvePlugin::new()),
        Box::new(TranspilePlugin::swc().with_react_refresh(react)),
    ];
    match config.framework {
        Framework::React => plugins.push(Box::new(ReactRefreshPlugin::new())),
        Framework::Vue => plugins.push(Box::new(VuePlugin::new(sfc_compiler))),
    }
    plugins.push(Box::new(ImportAnalysisPlugin::new(deps)));
    plugins.push(Box::new(CssPlugin::new()));
    plugins.push(Box::new(AssetPlugin::new()));
    plugins
}
