//! No-bundle development server core.
//!
//! Every request becomes a resolve → load → transform pass through the
//! [`PluginContainer`], memoized per module in the [`ModuleGraph`] until a
//! file change invalidates it. Bare imports point at chunks produced once at
//! startup by the [`PreBundler`].

pub mod graph;
pub mod hmr;
pub mod lexer;
pub mod plugin;
pub mod plugins;
pub mod prebundle;
pub mod sfc;
pub mod transform;
pub mod utils;

pub use graph::{GraphError, ModuleGraph, ModuleId, ModuleNode, ResolveUrl};
pub use hmr::{HmrCoordinator, HmrPayload, Update, UpdateKind, HMR_SUBPROTOCOL};
pub use plugin::{
    HookResult, LoadResult, Plugin, PluginContainer, PluginContext, PluginError, ResolveIdResult,
    ServerContext, TransformResult,
};
pub use plugins::{resolve_plugins, resolve_plugins_with};
pub use prebundle::{DepBundler, DepCache, EsbuildBundler, PreBundleError, PreBundler};
pub use sfc::{parse_sfc, NodeSfcCompiler, SfcCompiler, SfcDescriptor, SfcError};
pub use transform::{PipelineError, TransformPipeline};
