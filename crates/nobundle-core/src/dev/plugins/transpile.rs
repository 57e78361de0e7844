//! Loads JS/TS sources from disk and strips TS/JSX.

use crate::compiler::{CompilerBackend, SwcBackend, TranspileSpec};
use crate::dev::plugin::{
    HookResult, LoadResult, Plugin, PluginContext, PluginError, TransformResult,
};
use crate::dev::utils::{clean_url, is_internal_request, is_js_request};
use std::sync::Arc;
use tracing::trace;

pub struct TranspilePlugin {
    backend: Arc<dyn CompilerBackend>,
    react_refresh: bool,
}

impl TranspilePlugin {
    pub fn new(backend: Arc<dyn CompilerBackend>) -> Self {
        Self {
            backend,
            react_refresh: false,
        }
    }

    /// SWC backend.
    #[must_use]
    pub fn swc() -> Self {
        Self::new(Arc::new(SwcBackend::new()))
    }

    /// Emit Fast Refresh registrations for JSX modules.
    #[must_use]
    pub fn with_react_refresh(mut self, enabled: bool) -> Self {
        self.react_refresh = enabled;
        self
    }

    fn handles(id: &str) -> bool {
        is_js_request(id) && !is_internal_request(id)
    }
}

impl Plugin for TranspilePlugin {
    fn name(&self) -> &str {
        "transpile"
    }

    fn load(&self, id: &str, _ctx: &PluginContext<'_>) -> HookResult<Option<LoadResult>> {
        if !Self::handles(id) {
            return Ok(None);
        }
        match std::fs::read_to_string(clean_url(id)) {
            Ok(code) => Ok(Some(LoadResult::code(code))),
            Err(e) => {
                trace!(id, error = %e, "load failed");
                Ok(None)
            }
        }
    }

    fn transform(
        &self,
        code: &str,
        id: &str,
        _ctx: &PluginContext<'_>,
    ) -> HookResult<Option<TransformResult>> {
        if !Self::handles(id) || id.contains("/node_modules/") {
            return Ok(None);
        }
        let spec = TranspileSpec::new(clean_url(id)).with_react_refresh(self.react_refresh);
        let output = self
            .backend
            .transpile(&spec, code)
            .map_err(|e| PluginError::compile(self.name(), "transform", e))?;
        Ok(Some(TransformResult::code(output.code)))
    }
}
