//! React Fast Refresh.
//!
//! 1. Serves `/@react-refresh` from the project's `react-refresh` package,
//!    wrapped so the CommonJS runtime loads as an ES module.
//! 2. Wraps every transpiled module that registered components with a
//!    header that points `$RefreshReg$` at this module and a footer that
//!    self-accepts and triggers the refresh.
//! 3. Installs the global hook from the HTML entry before any module runs.

use crate::dev::plugin::{
    HookResult, LoadResult, Plugin, PluginContext, ResolveIdResult, TransformResult,
};
use crate::dev::utils::{clean_url, is_internal_request, is_js_request, REACT_REFRESH_PATH};
use super::client_inject::inject_after_head;
use tracing::warn;

/// Runtime file inside the `react-refresh` package.
const RUNTIME_FILE: &str = "node_modules/react-refresh/cjs/react-refresh-runtime.development.js";

const RUNTIME_HEADER: &str =
    "const exports = {};\nconst process = { env: { NODE_ENV: \"development\" } };\n";

const RUNTIME_FOOTER: &str = r"
let refreshTimer;
exports.performReactRefreshDebounced = () => {
  clearTimeout(refreshTimer);
  refreshTimer = setTimeout(exports.performReactRefresh, 30);
};
export default exports;
";

const HTML_PREAMBLE: &str = r#"<script type="module">
import RefreshRuntime from "/@react-refresh";
RefreshRuntime.injectIntoGlobalHook(window);
window.$RefreshReg$ = () => {};
window.$RefreshSig$ = () => (type) => type;
window.__nobundle_react_preamble__ = true;
</script>"#;

#[derive(Debug, Default)]
pub struct ReactRefreshPlugin;

impl ReactRefreshPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Transpiled code that registered at least one component or hook signature.
    fn has_registrations(code: &str) -> bool {
        code.contains("$RefreshReg$(") || code.contains("$RefreshSig$(")
    }
}

fn module_header(id: &str) -> String {
    let owner = serde_json::to_string(id).unwrap_or_else(|_| format!("{id:?}"));
    format!(
        r#"import RefreshRuntime from "{REACT_REFRESH_PATH}";
let prevRefreshReg;
let prevRefreshSig;
if (import.meta.hot) {{
  prevRefreshReg = window.$RefreshReg$;
  prevRefreshSig = window.$RefreshSig$;
  window.$RefreshReg$ = (type, id) => {{
    RefreshRuntime.register(type, {owner} + " " + id);
  }};
  window.$RefreshSig$ = RefreshRuntime.createSignatureFunctionForTransform;
}}
"#
    )
}

const MODULE_FOOTER: &str = r"
if (import.meta.hot) {
  window.$RefreshReg$ = prevRefreshReg;
  window.$RefreshSig$ = prevRefreshSig;
  import.meta.hot.accept();
  RefreshRuntime.performReactRefreshDebounced();
}
";

impl Plugin for ReactRefreshPlugin {
    fn name(&self) -> &str {
        "react-refresh"
    }

    fn resolve_id(
        &self,
        specifier: &str,
        _importer: Option<&str>,
        _ctx: &PluginContext<'_>,
    ) -> HookResult<Option<ResolveIdResult>> {
        if clean_url(specifier) == REACT_REFRESH_PATH {
            return Ok(Some(ResolveIdResult::new(REACT_REFRESH_PATH)));
        }
        Ok(None)
    }

    fn load(&self, id: &str, ctx: &PluginContext<'_>) -> HookResult<Option<LoadResult>> {
        if id != REACT_REFRESH_PATH {
            return Ok(None);
        }
        let path = ctx.root().join(RUNTIME_FILE);
        match std::fs::read_to_string(&path) {
            Ok(runtime) => Ok(Some(LoadResult::code(format!(
                "{RUNTIME_HEADER}{runtime}{RUNTIME_FOOTER}"
            )))),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "react-refresh runtime not installed");
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
        if !is_js_request(id) || is_internal_request(id) || id.contains("/node_modules/") {
            return Ok(None);
        }
        if !Self::has_registrations(code) {
            return Ok(None);
        }
        Ok(Some(TransformResult::code(format!(
            "{}{code}{MODULE_FOOTER}",
            module_header(clean_url(id))
        ))))
    }

    fn transform_index_html(
        &self,
        html: &str,
        _ctx: &PluginContext<'_>,
    ) -> HookResult<Option<String>> {
        Ok(Some(inject_after_head(html, HTML_PREAMBLE)))
    }
}
