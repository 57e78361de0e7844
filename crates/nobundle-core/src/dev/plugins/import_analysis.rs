//! Import rewriting.
//!
//! Rewrites each import specifier of a JS/TS/Vue module to a url the server
//! can answer, records the rewritten urls as the module's imports, and
//! prepends the HMR context for the module.
//!
//! - Internal modules (`/@nobundle/client`) are left alone.
//! - Image assets become `<url>?import`, served as a url-exporting module.
//! - Bare specifiers point at their pre-bundled chunk.
//! - Relative and absolute specifiers become root-relative urls, with
//!   `?t=<timestamp>` once the target has been invalidated.

use crate::dev::graph::GraphError;
use crate::dev::lexer::lex_module;
use crate::dev::plugin::{HookResult, Plugin, PluginContext, PluginError, TransformResult};
use crate::dev::prebundle::{dep_url, DepCache};
use crate::dev::utils::{
    clean_url, inject_query, is_asset, is_bare_import, is_css_request, is_internal_request,
    is_js_request, is_vue, short_url, CLIENT_PUBLIC_PATH,
};
use std::sync::Arc;
use tracing::{trace, warn};

pub struct ImportAnalysisPlugin {
    deps: Arc<DepCache>,
}

impl ImportAnalysisPlugin {
    pub fn new(deps: Arc<DepCache>) -> Self {
        Self { deps }
    }

    fn graph_error(&self, error: GraphError) -> PluginError {
        match error {
            GraphError::Resolve(inner) => inner,
            other => PluginError::hook(self.name(), "transform", other.to_string()),
        }
    }

    /// Rewritten specifier and the url recorded in the graph (`None` = leave as is).
    fn rewrite(
        &self,
        spec: &str,
        importer: &str,
        ctx: &PluginContext<'_>,
    ) -> HookResult<Option<(String, String)>> {
        if is_internal_request(spec) {
            return Ok(None);
        }

        if is_bare_import(spec) {
            let url = match self.deps.url_for(spec) {
                Some(url) => url.to_string(),
                None => {
                    warn!(specifier = spec, importer, "bare import was not pre-bundled");
                    dep_url(spec)
                }
            };
            return Ok(Some((url.clone(), url)));
        }

        if !(spec.starts_with('.') || spec.starts_with('/')) {
            return Ok(None);
        }
        let Some(resolved) = ctx.resolve(spec, Some(importer))? else {
            trace!(specifier = spec, importer, "unresolved import left as is");
            return Ok(None);
        };

        let url = short_url(&resolved.id, ctx.root_str());
        let url = if is_asset(spec) { inject_query(&url, "import") } else { url };

        let graph = ctx.graph();
        let timestamp = graph
            .get_module_by_id(&resolved.id)
            .map_or(0, |m| graph.last_hmr_timestamp(m));
        let rewritten = if timestamp > 0 {
            inject_query(&url, &format!("t={timestamp}"))
        } else {
            url.clone()
        };
        Ok(Some((rewritten, url)))
    }
}

/// HMR bootstrap binding `import.meta.hot` to the module served at `url`.
fn hot_context_preamble(url: &str) -> String {
    let owner = serde_json::to_string(url).unwrap_or_else(|_| format!("{url:?}"));
    format!(
        "import {{ createHotContext as __nb_createHotContext }} from \"{CLIENT_PUBLIC_PATH}\";\n\
         import.meta.hot = __nb_createHotContext({owner});\n"
    )
}

impl Plugin for ImportAnalysisPlugin {
    fn name(&self) -> &str {
        "import-analysis"
    }

    fn transform(
        &self,
        code: &str,
        id: &str,
        ctx: &PluginContext<'_>,
    ) -> HookResult<Option<TransformResult>> {
        if is_css_request(id) || !(is_js_request(id) || is_vue(id)) || is_internal_request(id) {
            return Ok(None);
        }

        let imports = lex_module(code).imports;
        let mut rewritten = code.to_string();
        let mut imported_urls = Vec::with_capacity(imports.len());

        // Back to front so earlier spans stay valid.
        for import in imports.iter().rev() {
            if let Some((replacement, url)) = self.rewrite(&import.specifier, id, ctx)? {
                rewritten.replace_range(import.start..import.end, &replacement);
                imported_urls.push(url);
            }
        }
        imported_urls.reverse();

        let url = short_url(clean_url(id), ctx.root_str());
        let graph = ctx.graph();
        let module = graph
            .ensure_entry_from_url(&url, ctx.resolver())
            .map_err(|e| self.graph_error(e))?;
        graph
            .update_module_info(module, &imported_urls, ctx.resolver())
            .map_err(|e| self.graph_error(e))?;

        if id.contains("/node_modules/") {
            return Ok(Some(TransformResult::code(rewritten)));
        }
        Ok(Some(TransformResult::code(format!("{}{rewritten}", hot_context_preamble(&url)))))
    }
}
