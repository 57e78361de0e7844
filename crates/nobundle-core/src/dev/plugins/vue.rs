//! Vue single-file components.
//!
//! A `.vue` request compiles to one JS module: the compiled script (its
//! default export renamed to `_sfc_main`), the compiled render function, a
//! side-effect import per `<style>` block, and the HMR record/accept glue.
//! Style blocks are served as `?vue&type=style&index=N[&scoped=<id>]&lang.css`
//! sub-requests, which the css plugin then turns into JS.

use crate::compiler::{CompileError, CompilerBackend, SwcBackend, TranspileSpec};
use crate::dev::plugin::{
    HookResult, LoadResult, Plugin, PluginContext, PluginError, TransformResult,
};
use crate::dev::sfc::{parse_sfc, CompiledSfc, SfcCompiler, SfcDescriptor};
use crate::dev::utils::{is_vue, parse_vue_request, short_url};
use regex_lite::Regex;
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

/// Used when no compiler is available; every compile fails with a clear message.
pub(crate) struct MissingSfcCompiler;

impl SfcCompiler for MissingSfcCompiler {
    fn compile(&self, descriptor: &SfcDescriptor) -> Result<CompiledSfc, CompileError> {
        Err(
            CompileError::new("compiling .vue files requires node and @vue/compiler-sfc")
                .with_file(&descriptor.filename),
        )
    }

    fn compile_style(
        &self,
        descriptor: &SfcDescriptor,
        _index: usize,
    ) -> Result<String, CompileError> {
        self.compile(descriptor).map(|_| String::new())
    }
}

pub struct VuePlugin {
    compiler: Arc<dyn SfcCompiler>,
    backend: SwcBackend,
}

impl VuePlugin {
    pub fn new(compiler: Arc<dyn SfcCompiler>) -> Self {
        Self {
            compiler,
            backend: SwcBackend::new(),
        }
    }

    fn parse(&self, source: &str, filename: &str) -> HookResult<SfcDescriptor> {
        parse_sfc(source, filename).map_err(|e| {
            debug!(file = filename, error = %e, "sfc parse failed");
            PluginError::compile(self.name(), "transform", e.into_compile_error(filename))
        })
    }

    fn compile_error(&self, hook: &'static str, error: CompileError) -> PluginError {
        PluginError::compile(self.name(), hook, error)
    }

    fn load_style(&self, file: &str, index: usize) -> HookResult<Option<LoadResult>> {
        let Ok(source) = std::fs::read_to_string(file) else {
            return Ok(None);
        };
        let descriptor = self.parse(&source, file)?;
        if index >= descriptor.styles.len() {
            trace!(file, index, "style block out of range");
            return Ok(None);
        }
        let css = self
            .compiler
            .compile_style(&descriptor, index)
            .map_err(|e| self.compile_error("load", e))?;
        Ok(Some(LoadResult::code(css)))
    }
}

/// `\nexport function render` → `\nfunction _sfc_render`.
fn rename_render(template: &str) -> String {
    static RENDER: OnceLock<Option<Regex>> = OnceLock::new();
    match RENDER
        .get_or_init(|| Regex::new(r"\nexport (function|const) (render|ssrRender)").ok())
        .as_ref()
    {
        Some(re) => re
            .replace(&format!("\n{template}"), "\n$1 _sfc_$2")
            .trim_start_matches('\n')
            .to_string(),
        None => template.to_string(),
    }
}

/// `export default` → `const _sfc_main =`.
fn rename_default(script: &str) -> String {
    if script.contains("export default") {
        script.replacen("export default", "const _sfc_main =", 1)
    } else {
        format!("{script}\nconst _sfc_main = {{}};")
    }
}

/// Assemble the component module for the file served at `url`.
pub fn assemble(descriptor: &SfcDescriptor, compiled: &CompiledSfc, url: &str) -> String {
    let id = &descriptor.id;
    let mut out = rename_default(&compiled.script);
    out.push('\n');

    if let Some(template) = &compiled.template {
        out.push_str(&rename_render(template));
        out.push('\n');
    }

    for (index, style) in descriptor.styles.iter().enumerate() {
        let scoped = if style.has_attr("scoped") {
            format!("&scoped={id}")
        } else {
            String::new()
        };
        let _ = writeln!(out, "import \"{url}?vue&type=style&index={index}{scoped}&lang.css\";");
    }

    if descriptor.has_scoped_style() {
        let _ = writeln!(out, "_sfc_main.__scopeId = \"data-v-{id}\";");
    }
    let _ = writeln!(out, "_sfc_main.__hmrId = \"{id}\";");
    out.push_str(
        r#"typeof __VUE_HMR_RUNTIME__ !== "undefined" &&
  __VUE_HMR_RUNTIME__.createRecord(_sfc_main.__hmrId, _sfc_main);
import.meta.hot.accept((mod) => {
  if (!mod) return;
  const { default: updated, _rerender_only } = mod;
  if (_rerender_only) {
    __VUE_HMR_RUNTIME__.rerender(updated.__hmrId, updated.render);
  } else {
    __VUE_HMR_RUNTIME__.reload(updated.__hmrId, updated);
  }
});
"#,
    );
    if compiled.template.is_some() {
        out.push_str("_sfc_main.render = _sfc_render;\n");
    }
    out.push_str("export default _sfc_main;\n");
    out
}

impl Plugin for VuePlugin {
    fn name(&self) -> &str {
        "vue"
    }

    fn load(&self, id: &str, _ctx: &PluginContext<'_>) -> HookResult<Option<LoadResult>> {
        if !is_vue(id) {
            return Ok(None);
        }
        let (file, query) = parse_vue_request(id);
        if query.vue {
            return match (query.kind.as_deref(), query.index) {
                (Some("style"), Some(index)) => self.load_style(file, index),
                _ => Ok(None),
            };
        }
        Ok(std::fs::read_to_string(file).ok().map(LoadResult::code))
    }

    fn transform(
        &self,
        code: &str,
        id: &str,
        ctx: &PluginContext<'_>,
    ) -> HookResult<Option<TransformResult>> {
        if !is_vue(id) || id.contains("/node_modules/") {
            return Ok(None);
        }
        let (file, query) = parse_vue_request(id);
        if query.vue {
            return Ok(None);
        }

        let descriptor = self.parse(code, file)?;
        let compiled = self
            .compiler
            .compile(&descriptor)
            .map_err(|e| self.compile_error("transform", e))?;
        let mut module = assemble(&descriptor, &compiled, &short_url(file, ctx.root_str()));

        if let Some(lang @ ("ts" | "tsx")) = descriptor.script_lang() {
            let spec = TranspileSpec::new(format!("{file}.{lang}"));
            module = self
                .backend
                .transpile(&spec, &module)
                .map_err(|e| self.compile_error("transform", e.with_file(file)))?
                .code;
        }
        Ok(Some(TransformResult::code(module)))
    }
}
