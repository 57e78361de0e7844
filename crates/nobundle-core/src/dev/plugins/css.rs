//! CSS as a JS module that injects a `<style>` element.

use crate::dev::plugin::{HookResult, LoadResult, Plugin, PluginContext, TransformResult};
use crate::dev::utils::{clean_url, is_css_request, is_vue, short_url, CLIENT_PUBLIC_PATH};

#[derive(Debug, Default)]
pub struct CssPlugin;

impl CssPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}"))
}

impl Plugin for CssPlugin {
    fn name(&self) -> &str {
        "css"
    }

    fn load(&self, id: &str, _ctx: &PluginContext<'_>) -> HookResult<Option<LoadResult>> {
        // Vue style blocks are loaded by the vue plugin.
        if !is_css_request(id) || is_vue(id) {
            return Ok(None);
        }
        Ok(std::fs::read_to_string(clean_url(id)).ok().map(LoadResult::code))
    }

    fn transform(
        &self,
        code: &str,
        id: &str,
        ctx: &PluginContext<'_>,
    ) -> HookResult<Option<TransformResult>> {
        if !is_css_request(id) {
            return Ok(None);
        }
        // Keyed by the full url: each style block of one SFC owns its own prune.
        let owner = js_string(&short_url(id, ctx.root_str()));
        let style_id = js_string(id);
        let css = js_string(code);
        Ok(Some(TransformResult::code(format!(
            r#"import {{
  createHotContext as __nb_createHotContext, updateStyle, removeStyle
}} from "{CLIENT_PUBLIC_PATH}";
import.meta.hot = __nb_createHotContext({owner});
const id = {style_id};
const css = {css};
updateStyle(id, css);
import.meta.hot.accept();
export default css;
import.meta.hot.prune(() => removeStyle(id));
"#
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::plugin::PluginContainer;
    use nobundle_util::path::to_slash;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn container(root: PathBuf) -> PluginContainer {
        PluginContainer::new(root).with_plugins(vec![Box::new(CssPlugin::new())])
    }

    #[test]
    fn test_css_module() {
        let c = container(PathBuf::from("/p"));
        let out = c.transform("body { content: \"x\" }\n", "/p/src/index.css").unwrap().code;

        assert!(out.contains(r#"import.meta.hot = __nb_createHotContext("/src/index.css");"#));
        assert!(out.contains(r#"const id = "/p/src/index.css";"#));
        assert!(out.contains(r#"const css = "body { content: \"x\" }\n";"#));
        assert!(out.contains("updateStyle(id, css);"));
        assert!(out.contains("export default css;"));
        assert!(out.contains("prune(() => removeStyle(id))"));
    }

    #[test]
    fn test_vue_style_blocks_get_separate_owners() {
        let c = container(PathBuf::from("/p"));
        let first = "/p/src/App.vue?vue&type=style&index=0&lang.css";
        let second = "/p/src/App.vue?vue&type=style&index=1&lang.css";

        let out = c.transform("div{}", first).unwrap().code;
        assert!(out.contains(r#"const id = "/p/src/App.vue?vue&type=style&index=0&lang.css";"#));
        assert!(out.contains(
            r#"__nb_createHotContext("/src/App.vue?vue&type=style&index=0&lang.css")"#
        ));

        let out = c.transform("p{}", second).unwrap().code;
        assert!(out.contains(
            r#"__nb_createHotContext("/src/App.vue?vue&type=style&index=1&lang.css")"#
        ));
    }

    #[test]
    fn test_load() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.css"), "a{}").unwrap();
        let c = container(dir.path().to_path_buf());

        let css = c.load(&to_slash(&dir.path().join("a.css"))).unwrap().unwrap();
        assert_eq!(css.code, "a{}");
        assert!(c.load("/p/src/App.vue?vue&type=style&index=0&lang.css").unwrap().is_none());
        assert!(c.load("/p/src/main.ts").unwrap().is_none());
    }
}
