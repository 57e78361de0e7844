//! Serves the HMR client and injects it into the HTML entry.

use crate::dev::plugin::{
    HookResult, LoadResult, Plugin, PluginContext, ResolveIdResult, ServerContext,
};
use crate::dev::utils::{clean_url, CLIENT_PUBLIC_PATH};
use std::sync::OnceLock;

/// Browser runtime source; `__HMR_PORT__` is replaced when served.
pub const CLIENT_SOURCE: &str = include_str!("../client/client.mjs");

#[derive(Debug, Default)]
pub struct ClientInjectPlugin {
    hmr_port: OnceLock<u16>,
}

impl ClientInjectPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Insert `snippet` right after the opening `<head>` tag, or at the start.
pub(crate) fn inject_after_head(html: &str, snippet: &str) -> String {
    let insert_at = html
        .find("<head")
        .and_then(|start| html[start..].find('>').map(|end| start + end + 1))
        .unwrap_or(0);
    format!("{}\n    {snippet}{}", &html[..insert_at], &html[insert_at..])
}

impl Plugin for ClientInjectPlugin {
    fn name(&self) -> &str {
        "client-inject"
    }

    fn configure_server(&self, server: &ServerContext<'_>) -> HookResult<()> {
        // First configuration wins for the session.
        let _ = self.hmr_port.set(server.config.hmr_port);
        Ok(())
    }

    fn resolve_id(
        &self,
        specifier: &str,
        _importer: Option<&str>,
        _ctx: &PluginContext<'_>,
    ) -> HookResult<Option<ResolveIdResult>> {
        if clean_url(specifier) == CLIENT_PUBLIC_PATH {
            return Ok(Some(ResolveIdResult::new(CLIENT_PUBLIC_PATH)));
        }
        Ok(None)
    }

    fn load(&self, id: &str, _ctx: &PluginContext<'_>) -> HookResult<Option<LoadResult>> {
        if id != CLIENT_PUBLIC_PATH {
            return Ok(None);
        }
        let port = self.hmr_port.get().copied().unwrap_or(crate::config::DEFAULT_HMR_PORT);
        Ok(Some(LoadResult::code(CLIENT_SOURCE.replace("__HMR_PORT__", &port.to_string()))))
    }

    fn transform_index_html(
        &self,
        html: &str,
        _ctx: &PluginContext<'_>,
    ) -> HookResult<Option<String>> {
        let tag = format!(r#"<script type="module" src="{CLIENT_PUBLIC_PATH}"></script>"#);
        Ok(Some(inject_after_head(html, &tag)))
    }
}
