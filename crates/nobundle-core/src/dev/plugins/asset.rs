//! Image assets imported from JS export their url.

use crate::dev::plugin::{HookResult, LoadResult, Plugin, PluginContext};
use crate::dev::utils::{clean_url, is_asset, short_url};

#[derive(Debug, Default)]
pub struct AssetPlugin;

impl AssetPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for AssetPlugin {
    fn name(&self) -> &str {
        "asset"
    }

    fn load(&self, id: &str, ctx: &PluginContext<'_>) -> HookResult<Option<LoadResult>> {
        if !is_asset(id) {
            return Ok(None);
        }
        let url = short_url(clean_url(id), ctx.root_str());
        let literal = serde_json::to_string(&url).unwrap_or_default();
        Ok(Some(LoadResult::code(format!("export default {literal};"))))
    }
}
