//! File-system resolution for absolute and relative specifiers.
//!
//! Bare specifiers are left to the pre-bundle cache, internal modules to the
//! plugins that serve them.

use crate::dev::plugin::{HookResult, Plugin, PluginContext, PluginError, ResolveIdResult};
use crate::dev::utils::{
    clean_url, find_with_extensions, is_internal_request, normalize_url, remove_import_query,
};
use nobundle_util::path::{normalize, to_slash};
use std::path::{Path, PathBuf};
use tracing::trace;

#[derive(Debug, Default)]
pub struct ResolvePlugin;

impl ResolvePlugin {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn locate(specifier: &str, importer: Option<&str>, root: &Path) -> HookResult<Option<PathBuf>> {
        let path = clean_url(specifier);
        if let Some(rest) = path.strip_prefix('/') {
            let as_file = Path::new(path);
            if as_file.is_file() {
                return Ok(Some(as_file.to_path_buf()));
            }
            return Ok(find_with_extensions(&root.join(rest)));
        }
        if path.starts_with('.') {
            let Some(importer) = importer else {
                return Err(PluginError::MissingImporter {
                    specifier: specifier.to_string(),
                });
            };
            let dir = Path::new(clean_url(importer)).parent().unwrap_or(root);
            return Ok(find_with_extensions(&normalize(&dir.join(path))));
        }
        Ok(None)
    }
}

/// Query kept on the id: everything but `import` and `t`.
fn identity_query(specifier: &str) -> String {
    let kept = remove_import_query(&normalize_url(specifier));
    kept.split_once('?').map(|(_, q)| format!("?{q}")).unwrap_or_default()
}

impl Plugin for ResolvePlugin {
    fn name(&self) -> &str {
        "resolve"
    }

    fn resolve_id(
        &self,
        specifier: &str,
        importer: Option<&str>,
        ctx: &PluginContext<'_>,
    ) -> HookResult<Option<ResolveIdResult>> {
        if is_internal_request(specifier) {
            return Ok(None);
        }
        let Some(file) = Self::locate(specifier, importer, ctx.root())? else {
            trace!(specifier, "not found on disk");
            return Ok(None);
        };
        Ok(Some(ResolveIdResult::new(format!("{}{}", to_slash(&file), identity_query(specifier)))))
    }
}
