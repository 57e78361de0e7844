//! URL and id predicates shared by the plugins and the pipeline.
//!
//! Request urls and module ids are plain strings: urls are server-root
//! relative (`/src/App.tsx?t=1`), ids are absolute forward-slash paths that
//! may keep a query (`/project/src/App.vue?vue&type=style&index=0`).

use std::path::{Path, PathBuf};

/// Path of the injected HMR client module.
pub const CLIENT_PUBLIC_PATH: &str = "/@nobundle/client";

/// Path of the React Fast Refresh runtime module.
pub const REACT_REFRESH_PATH: &str = "/@react-refresh";

/// Internal modules served by plugins rather than read from disk.
pub const INTERNAL_LIST: &[&str] = &[CLIENT_PUBLIC_PATH, REACT_REFRESH_PATH];

/// Pre-bundle cache directory, relative to the project root.
pub const PRE_BUNDLE_DIR: &str = "node_modules/.nobundle";

/// Extensions tried, in order, for extensionless relative imports.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".tsx", ".ts", ".jsx", ".js"];

/// Extensions the dependency scanner never parses.
pub const EXTERNAL_TYPES: &[&str] = &[
    "css", "less", "sass", "scss", "styl", "stylus", "pcss", "postcss", "vue", "svelte", "marko",
    "astro", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "avif",
];

/// Image-like assets imported from JS as a url-exporting module.
pub const ASSET_EXTENSIONS: &[&str] = &["svg", "png", "jpg", "jpeg", "gif", "ico", "webp", "avif"];

/// The file at `base`, else `base` + the first matching `DEFAULT_EXTENSIONS`
/// entry, else `base/index` + extension.
#[must_use]
pub fn find_with_extensions(base: &Path) -> Option<PathBuf> {
    if base.is_file() {
        return Some(base.to_path_buf());
    }
    let as_string = base.to_string_lossy();
    DEFAULT_EXTENSIONS
        .iter()
        .map(|ext| PathBuf::from(format!("{as_string}{ext}")))
        .chain(DEFAULT_EXTENSIONS.iter().map(|ext| base.join(format!("index{ext}"))))
        .find(|candidate| candidate.is_file())
}

/// Server url for a module id: root-relative with a leading `/`, or the id
/// itself when it lies outside `root`.
#[must_use]
pub fn short_url(id: &str, root: &str) -> String {
    let root = root.trim_end_matches('/');
    match id.strip_prefix(root) {
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => id.to_string(),
    }
}

/// Strip the query string and hash.
#[must_use]
pub fn clean_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

fn extension(path: &str) -> Option<&str> {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rfind('.') {
        Some(0) | None => None,
        Some(dot) => Some(&file[dot + 1..]),
    }
}

fn has_extension_in(path: &str, list: &[&str]) -> bool {
    extension(path).is_some_and(|ext| list.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// JS/TS module, or an extensionless url that is not a directory.
#[must_use]
pub fn is_js_request(id: &str) -> bool {
    let path = clean_url(id);
    match extension(path) {
        Some(ext) => matches!(ext, "js" | "jsx" | "ts" | "tsx" | "mjs"),
        None => !path.ends_with('/'),
    }
}

/// Plain `.css` file or a Vue style sub-request (`...&lang.css`).
#[must_use]
pub fn is_css_request(id: &str) -> bool {
    clean_url(id).ends_with(".css") || id.ends_with("lang.css")
}

#[must_use]
pub fn is_vue(id: &str) -> bool {
    clean_url(id).ends_with(".vue")
}

#[must_use]
pub fn is_asset(spec: &str) -> bool {
    has_extension_in(clean_url(spec), ASSET_EXTENSIONS)
}

#[must_use]
pub fn is_external_type(path: &str) -> bool {
    has_extension_in(clean_url(path), EXTERNAL_TYPES)
}

#[must_use]
pub fn is_internal_request(url: &str) -> bool {
    INTERNAL_LIST.contains(&clean_url(url))
}

/// Package-name specifier: word character or `@` first, and no scheme.
#[must_use]
pub fn is_bare_import(spec: &str) -> bool {
    let mut chars = spec.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second)) => {
            (first.is_alphanumeric() || first == '_' || first == '@') && second != ':'
        }
        _ => false,
    }
}

/// Query parameters in order; bare flags have an empty value.
fn query_pairs(url: &str) -> impl Iterator<Item = (&str, &str)> {
    let without_hash = url.split('#').next().unwrap_or(url);
    without_hash
        .split_once('?')
        .map_or("", |(_, q)| q)
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
}

#[must_use]
pub fn query_param<'a>(url: &'a str, key: &str) -> Option<&'a str> {
    query_pairs(url).find(|(k, _)| *k == key).map(|(_, v)| v)
}

/// Rebuild `url` keeping only the query params `keep` accepts.
fn retain_query(url: &str, keep: impl Fn(&str) -> bool) -> String {
    let path = clean_url(url);
    let kept: Vec<String> = query_pairs(url)
        .filter(|(k, _)| keep(k))
        .map(|(k, v)| if v.is_empty() { k.to_string() } else { format!("{k}={v}") })
        .collect();
    if kept.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", kept.join("&"))
    }
}

/// Identity form of a request url: no hash, no cache-busting `t`.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    retain_query(url, |k| k != "t")
}

#[must_use]
pub fn is_import_request(url: &str) -> bool {
    query_param(url, "import").is_some()
}

#[must_use]
pub fn remove_import_query(url: &str) -> String {
    retain_query(url, |k| k != "import")
}

/// Append `query` (e.g. `t=123`) to `url`, before any hash.
#[must_use]
pub fn inject_query(url: &str, query: &str) -> String {
    let (body, hash) = match url.find('#') {
        Some(i) => url.split_at(i),
        None => (url, ""),
    };
    let sep = if body.contains('?') { '&' } else { '?' };
    format!("{body}{sep}{query}{hash}")
}

/// Parsed `?vue&type=...` sub-request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VueQuery {
    pub vue: bool,
    pub kind: Option<String>,
    pub index: Option<usize>,
    pub scoped: Option<String>,
}

/// Split a Vue id into its file path and sub-request query.
#[must_use]
pub fn parse_vue_request(id: &str) -> (&str, VueQuery) {
    let mut query = VueQuery::default();
    for (key, value) in query_pairs(id) {
        match key {
            "vue" => query.vue = true,
            "type" => query.kind = Some(value.to_string()),
            "index" => query.index = value.parse().ok(),
            "scoped" => query.scoped = Some(value.to_string()),
            _ => {}
        }
    }
    (clean_url(id), query)
}
