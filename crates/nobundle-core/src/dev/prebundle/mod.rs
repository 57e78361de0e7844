//! Dependency pre-bundling.
//!
//! Runs once before the server accepts requests. The entry module's import
//! graph is scanned for bare specifiers, each gets a small proxy entry that
//! bridges CommonJS packages into ESM, and a [`DepBundler`] flattens every
//! proxy into one chunk under `node_modules/.nobundle/`.
//!
//! The resulting [`DepCache`] is read-only for the rest of the session.

mod entry;
mod esbuild;
mod scan;

pub use entry::{cjs_export_names_static, proxy_source, resolve_package_entry};
pub use esbuild::EsbuildBundler;
pub use scan::scan_imports;

use super::utils::PRE_BUNDLE_DIR;
use nobundle_util::fs::atomic_write;
use nobundle_util::path::to_slash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Manifest written next to the chunks.
pub const METADATA_FILE: &str = "_metadata.json";

/// Subdirectory of the cache holding the generated proxy entries.
const PROXY_DIR: &str = "_proxy";

#[derive(Debug, Error)]
pub enum PreBundleError {
    #[error("entry module not found: {0}")]
    EntryNotFound(PathBuf),

    #[error("package '{specifier}' not found in node_modules")]
    PackageNotFound { specifier: String },

    #[error("invalid package.json at {path}: {source}")]
    PackageJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no {bundler} binary found (install it in node_modules or on PATH)")]
    BundlerNotFound { bundler: &'static str },

    #[error("{bundler} failed: {message}")]
    BundlerFailed { bundler: &'static str, message: String },

    #[error("failed to serialize {METADATA_FILE}: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl PreBundleError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Cache filename stem for a specifier: `/` becomes `__` and a scope's `@`
/// becomes `_`. npm names never start with `_`, so scoped and unscoped
/// packages cannot share a stem.
#[must_use]
pub fn dep_file_stem(specifier: &str) -> String {
    let stem = specifier.replace('/', "__");
    match stem.strip_prefix('@') {
        Some(rest) => format!("_{rest}"),
        None => stem,
    }
}

/// One synthetic bundler entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    /// Output name (chunk stem).
    pub name: String,
    /// Bare specifier the entry stands for.
    pub specifier: String,
    /// Generated proxy module on disk.
    pub proxy: PathBuf,
}

/// The external tool that flattens proxy entries into ESM chunks.
///
/// Implementations must write `<out_dir>/<entry.name>.js` for every entry.
pub trait DepBundler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bundle `entries` as an ESM, code-split build into `out_dir`.
    fn bundle(&self, entries: &[BundleEntry], out_dir: &Path) -> Result<(), PreBundleError>;
}

/// A pre-bundled dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepInfo {
    /// Chunk file on disk.
    pub file: PathBuf,
    /// Server url of the chunk.
    pub url: String,
}

/// Specifier → pre-bundled chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepCache {
    deps: BTreeMap<String, DepInfo>,
}

impl DepCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, specifier: impl Into<String>, info: DepInfo) {
        self.deps.insert(specifier.into(), info);
    }

    pub fn get(&self, specifier: &str) -> Option<&DepInfo> {
        self.deps.get(specifier)
    }

    /// Server url of the chunk for `specifier`.
    pub fn url_for(&self, specifier: &str) -> Option<&str> {
        self.deps.get(specifier).map(|d| d.url.as_str())
    }

    pub fn specifiers(&self) -> impl Iterator<Item = &str> {
        self.deps.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}

/// Fallback url used when a bare specifier was not pre-bundled.
#[must_use]
pub fn dep_url(specifier: &str) -> String {
    format!("/{PRE_BUNDLE_DIR}/{}.js", dep_file_stem(specifier))
}

/// Scans and bundles the dependencies of one entry module.
pub struct PreBundler<B> {
    root: PathBuf,
    cache_dir: PathBuf,
    bundler: B,
    react: bool,
    node: Option<PathBuf>,
}

impl<B: DepBundler> PreBundler<B> {
    pub fn new(root: PathBuf, bundler: B) -> Self {
        let cache_dir = root.join(PRE_BUNDLE_DIR);
        Self {
            root,
            cache_dir,
            bundler,
            react: false,
            node: which::which("node").ok(),
        }
    }

    /// Add the JSX dev runtime to the scan result for `.jsx`/`.tsx` sources.
    #[must_use]
    pub fn with_react(mut self, react: bool) -> Self {
        self.react = react;
        self
    }

    /// Node binary used to enumerate CommonJS exports (`None` = static scan only).
    #[must_use]
    pub fn with_node(mut self, node: Option<PathBuf>) -> Self {
        self.node = node;
        self
    }

    /// Scan `entry` and pre-bundle every bare dependency found.
    ///
    /// Packages that cannot be located are skipped with a warning.
    pub fn run(&self, entry: &Path) -> Result<DepCache, PreBundleError> {
        let specifiers = scan_imports(entry, &self.root, self.react)?;
        debug!(count = specifiers.len(), "scanned bare imports");

        let mut cache = DepCache::new();
        if specifiers.is_empty() {
            info!("pre-bundled 0 dependencies");
            return Ok(cache);
        }

        let proxy_dir = self.cache_dir.join(PROXY_DIR);
        let mut entries = Vec::with_capacity(specifiers.len());
        for specifier in &specifiers {
            let package_entry = match resolve_package_entry(&self.root, specifier) {
                Ok(path) => path,
                Err(e) => {
                    warn!(specifier = %specifier, error = %e, "skipping dependency");
                    continue;
                }
            };
            let name = dep_file_stem(specifier);
            let proxy = proxy_dir.join(format!("{name}.js"));
            let source = proxy_source(&package_entry, self.node.as_deref())?;
            atomic_write(&proxy, source.as_bytes()).map_err(|e| PreBundleError::io(&proxy, e))?;
            entries.push(BundleEntry {
                name,
                specifier: specifier.clone(),
                proxy,
            });
        }

        if !entries.is_empty() {
            debug!(bundler = self.bundler.name(), entries = entries.len(), "bundling dependencies");
            self.bundler.bundle(&entries, &self.cache_dir)?;
        }

        for entry in &entries {
            let file = self.cache_dir.join(format!("{}.js", entry.name));
            if !file.is_file() {
                warn!(specifier = %entry.specifier, "bundler produced no chunk");
                continue;
            }
            cache.insert(
                entry.specifier.clone(),
                DepInfo {
                    url: format!("/{}", to_slash(file.strip_prefix(&self.root).unwrap_or(&file))),
                    file,
                },
            );
        }

        let metadata = self.cache_dir.join(METADATA_FILE);
        let json = serde_json::to_vec_pretty(&cache)?;
        atomic_write(&metadata, &json).map_err(|e| PreBundleError::io(&metadata, e))?;

        info!("pre-bundled {} dependencies", cache.len());
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Writes one chunk per entry containing the proxy source.
    #[derive(Clone, Default)]
    struct CopyBundler {
        seen: Arc<Mutex<Vec<BundleEntry>>>,
    }

    impl DepBundler for CopyBundler {
        fn name(&self) -> &'static str {
            "copy"
        }

        fn bundle(&self, entries: &[BundleEntry], out_dir: &Path) -> Result<(), PreBundleError> {
            for entry in entries {
                let source = fs::read_to_string(&entry.proxy).unwrap();
                fs::write(out_dir.join(format!("{}.js", entry.name)), source).unwrap();
            }
            self.seen.lock().extend_from_slice(entries);
            Ok(())
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_dep_file_stem() {
        assert_eq!(dep_file_stem("react"), "react");
        assert_eq!(dep_file_stem("@vue/shared"), "_vue__shared");
        assert_ne!(dep_file_stem("@a/b"), dep_file_stem("a/b"));
        assert_eq!(dep_file_stem("react/jsx-dev-runtime"), "react__jsx-dev-runtime");
        assert_eq!(dep_url("lodash-es"), "/node_modules/.nobundle/lodash-es.js");
    }

    #[test]
    fn test_lodash_entry_produces_one_chunk() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "src/main.ts",
            "import { debounce } from 'lodash-es';\nimport { throttle } from \"lodash-es\";\n\
             console.log(debounce, throttle);\n",
        );
        write(
            root,
            "node_modules/lodash-es/package.json",
            r#"{ "name": "lodash-es", "module": "lodash.js" }"#,
        );
        write(
            root,
            "node_modules/lodash-es/lodash.js",
            "export function debounce() {}\nexport function throttle() {}\n",
        );

        let bundler = CopyBundler::default();
        let cache = PreBundler::new(root.to_path_buf(), bundler.clone())
            .with_node(None)
            .run(&root.join("src/main.ts"))
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.url_for("lodash-es"), Some("/node_modules/.nobundle/lodash-es.js"));
        let chunk = fs::read_to_string(&cache.get("lodash-es").unwrap().file).unwrap();
        assert!(chunk.contains("export * from"));

        let seen = bundler.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].name, "lodash-es");

        let metadata_path = root.join(PRE_BUNDLE_DIR).join(METADATA_FILE);
        let metadata: DepCache =
            serde_json::from_str(&fs::read_to_string(metadata_path).unwrap()).unwrap();
        assert_eq!(metadata, cache);
    }

    #[test]
    fn test_missing_package_is_skipped() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "src/main.ts", "import a from 'present';\nimport b from 'absent';\n");
        write(root, "node_modules/present/package.json", r#"{ "main": "index.js" }"#);
        write(
            root,
            "node_modules/present/index.js",
            "module.exports = { a: 1 };\nexports.b = 2;\n",
        );

        let cache = PreBundler::new(root.to_path_buf(), CopyBundler::default())
            .with_node(None)
            .run(&root.join("src/main.ts"))
            .unwrap();

        assert_eq!(cache.specifiers().collect::<Vec<_>>(), vec!["present"]);
        let chunk = fs::read_to_string(&cache.get("present").unwrap().file).unwrap();
        assert!(chunk.contains("export default require("));
    }

    #[test]
    fn test_no_bare_imports_skips_bundler() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "src/main.ts", "import './util';\n");
        write(root, "src/util.ts", "export const x = 1;\n");

        let bundler = CopyBundler::default();
        let cache = PreBundler::new(root.to_path_buf(), bundler.clone())
            .run(&root.join("src/main.ts"))
            .unwrap();

        assert!(cache.is_empty());
        assert!(bundler.seen.lock().is_empty());
    }

    #[test]
    fn test_missing_entry_is_an_error() {
        let dir = tempdir().unwrap();
        let err = PreBundler::new(dir.path().to_path_buf(), CopyBundler::default())
            .run(&dir.path().join("src/main.ts"))
            .unwrap_err();
        assert!(matches!(err, PreBundleError::EntryNotFound(_)));
    }
}
