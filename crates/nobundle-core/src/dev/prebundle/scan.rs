//! Native dependency scanner.
//!
//! Walks the entry module's relative imports breadth-first and collects every
//! bare specifier. Files with an external asset extension are never read, and
//! scanning never descends into packages.

use super::PreBundleError;
use crate::compiler::JSX_DEV_RUNTIME;
use crate::dev::lexer::lex_module;
use crate::dev::utils::{is_bare_import, is_external_type, find_with_extensions};
use nobundle_util::path::normalize;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Collect the bare specifiers reachable from `entry`, deduplicated and sorted.
///
/// `react` adds the JSX dev runtime for every `.jsx`/`.tsx` file visited,
/// since the transpiler introduces that import.
pub fn scan_imports(
    entry: &Path,
    root: &Path,
    react: bool,
) -> Result<BTreeSet<String>, PreBundleError> {
    if !entry.is_file() {
        return Err(PreBundleError::EntryNotFound(entry.to_path_buf()));
    }

    let mut deps = BTreeSet::new();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut queue = VecDeque::from([entry.to_path_buf()]);

    while let Some(path) = queue.pop_front() {
        if !visited.insert(path.clone()) {
            continue;
        }
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                trace!(path = %path.display(), error = %e, "unreadable, skipped");
                continue;
            }
        };

        if react && matches!(path.extension().and_then(|e| e.to_str()), Some("jsx" | "tsx")) {
            deps.insert(JSX_DEV_RUNTIME.to_string());
        }

        let dir = path.parent().unwrap_or(root);
        for import in lex_module(&source).imports {
            let spec = import.specifier.as_str();
            if is_external_type(spec) {
                continue;
            }
            if is_bare_import(spec) {
                deps.insert(spec.to_string());
                continue;
            }
            let base = if let Some(rest) = spec.strip_prefix('/') {
                root.join(rest)
            } else if spec.starts_with('.') {
                dir.join(spec)
            } else {
                continue;
            };
            if let Some(file) = find_with_extensions(&normalize(&base)) {
                if !is_external_type(&file.to_string_lossy()) {
                    queue.push_back(file);
                }
            }
        }
    }

    Ok(deps)
}
