//! Package entry resolution and proxy generation.

use super::PreBundleError;
use crate::dev::lexer::lex_module;
use nobundle_util::path::to_slash;
use regex_lite::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, trace};

/// Export conditions tried, in order, for `exports` entries.
const CONDITIONS: &[&str] = &["import", "module", "browser", "default"];

/// Split `@scope/pkg/sub` into (`@scope/pkg`, `sub`).
fn split_specifier(specifier: &str) -> (&str, Option<&str>) {
    let name_segments = if specifier.starts_with('@') { 2 } else { 1 };
    let mut end = 0;
    for (seen, (i, _)) in specifier.match_indices('/').enumerate() {
        if seen + 1 == name_segments {
            end = i;
            break;
        }
    }
    if end == 0 {
        (specifier, None)
    } else {
        (&specifier[..end], Some(&specifier[end + 1..]))
    }
}

/// Pick a target out of a conditional `exports` value.
fn pick_condition(value: &Value) -> Option<&str> {
    match value {
        Value::String(target) => Some(target),
        Value::Object(map) => CONDITIONS
            .iter()
            .find_map(|c| map.get(*c).and_then(pick_condition)),
        Value::Array(items) => items.iter().find_map(pick_condition),
        _ => None,
    }
}

fn exports_target<'a>(exports: &'a Value, subpath: &str) -> Option<&'a str> {
    match exports {
        Value::Object(map) if map.keys().any(|k| k.starts_with('.')) => {
            map.get(subpath).and_then(pick_condition)
        }
        // Shorthand: the whole value describes ".".
        other if subpath == "." => pick_condition(other),
        _ => None,
    }
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path);
    }
    let as_string = path.to_string_lossy();
    [".js", ".mjs", ".cjs", "/index.js"]
        .iter()
        .map(|ext| PathBuf::from(format!("{as_string}{ext}")))
        .find(|p| p.is_file())
}

/// Locate the real entry file for a bare specifier under `root/node_modules`.
///
/// Order: `exports` (import/module/browser/default conditions), `module`,
/// `main`, then `index.js`. Subpaths use `exports["./sub"]` or the file itself.
pub fn resolve_package_entry(root: &Path, specifier: &str) -> Result<PathBuf, PreBundleError> {
    let (name, subpath) = split_specifier(specifier);
    let package_dir = root.join("node_modules").join(name);
    let not_found = || PreBundleError::PackageNotFound {
        specifier: specifier.to_string(),
    };
    if !package_dir.is_dir() {
        return Err(not_found());
    }

    let manifest_path = package_dir.join("package.json");
    let manifest: Value = match std::fs::read_to_string(&manifest_path) {
        Ok(content) => serde_json::from_str(&content).map_err(|source| PreBundleError::PackageJson {
            path: manifest_path.clone(),
            source,
        })?,
        Err(_) => Value::Null,
    };

    let key = subpath.map_or_else(|| ".".to_string(), |s| format!("./{s}"));
    if let Some(target) = manifest.get("exports").and_then(|e| exports_target(e, &key)) {
        if let Some(path) = existing(package_dir.join(target)) {
            return Ok(path);
        }
    }

    if let Some(sub) = subpath {
        return existing(package_dir.join(sub)).ok_or_else(not_found);
    }

    ["module", "main"]
        .iter()
        .filter_map(|field| manifest.get(*field).and_then(Value::as_str))
        .find_map(|target| existing(package_dir.join(target)))
        .or_else(|| existing(package_dir.join("index.js")))
        .ok_or_else(not_found)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Export names assigned as `exports.X =` or `module.exports.X =`.
pub fn cjs_export_names_static(source: &str) -> BTreeSet<String> {
    const ASSIGNMENT: &str = r"(?:^|[^.\w$])(?:module\.)?exports\.([A-Za-z_$][\w$]*)\s*=[^=]";
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(pattern) = PATTERN.get_or_init(|| Regex::new(ASSIGNMENT).ok()).as_ref() else {
        return BTreeSet::new();
    };
    pattern
        .captures_iter(source)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Enumerate the keys of `require(entry)` with node.
fn cjs_export_names_node(node: &Path, entry: &Path) -> Option<BTreeSet<String>> {
    let output = Command::new(node)
        .arg("-e")
        .arg("console.log(JSON.stringify(Object.keys(require(process.argv[1]))))")
        .arg(entry)
        .output()
        .ok()?;
    if !output.status.success() {
        trace!(entry = %entry.display(), "node could not require entry");
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<Vec<String>>(stdout.trim())
        .ok()
        .map(|keys| keys.into_iter().collect())
}

/// Source of the proxy entry for a package whose real entry is `entry`.
///
/// ESM entries are re-exported as is. CommonJS entries re-export every
/// enumerable key of the `require`d value plus a default export.
pub fn proxy_source(entry: &Path, node: Option<&Path>) -> Result<String, PreBundleError> {
    let source = std::fs::read_to_string(entry).map_err(|e| PreBundleError::io(entry, e))?;
    let target = serde_json::to_string(&to_slash(entry))?;
    let lexed = lex_module(&source);

    if lexed.has_module_syntax {
        let mut out = format!("export * from {target};\n");
        if lexed.has_default_export {
            out.push_str(&format!("import __default from {target};\nexport default __default;\n"));
        }
        return Ok(out);
    }

    let names = node
        .and_then(|node| cjs_export_names_node(node, entry))
        .unwrap_or_else(|| cjs_export_names_static(&source));
    let names: Vec<String> = names
        .into_iter()
        .filter(|n| is_identifier(n) && n != "default" && n != "__esModule")
        .collect();
    debug!(entry = %entry.display(), exports = names.len(), "proxying commonjs entry");

    let mut out = String::new();
    if !names.is_empty() {
        out.push_str(&format!("export {{ {} }} from {target};\n", names.join(", ")));
    }
    out.push_str(&format!("export default require({target});\n"));
    Ok(out)
}
