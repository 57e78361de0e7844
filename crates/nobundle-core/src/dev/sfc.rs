//! Vue single-file component support.
//!
//! Block splitting is done natively: only the top-level `<template>`,
//! `<script>`, `<script setup>` and `<style>` blocks are extracted, along with
//! their attributes. Compiling the blocks is delegated to an [`SfcCompiler`],
//! by default `@vue/compiler-sfc` running under node.

use crate::compiler::CompileError;
use nobundle_util::hash::short_hash;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SfcError {
    #[error("unclosed <{tag}> block starting on line {line}")]
    Unclosed { tag: String, line: u32 },

    #[error("duplicate <{tag}> block on line {line}")]
    Duplicate { tag: String, line: u32 },

    #[error("component has neither <template> nor <script>")]
    Empty,
}

impl SfcError {
    /// Convert to a located compile error for `filename`.
    #[must_use]
    pub fn into_compile_error(self, filename: &str) -> CompileError {
        let line = match &self {
            Self::Unclosed { line, .. } | Self::Duplicate { line, .. } => Some(*line),
            Self::Empty => None,
        };
        let error = CompileError::new(self.to_string()).with_file(filename);
        match line {
            Some(line) => error.with_position(line, 1),
            None => error,
        }
    }
}

/// One top-level block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SfcBlock {
    pub content: String,
    /// Attributes; valueless attributes map to `""`.
    pub attrs: BTreeMap<String, String>,
    /// 1-based line of the opening tag.
    pub line: u32,
}

impl SfcBlock {
    pub fn lang(&self) -> Option<&str> {
        self.attrs.get("lang").map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }
}

/// A parsed component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SfcDescriptor {
    pub filename: String,
    /// Stable component id: short hash of the absolute filename.
    pub id: String,
    pub source: String,
    pub template: Option<SfcBlock>,
    pub script: Option<SfcBlock>,
    pub script_setup: Option<SfcBlock>,
    pub styles: Vec<SfcBlock>,
}

impl SfcDescriptor {
    pub fn has_scoped_style(&self) -> bool {
        self.styles.iter().any(|s| s.has_attr("scoped"))
    }

    /// Language of the script blocks (`ts`, `tsx`, ...), if declared.
    pub fn script_lang(&self) -> Option<&str> {
        self.script_setup
            .as_ref()
            .and_then(SfcBlock::lang)
            .or_else(|| self.script.as_ref().and_then(SfcBlock::lang))
    }
}

fn line_at(source: &str, offset: usize) -> u32 {
    u32::try_from(source[..offset].matches('\n').count() + 1).unwrap_or(u32::MAX)
}

fn parse_attrs(raw: &str) -> BTreeMap<String, String> {
    const PATTERN: &str =
        r#"([A-Za-z_:@.-][\w:@.-]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#;
    static ATTR: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = ATTR.get_or_init(|| Regex::new(PATTERN).ok()).as_ref() else {
        return BTreeMap::new();
    };
    re.captures_iter(raw)
        .filter_map(|c| {
            let name = c.get(1)?.as_str().to_string();
            let value = c
                .get(2)
                .or_else(|| c.get(3))
                .or_else(|| c.get(4))
                .map_or("", |m| m.as_str());
            Some((name, value.to_string()))
        })
        .collect()
}

/// Name at `<` (ASCII letters, digits and dashes).
fn tag_name(bytes: &[u8], lt: usize) -> &str {
    let start = lt + 1;
    let end = bytes[start..]
        .iter()
        .position(|b| !(b.is_ascii_alphanumeric() || *b == b'-'))
        .map_or(bytes.len(), |p| start + p);
    std::str::from_utf8(&bytes[start..end]).unwrap_or("")
}

/// Offset of the matching `</tag>`, counting nested `<tag` openings.
fn find_close(source: &str, from: usize, tag: &str, nested: bool) -> Option<usize> {
    let open = format!("<{tag}");
    let close = format!("</{tag}");
    let mut depth = 0usize;
    let mut i = from;
    loop {
        let next_close = source[i..].find(&close)? + i;
        if nested {
            let mut j = i;
            while let Some(pos) = source[j..next_close].find(&open) {
                let at = j + pos;
                let after = source.as_bytes().get(at + open.len()).copied();
                if matches!(after, Some(b'>' | b' ' | b'\n' | b'\t' | b'\r' | b'/')) {
                    depth += 1;
                }
                j = at + open.len();
            }
        }
        if depth == 0 {
            return Some(next_close);
        }
        depth -= 1;
        i = next_close + close.len();
    }
}

/// Split `source` into its top-level blocks.
pub fn parse_sfc(source: &str, filename: &str) -> Result<SfcDescriptor, SfcError> {
    let bytes = source.as_bytes();
    let mut descriptor = SfcDescriptor {
        filename: filename.to_string(),
        id: short_hash(filename),
        source: source.to_string(),
        ..SfcDescriptor::default()
    };

    let mut i = 0;
    while let Some(pos) = source[i..].find('<') {
        let lt = i + pos;
        if source[lt..].starts_with("<!--") {
            i = source[lt..].find("-->").map_or(source.len(), |end| lt + end + 3);
            continue;
        }
        let tag = tag_name(bytes, lt);
        if tag.is_empty() {
            i = lt + 1;
            continue;
        }
        let line = line_at(source, lt);
        let unclosed = || SfcError::Unclosed {
            tag: tag.to_string(),
            line,
        };
        let gt = source[lt..].find('>').map(|p| lt + p).ok_or_else(unclosed)?;
        let attrs = parse_attrs(&source[lt + 1 + tag.len()..gt]);

        if source[..gt].ends_with('/') {
            i = gt + 1;
            continue;
        }
        let content_start = gt + 1;
        let content_end =
            find_close(source, content_start, tag, tag == "template").ok_or_else(unclosed)?;
        let close_end = source[content_end..]
            .find('>')
            .map_or(source.len(), |p| content_end + p + 1);

        let block = SfcBlock {
            content: source[content_start..content_end].to_string(),
            attrs,
            line,
        };
        let duplicate = |tag: &str| SfcError::Duplicate {
            tag: tag.to_string(),
            line,
        };
        match tag {
            "template" if descriptor.template.is_some() => return Err(duplicate("template")),
            "template" => descriptor.template = Some(block),
            "script" if block.has_attr("setup") => {
                if descriptor.script_setup.is_some() {
                    return Err(duplicate("script setup"));
                }
                descriptor.script_setup = Some(block);
            }
            "script" if descriptor.script.is_some() => return Err(duplicate("script")),
            "script" => descriptor.script = Some(block),
            "style" => descriptor.styles.push(block),
            _ => {}
        }
        i = close_end;
    }

    if descriptor.template.is_none()
        && descriptor.script.is_none()
        && descriptor.script_setup.is_none()
    {
        return Err(SfcError::Empty);
    }
    Ok(descriptor)
}

/// Compiled script and template of one component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledSfc {
    /// Script module; still contains its `export default`.
    pub script: String,
    /// Render module exporting `render`, when there is a template.
    pub template: Option<String>,
}

/// Framework compiler for SFC blocks.
pub trait SfcCompiler: Send + Sync {
    fn compile(&self, descriptor: &SfcDescriptor) -> Result<CompiledSfc, CompileError>;

    /// Compile `descriptor.styles[index]` to plain CSS.
    fn compile_style(
        &self,
        descriptor: &SfcDescriptor,
        index: usize,
    ) -> Result<String, CompileError>;
}

const NODE_DRIVER: &str = r#"
const { root, mode, index, descriptor: d } = JSON.parse(require('fs').readFileSync(0, 'utf8'));
const sfc = require(require.resolve('@vue/compiler-sfc', { paths: [root] }));
const { descriptor, errors } = sfc.parse(d.source, { filename: d.filename });
const fail = (e) => {
  process.stdout.write(JSON.stringify({ error: String(e && e.message || e) }));
  process.exit(0);
};
if (errors.length) fail(errors[0]);
const scoped = descriptor.styles.some((s) => s.scoped);
try {
  if (mode === 'style') {
    const style = descriptor.styles[index];
    const out = sfc.compileStyle({
      source: style.content, filename: d.filename, id: `data-v-${d.id}`, scoped: !!style.scoped,
    });
    if (out.errors.length) fail(out.errors[0]);
    process.stdout.write(JSON.stringify({ css: out.code }));
  } else {
    let script = 'export default {}';
    let bindings;
    if (descriptor.script || descriptor.scriptSetup) {
      const out = sfc.compileScript(descriptor, { id: d.id });
      script = out.content;
      bindings = out.bindings;
    }
    let template = null;
    if (descriptor.template) {
      const out = sfc.compileTemplate({
        source: descriptor.template.content, filename: d.filename, id: d.id, scoped,
        compilerOptions: {
          scopeId: scoped ? `data-v-${d.id}` : undefined,
          bindingMetadata: bindings,
        },
      });
      if (out.errors.length) fail(out.errors[0]);
      template = out.code;
    }
    process.stdout.write(JSON.stringify({ script, template }));
  }
} catch (e) { fail(e); }
"#;

#[derive(Serialize)]
struct DriverRequest<'a> {
    root: &'a Path,
    mode: &'static str,
    index: usize,
    descriptor: &'a SfcDescriptor,
}

#[derive(Deserialize)]
struct DriverResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    css: Option<String>,
}

/// Runs `@vue/compiler-sfc` from the project's `node_modules` under node.
#[derive(Debug, Clone)]
pub struct NodeSfcCompiler {
    node: PathBuf,
    root: PathBuf,
}

impl NodeSfcCompiler {
    pub fn new(node: PathBuf, root: PathBuf) -> Self {
        Self { node, root }
    }

    /// Use the `node` found on `PATH`.
    pub fn locate(root: PathBuf) -> Option<Self> {
        which::which("node").ok().map(|node| Self::new(node, root))
    }

    fn run(
        &self,
        mode: &'static str,
        index: usize,
        descriptor: &SfcDescriptor,
    ) -> Result<DriverResponse, CompileError> {
        let fail = |message: String| CompileError::new(message).with_file(&descriptor.filename);
        let request = serde_json::to_vec(&DriverRequest {
            root: &self.root,
            mode,
            index,
            descriptor,
        })
        .map_err(|e| fail(e.to_string()))?;

        let mut child = Command::new(&self.node)
            .arg("-e")
            .arg(NODE_DRIVER)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| fail(format!("failed to start node: {e}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&request).map_err(|e| fail(e.to_string()))?;
        }
        let output = child.wait_with_output().map_err(|e| fail(e.to_string()))?;
        if !output.status.success() {
            return Err(fail(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }

        let response: DriverResponse =
            serde_json::from_slice(&output.stdout).map_err(|e| fail(e.to_string()))?;
        match response.error {
            Some(message) => Err(fail(message)),
            None => Ok(response),
        }
    }
}

impl SfcCompiler for NodeSfcCompiler {
    fn compile(&self, descriptor: &SfcDescriptor) -> Result<CompiledSfc, CompileError> {
        let response = self.run("component", 0, descriptor)?;
        Ok(CompiledSfc {
            script: response.script.unwrap_or_else(|| "export default {}".to_string()),
            template: response.template,
        })
    }

    fn compile_style(
        &self,
        descriptor: &SfcDescriptor,
        index: usize,
    ) -> Result<String, CompileError> {
        Ok(self.run("style", index, descriptor)?.css.unwrap_or_default())
    }
}
