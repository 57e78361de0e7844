//! SWC compiler backend.
//!
//! Strips TypeScript, lowers JSX and, when asked, injects React Fast Refresh
//! registrations. Output keeps ES module syntax; the browser loads it as-is.

#![allow(clippy::default_trait_access)]

use super::{CompileError, CompilerBackend, TranspileOutput, TranspileSpec};
use std::path::Path;

/// SWC-based compiler backend.
///
/// `SwcBackend` is `Send + Sync`; each `transpile` call builds its own
/// `SourceMap` and `Globals`, so calls on different threads do not interact.
#[derive(Debug, Clone, Default)]
pub struct SwcBackend {
    _private: (),
}

impl SwcBackend {
    #[must_use]
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn extension(path: &Path) -> String {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }

    fn is_typescript(path: &Path) -> bool {
        matches!(Self::extension(path).as_str(), "ts" | "tsx" | "mts" | "cts")
    }

    fn is_jsx(path: &Path) -> bool {
        matches!(Self::extension(path).as_str(), "jsx" | "tsx")
    }
}

impl CompilerBackend for SwcBackend {
    fn name(&self) -> &'static str {
        "swc"
    }

    fn transpile(
        &self,
        spec: &TranspileSpec,
        source: &str,
    ) -> Result<TranspileOutput, CompileError> {
        if source.is_empty() {
            return Ok(TranspileOutput::new(""));
        }
        let is_ts = Self::is_typescript(&spec.input_path);
        let is_jsx = Self::is_jsx(&spec.input_path);
        compile_with_swc(spec, source, is_ts, is_jsx)
    }
}

fn compile_with_swc(
    spec: &TranspileSpec,
    source: &str,
    is_ts: bool,
    is_jsx: bool,
) -> Result<TranspileOutput, CompileError> {
    use swc_common::{
        comments::SingleThreadedComments, sync::Lrc, FileName, Globals, Mark, SourceMap, Spanned,
        GLOBALS,
    };
    use swc_ecma_ast::{EsVersion, Program};
    use swc_ecma_codegen::{text_writer::JsWriter, Emitter};
    use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax};
    use swc_ecma_transforms_base::{fixer::fixer, hygiene::hygiene, resolver};
    use swc_ecma_transforms_react::{react, Options as ReactOptions, RefreshOptions, Runtime};
    use swc_ecma_transforms_typescript::strip;
    use swc_ecma_visit::FoldWith;

    let file_label = spec.input_path.to_string_lossy().replace('\\', "/");
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(file_label.clone())),
        source.to_string(),
    );

    let syntax = if is_ts {
        Syntax::Typescript(TsSyntax {
            tsx: is_jsx,
            decorators: true,
            ..Default::default()
        })
    } else {
        Syntax::Es(EsSyntax {
            jsx: is_jsx,
            decorators: true,
            ..Default::default()
        })
    };

    let target = EsVersion::Es2022;

    let comments = SingleThreadedComments::default();
    let lexer = Lexer::new(syntax, target, StringInput::from(&*fm), Some(&comments));
    let mut parser = Parser::new_from(lexer);

    let located = |e: &swc_ecma_parser::error::Error| {
        let loc = cm.lookup_char_pos(e.span().lo);
        CompileError::new(e.kind().msg().to_string())
            .with_file(file_label.clone())
            .with_position(
                u32::try_from(loc.line).unwrap_or(u32::MAX),
                u32::try_from(loc.col_display + 1).unwrap_or(u32::MAX),
            )
    };

    let module = parser.parse_module().map_err(|e| located(&e))?;
    if let Some(first) = parser.take_errors().first() {
        return Err(located(first));
    }

    let output = GLOBALS.set(&Globals::default(), || {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();

        let mut program = Program::Module(module);
        program = program.fold_with(&mut resolver(unresolved_mark, top_level_mark, is_ts));
        if is_ts {
            program = program.fold_with(&mut strip(unresolved_mark, top_level_mark));
        }

        let mut module = match program {
            Program::Module(m) => m,
            Program::Script(s) => swc_ecma_ast::Module {
                span: s.span,
                body: s.body.into_iter().map(swc_ecma_ast::ModuleItem::Stmt).collect(),
                shebang: s.shebang,
            },
        };

        if is_jsx {
            let react_options = ReactOptions {
                runtime: Some(Runtime::Automatic),
                import_source: Some("react".to_string()),
                development: Some(spec.react_refresh),
                refresh: spec.react_refresh.then(RefreshOptions::default),
                ..Default::default()
            };
            module = module.fold_with(&mut react(
                cm.clone(),
                Some(&comments),
                react_options,
                top_level_mark,
                unresolved_mark,
            ));
        }

        module = module.fold_with(&mut hygiene());
        module.fold_with(&mut fixer(Some(&comments)))
    });

    let mut buf = Vec::new();
    {
        let writer = JsWriter::new(cm.clone(), "\n", &mut buf, None);
        let mut emitter = Emitter {
            cfg: swc_ecma_codegen::Config::default().with_target(target),
            cm: cm.clone(),
            comments: Some(&comments),
            wr: writer,
        };
        emitter.emit_module(&output).map_err(|e| {
            CompileError::new(format!("Failed to emit: {e}")).with_file(file_label.clone())
        })?;
    }

    let code = String::from_utf8(buf).map_err(|e| {
        CompileError::new(format!("Invalid UTF-8 output: {e}")).with_file(file_label)
    })?;
    Ok(TranspileOutput::new(code))
}
