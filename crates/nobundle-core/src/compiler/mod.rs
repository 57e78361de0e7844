//! Compiler backend abstraction for on-demand transpilation.
//!
//! The dev server never calls SWC directly: every TS/JSX strip goes through
//! [`CompilerBackend`], so tests and alternative backends can be swapped in
//! without touching the plugin pipeline.
//!
//! ## Usage
//!
//! ```ignore
//! use nobundle_core::compiler::{CompilerBackend, SwcBackend, TranspileSpec};
//!
//! let backend = SwcBackend::new();
//! let spec = TranspileSpec::new("/project/src/App.tsx").with_react_refresh(true);
//! let output = backend.transpile(&spec, source)?;
//! ```

pub mod spec;
pub mod swc;

pub use spec::{TranspileOutput, TranspileSpec};
pub use swc::SwcBackend;

use serde::{Deserialize, Serialize};
use std::fmt;

/// A structured compile failure, pointing at a location in the source.
///
/// Produced by the compiler backend and the SFC compiler, and pushed to the
/// browser overlay by the HMR channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileError {
    /// Human-readable message.
    pub message: String,
    /// Source file (absolute id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// 1-based line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// 1-based column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl CompileError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
            line: None,
            column: None,
        }
    }

    #[must_use]
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    #[must_use]
    pub fn with_position(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(col)) => write!(f, " at {file}:{line}:{col}"),
            (Some(file), _, _) => write!(f, " in {file}"),
            _ => Ok(()),
        }
    }
}

impl std::error::Error for CompileError {}

/// Compiler backend trait for transpilation.
///
/// The trait is `Send + Sync` so one backend can serve every request thread.
pub trait CompilerBackend: Send + Sync {
    /// Backend name (e.g. "swc").
    fn name(&self) -> &'static str;

    /// Transpile `source` according to `spec`.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileError`] when the source has syntax errors or the
    /// emitted code is not valid UTF-8.
    fn transpile(
        &self,
        spec: &TranspileSpec,
        source: &str,
    ) -> Result<TranspileOutput, CompileError>;
}

/// Module the JSX transform imports in development mode.
pub const JSX_DEV_RUNTIME: &str = "react/jsx-dev-runtime";
