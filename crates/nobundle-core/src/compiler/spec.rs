//! Transpilation options.

use std::path::PathBuf;

/// Options for transpiling one module.
///
/// JSX always uses the automatic runtime and output targets ES2022.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TranspileSpec {
    /// Source path; its extension selects TS and JSX syntax.
    pub input_path: PathBuf,
    /// Emit React Fast Refresh registrations (`$RefreshReg$`/`$RefreshSig$`).
    pub react_refresh: bool,
}

impl TranspileSpec {
    #[must_use]
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            react_refresh: false,
        }
    }

    #[must_use]
    pub fn with_react_refresh(mut self, enabled: bool) -> Self {
        self.react_refresh = enabled;
        self
    }
}

/// Output of a transpile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileOutput {
    pub code: String,
}

impl TranspileOutput {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}
