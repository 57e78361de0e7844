//! Dev server configuration.
//!
//! Loaded from an optional `nobundle.config.json` at the project root; CLI
//! flags are layered on top with the `with_*` setters.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file looked up in the project root.
pub const CONFIG_FILE: &str = "nobundle.config.json";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default HMR WebSocket port.
pub const DEFAULT_HMR_PORT: u16 = 24678;

/// UI framework the built-in plugin set is assembled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    #[default]
    React,
    Vue,
}

impl Framework {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::React => "react",
            Self::Vue => "vue",
        }
    }

    /// Entry module scanned by the pre-bundler when none is configured.
    #[must_use]
    pub fn default_entry(&self) -> &'static str {
        match self {
            Self::React => "src/main.tsx",
            Self::Vue => "src/main.ts",
        }
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "react" => Ok(Self::React),
            "vue" => Ok(Self::Vue),
            other => Err(format!("unknown framework '{other}' (expected 'react' or 'vue')")),
        }
    }
}

/// Dev server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    /// Project root (not read from the file; set by the caller).
    #[serde(skip)]
    pub root: PathBuf,
    pub port: u16,
    pub hmr_port: u16,
    pub host: String,
    pub framework: Framework,
    /// Entry module, relative to the root.
    pub entry: Option<PathBuf>,
    /// Secondary static root, relative to the root.
    pub public_dir: PathBuf,
    pub open: bool,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            port: DEFAULT_PORT,
            hmr_port: DEFAULT_HMR_PORT,
            host: "localhost".to_string(),
            framework: Framework::default(),
            entry: None,
            public_dir: PathBuf::from("public"),
            open: false,
        }
    }
}

impl DevConfig {
    /// Load `nobundle.config.json` from `root`, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let path = root.join(CONFIG_FILE);
        let mut config = if path.is_file() {
            let content = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str::<Self>(&content)
                .map_err(|source| Error::ConfigParse { path, source })?
        } else {
            Self::default()
        };
        config.root = root.to_path_buf();
        Ok(config)
    }

    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_hmr_port(mut self, port: u16) -> Self {
        self.hmr_port = port;
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_framework(mut self, framework: Framework) -> Self {
        self.framework = framework;
        self
    }

    #[must_use]
    pub fn with_entry(mut self, entry: impl Into<PathBuf>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    #[must_use]
    pub fn with_open(mut self, open: bool) -> Self {
        self.open = open;
        self
    }

    /// Absolute path of the entry module.
    #[must_use]
    pub fn entry_path(&self) -> PathBuf {
        let entry = self
            .entry
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.framework.default_entry()));
        if entry.is_absolute() {
            entry
        } else {
            self.root.join(entry)
        }
    }

    /// Absolute path of the public-assets root.
    #[must_use]
    pub fn public_path(&self) -> PathBuf {
        self.root.join(&self.public_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempdir().unwrap();
        let config = DevConfig::load(dir.path()).unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.hmr_port, 24678);
        assert_eq!(config.framework, Framework::React);
        assert_eq!(config.entry_path(), dir.path().join("src/main.tsx"));
        assert_eq!(config.public_path(), dir.path().join("public"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "framework": "vue", "port": 5173 }"#,
        )
        .unwrap();

        let config = DevConfig::load(dir.path()).unwrap();
        assert_eq!(config.framework, Framework::Vue);
        assert_eq!(config.port, 5173);
        assert_eq!(config.hmr_port, DEFAULT_HMR_PORT);
        assert_eq!(config.entry_path(), dir.path().join("src/main.ts"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ port: }").unwrap();

        let err = DevConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_builder_overrides() {
        let config = DevConfig::default()
            .with_port(8080)
            .with_hmr_port(9000)
            .with_host("0.0.0.0")
            .with_framework(Framework::Vue)
            .with_entry("app/index.ts")
            .with_open(true);

        assert_eq!(config.port, 8080);
        assert_eq!(config.hmr_port, 9000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.framework, Framework::Vue);
        assert_eq!(config.entry, Some(PathBuf::from("app/index.ts")));
        assert!(config.open);
    }

    #[test]
    fn test_framework_from_str() {
        assert_eq!("vue".parse::<Framework>().unwrap(), Framework::Vue);
        assert!("svelte".parse::<Framework>().is_err());
    }
}
