//! `esbuild` as the dependency bundler.

use super::{BundleEntry, DepBundler, PreBundleError};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

const NAME: &str = "esbuild";

/// Runs an `esbuild` binary from the project's `node_modules/.bin` or `PATH`.
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    binary: PathBuf,
}

impl EsbuildBundler {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Find `esbuild` for the project at `root`.
    pub fn locate(root: &Path) -> Result<Self, PreBundleError> {
        let bin_dir = root.join("node_modules").join(".bin");
        let local = ["esbuild", "esbuild.cmd", "esbuild.exe"]
            .iter()
            .map(|name| bin_dir.join(name))
            .find(|p| p.is_file());
        local
            .or_else(|| which::which(NAME).ok())
            .map(Self::new)
            .ok_or(PreBundleError::BundlerNotFound { bundler: NAME })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Production build of `entry` into `out_dir`, minified.
    pub fn build(&self, entry: &Path, out_dir: &Path) -> Result<(), PreBundleError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(entry)
            .arg("--bundle")
            .arg("--minify")
            .arg("--format=esm")
            .arg(format!("--outdir={}", out_dir.display()));
        self.run(cmd)
    }

    fn run(&self, mut cmd: Command) -> Result<(), PreBundleError> {
        debug!(command = ?cmd, "running esbuild");
        let output = cmd.output().map_err(|e| PreBundleError::io(&self.binary, e))?;
        if output.status.success() {
            return Ok(());
        }
        Err(PreBundleError::BundlerFailed {
            bundler: NAME,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Arguments for one dependency build.
fn bundle_args(entries: &[BundleEntry], out_dir: &Path) -> Vec<String> {
    let mut args: Vec<String> = entries
        .iter()
        .map(|e| format!("{}={}", e.name, e.proxy.display()))
        .collect();
    args.extend([
        "--bundle".to_string(),
        "--format=esm".to_string(),
        "--splitting".to_string(),
        "--log-level=warning".to_string(),
        "--define:process.env.NODE_ENV=\"development\"".to_string(),
        format!("--outdir={}", out_dir.display()),
    ]);
    args
}

impl DepBundler for EsbuildBundler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn bundle(&self, entries: &[BundleEntry], out_dir: &Path) -> Result<(), PreBundleError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(bundle_args(entries, out_dir));
        self.run(cmd)
    }
}
