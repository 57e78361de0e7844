//! `nobundle build` command implementation.
//!
//! Production builds are delegated to `esbuild`; this command only locates it,
//! runs it over the configured entry and reports what was written.

use miette::{miette, IntoDiagnostic, Result};
use nobundle_core::dev::EsbuildBundler;
use nobundle_core::DevConfig;
use nobundle_util::path::to_slash;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub root: PathBuf,
    /// Output directory, relative to the root unless absolute.
    pub outdir: PathBuf,
}

/// Run the build command.
pub async fn run(action: BuildAction) -> Result<()> {
    let config = DevConfig::load(&action.root).into_diagnostic()?;
    let entry = config.entry_path();
    if !entry.is_file() {
        return Err(miette!("entry module not found: {}", entry.display()));
    }
    let outdir = config.root.join(&action.outdir);

    let build_out = outdir.clone();
    let root = config.root.clone();
    tokio::task::spawn_blocking(move || {
        let bundler = EsbuildBundler::locate(&root)?;
        info!(bundler = %bundler.binary().display(), "building {}", entry.display());
        bundler.build(&entry, &build_out)
    })
    .await
    .into_diagnostic()?
    .into_diagnostic()?;

    let outputs = collect_outputs(&outdir);
    for (path, size) in &outputs {
        info!("  {path}  {}", format_size(*size));
    }
    info!("built {} file(s) into {}", outputs.len(), outdir.display());
    Ok(())
}

/// Files under `outdir` as slash paths relative to it, with their sizes.
fn collect_outputs(outdir: &Path) -> Vec<(String, u64)> {
    let mut outputs: Vec<(String, u64)> = WalkDir::new(outdir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let size = entry.metadata().ok()?.len();
            let relative = entry.path().strip_prefix(outdir).ok()?;
            Some((to_slash(relative), size))
        })
        .collect();
    outputs.sort();
    outputs
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else {
        format!("{:.1} kB", bytes as f64 / 1024.0)
    }
}
