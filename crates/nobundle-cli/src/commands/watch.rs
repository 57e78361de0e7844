//! File watcher feeding the HMR coordinator.
//!
//! notify delivers raw events on its own thread; they are forwarded to a tokio
//! task that debounces them over [`DEBOUNCE`] and keeps the last event per path.

use nobundle_core::dev::HmrCoordinator;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, trace};

pub(crate) const DEBOUNCE: Duration = Duration::from_millis(50);

const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "dist"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FileEvent {
    Changed(PathBuf),
    Removed(PathBuf),
}

impl FileEvent {
    fn path(&self) -> &Path {
        match self {
            Self::Changed(path) | Self::Removed(path) => path,
        }
    }
}

/// Watch `root` recursively. The returned watcher must be kept alive.
pub fn spawn(root: &Path, hmr: Arc<HmrCoordinator>) -> Result<RecommendedWatcher, notify::Error> {
    let (tx, rx) = mpsc::unbounded_channel::<FileEvent>();
    let filter_root = root.to_path_buf();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                for file_event in classify(&event, &filter_root) {
                    if tx.send(file_event).is_err() {
                        trace!("watch receiver closed");
                    }
                }
            }
            Err(e) => error!(error = %e, "watch error"),
        },
        Config::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    info!(root = %root.display(), "watching for changes");

    tokio::spawn(process_events(rx, hmr));
    Ok(watcher)
}

/// Skip vendored, VCS, build output and dot paths below `root`.
pub(crate) fn should_ignore(path: &Path, root: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
        }
        _ => false,
    })
}

fn classify(event: &Event, root: &Path) -> Vec<FileEvent> {
    let removed = match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => false,
        EventKind::Remove(_) => true,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter(|path| !should_ignore(path, root) && !path.is_dir())
        .map(|path| {
            // A rename reports the old name as a modify.
            if removed || !path.exists() {
                FileEvent::Removed(path.clone())
            } else {
                FileEvent::Changed(path.clone())
            }
        })
        .collect()
}

/// Keep the last event per path, in first-seen order.
fn coalesce(batch: Vec<FileEvent>) -> Vec<FileEvent> {
    let mut order: Vec<PathBuf> = Vec::new();
    let mut latest: HashMap<PathBuf, FileEvent> = HashMap::new();
    for event in batch {
        let path = event.path().to_path_buf();
        if latest.insert(path.clone(), event).is_none() {
            order.push(path);
        }
    }
    order.into_iter().filter_map(|path| latest.remove(&path)).collect()
}

pub(crate) async fn process_events(
    mut rx: mpsc::UnboundedReceiver<FileEvent>,
    hmr: Arc<HmrCoordinator>,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(Some(event)) = tokio::time::timeout(DEBOUNCE, rx.recv()).await {
            batch.push(event);
        }

        for event in coalesce(batch) {
            match event {
                FileEvent::Changed(path) => {
                    hmr.on_file_change(&path);
                }
                FileEvent::Removed(path) => {
                    hmr.on_file_remove(&path);
                }
            }
        }
    }
}
