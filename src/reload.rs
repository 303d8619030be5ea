//! Configuration hot reload
//!
//! A file write usually produces several change notifications. The watcher
//! keys reloads on the file's modification time, so a burst of notifications
//! for the same content reloads at most once.
//!
//! ```text
//! Watching ──event──► Debouncing(mtime) ──settled──► Reloading ──► Watching
//!     ▲                     │
//!     └──── same mtime ─────┘
//! ```
//!
//! A reload only swaps the shared config; the poller picks it up on its next
//! cycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace};

use crate::config::{SharedConfig, read_config_file};

/// Time to let a burst of notifications settle before reading the file
const SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadDecision {
    Reload,
    Noop,
}

/// Remembers the modification time of the last reload
#[derive(Debug, Default)]
pub struct ReloadDebouncer {
    last_modified: Option<SystemTime>,
}

impl ReloadDebouncer {
    pub fn new(last_modified: Option<SystemTime>) -> Self {
        Self { last_modified }
    }

    pub fn observe(&mut self, modified: SystemTime) -> ReloadDecision {
        if self.last_modified == Some(modified) {
            return ReloadDecision::Noop;
        }
        self.last_modified = Some(modified);
        ReloadDecision::Reload
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    Watching,
    Debouncing(SystemTime),
    Reloading,
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn concerns(event: &Event, path: &Path) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == path.file_name())
}

/// Watches a config file and swaps the shared config when it changes
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    reloads: Arc<AtomicUsize>,
}

impl ConfigWatcher {
    pub fn spawn(path: impl Into<PathBuf>, config: SharedConfig) -> Result<Self> {
        let path: PathBuf = path.into();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = event_tx.send(event);
            }
            Err(e) => error!("config watch error: {e}"),
        })
        .context("failed to create config watcher")?;

        // Editors often replace the file, so watch its directory.
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", dir.display()))?;

        let reloads = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(watch_loop(path, config, event_rx, reloads.clone()));

        Ok(Self {
            _watcher: watcher,
            task,
            reloads,
        })
    }

    /// Number of reloads performed so far
    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::Relaxed)
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[instrument(skip_all, fields(path = %path.display()))]
async fn watch_loop(
    path: PathBuf,
    config: SharedConfig,
    mut events: mpsc::UnboundedReceiver<Event>,
    reloads: Arc<AtomicUsize>,
) {
    let mut debouncer = ReloadDebouncer::new(modified(&path));
    let mut state = WatchState::Watching;

    loop {
        state = match state {
            WatchState::Watching => {
                let Some(event) = events.recv().await else {
                    debug!("config watcher stopped");
                    return;
                };
                if !concerns(&event, &path) {
                    continue;
                }
                trace!("config change notification: {:?}", event.kind);

                match modified(&path) {
                    Some(mtime) => WatchState::Debouncing(mtime),
                    None => WatchState::Watching,
                }
            }

            WatchState::Debouncing(mut mtime) => {
                tokio::time::sleep(SETTLE).await;
                while events.try_recv().is_ok() {}
                if let Some(latest) = modified(&path) {
                    mtime = latest;
                }

                match debouncer.observe(mtime) {
                    ReloadDecision::Reload => WatchState::Reloading,
                    ReloadDecision::Noop => {
                        trace!("config unchanged, ignoring notification");
                        WatchState::Watching
                    }
                }
            }

            WatchState::Reloading => {
                match read_config_file(&path) {
                    Ok(new_config) => {
                        config.store(Arc::new(new_config));
                        reloads.fetch_add(1, Ordering::Relaxed);
                        info!("configuration reloaded");
                    }
                    Err(e) => error!("keeping previous configuration: {e:#}"),
                }
                WatchState::Watching
            }
        };
    }
}
