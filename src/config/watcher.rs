//! Configuration file watcher for hot-reload support
//!
//! Publishes fresh snapshots into a watch channel that every actor holds
//! a receiver for. A snapshot that fails to parse is dropped and the old
//! one stays current.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Delay between a modify event and the reload, so editors that write in
/// multiple syscalls are read once, complete.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the config file and republishes parsed snapshots.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Load the initial config and start watching `path`.
    ///
    /// Returns the watcher (keep it alive) and the receiver actors
    /// subscribe to. If the file does not exist yet, defaults are
    /// published and the parent directory is watched for its creation.
    pub async fn spawn(path: PathBuf) -> Result<(Self, watch::Receiver<Arc<AppConfig>>)> {
        let initial = AppConfig::load_or_default(&path).await?;
        let (tx, rx) = watch::channel(Arc::new(initial));

        // notify callbacks arrive on their own OS thread; capture the
        // runtime handle now so reloads can be spawned from there.
        let runtime = tokio::runtime::Handle::current();
        let reload_path = path.clone();

        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                            return;
                        }
                        debug!("config file changed: {:?}", event.paths);

                        let path = reload_path.clone();
                        let tx = tx.clone();
                        runtime.spawn(async move {
                            tokio::time::sleep(RELOAD_DEBOUNCE).await;
                            match AppConfig::load(&path).await {
                                Ok(new_config) => {
                                    info!("configuration reloaded");
                                    let _ = tx.send(Arc::new(new_config));
                                }
                                Err(err) => {
                                    warn!(%err, "config reload failed; keeping previous config");
                                }
                            }
                        });
                    }
                    Err(err) => error!(%err, "config watch error"),
                }
            })?;

        // Watch the containing directory: editors that replace the file
        // atomically would otherwise detach a file-level watch.
        let watch_target = if path.is_file() {
            path.parent().map(PathBuf::from).unwrap_or_else(|| path.clone())
        } else {
            path.parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
        };
        watcher
            .watch(&watch_target, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch config path: {}", watch_target.display()))?;

        info!("config watcher started for {}", path.display());

        Ok((Self { _watcher: watcher }, rx))
    }
}
