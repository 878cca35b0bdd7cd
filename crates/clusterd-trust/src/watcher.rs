//! inotify-driven reload: any `*.yaml` event under the truststore directory
//! triggers a full `Truststore::reload` under the write lock (spec §4.1,
//! §5 "updates are atomic").

use std::sync::Arc;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::store::Truststore;

/// Handle to a running filesystem watcher. Dropping it stops the watch.
pub struct TruststoreWatcher {
    _watcher: RecommendedWatcher,
}

impl TruststoreWatcher {
    /// Start watching `store`'s directory in a background task.
    pub fn spawn(store: Arc<Truststore>, dir: impl Into<std::path::PathBuf>) -> notify::Result<Self> {
        let dir = dir.into();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Result<Event>>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(event) => {
                        if !touches_yaml(&event) {
                            continue;
                        }
                        debug!(?event.kind, "truststore directory changed, reloading");
                        if let Err(e) = store.reload() {
                            warn!("truststore reload failed: {e}");
                        }
                    }
                    Err(e) => warn!("truststore watch error: {e}"),
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

fn touches_yaml(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.extension().and_then(|e| e.to_str()) == Some("yaml"))
}
