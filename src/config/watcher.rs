//! Configuration file watcher for hot reload.
//!
//! Editors often emit several modify events for one save, so a reload is
//! only forwarded when the file text actually changed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::BridgeConfig;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<BridgeConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver of validated configurations.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<BridgeConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();
        let mut last_seen = fs::read_to_string(&path).ok();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "Config watch error");
                        return;
                    }
                };
                if !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }
                match reload_if_changed(&path, &mut last_seen) {
                    Ok(Some(config)) => {
                        tracing::info!(path = ?path, "Configuration reloaded");
                        let _ = tx.send(config);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                    }
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Re-read the file and parse it when its text differs from `last`.
fn reload_if_changed(
    path: &Path,
    last: &mut Option<String>,
) -> Result<Option<BridgeConfig>, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    if last.as_deref() == Some(content.as_str()) {
        return Ok(None);
    }
    let config = parse_config(&content)?;
    *last = Some(content);
    Ok(Some(config))
}
