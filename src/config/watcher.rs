//! Configuration file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Config watcher that monitors file changes and sends reload notifications
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Create a new config watcher for the specified file
    ///
    /// Returns the watcher together with the initial configuration.
    pub async fn new(config_path: impl Into<PathBuf>) -> Result<(Self, AppConfig)> {
        let config_path = config_path.into();
        let (tx, rx) = mpsc::channel(10);

        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        let config_path_clone = config_path.clone();

        // notify callbacks run on their own OS thread, not in Tokio context
        let runtime_handle = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        debug!("Config file modified: {:?}", event.paths);

                        let config_path = config_path_clone.clone();
                        let tx = tx.clone();

                        runtime_handle.spawn(async move {
                            // Debounce: wait a bit for file writes to complete
                            tokio::time::sleep(Duration::from_millis(100)).await;

                            match AppConfig::load(&config_path).await {
                                Ok(new_config) => {
                                    info!("Configuration reloaded successfully");
                                    if let Err(e) = tx.send(new_config).await {
                                        error!("Failed to send config update: {}", e);
                                    }
                                }
                                Err(e) => {
                                    warn!("Failed to reload config (keeping old config): {:#}", e);
                                }
                            }
                        });
                    }
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path.display()))?;

        info!("Config file watcher started for: {}", config_path.display());

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            initial_config,
        ))
    }

    /// Wait for the next config update
    /// Returns None if the watcher has been closed
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_watcher_basic() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("test-config.yaml");

        let initial_config = r#"
midi_devices:
  - device_name: "pad"
    namespace: "first"
"#;

        fs::write(&config_path, initial_config)?;

        let (mut watcher, config) = ConfigWatcher::new(&config_path).await?;

        assert_eq!(config.midi_devices[0].namespace, "first");

        let modified_config = r#"
midi_devices:
  - device_name: "pad"
    namespace: "second"
"#;

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&config_path, modified_config)?;

        let new_config = tokio::time::timeout(Duration::from_secs(2), watcher.next_config())
            .await?
            .expect("watcher should deliver the reloaded config");

        assert_eq!(new_config.midi_devices[0].namespace, "second");

        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_initial_config() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("broken.yaml");
        fs::write(&config_path, "midi_devices:\n  - device_name: \"\"\n    namespace: \"x\"\n")?;

        assert!(ConfigWatcher::new(&config_path).await.is_err());
        Ok(())
    }
}
