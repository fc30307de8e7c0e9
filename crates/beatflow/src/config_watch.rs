//! Processor configuration file loading and live reload

use anyhow::{Context, Result};
use beatflow_core::ProcessorConfig;
use crossbeam_channel::{unbounded, Receiver};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Read and normalize a JSON configuration file
pub fn load_config(path: &Path) -> Result<ProcessorConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config = ProcessorConfig::from_json_str(&text)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    if let Err(e) = config.validate() {
        warn!("{:?}: {}", path, e);
    }
    Ok(config.normalized())
}

/// Watches one configuration file and reloads it on change
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    changes: Receiver<()>,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Start watching `path`
    pub fn new(path: &Path) -> Result<Self> {
        let (tx, changes) = unbounded();
        let watched_name = path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any
                    );
                    // Editors often replace the file, so match on the name only
                    let ours = event.paths.is_empty()
                        || event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == watched_name);
                    if relevant && ours {
                        let _ = tx.send(());
                    }
                }
                Err(e) => warn!("Config watch error: {:?}", e),
            }
        })
        .context("Failed to create config watcher")?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", dir))?;
        info!("Watching {:?} for configuration changes", path);

        Ok(Self {
            _watcher: watcher,
            changes,
            path: path.to_path_buf(),
        })
    }

    /// The reloaded configuration if the file changed since the last poll.
    ///
    /// A file that fails to load is reported and skipped, keeping the
    /// configuration in use.
    pub fn poll(&self) -> Option<ProcessorConfig> {
        let events = self.changes.try_iter().count();
        if events == 0 {
            return None;
        }
        debug!("{} change event(s) for {:?}", events, self.path);

        match load_config(&self.path) {
            Ok(config) => {
                info!("Reloaded configuration from {:?}", self.path);
                Some(config)
            }
            Err(e) => {
                warn!("Ignoring configuration change: {:#}", e);
                None
            }
        }
    }

    /// Watched file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_normalizes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("beatflow.json");
        fs::write(&path, r#"{ "band_count": 4, "gaussian_kernel_size": 4 }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.band_count, 4);
        assert_eq!(config.bands.len(), 4);
        assert_eq!(config.gaussian_kernel_size, 5);
    }

    #[test]
    fn test_load_config_reports_bad_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        fs::write(&path, "{ band_count: ").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("no/such/config.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_watcher_without_changes_yields_nothing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("beatflow.json");
        fs::write(&path, "{}").unwrap();

        let watcher = ConfigWatcher::new(&path).unwrap();
        assert_eq!(watcher.path(), path.as_path());
        // Drain anything the initial write may have queued
        let _ = watcher.poll();
        assert!(watcher.poll().is_none());
    }
}
