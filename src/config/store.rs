use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::StreamConfig;
use crate::error::{PipelineError, Result};

/// Configuration store backed by a JSON file
///
/// Uses `ArcSwap` for lock-free reads so the capture and encode threads can
/// look at the current configuration without contending with writers.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    /// Lock-free cache of the last persisted configuration
    cache: Arc<ArcSwap<StreamConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub path: PathBuf,
}

impl ConfigStore {
    /// Open the store, creating the file with defaults when it does not exist
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let config = Self::load_config(path).await?;
        let cache = Arc::new(ArcSwap::from_pointee(config));
        let (change_tx, _) = broadcast::channel(16);

        Ok(Self {
            path: path.to_path_buf(),
            cache,
            change_tx,
        })
    }

    async fn load_config(path: &Path) -> Result<StreamConfig> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => {
                let config: StreamConfig = serde_json::from_str(&json)
                    .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No configuration at {}, writing defaults", path.display());
                let config = StreamConfig::default();
                Self::save_config_to_file(path, &config).await?;
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist through a temporary sibling so readers never see a torn file
    async fn save_config_to_file(path: &Path, config: &StreamConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<StreamConfig> {
        self.cache.load_full()
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the entire configuration
    pub async fn set(&self, config: StreamConfig) -> Result<()> {
        config.validate()?;
        Self::save_config_to_file(&self.path, &config).await?;
        self.cache.store(Arc::new(config));

        let _ = self.change_tx.send(ConfigChange {
            path: self.path.clone(),
        });

        Ok(())
    }

    /// Update configuration with a closure
    ///
    /// Read-modify-write: concurrent updates are last-writer-wins. The new
    /// value is validated and persisted before the cache is swapped, so a
    /// rejected update leaves both untouched.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut StreamConfig),
    {
        let current = self.cache.load();
        let mut config = (**current).clone();
        f(&mut config);
        self.set(config).await
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }
}
