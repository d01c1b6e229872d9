//! Configuration management for TierCache
//!
//! Settings live in a TOML file. A missing file is created with defaults;
//! every loaded file is validated before use.

use crate::cache::backend::BackendKind;
use crate::monitoring::logging::LoggingConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCacheConfig {
    /// Cache settings
    pub cache: CacheSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Backend implementation
    pub backend: BackendKind,
    /// Prepended to every key handed to the facade
    pub prefix: String,
    /// Database file for the file backend
    pub file_path: PathBuf,
    /// Encoded values of at least this many bytes are gzip-compressed
    pub compression_threshold: usize,
    /// Lifetime of read-overlay entries in seconds
    pub overlay_ttl_secs: u64,
    /// Period of the expired-key sweep in seconds
    pub sweep_interval_secs: u64,
    /// Maximum keys reclaimed per sweep
    pub sweep_batch_limit: usize,
    /// Period of database compaction in seconds
    pub compact_interval_secs: u64,
    /// Page cache handed to the storage engine (engine default when unset)
    pub engine_cache_bytes: Option<usize>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            prefix: String::new(),
            file_path: PathBuf::from("cache/cache.db"),
            compression_threshold: 4096,
            overlay_ttl_secs: 300,
            sweep_interval_secs: 300,
            sweep_batch_limit: 1000,
            compact_interval_secs: 24 * 60 * 60,
            engine_cache_bytes: None,
        }
    }
}

impl CacheSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn compact_interval(&self) -> Duration {
        Duration::from_secs(self.compact_interval_secs)
    }
}

/// Configuration manager
pub struct ConfigManager {
    config: Arc<RwLock<TierCacheConfig>>,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load `config_path`, writing defaults there first if it does not exist
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_config(&config_path)?
        } else {
            let default_config = TierCacheConfig::default();
            Self::save_config(&config_path, &default_config)?;
            info!("Wrote default configuration to {}", config_path.display());
            default_config
        };

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get current configuration
    pub async fn get_config(&self) -> TierCacheConfig {
        self.config.read().await.clone()
    }

    /// Apply `updater`, validate the result and persist it
    pub async fn update_config<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut TierCacheConfig) -> Result<()>,
    {
        let mut config = self.config.write().await;
        let mut updated = config.clone();
        updater(&mut updated)?;
        Self::validate_config(&updated)?;
        Self::save_config(&self.config_path, &updated)?;
        *config = updated;

        info!("Configuration updated");
        Ok(())
    }

    /// Reload configuration from file
    pub async fn reload_config(&self) -> Result<()> {
        let new_config = Self::load_config(&self.config_path)?;
        *self.config.write().await = new_config;

        info!("Configuration reloaded from file");
        Ok(())
    }

    /// Validate configuration
    pub fn validate_config(config: &TierCacheConfig) -> Result<()> {
        let cache = &config.cache;

        if cache.backend == BackendKind::File && cache.file_path.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("File backend requires a file path"));
        }

        if cache.compression_threshold == 0 {
            return Err(anyhow::anyhow!("Compression threshold cannot be 0"));
        }

        if cache.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("Sweep interval cannot be 0"));
        }

        if cache.sweep_batch_limit == 0 {
            return Err(anyhow::anyhow!("Sweep batch limit cannot be 0"));
        }

        if cache.compact_interval_secs == 0 {
            return Err(anyhow::anyhow!("Compaction interval cannot be 0"));
        }

        if config.logging.level.parse::<tracing::Level>().is_err() {
            return Err(anyhow::anyhow!("Unknown log level: {}", config.logging.level));
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn load_config(path: &Path) -> Result<TierCacheConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: TierCacheConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save_config(path: &Path, config: &TierCacheConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }

        let content = toml::to_string_pretty(config)
            .context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = TierCacheConfig::default();
        assert_eq!(config.cache.backend, BackendKind::File);
        assert_eq!(config.cache.file_path, PathBuf::from("cache/cache.db"));
        assert_eq!(config.cache.compression_threshold, 4096);
        assert_eq!(config.cache.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.cache.compact_interval(), Duration::from_secs(86400));
    }

    #[test]
    fn test_config_validation() {
        let mut config = TierCacheConfig::default();
        assert!(ConfigManager::validate_config(&config).is_ok());

        config.cache.sweep_batch_limit = 0;
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = TierCacheConfig::default();
        config.logging.level = "LOUD".to_string();
        assert!(ConfigManager::validate_config(&config).is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: TierCacheConfig = toml::from_str(
            r#"
            [cache]
            backend = "memory"
            prefix = "app:"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.backend, BackendKind::Memory);
        assert_eq!(config.cache.prefix, "app:");
        assert_eq!(config.cache.sweep_batch_limit, 1000);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[tokio::test]
    async fn test_config_manager() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("conf").join("tiercache.toml");

        let manager = ConfigManager::new(config_path.clone()).unwrap();
        assert!(config_path.exists());
        assert_eq!(manager.get_config().await, TierCacheConfig::default());

        // A second manager reads back what the first one wrote
        let reopened = ConfigManager::new(config_path).unwrap();
        assert_eq!(reopened.get_config().await, TierCacheConfig::default());
    }

    #[tokio::test]
    async fn test_config_update() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("tiercache.toml");
        let manager = ConfigManager::new(config_path.clone()).unwrap();

        manager
            .update_config(|config| {
                config.cache.prefix = "svc:".to_string();
                config.logging.level = "DEBUG".to_string();
                Ok(())
            })
            .await
            .unwrap();

        let loaded = ConfigManager::load_config(&config_path).unwrap();
        assert_eq!(loaded.cache.prefix, "svc:");
        assert_eq!(loaded.logging.level, "DEBUG");

        // Invalid updates are rejected and leave the file untouched
        let rejected = manager
            .update_config(|config| {
                config.cache.sweep_interval_secs = 0;
                Ok(())
            })
            .await;
        assert!(rejected.is_err());
        assert_eq!(manager.get_config().await.cache.sweep_interval_secs, 300);
        manager.reload_config().await.unwrap();
        assert_eq!(manager.get_config().await.cache.prefix, "svc:");
    }
}
