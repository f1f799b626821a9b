use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::domain::{AppConfig, DesignResource, DomainError};
use crate::ports::ConfigStore;

const APP_DIR: &str = "Refyna";

/// TOML configuration store rooted in the OS config directory.
pub struct TomlConfigStore {
    data_dir: PathBuf,
}

impl TomlConfigStore {
    /// Store under the platform config dir, e.g. `~/.config/Refyna/` on Linux
    /// or `~/Library/Application Support/Refyna/` on macOS.
    pub fn new() -> Result<Self, DomainError> {
        let data_dir = dirs::config_dir()
            .map(|p| p.join(APP_DIR))
            .ok_or_else(|| DomainError::Config("Could not find application config directory".to_string()))?;
        Self::with_data_dir(data_dir)
    }

    /// Store rooted at an explicit directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        debug!(data_dir = ?data_dir, "ConfigStore initialized");
        Ok(Self { data_dir })
    }

    fn resources_path(&self) -> PathBuf {
        self.data_dir.join("resources.json")
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<AppConfig, DomainError> {
        let config_path = self.config_path();

        if !config_path.exists() {
            info!(path = ?config_path, "Configuration file not found, creating default");
            let config = AppConfig::new();
            self.save(&config)?;
            return Ok(config);
        }

        let content = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        debug!(path = ?config_path, "Configuration loaded");
        Ok(config)
    }

    fn save(&self, config: &AppConfig) -> Result<(), DomainError> {
        let config_path = self.config_path();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&config_path, content)?;

        info!(path = ?config_path, "Configuration saved");
        Ok(())
    }

    fn load_resources(&self) -> Result<Vec<DesignResource>, DomainError> {
        let path = self.resources_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }

    fn save_resources(&self, resources: &[DesignResource]) -> Result<(), DomainError> {
        let path = self.resources_path();
        fs::write(&path, serde_json::to_string_pretty(resources)?)?;
        info!(path = ?path, count = resources.len(), "Design resources saved");
        Ok(())
    }

    fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
