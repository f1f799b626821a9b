use std::path::PathBuf;

use crate::domain::{AppConfig, DesignResource, DomainError};

/// Persistent settings and the user's design resource library.
pub trait ConfigStore: Send + Sync {
    /// Read settings, writing defaults on first run.
    fn load(&self) -> Result<AppConfig, DomainError>;

    fn save(&self, config: &AppConfig) -> Result<(), DomainError>;

    /// Stored design resources, empty when none were saved yet.
    fn load_resources(&self) -> Result<Vec<DesignResource>, DomainError>;

    fn save_resources(&self, resources: &[DesignResource]) -> Result<(), DomainError>;

    fn config_path(&self) -> PathBuf;

    fn data_dir(&self) -> PathBuf;

    fn logs_dir(&self) -> PathBuf;
}
