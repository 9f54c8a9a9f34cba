use std::path::PathBuf;

use crate::domain::{AppConfig, DomainError};

/// Where the daemon reads `stackwire.toml` and keeps its on-disk state.
pub trait ConfigStore: Send + Sync {
    /// Load the configuration, writing the defaults first when the file is absent.
    fn load(&self) -> Result<AppConfig, DomainError>;

    fn save(&self, config: &AppConfig) -> Result<(), DomainError>;

    fn config_path(&self) -> PathBuf;

    /// Root for relative catalog directories and persisted state.
    fn data_dir(&self) -> PathBuf;

    /// Collections of the JSON document store (wiring, settings, targets).
    fn store_dir(&self) -> PathBuf {
        self.data_dir().join("store")
    }

    /// Flat TOML file backing the secret store.
    fn secrets_path(&self) -> PathBuf {
        self.data_dir().join("secrets.toml")
    }

    fn logs_dir(&self) -> PathBuf;
}
