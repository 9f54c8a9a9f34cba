use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::domain::{AppConfig, DomainError};
use crate::ports::ConfigStore;

const CONFIG_FILE: &str = "stackwire.toml";
const HOME_ENV: &str = "STACKWIRE_HOME";

/// `stackwire.toml` plus the state directory next to it.
pub struct TomlConfigStore {
    data_dir: PathBuf,
    config_path: Option<PathBuf>,
}

impl TomlConfigStore {
    /// Store rooted at `$STACKWIRE_HOME`, or the platform data directory.
    /// - Linux: ~/.local/share/stackwire/
    /// - macOS: ~/Library/Application Support/stackwire/
    pub fn new() -> Result<Self, DomainError> {
        let data_dir = match std::env::var_os(HOME_ENV) {
            Some(home) if !home.is_empty() => PathBuf::from(home),
            _ => dirs::data_dir()
                .map(|p| p.join("stackwire"))
                .ok_or_else(|| {
                    DomainError::Config(format!(
                        "no platform data directory; set {} or pass --data-dir",
                        HOME_ENV
                    ))
                })?,
        };
        Self::at(data_dir, None)
    }

    /// Store rooted at an explicit data directory, optionally reading the
    /// configuration from a file elsewhere.
    pub fn at(data_dir: PathBuf, config_path: Option<PathBuf>) -> Result<Self, DomainError> {
        fs::create_dir_all(&data_dir)?;
        debug!(data_dir = ?data_dir, config_path = ?config_path, "Config store opened");

        Ok(Self {
            data_dir,
            config_path,
        })
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<AppConfig, DomainError> {
        let path = self.config_path();
        if !path.exists() {
            info!(path = ?path, "No configuration file, writing defaults");
            let config = AppConfig::new();
            self.save(&config)?;
            return Ok(config);
        }

        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| DomainError::Config(format!("{}: {}", path.display(), e)))?;
        info!(
            path = ?path,
            targets = config.targets.len(),
            auth = config.auth.enabled,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn save(&self, config: &AppConfig) -> Result<(), DomainError> {
        let path = self.config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml::to_string_pretty(config)?)?;
        debug!(path = ?path, "Configuration written");
        Ok(())
    }

    fn config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(CONFIG_FILE))
    }

    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_paths_live_under_data_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = TomlConfigStore::at(temp_dir.path().to_path_buf(), None).unwrap();

        assert_eq!(store.config_path(), temp_dir.path().join("stackwire.toml"));
        assert_eq!(store.store_dir(), temp_dir.path().join("store"));
        assert_eq!(store.secrets_path(), temp_dir.path().join("secrets.toml"));
        assert_eq!(store.logs_dir(), temp_dir.path().join("logs"));
    }

    #[test]
    fn test_saved_config_loads_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = TomlConfigStore::at(temp_dir.path().to_path_buf(), None).unwrap();

        let mut config = AppConfig::new();
        config.auth.enabled = false;
        config.logging.level = "debug".to_string();
        config
            .defaults
            .insert("llm".to_string(), "openai-default".to_string());
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert!(!loaded.auth.enabled);
        assert_eq!(loaded.logging.level, "debug");
        assert_eq!(loaded.defaults["llm"], "openai-default");
    }

    #[test]
    fn test_missing_config_is_created() {
        let temp_dir = tempfile::tempdir().unwrap();
        let explicit = temp_dir.path().join("etc").join("custom.toml");
        let store =
            TomlConfigStore::at(temp_dir.path().to_path_buf(), Some(explicit.clone())).unwrap();

        let config = store.load().unwrap();
        assert_eq!(config.scan.ttl_secs, 120);
        assert!(explicit.exists());
    }

    #[test]
    fn test_malformed_config_names_the_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = TomlConfigStore::at(temp_dir.path().to_path_buf(), None).unwrap();
        fs::write(store.config_path(), "[scan]\nttl_secs = \"soon\"\n").unwrap();

        match store.load() {
            Err(DomainError::Config(message)) => assert!(message.contains("stackwire.toml")),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
