use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::domain::DomainError;
use crate::ports::{SecretStore, SecretValue};

/// Secrets read from a flat TOML file (`key = "value"`).
///
/// A missing file is an empty store; it may be created later and picked up
/// by [`SecretStore::reload`].
pub struct FileSecretStore {
    path: PathBuf,
    secrets: RwLock<HashMap<String, SecretValue>>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let store = Self {
            path: path.into(),
            secrets: RwLock::new(HashMap::new()),
        };
        store.reload()?;
        Ok(store)
    }

    fn read_file(&self) -> Result<HashMap<String, SecretValue>, DomainError> {
        if !self.path.exists() {
            warn!(path = ?self.path, "Secret file not found, no secrets loaded");
            return Ok(HashMap::new());
        }

        let content = zeroize::Zeroizing::new(fs::read_to_string(&self.path)?);
        let table: toml::Table = toml::from_str(&content)?;

        let mut secrets = HashMap::new();
        for (key, value) in table {
            match value {
                toml::Value::String(s) => {
                    secrets.insert(key, SecretValue::new(s));
                }
                _ => warn!(key = %key, "Ignoring non-string secret"),
            }
        }
        Ok(secrets)
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Result<Option<SecretValue>, DomainError> {
        Ok(self.secrets.read().get(key).cloned())
    }

    fn reload(&self) -> Result<(), DomainError> {
        let secrets = self.read_file()?;
        let count = secrets.len();
        *self.secrets.write() = secrets;
        info!(path = ?self.path, count, "Secrets loaded");
        Ok(())
    }
}

/// Secrets held in memory.
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<String, SecretValue>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.secrets
            .write()
            .insert(key.into(), SecretValue::new(value));
    }

    pub fn remove(&self, key: &str) {
        self.secrets.write().remove(key);
    }
}

impl SecretStore for InMemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<SecretValue>, DomainError> {
        Ok(self.secrets.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_secret_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("secrets.toml");
        fs::write(&path, "openai_api_key = \"sk-test\"\nport = 5\n").unwrap();

        let store = FileSecretStore::new(&path).unwrap();
        assert_eq!(
            store.get("openai_api_key").unwrap().unwrap().expose(),
            "sk-test"
        );
        assert!(store.get("port").unwrap().is_none());

        fs::write(&path, "openai_api_key = \"sk-rotated\"\n").unwrap();
        store.reload().unwrap();
        assert_eq!(
            store.get("openai_api_key").unwrap().unwrap().expose(),
            "sk-rotated"
        );
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(temp_dir.path().join("absent.toml")).unwrap();
        assert!(store.get("anything").unwrap().is_none());
    }

    #[test]
    fn test_secret_value_debug_redacted() {
        let value = SecretValue::new("hunter2");
        assert!(!format!("{:?}", value).contains("hunter2"));
    }
}
