use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::domain::DomainError;
use crate::ports::DocumentStore;

/// Documents stored as `<root>/<collection>/<key>.json`.
pub struct JsonFileDocumentStore {
    root: PathBuf,
}

impl JsonFileDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf, DomainError> {
        check_segment(collection)?;
        Ok(self.root.join(collection))
    }

    fn path_for(&self, collection: &str, key: &str) -> Result<PathBuf, DomainError> {
        check_segment(key)?;
        Ok(self.collection_dir(collection)?.join(format!("{}.json", key)))
    }

    fn read(path: &Path) -> Result<Value, DomainError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Keys and collections become file names; keep them to one path segment.
fn check_segment(segment: &str) -> Result<(), DomainError> {
    let valid = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(DomainError::Store(format!("invalid document key '{}'", segment)))
    }
}

impl DocumentStore for JsonFileDocumentStore {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, DomainError> {
        let path = self.path_for(collection, key)?;
        match Self::read(&path) {
            Ok(value) => Ok(Some(value)),
            Err(DomainError::Io(_)) if !path.exists() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, collection: &str, key: &str, value: &Value) -> Result<(), DomainError> {
        let path = self.path_for(collection, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a temp file first, then rename atomically
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&temp_path, &path)?;

        debug!(collection, key, "Document saved");
        Ok(())
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, DomainError> {
        let dir = self.collection_dir(collection)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut documents = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let key = match (
                path.extension().and_then(|e| e.to_str()),
                path.file_stem().and_then(|s| s.to_str()),
            ) {
                (Some("json"), Some(stem)) => stem.to_string(),
                _ => continue,
            };
            documents.push((key, Self::read(&path)?));
        }
        documents.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(documents)
    }

    fn delete(&self, collection: &str, key: &str) -> Result<(), DomainError> {
        let path = self.path_for(collection, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Volatile store for tests and embedding.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, DomainError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    fn set(&self, collection: &str, key: &str, value: &Value) -> Result<(), DomainError> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, DomainError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn delete(&self, collection: &str, key: &str) -> Result<(), DomainError> {
        if let Some(docs) = self.collections.write().get_mut(collection) {
            docs.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exercise(store: &dyn DocumentStore) {
        assert_eq!(store.get("wiring", "alpha").unwrap(), None);

        store
            .set("wiring", "beta", &json!({"llm": "ollama"}))
            .unwrap();
        store
            .set("wiring", "alpha", &json!({"llm": "openai"}))
            .unwrap();

        assert_eq!(
            store.get("wiring", "alpha").unwrap(),
            Some(json!({"llm": "openai"}))
        );

        let keys: Vec<String> = store
            .list("wiring")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["alpha".to_string(), "beta".to_string()]);

        store.delete("wiring", "alpha").unwrap();
        store.delete("wiring", "alpha").unwrap();
        assert_eq!(store.get("wiring", "alpha").unwrap(), None);
        assert!(store.list("settings").unwrap().is_empty());
    }

    #[test]
    fn test_file_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonFileDocumentStore::new(temp_dir.path().join("store")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_memory_store() {
        exercise(&InMemoryDocumentStore::new());
    }

    #[test]
    fn test_file_store_rejects_path_keys() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonFileDocumentStore::new(temp_dir.path()).unwrap();
        assert!(store.set("wiring", "../escape", &json!({})).is_err());
        assert!(store.get("..", "x").is_err());
    }
}
