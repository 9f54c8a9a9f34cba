use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::app::descriptors;
use crate::domain::{ConfigurationError, DomainError, ServiceDefinition};

#[derive(Default)]
struct Manifests {
    services: BTreeMap<String, Arc<ServiceDefinition>>,
    errors: Vec<ConfigurationError>,
}

/// Service definitions loaded from `services/*.toml`.
///
/// Readers get the catalog as of their call; a reload swaps it whole.
pub struct ManifestStore {
    dir: Option<PathBuf>,
    state: RwLock<Arc<Manifests>>,
}

impl ManifestStore {
    /// Store backed by a descriptor directory, loaded immediately.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        let store = Self {
            dir: Some(dir.into()),
            state: RwLock::new(Arc::new(Manifests::default())),
        };
        store.reload();
        store
    }

    /// Store with a fixed set of definitions.
    pub fn with_services(services: Vec<ServiceDefinition>) -> Self {
        let store = Self {
            dir: None,
            state: RwLock::new(Arc::new(Manifests::default())),
        };
        store.install(services.into_iter().map(Ok).collect());
        store
    }

    /// Re-read the descriptor directory. Returns the number of services loaded.
    pub fn reload(&self) -> usize {
        let Some(dir) = &self.dir else {
            return self.state.read().services.len();
        };

        let parsed = descriptors::read_dir(dir)
            .into_iter()
            .map(|(name, content)| content.and_then(|c| ServiceDefinition::from_toml(&name, &c)))
            .collect();
        self.install(parsed)
    }

    fn install(&self, parsed: Vec<Result<ServiceDefinition, ConfigurationError>>) -> usize {
        let mut manifests = Manifests::default();
        for result in parsed {
            match result {
                Ok(service) if manifests.services.contains_key(&service.id) => {
                    let err = ConfigurationError::DuplicateService { id: service.id };
                    warn!(error = %err, "Service manifest excluded");
                    manifests.errors.push(err);
                }
                Ok(service) => {
                    manifests
                        .services
                        .insert(service.id.clone(), Arc::new(service));
                }
                Err(err) => {
                    warn!(error = %err, "Service manifest excluded");
                    manifests.errors.push(err);
                }
            }
        }

        let count = manifests.services.len();
        info!(
            services = count,
            errors = manifests.errors.len(),
            "Service manifests loaded"
        );
        *self.state.write() = Arc::new(manifests);
        count
    }

    pub fn get(&self, id: &str) -> Result<Arc<ServiceDefinition>, DomainError> {
        self.state
            .read()
            .services
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("service", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().services.contains_key(id)
    }

    pub fn list(&self) -> Vec<Arc<ServiceDefinition>> {
        self.state.read().services.values().cloned().collect()
    }

    pub fn load_errors(&self) -> Vec<ConfigurationError> {
        self.state.read().errors.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_bad_manifest_is_excluded_not_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("alpha.toml"),
            "id = \"alpha\"\nrequires = [\"llm\"]\noptional = [\"memory\"]\n",
        )
        .unwrap();
        fs::write(dir.path().join("broken.toml"), "id = 42").unwrap();
        fs::write(dir.path().join("zeta.toml"), "id = \"alpha\"\n").unwrap();

        let store = ManifestStore::from_dir(dir.path());
        assert_eq!(store.list().len(), 1);
        assert!(store.get("alpha").is_ok());
        let errors = store.load_errors();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&ConfigurationError::DuplicateService {
            id: "alpha".to_string()
        }));
    }

    #[test]
    fn test_reload_picks_up_new_files() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::from_dir(dir.path());
        assert!(matches!(
            store.get("beta"),
            Err(DomainError::NotFound { .. })
        ));

        fs::write(dir.path().join("beta.toml"), "id = \"beta\"\n").unwrap();
        assert_eq!(store.reload(), 1);
        assert!(store.contains("beta"));
    }

    #[test]
    fn test_bundled_service_manifests_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("services");
        let store = ManifestStore::from_dir(dir);
        assert!(store.load_errors().is_empty());
        let chronicle = store.get("chronicle").unwrap();
        assert_eq!(chronicle.primary_port(), Some(8000));
        assert!(store.contains("memory-server"));
    }
}
