use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::DomainError;
use crate::ports::DocumentStore;

const COLLECTION: &str = "settings";

/// Per-service operator settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Operator-layer overrides.
    pub overrides: BTreeMap<String, String>,
    /// Explicit-layer environment overrides; these beat discovered values.
    pub env: BTreeMap<String, String>,
}

impl ServiceSettings {
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty() && self.env.is_empty()
    }
}

/// Per-service settings persisted in the document store.
pub struct SettingsStore {
    store: Arc<dyn DocumentStore>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, service: &str) -> Result<ServiceSettings, DomainError> {
        match self.store.get(COLLECTION, service)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(ServiceSettings::default()),
        }
    }

    /// Replace a service's settings; empty settings delete the document.
    pub fn put(&self, service: &str, settings: &ServiceSettings) -> Result<(), DomainError> {
        if settings.is_empty() {
            self.store.delete(COLLECTION, service)?;
        } else {
            self.store
                .set(COLLECTION, service, &serde_json::to_value(settings)?)?;
        }
        info!(
            service,
            overrides = settings.overrides.len(),
            env = settings.env.len(),
            "Service settings updated"
        );
        Ok(())
    }
}
