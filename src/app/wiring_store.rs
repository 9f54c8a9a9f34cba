use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;

use crate::app::{ManifestStore, ProviderRegistry};
use crate::domain::{DomainError, ServiceWiring, WiringBinding, WiringEvent};
use crate::ports::DocumentStore;

const COLLECTION: &str = "wiring";

/// Persisted `{service: {capability: provider}}` bindings.
///
/// Writes only check that the service, capability and provider exist;
/// whether a binding is deployable is decided by the resolver. Writes to one
/// service are serialized; every successful mutation is broadcast.
pub struct WiringStore {
    store: Arc<dyn DocumentStore>,
    manifests: Arc<ManifestStore>,
    providers: Arc<ProviderRegistry>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    events: broadcast::Sender<WiringEvent>,
}

impl WiringStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        manifests: Arc<ManifestStore>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            manifests,
            providers,
            locks: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to wiring mutations.
    pub fn subscribe(&self) -> broadcast::Receiver<WiringEvent> {
        self.events.subscribe()
    }

    fn service_lock(&self, service: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(service.to_string())
            .or_default()
            .clone()
    }

    fn read(&self, service: &str) -> Result<ServiceWiring, DomainError> {
        match self.store.get(COLLECTION, service)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(ServiceWiring::new()),
        }
    }

    fn write(&self, service: &str, wiring: &ServiceWiring) -> Result<(), DomainError> {
        if wiring.is_empty() {
            self.store.delete(COLLECTION, service)
        } else {
            let value: Value = serde_json::to_value(wiring)?;
            self.store.set(COLLECTION, service, &value)
        }
    }

    /// Consistent copy of one service's bindings.
    pub fn snapshot(&self, service: &str) -> Result<ServiceWiring, DomainError> {
        self.read(service)
    }

    /// All bindings, keyed by service.
    pub fn list(&self) -> Result<BTreeMap<String, ServiceWiring>, DomainError> {
        self.store
            .list(COLLECTION)?
            .into_iter()
            .map(|(service, value)| Ok((service, serde_json::from_value(value)?)))
            .collect()
    }

    /// Bind a service capability to a provider, replacing any earlier binding.
    pub async fn set_binding(&self, binding: WiringBinding) -> Result<(), DomainError> {
        self.manifests.get(&binding.service)?;
        if !self.providers.capabilities().contains(&binding.capability) {
            return Err(DomainError::not_found("capability", binding.capability.as_str()));
        }
        self.providers.get_provider(&binding.provider)?;

        let lock = self.service_lock(&binding.service);
        let _guard = lock.lock().await;

        let mut wiring = self.read(&binding.service)?;
        wiring.insert(binding.capability.clone(), binding.provider.clone());
        self.write(&binding.service, &wiring)?;

        info!(
            service = %binding.service,
            capability = %binding.capability,
            provider = %binding.provider,
            "Wiring updated"
        );
        let _ = self.events.send(WiringEvent::Bound(binding));
        Ok(())
    }

    /// Remove a binding. Returns false when nothing was bound.
    pub async fn remove_binding(&self, service: &str, capability: &str) -> Result<bool, DomainError> {
        let lock = self.service_lock(service);
        let _guard = lock.lock().await;

        let mut wiring = self.read(service)?;
        if wiring.remove(capability).is_none() {
            return Ok(false);
        }
        self.write(service, &wiring)?;

        info!(service, capability, "Wiring removed");
        let _ = self.events.send(WiringEvent::Unbound {
            service: service.to_string(),
            capability: capability.to_string(),
        });
        Ok(true)
    }
}
