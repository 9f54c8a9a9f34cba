use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::descriptors;
use crate::domain::{
    CapabilityCatalog, ConfigurationError, ConnectionTemplate, CredentialSource, DomainError,
    Provider, ResolutionError, ServiceDefinition,
};
use crate::ports::{SecretStore, SecretValue};

/// Lookup for orchestrator-process environment variables.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment lookup backed by `std::env`.
pub fn process_env() -> EnvLookup {
    Arc::new(|name| std::env::var(name).ok())
}

/// Provider plus its current availability, as listed by the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderView {
    #[serde(flatten)]
    pub provider: Provider,
    pub available: bool,
}

#[derive(Default)]
struct Registry {
    providers: BTreeMap<String, Provider>,
    by_capability: BTreeMap<String, Vec<String>>,
    errors: Vec<ConfigurationError>,
}

impl Registry {
    fn add(&mut self, provider: Provider, catalog: &CapabilityCatalog) {
        if self.providers.contains_key(&provider.id) {
            let err = ConfigurationError::DuplicateProvider { id: provider.id };
            warn!(error = %err, "Provider excluded");
            self.errors.push(err);
            return;
        }
        if let Some(unknown) = provider
            .capabilities
            .iter()
            .find(|c| !catalog.contains(c))
        {
            let err = ConfigurationError::UnknownCapability {
                provider: provider.id.clone(),
                capability: unknown.clone(),
            };
            warn!(error = %err, "Provider excluded");
            self.errors.push(err);
            return;
        }

        for capability in &provider.capabilities {
            self.by_capability
                .entry(capability.clone())
                .or_default()
                .push(provider.id.clone());
        }
        debug!(provider = %provider.id, capabilities = ?provider.capabilities, "Provider registered");
        self.providers.insert(provider.id.clone(), provider);
    }
}

/// Providers indexed by id and by the capabilities they satisfy.
///
/// Built-in platform providers are merged first, then descriptor files,
/// then providers contributed by services that `provides` a capability.
pub struct ProviderRegistry {
    catalog: CapabilityCatalog,
    dir: Option<PathBuf>,
    extra: Vec<Provider>,
    defaults: BTreeMap<String, String>,
    secrets: Arc<dyn SecretStore>,
    env: EnvLookup,
    state: RwLock<Arc<Registry>>,
}

impl ProviderRegistry {
    pub fn new(
        catalog: CapabilityCatalog,
        defaults: BTreeMap<String, String>,
        secrets: Arc<dyn SecretStore>,
        env: EnvLookup,
    ) -> Self {
        Self {
            catalog,
            dir: None,
            extra: Vec::new(),
            defaults,
            secrets,
            env,
            state: RwLock::new(Arc::new(Registry::default())),
        }
    }

    /// Read provider descriptors from a directory on every reload.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Register providers that are not backed by descriptor files.
    pub fn with_providers(mut self, providers: Vec<Provider>) -> Self {
        self.extra = providers;
        self
    }

    /// Rebuild the registry. Returns the number of providers registered.
    pub fn reload(&self, services: &[Arc<ServiceDefinition>]) -> usize {
        let mut registry = Registry::default();

        for provider in builtin_providers() {
            registry.add(provider, &self.catalog);
        }

        if let Some(dir) = &self.dir {
            for (name, content) in descriptors::read_dir(dir) {
                match content.and_then(|c| Provider::from_toml(&name, &c)) {
                    Ok(provider) => registry.add(provider, &self.catalog),
                    Err(err) => {
                        warn!(error = %err, "Provider descriptor excluded");
                        registry.errors.push(err);
                    }
                }
            }
        }

        for provider in &self.extra {
            registry.add(provider.clone(), &self.catalog);
        }

        for service in services {
            if let Some(provider) = service_provider(service) {
                registry.add(provider, &self.catalog);
            }
        }

        let count = registry.providers.len();
        info!(
            providers = count,
            errors = registry.errors.len(),
            "Provider registry loaded"
        );
        *self.state.write() = Arc::new(registry);
        count
    }

    pub fn capabilities(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    /// Providers satisfying a capability, in id order.
    pub fn list_providers(&self, capability: &str) -> Vec<Provider> {
        let state = self.state.read();
        state
            .by_capability
            .get(capability)
            .map(|ids| {
                let mut providers: Vec<Provider> = ids
                    .iter()
                    .filter_map(|id| state.providers.get(id).cloned())
                    .collect();
                providers.sort_by(|a, b| a.id.cmp(&b.id));
                providers
            })
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Provider> {
        self.state.read().providers.values().cloned().collect()
    }

    pub fn get_provider(&self, id: &str) -> Result<Provider, DomainError> {
        self.state
            .read()
            .providers
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("provider", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().providers.contains_key(id)
    }

    /// True only if the provider is enabled and its credential currently
    /// resolves to a non-empty value.
    pub fn is_available(&self, id: &str) -> bool {
        match self.get_provider(id) {
            Ok(provider) => provider.enabled && self.resolve_credential(&provider).is_ok(),
            Err(_) => false,
        }
    }

    /// Credential value for a provider. `None` for providers that need none.
    pub fn resolve_credential(
        &self,
        provider: &Provider,
    ) -> Result<Option<SecretValue>, ResolutionError> {
        let missing = || ResolutionError::MissingCredential {
            provider: provider.id.clone(),
            source_desc: provider.credential_source.describe(),
        };

        let value = match &provider.credential_source {
            CredentialSource::None => return Ok(None),
            CredentialSource::Static { value } => Some(SecretValue::new(value.as_str())),
            CredentialSource::Env { name } => (self.env)(name).map(SecretValue::new),
            CredentialSource::Secret { key } => match self.secrets.get(key) {
                Ok(value) => value,
                Err(e) => {
                    warn!(provider = %provider.id, error = %e, "Secret store lookup failed");
                    None
                }
            },
        };

        match value {
            Some(value) if !value.is_empty() => Ok(Some(value)),
            _ => Err(missing()),
        }
    }

    /// Default provider for a capability when no wiring exists.
    ///
    /// The `[defaults]` config table wins over descriptor `default = true`
    /// flags. Disabled providers are never defaults.
    pub fn default_for(&self, capability: &str) -> Option<Provider> {
        if let Some(id) = self.defaults.get(capability) {
            match self.get_provider(id) {
                Ok(provider) if provider.enabled && provider.satisfies(capability) => {
                    return Some(provider)
                }
                _ => {
                    warn!(capability, provider = %id, "Configured default provider is not usable");
                }
            }
        }

        self.list_providers(capability)
            .into_iter()
            .find(|p| p.default && p.enabled)
    }

    pub fn load_errors(&self) -> Vec<ConfigurationError> {
        self.state.read().errors.clone()
    }

    /// Catalog listing with availability.
    pub fn views(&self) -> Vec<ProviderView> {
        self.all()
            .into_iter()
            .map(|provider| {
                let available = provider.enabled && self.resolve_credential(&provider).is_ok();
                ProviderView {
                    provider,
                    available,
                }
            })
            .collect()
    }
}

fn builtin_providers() -> Vec<Provider> {
    let builtin = |id: &str, capability: &str, template: &str, host: &str, port: u16| Provider {
        id: id.to_string(),
        capabilities: vec![capability.to_string()],
        connection_template: ConnectionTemplate::new(template),
        host: Some(host.to_string()),
        port: Some(port),
        credential_source: CredentialSource::None,
        enabled: true,
        default: true,
        values: BTreeMap::new(),
        builtin: true,
    };

    vec![
        builtin(
            "platform-mongodb",
            "document_store",
            "mongodb://{host}:{port}",
            "mongo",
            27017,
        ),
        builtin(
            "platform-qdrant",
            "vector_store",
            "http://{host}:{port}",
            "qdrant",
            6333,
        ),
    ]
}

/// Provider standing for a service that itself provides capabilities.
fn service_provider(service: &ServiceDefinition) -> Option<Provider> {
    if service.provides.is_empty() {
        return None;
    }
    let port = service.primary_port()?;
    Some(Provider {
        id: format!("service-{}", service.id),
        capabilities: service.provides.clone(),
        connection_template: ConnectionTemplate::new("http://{host}:{port}"),
        host: Some(service.id.clone()),
        port: Some(port),
        credential_source: CredentialSource::None,
        enabled: true,
        default: false,
        values: BTreeMap::new(),
        builtin: false,
    })
}
