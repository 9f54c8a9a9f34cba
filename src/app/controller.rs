use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::adapters::{
    ControlPlaneClient, DockerPlatform, FileSecretStore, JsonFileDocumentStore, KubernetesPlatform,
    StaticTokenValidator,
};
use crate::app::provider_registry::process_env;
use crate::app::{
    CapabilityResolver, DeploymentManager, InfrastructureRegistry, ManifestStore,
    PlatformRegistry, ProviderRegistry, ProviderView, ScanCache, ServiceSettings, SettingsStore,
    TargetDirectory, WiringStore,
};
use crate::domain::{
    AppConfig, Capability, CapabilityCatalog, ConfigurationError, DeploymentRecord, DomainError,
    InfraKindSpec, ResolutionError, ResolvedConfig, ServiceDefinition, ServiceWiring,
    TargetRecord, WiringBinding,
};
use crate::infrastructure::init_logging;
use crate::ports::{ConfigStore, InfraCatalog, Principal, SecretStore, TokenValidator};

/// Everything the catalog endpoint lists.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogView {
    pub capabilities: Vec<Capability>,
    pub providers: Vec<ProviderView>,
    pub services: Vec<ServiceDefinition>,
    pub infrastructure: Vec<InfraKindSpec>,
    pub errors: Vec<ConfigurationError>,
}

/// Result of a catalog reload.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    pub services: usize,
    pub providers: usize,
    pub errors: Vec<ConfigurationError>,
}

/// Composition root: owns configuration, the engine components and the
/// log guard.
pub struct AppController {
    config: RwLock<AppConfig>,
    config_store: Arc<dyn ConfigStore>,
    secrets: Arc<dyn SecretStore>,
    infra: Arc<InfrastructureRegistry>,
    manifests: Arc<ManifestStore>,
    providers: Arc<ProviderRegistry>,
    wiring: Arc<WiringStore>,
    settings: Arc<SettingsStore>,
    targets: Arc<TargetDirectory>,
    deployments: Arc<DeploymentManager>,
    validator: Arc<dyn TokenValidator>,
    _log_guard: Option<WorkerGuard>,
}

impl AppController {
    /// Initialize the controller from a configuration store.
    /// This sets up logging, persistence, platforms and the catalogs.
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        log_level: Option<String>,
    ) -> Result<Self, DomainError> {
        // Step 1: Load configuration
        let mut config = config_store.load()?;
        if let Some(level) = log_level {
            config.logging.level = level;
        }

        // Step 2: Initialize logging
        let log_guard = init_logging(&config_store.logs_dir(), &config.logging)?;

        info!(config_path = ?config_store.config_path(), "Stackwire starting up");

        // Step 3: Persistence and secrets
        let data_dir = config_store.data_dir();
        let documents = Arc::new(JsonFileDocumentStore::new(config_store.store_dir())?);
        let secrets: Arc<dyn SecretStore> =
            Arc::new(FileSecretStore::new(config_store.secrets_path())?);

        // Step 4: Control-plane client, allowlisted to target record hosts,
        // configured hosts and mesh domains
        let client = Arc::new(ControlPlaneClient::new(
            config.platform.request_timeout(),
            Vec::new(),
        )?);
        client.set_allowed_domains(config.platform.mesh_domains.clone());
        let allowlist = client.clone();
        let configured_hosts = config.platform.allowed_hosts.clone();
        let targets = Arc::new(
            TargetDirectory::new(
                documents.clone(),
                secrets.clone(),
                config.targets.clone(),
                config.platform.docker_api_port,
            )
            .with_hosts_listener(Arc::new(move |hosts| {
                allowlist.set_allowed_hosts(allowed_hosts(&configured_hosts, hosts))
            })),
        );
        client.set_allowed_hosts(allowed_hosts(
            &config.platform.allowed_hosts,
            targets.control_hosts()?,
        ));

        // Step 5: Platforms
        let infra = Arc::new(InfrastructureRegistry::builtin());
        infra.register_kinds(&config.infrastructure.kinds);
        let mut platforms = PlatformRegistry::new();
        platforms.register(Arc::new(DockerPlatform::new(
            client.clone(),
            config.platform.retry.clone(),
            config.platform.docker_network.clone(),
            infra.clone(),
        )));
        platforms.register(Arc::new(KubernetesPlatform::new(
            client,
            config.platform.retry.clone(),
            infra.clone(),
        )));

        // Step 6: Catalogs
        let manifests = Arc::new(ManifestStore::from_dir(resolve_dir(
            &data_dir,
            &config.catalog.services_dir,
        )));
        let providers = Arc::new(
            ProviderRegistry::new(
                CapabilityCatalog::builtin(),
                config.defaults.clone(),
                secrets.clone(),
                process_env(),
            )
            .with_dir(resolve_dir(&data_dir, &config.catalog.providers_dir)),
        );
        manifests.reload();
        providers.reload(&manifests.list());

        let wiring = Arc::new(WiringStore::new(
            documents.clone(),
            manifests.clone(),
            providers.clone(),
        ));
        let settings = Arc::new(SettingsStore::new(documents));

        // Step 7: Resolver and deployment manager
        let platforms = Arc::new(platforms);
        let scans = Arc::new(ScanCache::new(config.scan.ttl()));
        let resolver = Arc::new(
            CapabilityResolver::new(
                manifests.clone(),
                providers.clone(),
                wiring.clone(),
                settings.clone(),
                infra.clone(),
                scans.clone(),
                platforms.clone(),
                secrets.clone(),
            )
            .with_global_settings(config.settings.clone())
            .with_infra_auth(config.infrastructure.auth.clone()),
        );
        let deployments = Arc::new(DeploymentManager::new(
            manifests.clone(),
            targets.clone(),
            resolver,
            platforms,
            scans,
            config.platform.deploy_timeout(),
        ));

        let validator: Arc<dyn TokenValidator> =
            Arc::new(StaticTokenValidator::new(config.auth.tokens.clone()));
        if config.auth.enabled && config.auth.tokens.is_empty() {
            warn!("Authentication is enabled but no tokens are configured; every request will be refused");
        }

        info!(
            services = manifests.list().len(),
            providers = providers.all().len(),
            targets = config.targets.len(),
            "AppController initialized"
        );

        Ok(Self {
            config: RwLock::new(config),
            config_store,
            secrets,
            infra,
            manifests,
            providers,
            wiring,
            settings,
            targets,
            deployments,
            validator,
            _log_guard: log_guard,
        })
    }

    /// Assemble a controller from prebuilt components, skipping logging setup.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        config: AppConfig,
        config_store: Arc<dyn ConfigStore>,
        secrets: Arc<dyn SecretStore>,
        infra: Arc<InfrastructureRegistry>,
        manifests: Arc<ManifestStore>,
        providers: Arc<ProviderRegistry>,
        wiring: Arc<WiringStore>,
        settings: Arc<SettingsStore>,
        targets: Arc<TargetDirectory>,
        deployments: Arc<DeploymentManager>,
    ) -> Self {
        let validator = Arc::new(StaticTokenValidator::new(config.auth.tokens.clone()));
        Self {
            config: RwLock::new(config),
            config_store,
            secrets,
            infra,
            manifests,
            providers,
            wiring,
            settings,
            targets,
            deployments,
            validator,
            _log_guard: None,
        }
    }

    /// Get the current configuration.
    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Start the health monitor and the wiring listener.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let interval = self.config.read().platform.health_interval();
        vec![
            self.deployments.spawn_health_monitor(interval),
            self.deployments.spawn_wiring_listener(self.wiring.subscribe()),
        ]
    }

    /// Identify the caller of a Deploy API request.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Principal, DomainError> {
        if !self.config.read().auth.enabled {
            return Ok(Principal::anonymous());
        }
        let token = token.ok_or_else(|| DomainError::Unauthorized("missing bearer token".to_string()))?;
        self.validator.validate(token)
    }

    pub fn catalog(&self) -> CatalogView {
        let mut errors = self.manifests.load_errors();
        errors.extend(self.providers.load_errors());
        CatalogView {
            capabilities: self.providers.capabilities().iter().cloned().collect(),
            providers: self.providers.views(),
            services: self
                .manifests
                .list()
                .iter()
                .map(|s| ServiceDefinition::clone(s))
                .collect(),
            infrastructure: self.infra.specs(),
            errors,
        }
    }

    /// Re-read secrets and descriptor directories. Cached configs are dropped.
    pub fn reload(&self) -> Result<ReloadSummary, DomainError> {
        self.secrets.reload()?;
        let services = self.manifests.reload();
        let providers = self.providers.reload(&self.manifests.list());
        self.deployments.invalidate_all_configs();

        let mut errors = self.manifests.load_errors();
        errors.extend(self.providers.load_errors());
        info!(services, providers, errors = errors.len(), "Catalog reloaded");
        Ok(ReloadSummary {
            services,
            providers,
            errors,
        })
    }

    pub fn status(&self, service: &str) -> Result<Vec<DeploymentRecord>, DomainError> {
        self.deployments.status(service)
    }

    pub async fn activate(&self, service: &str, target: &str) -> Result<DeploymentRecord, DomainError> {
        self.deployments.activate(service, target).await
    }

    pub async fn deactivate(&self, service: &str) -> Result<Vec<DeploymentRecord>, DomainError> {
        self.deployments.deactivate(service).await
    }

    pub async fn validate(
        &self,
        service: &str,
        target: &str,
    ) -> Result<Vec<ResolutionError>, DomainError> {
        self.manifests.get(service)?;
        self.deployments.validate(service, target).await
    }

    /// Resolved config with secret values masked.
    pub async fn resolved_config(
        &self,
        service: &str,
        target: &str,
    ) -> Result<ResolvedConfig, DomainError> {
        self.manifests.get(service)?;
        Ok(self.deployments.resolved_config(service, target).await?.masked())
    }

    pub fn settings(&self, service: &str) -> Result<ServiceSettings, DomainError> {
        self.manifests.get(service)?;
        self.settings.get(service)
    }

    pub fn put_settings(&self, service: &str, settings: ServiceSettings) -> Result<(), DomainError> {
        self.manifests.get(service)?;
        self.settings.put(service, &settings)?;
        self.deployments.invalidate_configs(service);
        Ok(())
    }

    pub fn wiring(&self) -> Result<BTreeMap<String, ServiceWiring>, DomainError> {
        self.wiring.list()
    }

    pub async fn set_binding(&self, binding: WiringBinding) -> Result<(), DomainError> {
        let service = binding.service.clone();
        self.wiring.set_binding(binding).await?;
        self.deployments.invalidate_configs(&service);
        Ok(())
    }

    pub async fn remove_binding(&self, service: &str, capability: &str) -> Result<bool, DomainError> {
        let removed = self.wiring.remove_binding(service, capability).await?;
        self.deployments.invalidate_configs(service);
        Ok(removed)
    }

    pub fn targets(&self) -> Result<Vec<TargetRecord>, DomainError> {
        self.targets.records()
    }

    pub fn put_target(&self, record: TargetRecord) -> Result<(), DomainError> {
        self.targets.put(record)
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        self.config_store.data_dir()
    }
}

/// Relative catalog paths hang off the data directory.
fn resolve_dir(data_dir: &Path, dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        data_dir.join(dir)
    }
}

/// Configured hosts plus target record hosts, deduplicated.
fn allowed_hosts(configured: &[String], records: Vec<String>) -> Vec<String> {
    let mut hosts = records;
    hosts.extend(configured.iter().cloned());
    hosts.sort();
    hosts.dedup();
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::Harness;
    use crate::domain::config::InfraKindConfig;

    #[test]
    fn test_resolve_dir() {
        let data = Path::new("/var/lib/stackwire");
        assert_eq!(
            resolve_dir(data, Path::new("services")),
            PathBuf::from("/var/lib/stackwire/services")
        );
        assert_eq!(
            resolve_dir(data, Path::new("/etc/stackwire/providers")),
            PathBuf::from("/etc/stackwire/providers")
        );
    }

    #[test]
    fn test_allowed_hosts_merges_configured_and_record_hosts() {
        let hosts = allowed_hosts(
            &["localhost".to_string(), "10.0.0.1".to_string()],
            vec!["10.0.0.1".to_string(), "edge.mesh".to_string()],
        );
        assert_eq!(hosts, vec!["10.0.0.1", "edge.mesh", "localhost"]);
    }

    #[test]
    fn test_authenticate() {
        let harness = Harness::new();
        let (controller, _dir) = harness.controller(true);
        assert!(matches!(
            controller.authenticate(None),
            Err(DomainError::Unauthorized(_))
        ));
        assert!(controller.authenticate(Some("wrong")).is_err());
        let principal = controller.authenticate(Some("reader-token")).unwrap();
        assert_eq!(principal.id, "ci");

        let (open, _dir) = harness.controller(false);
        assert_eq!(open.authenticate(None).unwrap().id, "anonymous");
    }

    #[test]
    fn test_catalog_lists_builtins_and_availability() {
        let harness = Harness::new();
        let (controller, _dir) = harness.controller(false);
        let catalog = controller.catalog();
        assert!(catalog.capabilities.iter().any(|c| c.id == "llm"));
        assert_eq!(catalog.services.len(), 3);
        let openai = catalog
            .providers
            .iter()
            .find(|p| p.provider.id == "openai-default")
            .unwrap();
        assert!(openai.available);
        assert!(catalog
            .providers
            .iter()
            .any(|p| p.provider.id == "platform-mongodb" && p.available));
        assert!(catalog.infrastructure.iter().any(|k| k.kind == "postgres"));
    }

    #[test]
    fn test_catalog_lists_kinds_registered_after_startup() {
        let harness = Harness::new();
        let (controller, _dir) = harness.controller(false);
        assert!(!controller.catalog().infrastructure.iter().any(|k| k.kind == "nats"));

        harness.infra.register_kinds(&BTreeMap::from([(
            "nats".to_string(),
            InfraKindConfig {
                scheme: "nats".to_string(),
                port: 4222,
                env_var: "NATS_URL".to_string(),
                aliases: vec!["jetstream".to_string()],
                auth: Default::default(),
                path: None,
            },
        )]));

        let catalog = controller.catalog();
        let nats = catalog
            .infrastructure
            .iter()
            .find(|k| k.kind == "nats")
            .unwrap();
        assert_eq!(nats.default_port, 4222);
        assert_eq!(nats.aliases, vec!["jetstream"]);
    }

    #[tokio::test]
    async fn test_settings_change_is_visible_in_next_config() {
        let harness = Harness::new();
        let (controller, _dir) = harness.controller(false);
        let target = "local.docker.dev";

        let before = controller.resolved_config("alpha", target).await.unwrap();
        assert_eq!(before.get("LLM_API_KEY"), Some("***"));
        assert_eq!(before.get("LLM_MODEL"), Some("gpt-4o-mini"));

        let mut settings = ServiceSettings::default();
        settings
            .overrides
            .insert("LLM_MODEL".to_string(), "gpt-4o".to_string());
        controller.put_settings("alpha", settings).unwrap();

        let after = controller.resolved_config("alpha", target).await.unwrap();
        assert_eq!(after.get("LLM_MODEL"), Some("gpt-4o"));
        assert!(controller.settings("ghost").is_err());
    }

    #[tokio::test]
    async fn test_operator_supplied_credential_stays_masked() {
        let harness = Harness::new();
        let (controller, _dir) = harness.controller(false);

        let mut settings = ServiceSettings::default();
        settings
            .env
            .insert("LLM_API_KEY".to_string(), "sk-live-operator".to_string());
        settings
            .overrides
            .insert("MEMORY_API_KEY".to_string(), "m-live".to_string());
        controller.put_settings("alpha", settings).unwrap();

        let masked = controller
            .resolved_config("alpha", "local.docker.dev")
            .await
            .unwrap();
        assert_eq!(masked.get("LLM_API_KEY"), Some("***"));
        assert_eq!(masked.get("MEMORY_API_KEY"), Some("***"));
        assert_eq!(masked.get("LLM_MODEL"), Some("gpt-4o-mini"));
    }
}
