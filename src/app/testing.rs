//! Fakes shared by app-layer tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::adapters::{
    InMemoryDocumentStore, InMemorySecretStore, StaticTokenValidator, TomlConfigStore,
};
use crate::app::provider_registry::EnvLookup;
use crate::app::{
    AppController, CapabilityResolver, DeploymentManager, InfrastructureRegistry, ManifestStore,
    PlatformRegistry, ProviderRegistry, ScanCache, SettingsStore, TargetDirectory, WiringStore,
};
use crate::domain::config::TokenConfig;
use crate::domain::{
    AppConfig, CapabilityCatalog, DeployError, DeployTarget, DeploymentHandle, Endpoint,
    InfrastructureScan, PlatformType, Provider, ResolvedConfig, ScanError, ServiceDefinition,
    TargetCredential, TargetLocator, TargetRecord, WorkloadStatus,
};
use crate::ports::{DeploymentPlatform, SCOPE_DEPLOY, SCOPE_READ};

const SERVICES: [&str; 3] = [
    r#"
id = "alpha"
requires = ["llm"]
optional = ["memory"]
"#,
    r#"
id = "chronicle"
image = "ghcr.io/example/chronicle:1.2"
requires = ["llm"]
infra_services = ["mongo"]
[[exposes]]
name = "http"
path = "/health"
port = 8000
"#,
    r#"
id = "indexer"
requires = ["embedding"]
"#,
];

const PROVIDERS: [&str; 3] = [
    r#"
id = "openai-default"
capability = "llm"
connection_template = "https://api.openai.com/v1"
credential_source = { type = "static", value = "sk-test" }
default = true
[values]
model = "gpt-4o-mini"
"#,
    r#"
id = "ollama"
capability = "llm"
connection_template = "http://{host}:{port}/v1"
host = "ollama"
port = 11434
"#,
    r#"
id = "local-embed"
capability = "embedding"
connection_template = "http://embed:8080"
"#,
];

/// Fully wired engine over in-memory stores and fake platforms.
///
/// Docker targets see a `mongo` container; `cluster1.kubernetes.prod` is
/// seeded and starts with no infrastructure.
pub struct Harness {
    pub manifests: Arc<ManifestStore>,
    pub providers: Arc<ProviderRegistry>,
    pub wiring: Arc<WiringStore>,
    pub settings: Arc<SettingsStore>,
    pub targets: Arc<TargetDirectory>,
    pub scans: Arc<ScanCache>,
    pub platforms: Arc<PlatformRegistry>,
    pub resolver: Arc<CapabilityResolver>,
    pub infra: Arc<InfrastructureRegistry>,
    pub secrets: Arc<InMemorySecretStore>,
    pub docker: Arc<FakePlatform>,
    pub kubernetes: Arc<FakePlatform>,
}

impl Harness {
    pub fn new() -> Self {
        let services = SERVICES
            .iter()
            .map(|s| ServiceDefinition::from_toml("service.toml", s).unwrap())
            .collect();
        let manifests = Arc::new(ManifestStore::with_services(services));

        let secrets = Arc::new(InMemorySecretStore::new());
        secrets.insert("cluster1_token", "tok");

        let env: EnvLookup = Arc::new(|_| None);
        let providers = Arc::new(
            ProviderRegistry::new(
                CapabilityCatalog::builtin(),
                BTreeMap::new(),
                secrets.clone(),
                env,
            )
            .with_providers(
                PROVIDERS
                    .iter()
                    .map(|p| Provider::from_toml("provider.toml", p).unwrap())
                    .collect(),
            ),
        );
        providers.reload(&manifests.list());

        let documents = Arc::new(InMemoryDocumentStore::new());
        let wiring = Arc::new(WiringStore::new(
            documents.clone(),
            manifests.clone(),
            providers.clone(),
        ));
        let settings = Arc::new(SettingsStore::new(documents.clone()));
        let targets = Arc::new(TargetDirectory::new(
            documents.clone(),
            secrets.clone(),
            vec![TargetRecord {
                id: "cluster1.kubernetes.prod".to_string(),
                locator: TargetLocator::Kubernetes {
                    api_server: "https://10.0.0.1:6443".to_string(),
                    namespace: "ai".to_string(),
                    token_secret: Some("cluster1_token".to_string()),
                },
            }],
            2375,
        ));

        let docker = Arc::new(FakePlatform::new(PlatformType::Docker));
        docker.set_infrastructure("mongo", Endpoint::new("mongo", 27017));
        let kubernetes = Arc::new(FakePlatform::new(PlatformType::Kubernetes));
        let mut platforms = PlatformRegistry::new();
        platforms.register(docker.clone());
        platforms.register(kubernetes.clone());
        let platforms = Arc::new(platforms);

        let scans = Arc::new(ScanCache::new(Duration::from_secs(60)));
        let infra = Arc::new(InfrastructureRegistry::builtin());
        let resolver = Arc::new(CapabilityResolver::new(
            manifests.clone(),
            providers.clone(),
            wiring.clone(),
            settings.clone(),
            infra.clone(),
            scans.clone(),
            platforms.clone(),
            secrets.clone(),
        ));

        Self {
            manifests,
            providers,
            wiring,
            settings,
            targets,
            scans,
            platforms,
            resolver,
            infra,
            secrets,
            docker,
            kubernetes,
        }
    }

    /// Controller over this harness. Token `reader-token` carries `read`,
    /// `deployer-token` carries `read` and `deploy`.
    pub fn controller(&self, auth: bool) -> (AppController, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TomlConfigStore::at(dir.path().to_path_buf(), None).unwrap());
        let mut config = AppConfig::default();
        config.auth.enabled = auth;
        config.auth.tokens = vec![
            TokenConfig {
                sha256: StaticTokenValidator::hash("reader-token"),
                principal: "ci".to_string(),
                scopes: vec![SCOPE_READ.to_string()],
            },
            TokenConfig {
                sha256: StaticTokenValidator::hash("deployer-token"),
                principal: "ops".to_string(),
                scopes: vec![SCOPE_READ.to_string(), SCOPE_DEPLOY.to_string()],
            },
        ];
        let controller = AppController::from_parts(
            config,
            store,
            self.secrets.clone(),
            self.infra.clone(),
            self.manifests.clone(),
            self.providers.clone(),
            self.wiring.clone(),
            self.settings.clone(),
            self.targets.clone(),
            self.manager(Duration::from_secs(5)),
        );
        (controller, dir)
    }

    pub fn manager(&self, deploy_timeout: Duration) -> Arc<DeploymentManager> {
        Arc::new(DeploymentManager::new(
            self.manifests.clone(),
            self.targets.clone(),
            self.resolver.clone(),
            self.platforms.clone(),
            self.scans.clone(),
            deploy_timeout,
        ))
    }
}

/// Docker target addressed at `http://<name>:2375`.
pub fn docker_target(name: &str) -> DeployTarget {
    DeployTarget {
        id: format!("{}.docker.dev", name),
        name: name.to_string(),
        environment: "dev".to_string(),
        platform: PlatformType::Docker,
        locator: TargetLocator::Docker {
            api_url: format!("http://{}:2375", name),
            network: None,
        },
        credential: None,
    }
}

pub fn kubernetes_target(name: &str) -> DeployTarget {
    DeployTarget {
        id: format!("{}.kubernetes.prod", name),
        name: name.to_string(),
        environment: "prod".to_string(),
        platform: PlatformType::Kubernetes,
        locator: TargetLocator::Kubernetes {
            api_server: format!("https://{}:6443", name),
            namespace: "default".to_string(),
            token_secret: None,
        },
        credential: Some(TargetCredential::new("tok")),
    }
}

/// Platform double with call counters and scripted outcomes.
pub struct FakePlatform {
    platform: PlatformType,
    infrastructure: Mutex<Vec<(String, Endpoint)>>,
    scan_error: Mutex<Option<String>>,
    scan_delay: Mutex<Duration>,
    deploy_error: Mutex<Option<DeployError>>,
    deploy_delay: Mutex<Duration>,
    status: Mutex<Result<WorkloadStatus, DeployError>>,
    deployed: Mutex<Vec<ResolvedConfig>>,
    scans: AtomicUsize,
    stops: AtomicUsize,
    cleanups: AtomicUsize,
}

impl FakePlatform {
    pub fn new(platform: PlatformType) -> Self {
        Self {
            platform,
            infrastructure: Mutex::new(Vec::new()),
            scan_error: Mutex::new(None),
            scan_delay: Mutex::new(Duration::ZERO),
            deploy_error: Mutex::new(None),
            deploy_delay: Mutex::new(Duration::ZERO),
            status: Mutex::new(Ok(WorkloadStatus::Running)),
            deployed: Mutex::new(Vec::new()),
            scans: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
        }
    }

    pub fn set_infrastructure(&self, kind: &str, endpoint: Endpoint) {
        self.infrastructure.lock().push((kind.to_string(), endpoint));
    }

    pub fn fail_scans(&self, reason: &str) {
        *self.scan_error.lock() = Some(reason.to_string());
    }

    pub fn set_scan_delay(&self, delay: Duration) {
        *self.scan_delay.lock() = delay;
    }

    pub fn fail_deploys(&self, error: DeployError) {
        *self.deploy_error.lock() = Some(error);
    }

    pub fn set_deploy_delay(&self, delay: Duration) {
        *self.deploy_delay.lock() = delay;
    }

    pub fn set_status(&self, status: Result<WorkloadStatus, DeployError>) {
        *self.status.lock() = status;
    }

    pub fn scan_calls(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn deploy_calls(&self) -> usize {
        self.deployed.lock().len()
    }

    pub fn last_deployed(&self) -> Option<ResolvedConfig> {
        self.deployed.lock().last().cloned()
    }

    pub fn stop_calls(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn cleanup_calls(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeploymentPlatform for FakePlatform {
    fn platform_type(&self) -> PlatformType {
        self.platform
    }

    async fn get_infrastructure(
        &self,
        target: &DeployTarget,
    ) -> Result<InfrastructureScan, ScanError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let delay = *self.scan_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = self.scan_error.lock().clone() {
            return Err(ScanError {
                target: target.id.clone(),
                reason,
            });
        }

        let mut scan = InfrastructureScan::new(target.id.clone());
        for (kind, endpoint) in self.infrastructure.lock().iter() {
            scan.record(kind, endpoint.clone());
        }
        Ok(scan)
    }

    async fn deploy(
        &self,
        service: &ServiceDefinition,
        config: &ResolvedConfig,
        target: &DeployTarget,
    ) -> Result<DeploymentHandle, DeployError> {
        let delay = *self.deploy_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.deployed.lock().push(config.clone());

        if let Some(error) = self.deploy_error.lock().clone() {
            return Err(error);
        }
        Ok(DeploymentHandle {
            service: service.id.clone(),
            target: target.clone(),
            platform: self.platform,
            resource_id: format!("fake-{}", service.id),
            config_fingerprint: config.fingerprint(),
        })
    }

    async fn get_status(&self, _handle: &DeploymentHandle) -> Result<WorkloadStatus, DeployError> {
        self.status.lock().clone()
    }

    async fn stop(&self, _handle: &DeploymentHandle) -> Result<(), DeployError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self, _service: &ServiceDefinition, _target: &DeployTarget) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}
