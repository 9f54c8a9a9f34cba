use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::infra_registry::InfraAuth;
use crate::app::{
    InfrastructureRegistry, ManifestStore, PlatformRegistry, ProviderRegistry, ScanCache,
    SettingsStore, WiringStore,
};
use crate::domain::config::{InfraAuthConfig, SettingsConfig};
use crate::domain::{
    DeployTarget, DomainError, FieldType, InfrastructureScan, LayerName, LayeredSettings,
    Requirement, ResolutionError, ResolvedConfig, ServiceDefinition, SettingsLayer,
};
use crate::ports::SecretStore;

/// Turns wiring, provider descriptors, discovered infrastructure and layered
/// settings into the environment a service instance starts with.
///
/// Resolution has no side effects apart from the (cached) infrastructure
/// scan, so repeated calls with unchanged inputs yield identical output.
pub struct CapabilityResolver {
    manifests: Arc<ManifestStore>,
    providers: Arc<ProviderRegistry>,
    wiring: Arc<WiringStore>,
    settings: Arc<SettingsStore>,
    infra: Arc<InfrastructureRegistry>,
    scans: Arc<ScanCache>,
    platforms: Arc<PlatformRegistry>,
    secrets: Arc<dyn SecretStore>,
    global: SettingsConfig,
    infra_auth: BTreeMap<String, InfraAuthConfig>,
}

/// Accumulated state of one resolution pass.
struct Pass {
    defaults: SettingsLayer,
    secrets: SettingsLayer,
    infrastructure: SettingsLayer,
    bindings: BTreeMap<String, String>,
    skipped: Vec<String>,
    errors: Vec<ResolutionError>,
}

impl Pass {
    fn new() -> Self {
        Self {
            defaults: SettingsLayer::new(LayerName::Defaults),
            secrets: SettingsLayer::new(LayerName::Secrets),
            infrastructure: SettingsLayer::new(LayerName::Infrastructure),
            bindings: BTreeMap::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl CapabilityResolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manifests: Arc<ManifestStore>,
        providers: Arc<ProviderRegistry>,
        wiring: Arc<WiringStore>,
        settings: Arc<SettingsStore>,
        infra: Arc<InfrastructureRegistry>,
        scans: Arc<ScanCache>,
        platforms: Arc<PlatformRegistry>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            manifests,
            providers,
            wiring,
            settings,
            infra,
            scans,
            platforms,
            secrets,
            global: SettingsConfig::default(),
            infra_auth: BTreeMap::new(),
        }
    }

    /// Global operator and explicit overrides applied to every service.
    pub fn with_global_settings(mut self, global: SettingsConfig) -> Self {
        self.global = global;
        self
    }

    /// Per-kind credentials embedded into infrastructure URLs.
    pub fn with_infra_auth(mut self, infra_auth: BTreeMap<String, InfraAuthConfig>) -> Self {
        self.infra_auth = infra_auth;
        self
    }

    /// Resolve a service for a target, failing on the first problem found.
    pub async fn resolve(
        &self,
        service_id: &str,
        target: &DeployTarget,
    ) -> Result<ResolvedConfig, ResolutionError> {
        match self.run(service_id, target).await {
            Ok(config) => {
                info!(
                    service = service_id,
                    target = %target.id,
                    keys = config.env.len(),
                    fingerprint = %config.fingerprint(),
                    "Service resolved"
                );
                Ok(config)
            }
            Err(mut errors) => {
                let first = errors.remove(0);
                warn!(service = service_id, target = %target.id, error = %first, "Resolution failed");
                Err(first)
            }
        }
    }

    /// Every problem that keeps a service from resolving; empty when it would.
    pub async fn validate(&self, service_id: &str, target: &DeployTarget) -> Vec<ResolutionError> {
        match self.run(service_id, target).await {
            Ok(_) => Vec::new(),
            Err(errors) => errors,
        }
    }

    /// One pass collecting all errors. `Err` is never empty.
    async fn run(
        &self,
        service_id: &str,
        target: &DeployTarget,
    ) -> Result<ResolvedConfig, Vec<ResolutionError>> {
        let service = self
            .manifests
            .get(service_id)
            .map_err(|_| vec![ResolutionError::UnknownService(service_id.to_string())])?;

        let unavailable = |e: DomainError| {
            vec![ResolutionError::StateUnavailable {
                service: service_id.to_string(),
                reason: e.to_string(),
            }]
        };
        let wiring = self.wiring.snapshot(service_id).map_err(unavailable)?;
        let settings = self.settings.get(service_id).map_err(unavailable)?;

        let mut pass = Pass::new();
        pass.defaults.extend(service.env.clone());

        self.resolve_capabilities(&service, &wiring, &mut pass);
        self.resolve_infrastructure(&service, target, &mut pass).await;

        if !pass.errors.is_empty() {
            return Err(pass.errors);
        }

        let mut operator = SettingsLayer::new(LayerName::Operator);
        operator.extend(self.global.overrides.clone());
        operator.extend(settings.overrides);

        let mut explicit = SettingsLayer::new(LayerName::Explicit);
        explicit.extend(self.global.env.clone());
        explicit.extend(settings.env);

        let mut layers = LayeredSettings::new();
        for key in self.providers.capabilities().secret_env_vars() {
            layers.mark_secret(key);
        }
        for layer in [
            pass.defaults,
            operator,
            pass.secrets,
            pass.infrastructure,
            explicit,
        ] {
            // Layers are pushed in their declared order; a failure is a bug.
            if let Err(e) = layers.push(layer) {
                return Err(vec![ResolutionError::StateUnavailable {
                    service: service_id.to_string(),
                    reason: e.to_string(),
                }]);
            }
        }

        Ok(ResolvedConfig::from_merged(
            service_id,
            target.id.clone(),
            layers.merge(),
            pass.bindings,
            pass.skipped,
        ))
    }

    fn resolve_capabilities(
        &self,
        service: &ServiceDefinition,
        wiring: &BTreeMap<String, String>,
        pass: &mut Pass,
    ) {
        let catalog = self.providers.capabilities();

        for requirement in &service.requirements {
            let capability_id = requirement.capability.as_str();
            let provider_id = match wiring.get(capability_id) {
                Some(id) => Some(id.clone()),
                None => self.providers.default_for(capability_id).map(|p| p.id),
            };

            let Some(provider_id) = provider_id else {
                match requirement.requirement {
                    Requirement::Required => {
                        pass.errors.push(ResolutionError::MissingRequiredCapability {
                            service: service.id.clone(),
                            capability: capability_id.to_string(),
                        })
                    }
                    Requirement::Optional => {
                        debug!(service = %service.id, capability = capability_id, "Optional capability unwired, skipping");
                        pass.skipped.push(capability_id.to_string());
                    }
                }
                continue;
            };

            let invalid = |reason: &str| ResolutionError::InvalidBinding {
                service: service.id.clone(),
                capability: capability_id.to_string(),
                provider: provider_id.clone(),
                reason: reason.to_string(),
            };

            let Some(capability) = catalog.get(capability_id) else {
                pass.errors.push(invalid("capability is not in the catalog"));
                continue;
            };
            let provider = match self.providers.get_provider(&provider_id) {
                Ok(provider) => provider,
                Err(_) => {
                    pass.errors.push(invalid("provider is not registered"));
                    continue;
                }
            };
            if !provider.satisfies(capability_id) {
                pass.errors
                    .push(invalid("provider does not satisfy the capability"));
                continue;
            }
            if !provider.enabled {
                pass.errors.push(invalid("provider is disabled"));
                continue;
            }

            let needs_credential = capability
                .fields
                .iter()
                .any(|f| f.field_type == FieldType::Secret);
            let credential = if needs_credential {
                match self.providers.resolve_credential(&provider) {
                    Ok(credential) => credential,
                    Err(e) => {
                        pass.errors.push(e);
                        continue;
                    }
                }
            } else {
                None
            };

            for field in &capability.fields {
                let key = capability.env_var(field);
                match field.field_type {
                    FieldType::Url => match provider.endpoint_url() {
                        Ok(url) => pass.defaults.set(key, url),
                        Err(reason) => pass.errors.push(invalid(&reason)),
                    },
                    FieldType::Secret => match &credential {
                        Some(value) => pass.secrets.set_secret(key, value.expose()),
                        None if field.required => {
                            pass.errors.push(ResolutionError::MissingCredential {
                                provider: provider.id.clone(),
                                source_desc: provider.credential_source.describe(),
                            })
                        }
                        None => {}
                    },
                    FieldType::String => {
                        if let Some(value) = provider
                            .values
                            .get(&field.key)
                            .or(field.default.as_ref())
                        {
                            pass.defaults.set(key, value.clone());
                        }
                    }
                }
            }

            debug!(
                service = %service.id,
                capability = capability_id,
                provider = %provider.id,
                "Capability bound"
            );
            pass.bindings
                .insert(capability_id.to_string(), provider.id.clone());
        }
    }

    async fn resolve_infrastructure(
        &self,
        service: &ServiceDefinition,
        target: &DeployTarget,
        pass: &mut Pass,
    ) {
        if service.infrastructure.is_empty() {
            return;
        }

        let scan = match self.platforms.get_deployment_platform(target) {
            Ok(platform) => self.scans.get(target, platform).await,
            Err(e) => InfrastructureScan::unavailable(target.id.clone(), e.to_string()),
        };

        for dependency in &service.infrastructure {
            let kind = self
                .infra
                .canonical(&dependency.kind)
                .unwrap_or_else(|| dependency.kind.clone());
            let kind = kind.as_str();
            let env_var = self.infra.env_var(kind);
            let url = match (&env_var, scan.endpoint(kind)) {
                (Some(_), Some(endpoint)) => {
                    let auth = self.infra_auth(kind);
                    match self.infra.build_url(kind, endpoint, &auth) {
                        Ok(url) => Some((url, self.infra.embeds_secret(kind, &auth))),
                        Err(reason) => {
                            warn!(kind, endpoint = %endpoint, reason = %reason, "Cannot build infrastructure URL");
                            None
                        }
                    }
                }
                _ => None,
            };

            match (url, env_var) {
                (Some((url, secret)), Some(env_var)) => {
                    if secret {
                        pass.infrastructure.set_secret(env_var, url);
                    } else {
                        pass.infrastructure.set(env_var, url);
                    }
                }
                _ if dependency.requirement == Requirement::Optional => {
                    debug!(service = %service.id, kind, target = %target.id, "Optional infrastructure absent");
                    pass.skipped.push(format!("infra:{}", kind));
                }
                _ => pass.errors.push(ResolutionError::UnresolvedInfrastructure {
                    service: service.id.clone(),
                    kind: kind.to_string(),
                    target: target.id.clone(),
                }),
            }
        }
    }

    fn infra_auth(&self, kind: &str) -> InfraAuth {
        let Some(config) = self.infra_auth.get(kind) else {
            return InfraAuth::default();
        };
        let password = config.password_secret.as_deref().and_then(|key| {
            match self.secrets.get(key) {
                Ok(value) => value,
                Err(e) => {
                    warn!(kind, error = %e, "Infrastructure password lookup failed");
                    None
                }
            }
        });
        InfraAuth {
            username: config.username.clone(),
            password,
            database: config.database.clone(),
        }
    }
}
