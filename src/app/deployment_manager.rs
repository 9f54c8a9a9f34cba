use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::{CapabilityResolver, ManifestStore, PlatformRegistry, ScanCache, TargetDirectory};
use crate::domain::{
    DeployError, DeployTarget, DeploymentHandle, DeploymentRecord, DeploymentState, DomainError,
    ResolutionError, ResolvedConfig, ServiceDefinition, WiringEvent, WorkloadStatus,
};
use crate::ports::DeploymentPlatform;

/// (service id, target id)
type Key = (String, String);

#[derive(Debug, Clone)]
struct Deployment {
    state: DeploymentState,
    handle: Option<DeploymentHandle>,
    fingerprint: Option<String>,
    last_error: Option<String>,
    /// Bumped on every explicit action so stale completions are ignored.
    epoch: u64,
    /// An activate owns this record until it returns or is dropped.
    activating: bool,
}

impl Deployment {
    fn new(epoch: u64) -> Self {
        Self {
            state: DeploymentState::Unresolved,
            handle: None,
            fingerprint: None,
            last_error: None,
            epoch,
            activating: false,
        }
    }

    /// Apply an automatic transition. Illegal moves are logged and ignored.
    fn advance(&mut self, key: &Key, next: DeploymentState) -> bool {
        if self.state == next {
            return false;
        }
        if !self.state.can_transition_to(next) {
            warn!(
                service = %key.0,
                target = %key.1,
                from = ?self.state,
                to = ?next,
                "Ignoring illegal deployment transition"
            );
            return false;
        }
        info!(service = %key.0, target = %key.1, from = ?self.state, to = ?next, "Deployment state changed");
        self.state = next;
        true
    }

    fn fail(&mut self, key: &Key, reason: String) {
        self.advance(key, DeploymentState::Failed);
        self.last_error = Some(reason);
    }

    fn view(&self, key: &Key) -> DeploymentRecord {
        DeploymentRecord {
            service: key.0.clone(),
            target: key.1.clone(),
            state: self.state,
            resource_id: self.handle.as_ref().map(|h| h.resource_id.clone()),
            config_fingerprint: self.fingerprint.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

type Deployments = Arc<Mutex<BTreeMap<Key, Deployment>>>;

/// Releases the activation marker of a record however `activate` exits.
struct ActivationSlot {
    deployments: Deployments,
    key: Key,
}

impl Drop for ActivationSlot {
    fn drop(&mut self) {
        if let Some(deployment) = self.deployments.lock().get_mut(&self.key) {
            deployment.activating = false;
        }
    }
}

/// Resolved configs per pair. Every invalidation bumps `generation`, and a
/// resolve that started under an older generation is not cached.
#[derive(Default)]
struct ConfigCache {
    entries: BTreeMap<Key, ResolvedConfig>,
    generation: u64,
}

/// Marks an in-flight deploy `Failed` and schedules cleanup if the deploy
/// future is dropped before completing.
struct DeployGuard {
    deployments: Deployments,
    scans: Arc<ScanCache>,
    platform: Arc<dyn DeploymentPlatform>,
    service: Arc<ServiceDefinition>,
    target: DeployTarget,
    key: Key,
    epoch: u64,
    armed: bool,
}

impl DeployGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DeployGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        if let Some(deployment) = self.deployments.lock().get_mut(&self.key) {
            if deployment.epoch == self.epoch && deployment.state == DeploymentState::Deploying {
                deployment.fail(
                    &self.key,
                    DeployError::Cancelled("deploy cancelled by caller".to_string()).to_string(),
                );
            }
        }
        self.scans.invalidate(&self.target.id);
        warn!(service = %self.key.0, target = %self.key.1, "Deploy cancelled mid-flight");

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let platform = self.platform.clone();
                let service = self.service.clone();
                let target = self.target.clone();
                runtime.spawn(async move { platform.cleanup(&service, &target).await });
            }
            Err(_) => {
                error!(service = %self.key.0, target = %self.key.1, "No runtime for cleanup of cancelled deploy");
            }
        }
    }
}

/// Drives the per-(service, target) deployment state machine.
pub struct DeploymentManager {
    manifests: Arc<ManifestStore>,
    targets: Arc<TargetDirectory>,
    resolver: Arc<CapabilityResolver>,
    platforms: Arc<PlatformRegistry>,
    scans: Arc<ScanCache>,
    deploy_timeout: Duration,
    deployments: Deployments,
    configs: Mutex<ConfigCache>,
    epochs: AtomicU64,
}

impl DeploymentManager {
    pub fn new(
        manifests: Arc<ManifestStore>,
        targets: Arc<TargetDirectory>,
        resolver: Arc<CapabilityResolver>,
        platforms: Arc<PlatformRegistry>,
        scans: Arc<ScanCache>,
        deploy_timeout: Duration,
    ) -> Self {
        Self {
            manifests,
            targets,
            resolver,
            platforms,
            scans,
            deploy_timeout,
            deployments: Arc::new(Mutex::new(BTreeMap::new())),
            configs: Mutex::new(ConfigCache::default()),
            epochs: AtomicU64::new(0),
        }
    }

    /// Explicit (re-)deploy of a service onto a target.
    ///
    /// Re-enters the state machine at `Unresolved`. Resolution failures keep
    /// the record there; platform failures move it to `Failed`. A second
    /// activate of the same pair is refused until the first one returns.
    pub async fn activate(
        &self,
        service_id: &str,
        target_id: &str,
    ) -> Result<DeploymentRecord, DomainError> {
        let service = self.manifests.get(service_id)?;
        let target = self.targets.from_id(target_id)?;
        let key: Key = (service.id.clone(), target.id.clone());
        let epoch = self.begin(&key)?;
        let _slot = ActivationSlot {
            deployments: self.deployments.clone(),
            key: key.clone(),
        };

        let generation = self.configs.lock().generation;
        let config = match self.resolver.resolve(&service.id, &target).await {
            Ok(config) => config,
            Err(e) => {
                self.update(&key, epoch, |d| d.last_error = Some(e.to_string()));
                return Err(e.into());
            }
        };
        self.cache_config(&key, &config, generation);
        self.update(&key, epoch, |d| {
            d.advance(&key, DeploymentState::Resolved);
            d.fingerprint = Some(config.fingerprint());
        });

        let platform = match self.platforms.get_deployment_platform(&target) {
            Ok(platform) => platform,
            Err(e) => {
                self.update(&key, epoch, |d| d.fail(&key, e.to_string()));
                return Err(e.into());
            }
        };

        if !self.is_current(&key, epoch) {
            warn!(service = %service.id, target = %target.id, "Activation superseded before deploy");
            return Err(self.busy(&key));
        }
        self.update(&key, epoch, |d| {
            d.advance(&key, DeploymentState::Deploying);
        });
        info!(
            service = %service.id,
            target = %target.id,
            platform = %target.platform,
            fingerprint = %config.fingerprint(),
            "Deploying service"
        );

        let mut guard = DeployGuard {
            deployments: self.deployments.clone(),
            scans: self.scans.clone(),
            platform: platform.clone(),
            service: service.clone(),
            target: target.clone(),
            key: key.clone(),
            epoch,
            armed: true,
        };
        let result =
            match tokio::time::timeout(self.deploy_timeout, platform.deploy(&service, &config, &target))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(DeployError::Cancelled(format!(
                    "deploy did not finish within {}s",
                    self.deploy_timeout.as_secs_f32()
                ))),
            };
        guard.disarm();
        self.invalidate_target(&target.id);

        match result {
            Ok(handle) => {
                debug!(service = %service.id, resource = %handle.resource_id, "Platform accepted deploy");
                self.update(&key, epoch, |d| d.handle = Some(handle));
                self.probe(&service.id, &target.id).await
            }
            Err(e) => {
                error!(service = %service.id, target = %target.id, error = %e, "Deploy failed");
                platform.cleanup(&service, &target).await;
                self.update(&key, epoch, |d| d.fail(&key, e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Explicit stop of every deployment of a service.
    pub async fn deactivate(&self, service_id: &str) -> Result<Vec<DeploymentRecord>, DomainError> {
        self.manifests.get(service_id)?;

        let stoppable: Vec<(Key, u64, DeploymentHandle)> = self
            .deployments
            .lock()
            .iter()
            .filter(|(key, _)| key.0 == service_id)
            .filter_map(|(key, d)| {
                if d.activating || d.state == DeploymentState::Deploying {
                    warn!(service = %key.0, target = %key.1, "Deploy in progress, not stopping");
                    return None;
                }
                match (&d.handle, d.state) {
                    (Some(handle), state) if state != DeploymentState::Stopped => {
                        Some((key.clone(), d.epoch, handle.clone()))
                    }
                    _ => None,
                }
            })
            .collect();

        for (key, epoch, handle) in stoppable {
            let result = match self.platforms.get_deployment_platform(&handle.target) {
                Ok(platform) => platform.stop(&handle).await,
                Err(e) => Err(e),
            };
            self.invalidate_target(&key.1);

            self.update(&key, epoch, |d| match result {
                Ok(()) => {
                    info!(service = %key.0, target = %key.1, from = ?d.state, "Deployment stopped");
                    d.state = DeploymentState::Stopped;
                    d.handle = None;
                    d.last_error = None;
                }
                Err(e) => {
                    error!(service = %key.0, target = %key.1, error = %e, "Stop failed");
                    d.fail(&key, e.to_string());
                }
            });
        }

        self.status(service_id)
    }

    /// Poll the platform once and apply the resulting health transition.
    pub async fn probe(
        &self,
        service_id: &str,
        target_id: &str,
    ) -> Result<DeploymentRecord, DomainError> {
        let key: Key = (service_id.to_string(), target_id.to_string());
        let (epoch, state, handle) = {
            let deployments = self.deployments.lock();
            let deployment = deployments
                .get(&key)
                .ok_or_else(|| DomainError::not_found("deployment", format!("{}@{}", key.0, key.1)))?;
            match (&deployment.handle, deployment.state.is_live()) {
                (Some(handle), true) => (deployment.epoch, deployment.state, handle.clone()),
                _ => return Ok(deployment.view(&key)),
            }
        };

        let status = match self.platforms.get_deployment_platform(&handle.target) {
            Ok(platform) => platform.get_status(&handle).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &status {
            warn!(service = %key.0, target = %key.1, error = %e, "Health probe failed");
        }

        let next = health_transition(state, &status);
        self.update(&key, epoch, |d| {
            if d.state != state {
                return;
            }
            match (next, &status) {
                (Some(DeploymentState::Failed), Ok(status)) => {
                    d.fail(&key, format!("platform reports workload {:?}", status))
                }
                (Some(next), _) => {
                    d.advance(&key, next);
                }
                (None, _) => {}
            }
        });

        self.record(&key)
    }

    /// Probe every live deployment.
    pub async fn probe_all(&self) {
        let live: Vec<Key> = self
            .deployments
            .lock()
            .iter()
            .filter(|(_, d)| d.state.is_live() && d.handle.is_some())
            .map(|(key, _)| key.clone())
            .collect();

        for (service, target) in live {
            if let Err(e) = self.probe(&service, &target).await {
                debug!(service = %service, target = %target, error = %e, "Probe skipped");
            }
        }
    }

    /// Records for every target the service has been activated on.
    pub fn status(&self, service_id: &str) -> Result<Vec<DeploymentRecord>, DomainError> {
        self.manifests.get(service_id)?;
        Ok(self
            .deployments
            .lock()
            .iter()
            .filter(|(key, _)| key.0 == service_id)
            .map(|(key, d)| d.view(key))
            .collect())
    }

    /// Every record, in (service, target) order.
    pub fn records(&self) -> Vec<DeploymentRecord> {
        self.deployments
            .lock()
            .iter()
            .map(|(key, d)| d.view(key))
            .collect()
    }

    /// Resolved config for a pair, reusing the cached one while its inputs
    /// are unchanged.
    pub async fn resolved_config(
        &self,
        service_id: &str,
        target_id: &str,
    ) -> Result<ResolvedConfig, DomainError> {
        let target = self.targets.from_id(target_id)?;
        let key: Key = (service_id.to_string(), target.id.clone());
        let generation = {
            let configs = self.configs.lock();
            if let Some(config) = configs.entries.get(&key) {
                return Ok(config.clone());
            }
            configs.generation
        };

        let config = self.resolver.resolve(service_id, &target).await?;
        self.cache_config(&key, &config, generation);
        Ok(config)
    }

    /// Every reason the service cannot resolve on the target.
    pub async fn validate(
        &self,
        service_id: &str,
        target_id: &str,
    ) -> Result<Vec<ResolutionError>, DomainError> {
        let target = self.targets.from_id(target_id)?;
        Ok(self.resolver.validate(service_id, &target).await)
    }

    /// Drop cached configs of one service. Deployment state is untouched.
    pub fn invalidate_configs(&self, service_id: &str) {
        let mut configs = self.configs.lock();
        configs.generation += 1;
        configs.entries.retain(|key, _| key.0 != service_id);
        debug!(service = service_id, "Cached resolved configs dropped");
    }

    pub fn invalidate_all_configs(&self) {
        let mut configs = self.configs.lock();
        configs.generation += 1;
        configs.entries.clear();
    }

    /// Poll live deployments on a fixed interval.
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.probe_all().await;
            }
            debug!("Health monitor stopped");
        })
    }

    /// Drop cached configs whenever wiring changes.
    pub fn spawn_wiring_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<WiringEvent>,
    ) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = events.recv().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                match event {
                    Ok(event) => manager.invalidate_configs(event.service()),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Wiring listener lagged, dropping all cached configs");
                        manager.invalidate_all_configs();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Wiring listener stopped");
        })
    }

    /// Reset a pair to `Unresolved` for an explicit action. Returns the new epoch.
    fn begin(&self, key: &Key) -> Result<u64, DomainError> {
        let epoch = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        let mut deployments = self.deployments.lock();
        let deployment = deployments
            .entry(key.clone())
            .or_insert_with(|| Deployment::new(epoch));

        if deployment.activating || deployment.state == DeploymentState::Deploying {
            warn!(service = %key.0, target = %key.1, state = ?deployment.state, "Activation already in progress");
            return Err(DomainError::StateTransition {
                from: deployment.state,
                to: DeploymentState::Unresolved,
            });
        }

        if deployment.state != DeploymentState::Unresolved {
            info!(service = %key.0, target = %key.1, from = ?deployment.state, "Re-deploy requested");
        }
        deployment.state = DeploymentState::Unresolved;
        deployment.last_error = None;
        deployment.epoch = epoch;
        deployment.activating = true;
        Ok(epoch)
    }

    fn is_current(&self, key: &Key, epoch: u64) -> bool {
        self.deployments
            .lock()
            .get(key)
            .map_or(false, |d| d.epoch == epoch)
    }

    fn busy(&self, key: &Key) -> DomainError {
        let state = self
            .deployments
            .lock()
            .get(key)
            .map_or(DeploymentState::Unresolved, |d| d.state);
        DomainError::StateTransition {
            from: state,
            to: DeploymentState::Deploying,
        }
    }

    fn cache_config(&self, key: &Key, config: &ResolvedConfig, generation: u64) {
        let mut configs = self.configs.lock();
        if configs.generation == generation {
            configs.entries.insert(key.clone(), config.clone());
        } else {
            debug!(service = %key.0, target = %key.1, "Inputs changed during resolve, not caching");
        }
    }

    /// Mutate a record if no newer explicit action has replaced it.
    fn update(&self, key: &Key, epoch: u64, apply: impl FnOnce(&mut Deployment)) {
        let mut deployments = self.deployments.lock();
        match deployments.get_mut(key) {
            Some(deployment) if deployment.epoch == epoch => apply(deployment),
            _ => debug!(service = %key.0, target = %key.1, "Discarding stale deployment update"),
        }
    }

    fn record(&self, key: &Key) -> Result<DeploymentRecord, DomainError> {
        self.deployments
            .lock()
            .get(key)
            .map(|d| d.view(key))
            .ok_or_else(|| DomainError::not_found("deployment", format!("{}@{}", key.0, key.1)))
    }

    fn invalidate_target(&self, target_id: &str) {
        self.scans.invalidate(target_id);
        let mut configs = self.configs.lock();
        configs.generation += 1;
        configs.entries.retain(|key, _| key.1 != target_id);
    }
}

/// State implied by a platform status report, if it differs.
fn health_transition(
    current: DeploymentState,
    status: &Result<WorkloadStatus, DeployError>,
) -> Option<DeploymentState> {
    use DeploymentState as S;
    use WorkloadStatus as W;

    match (current, status) {
        (S::Deploying, Ok(W::Running)) => Some(S::Running),
        (S::Deploying, Ok(W::Failed | W::Stopped)) => Some(S::Failed),
        (S::Running, Ok(W::Pending | W::Degraded | W::Stopped)) => Some(S::Degraded),
        (S::Running, Err(_)) => Some(S::Degraded),
        (S::Degraded, Ok(W::Running)) => Some(S::Running),
        (S::Running | S::Degraded, Ok(W::Failed)) => Some(S::Failed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::Harness;
    use crate::domain::{Endpoint, WiringBinding};

    const DOCKER: &str = "local.docker.dev";
    const CLUSTER: &str = "cluster1.kubernetes.prod";

    fn bind(service: &str, capability: &str, provider: &str) -> WiringBinding {
        WiringBinding {
            service: service.to_string(),
            capability: capability.to_string(),
            provider: provider.to_string(),
        }
    }

    #[tokio::test]
    async fn test_activate_reaches_running() {
        let harness = Harness::new();
        let manager = harness.manager(Duration::from_secs(5));

        let record = manager.activate("chronicle", DOCKER).await.unwrap();
        assert_eq!(record.state, DeploymentState::Running);
        assert_eq!(record.resource_id.as_deref(), Some("fake-chronicle"));
        assert_eq!(harness.docker.deploy_calls(), 1);

        let deployed = harness.docker.last_deployed().unwrap();
        assert_eq!(deployed.get("MONGODB_URI"), Some("mongodb://mongo:27017"));
        assert_eq!(record.config_fingerprint, Some(deployed.fingerprint()));
        // Deploys invalidate the target's scan.
        assert!(harness.scans.peek(DOCKER).is_none());
    }

    #[tokio::test]
    async fn test_redeploy_with_unchanged_inputs_is_identical() {
        let harness = Harness::new();
        let manager = harness.manager(Duration::from_secs(5));

        let first = manager.activate("alpha", DOCKER).await.unwrap();
        let second = manager.activate("alpha", DOCKER).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(harness.docker.deploy_calls(), 2);
    }

    #[tokio::test]
    async fn test_resolution_failure_stays_unresolved() {
        let harness = Harness::new();
        let manager = harness.manager(Duration::from_secs(5));

        let err = manager.activate("chronicle", CLUSTER).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::Resolution(ResolutionError::UnresolvedInfrastructure { .. })
        ));
        let records = manager.status("chronicle").unwrap();
        assert_eq!(records[0].state, DeploymentState::Unresolved);
        assert!(records[0].last_error.as_deref().unwrap().contains("mongo"));
        assert_eq!(harness.kubernetes.deploy_calls(), 0);
    }

    #[tokio::test]
    async fn test_removed_wiring_leaves_running_deployment_alone() {
        let harness = Harness::new();
        let manager = harness.manager(Duration::from_secs(5));
        harness
            .wiring
            .set_binding(bind("indexer", "embedding", "local-embed"))
            .await
            .unwrap();
        assert_eq!(
            manager.activate("indexer", DOCKER).await.unwrap().state,
            DeploymentState::Running
        );

        harness
            .wiring
            .remove_binding("indexer", "embedding")
            .await
            .unwrap();
        manager.invalidate_configs("indexer");
        assert!(matches!(
            manager.resolved_config("indexer", DOCKER).await,
            Err(DomainError::Resolution(
                ResolutionError::MissingRequiredCapability { .. }
            ))
        ));
        assert_eq!(
            manager.status("indexer").unwrap()[0].state,
            DeploymentState::Running
        );

        assert!(manager.activate("indexer", DOCKER).await.is_err());
        let record = &manager.status("indexer").unwrap()[0];
        assert_eq!(record.state, DeploymentState::Unresolved);
        assert!(record.last_error.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_kubernetes_fails_without_stale_scan() {
        let harness = Harness::new();
        harness.kubernetes.set_infrastructure(
            "mongo",
            Endpoint::new("mongo.ai.svc.cluster.local", 27017),
        );
        harness.kubernetes.fail_deploys(DeployError::PlatformUnreachable(
            "https://10.0.0.1:6443 timed out".to_string(),
        ));
        let manager = harness.manager(Duration::from_secs(5));

        let err = manager.activate("chronicle", CLUSTER).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::Deploy(DeployError::PlatformUnreachable(_))
        ));
        let record = &manager.status("chronicle").unwrap()[0];
        assert_eq!(record.state, DeploymentState::Failed);
        assert_eq!(harness.kubernetes.cleanup_calls(), 1);
        assert!(harness.scans.peek(CLUSTER).is_none());
    }

    #[tokio::test]
    async fn test_deploy_timeout_fails_and_cleans_up() {
        let harness = Harness::new();
        harness.docker.set_deploy_delay(Duration::from_millis(500));
        let manager = harness.manager(Duration::from_millis(50));

        let err = manager.activate("alpha", DOCKER).await.unwrap_err();
        assert!(matches!(err, DomainError::Deploy(DeployError::Cancelled(_))));
        assert_eq!(
            manager.status("alpha").unwrap()[0].state,
            DeploymentState::Failed
        );
        assert_eq!(harness.docker.cleanup_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_activate_ends_failed() {
        let harness = Harness::new();
        harness.docker.set_deploy_delay(Duration::from_millis(500));
        let manager = harness.manager(Duration::from_secs(5));

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.activate("alpha", DOCKER).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            manager.status("alpha").unwrap()[0].state,
            DeploymentState::Deploying
        );
        assert!(matches!(
            manager.activate("alpha", DOCKER).await,
            Err(DomainError::StateTransition { .. })
        ));

        task.abort();
        let _ = task.await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let record = &manager.status("alpha").unwrap()[0];
        assert_eq!(record.state, DeploymentState::Failed);
        assert!(record.last_error.as_deref().unwrap().contains("cancelled"));
        assert_eq!(harness.docker.cleanup_calls(), 1);
    }

    #[tokio::test]
    async fn test_probe_transitions() {
        let harness = Harness::new();
        let manager = harness.manager(Duration::from_secs(5));
        harness.docker.set_status(Ok(WorkloadStatus::Pending));
        assert_eq!(
            manager.activate("alpha", DOCKER).await.unwrap().state,
            DeploymentState::Deploying
        );

        let expect = |status: Result<WorkloadStatus, DeployError>, state: DeploymentState| {
            harness.docker.set_status(status);
            let manager = manager.clone();
            async move {
                assert_eq!(manager.probe("alpha", DOCKER).await.unwrap().state, state);
            }
        };
        expect(Ok(WorkloadStatus::Running), DeploymentState::Running).await;
        expect(Ok(WorkloadStatus::Degraded), DeploymentState::Degraded).await;
        expect(Ok(WorkloadStatus::Running), DeploymentState::Running).await;
        expect(
            Err(DeployError::PlatformUnreachable("down".to_string())),
            DeploymentState::Degraded,
        )
        .await;
        expect(Ok(WorkloadStatus::Failed), DeploymentState::Failed).await;
        // Failed is terminal until an explicit re-deploy.
        expect(Ok(WorkloadStatus::Running), DeploymentState::Failed).await;
    }

    #[tokio::test]
    async fn test_deactivate_stops_live_deployments() {
        let harness = Harness::new();
        let manager = harness.manager(Duration::from_secs(5));
        manager.activate("alpha", DOCKER).await.unwrap();
        manager.activate("alpha", "edge.docker.dev").await.unwrap();

        let records = manager.deactivate("alpha").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.state == DeploymentState::Stopped));
        assert_eq!(harness.docker.stop_calls(), 2);

        // Already stopped: nothing to do.
        manager.deactivate("alpha").await.unwrap();
        assert_eq!(harness.docker.stop_calls(), 2);
        assert_eq!(
            manager.probe("alpha", DOCKER).await.unwrap().state,
            DeploymentState::Stopped
        );
    }

    #[tokio::test]
    async fn test_wiring_events_drop_cached_configs() {
        let harness = Harness::new();
        let manager = harness.manager(Duration::from_secs(5));
        let listener = manager.spawn_wiring_listener(harness.wiring.subscribe());

        let before = manager.resolved_config("alpha", DOCKER).await.unwrap();
        assert_eq!(before.bindings["llm"], "openai-default");

        harness
            .wiring
            .set_binding(bind("alpha", "llm", "ollama"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let after = manager.resolved_config("alpha", DOCKER).await.unwrap();
        assert_eq!(after.bindings["llm"], "ollama");
        listener.abort();
    }

    #[tokio::test]
    async fn test_health_monitor_promotes_deploying() {
        let harness = Harness::new();
        let manager = harness.manager(Duration::from_secs(5));
        harness.docker.set_status(Ok(WorkloadStatus::Pending));
        manager.activate("alpha", DOCKER).await.unwrap();

        harness.docker.set_status(Ok(WorkloadStatus::Running));
        let monitor = manager.spawn_health_monitor(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.abort();

        assert_eq!(
            manager.status("alpha").unwrap()[0].state,
            DeploymentState::Running
        );
    }

    #[tokio::test]
    async fn test_concurrent_activate_is_refused_while_resolving() {
        let harness = Harness::new();
        harness.docker.set_scan_delay(Duration::from_millis(100));
        harness.docker.set_deploy_delay(Duration::from_millis(100));
        let manager = harness.manager(Duration::from_secs(5));

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.activate("chronicle", DOCKER).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = manager.activate("chronicle", DOCKER).await;
        assert!(matches!(
            second,
            Err(DomainError::StateTransition {
                from: DeploymentState::Unresolved,
                ..
            })
        ));

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.state, DeploymentState::Running);
        assert_eq!(harness.docker.deploy_calls(), 1);

        // The slot is released once the first activate returns.
        assert!(manager.activate("chronicle", DOCKER).await.is_ok());
        assert_eq!(harness.docker.deploy_calls(), 2);
    }

    #[tokio::test]
    async fn test_resolve_overlapping_settings_change_is_not_cached() {
        let harness = Harness::new();
        harness.docker.set_scan_delay(Duration::from_millis(100));
        let manager = harness.manager(Duration::from_secs(5));

        let stale = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.resolved_config("chronicle", DOCKER).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut settings = crate::app::ServiceSettings::default();
        settings
            .env
            .insert("LOG_LEVEL".to_string(), "debug".to_string());
        harness.settings.put("chronicle", &settings).unwrap();
        manager.invalidate_configs("chronicle");

        let stale = stale.await.unwrap().unwrap();
        assert_eq!(stale.get("LOG_LEVEL"), None);

        let fresh = manager.resolved_config("chronicle", DOCKER).await.unwrap();
        assert_eq!(fresh.get("LOG_LEVEL"), Some("debug"));
    }
}
