use async_trait::async_trait;

use crate::domain::{
    DeployError, DeployTarget, DeploymentHandle, InfraKindSpec, InfrastructureScan, PlatformType,
    ResolvedConfig, ScanError, ServiceDefinition, WorkloadStatus,
};

/// Port for one deployment platform (Docker, Kubernetes, ...).
///
/// Each implementation fully owns translation from the generic service
/// definition and resolved config into its native primitives. Transient
/// control-plane errors are retried inside the implementation; callers only
/// see a `DeployError` after retries are exhausted.
#[async_trait]
pub trait DeploymentPlatform: Send + Sync {
    fn platform_type(&self) -> PlatformType;

    /// Discover infrastructure already present on the target.
    async fn get_infrastructure(&self, target: &DeployTarget)
        -> Result<InfrastructureScan, ScanError>;

    /// Create (or replace) the service's workload with the given config.
    async fn deploy(
        &self,
        service: &ServiceDefinition,
        config: &ResolvedConfig,
        target: &DeployTarget,
    ) -> Result<DeploymentHandle, DeployError>;

    async fn get_status(&self, handle: &DeploymentHandle) -> Result<WorkloadStatus, DeployError>;

    /// Stop the workload. Stopping something already gone succeeds.
    async fn stop(&self, handle: &DeploymentHandle) -> Result<(), DeployError>;

    /// Best-effort removal of partially created resources after a failed
    /// or cancelled deploy.
    async fn cleanup(&self, service: &ServiceDefinition, target: &DeployTarget);
}

/// Source of the infrastructure kinds a platform scans for. Read on every
/// scan so kinds registered after startup are discovered.
pub trait InfraCatalog: Send + Sync {
    fn specs(&self) -> Vec<InfraKindSpec>;
}

impl InfraCatalog for Vec<InfraKindSpec> {
    fn specs(&self) -> Vec<InfraKindSpec> {
        self.clone()
    }
}
