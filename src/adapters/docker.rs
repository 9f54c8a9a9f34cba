use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::adapters::retry::{send_with_retry, RequestFailure};
use crate::domain::config::RetryPolicy;
use crate::domain::{
    DeployError, DeployTarget, DeploymentHandle, Endpoint, InfrastructureScan, PlatformType,
    ResolvedConfig, ScanError, ServiceDefinition, TargetLocator, WorkloadStatus,
};
use crate::ports::{DeploymentPlatform, HttpClient, HttpRequest, HttpResponse, InfraCatalog};

const API_VERSION: &str = "v1.43";
const INFRA_LABEL: &str = "stackwire.infra";

/// Docker Engine API platform for local and mesh-reachable Docker hosts.
pub struct DockerPlatform {
    client: Arc<dyn HttpClient>,
    retry: RetryPolicy,
    default_network: String,
    infra_kinds: Arc<dyn InfraCatalog>,
}

impl DockerPlatform {
    pub fn new(
        client: Arc<dyn HttpClient>,
        retry: RetryPolicy,
        default_network: impl Into<String>,
        infra_kinds: Arc<dyn InfraCatalog>,
    ) -> Self {
        Self {
            client,
            retry,
            default_network: default_network.into(),
            infra_kinds,
        }
    }

    fn api_base(target: &DeployTarget) -> Result<String, String> {
        match &target.locator {
            TargetLocator::Docker { api_url, .. } => Ok(format!(
                "{}/{}",
                api_url.trim_end_matches('/'),
                API_VERSION
            )),
            other => Err(format!(
                "target {} is a {} target, not docker",
                target.id,
                other.platform()
            )),
        }
    }

    fn container_name(service_id: &str) -> String {
        format!("stackwire-{}", service_id)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RequestFailure> {
        send_with_retry(self.client.as_ref(), &self.retry, request).await
    }

    /// Match running containers against known infrastructure kinds.
    fn scan_containers(&self, target: &str, containers: &[Value]) -> InfrastructureScan {
        let kinds = self.infra_kinds.specs();
        let mut scan = InfrastructureScan::new(target);
        for spec in &kinds {
            scan.entries.entry(spec.kind.clone()).or_default();
        }

        for container in containers {
            if container.get("State").and_then(Value::as_str) != Some("running") {
                continue;
            }
            let names: Vec<String> = container
                .get("Names")
                .and_then(Value::as_array)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|n| n.trim_start_matches('/').to_string())
                        .collect()
                })
                .unwrap_or_default();
            let Some(host) = names.first() else {
                continue;
            };
            let label = container
                .get("Labels")
                .and_then(|l| l.get(INFRA_LABEL))
                .and_then(Value::as_str);
            let private_ports: Vec<u16> = container
                .get("Ports")
                .and_then(Value::as_array)
                .map(|ports| {
                    ports
                        .iter()
                        .filter_map(|p| p.get("PrivatePort").and_then(Value::as_u64))
                        .filter_map(|p| u16::try_from(p).ok())
                        .collect()
                })
                .unwrap_or_default();

            for spec in &kinds {
                let matched = label == Some(spec.kind.as_str())
                    || names.iter().any(|n| spec.matches_name(n));
                if !matched {
                    continue;
                }
                let port = if private_ports.contains(&spec.default_port) {
                    spec.default_port
                } else {
                    private_ports.first().copied().unwrap_or(spec.default_port)
                };
                debug!(kind = %spec.kind, container = %host, port, "Matched infrastructure container");
                scan.record(&spec.kind, Endpoint::new(host.clone(), port));
            }
        }
        scan
    }

    fn create_body(
        &self,
        service: &ServiceDefinition,
        config: &ResolvedConfig,
        target: &DeployTarget,
    ) -> Value {
        let network = target.docker_network(&self.default_network);
        let exposed: Map<String, Value> = service
            .exposes
            .iter()
            .map(|e| (format!("{}/{}", e.port, e.protocol), json!({})))
            .collect();

        let mut endpoints = Map::new();
        endpoints.insert(network.clone(), json!({ "Aliases": [service.id] }));

        json!({
            "Image": service.image,
            "Env": config.to_env_list(),
            "Labels": {
                "stackwire.managed": "true",
                "stackwire.service": service.id,
                "stackwire.target": target.id,
                "stackwire.config-fingerprint": config.fingerprint(),
            },
            "ExposedPorts": exposed,
            "HostConfig": {
                "NetworkMode": network,
                "RestartPolicy": { "Name": "unless-stopped" },
            },
            "NetworkingConfig": { "EndpointsConfig": endpoints },
        })
    }

    /// Pull `image` onto the engine. The reply is a progress stream; only
    /// the status is inspected.
    async fn pull_image(&self, base: &str, image: &str) -> Result<(), DeployError> {
        let mut url = Url::parse(&format!("{}/images/create", base))
            .map_err(|e| DeployError::Rejected(format!("invalid engine url {}: {}", base, e)))?;
        url.query_pairs_mut().append_pair("fromImage", image);

        info!(image, "Pulling image");
        let response = self.send(HttpRequest::post(url.as_str())).await?;
        if !response.is_success() {
            return Err(DeployError::Rejected(format!(
                "pull of {} failed (HTTP {}): {}",
                image,
                response.status,
                response.message()
            )));
        }
        Ok(())
    }

    async fn create_container(
        &self,
        base: &str,
        name: &str,
        image: &str,
        body: &Value,
    ) -> Result<String, DeployError> {
        let url = format!("{}/containers/create?name={}", base, name);
        let mut response = self
            .send(HttpRequest::post(&url).json(body.clone()))
            .await?;

        if response.status == 404 {
            debug!(container = name, image, "Image missing on engine");
            self.pull_image(base, image).await?;
            response = self
                .send(HttpRequest::post(&url).json(body.clone()))
                .await?;
        }

        if response.status == 409 {
            info!(container = name, "Replacing existing container");
            self.send(HttpRequest::delete(format!(
                "{}/containers/{}?force=true",
                base, name
            )))
            .await?;
            response = self
                .send(HttpRequest::post(&url).json(body.clone()))
                .await?;
        }

        match response.status {
            200 | 201 => response
                .body
                .get("Id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| DeployError::Rejected("create returned no container id".to_string())),
            404 => Err(DeployError::Rejected(format!(
                "image not found: {}",
                response.message()
            ))),
            _ => Err(DeployError::Rejected(response.message())),
        }
    }
}

fn status_from_inspect(body: &Value) -> WorkloadStatus {
    let state = body.get("State");
    let status = state
        .and_then(|s| s.get("Status"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let health = state
        .and_then(|s| s.get("Health"))
        .and_then(|h| h.get("Status"))
        .and_then(Value::as_str);
    let exit_code = state
        .and_then(|s| s.get("ExitCode"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    match status {
        "created" => WorkloadStatus::Pending,
        "running" => match health {
            Some("unhealthy") => WorkloadStatus::Degraded,
            Some("starting") => WorkloadStatus::Pending,
            _ => WorkloadStatus::Running,
        },
        "restarting" | "paused" => WorkloadStatus::Degraded,
        "exited" if exit_code == 0 => WorkloadStatus::Stopped,
        "removing" => WorkloadStatus::Stopped,
        _ => WorkloadStatus::Failed,
    }
}

#[async_trait]
impl DeploymentPlatform for DockerPlatform {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Docker
    }

    async fn get_infrastructure(
        &self,
        target: &DeployTarget,
    ) -> Result<InfrastructureScan, ScanError> {
        let scan_error = |reason: String| ScanError {
            target: target.id.clone(),
            reason,
        };

        let base = Self::api_base(target).map_err(scan_error)?;
        let network = target.docker_network(&self.default_network);
        let mut url = Url::parse(&format!("{}/containers/json", base))
            .map_err(|e| scan_error(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("filters", &json!({ "network": [network] }).to_string());

        let response = self
            .send(HttpRequest::get(url.as_str()))
            .await
            .map_err(|f| f.into_scan_error(&target.id))?;
        if !response.is_success() {
            return Err(scan_error(response.message()));
        }

        let containers = response.body.as_array().cloned().unwrap_or_default();
        let scan = self.scan_containers(&target.id, &containers);
        info!(
            target = %target.id,
            containers = containers.len(),
            found = scan.entries.values().filter(|e| e.found).count(),
            "Docker infrastructure scanned"
        );
        Ok(scan)
    }

    async fn deploy(
        &self,
        service: &ServiceDefinition,
        config: &ResolvedConfig,
        target: &DeployTarget,
    ) -> Result<DeploymentHandle, DeployError> {
        let base = Self::api_base(target).map_err(DeployError::Rejected)?;
        let name = Self::container_name(&service.id);
        let body = self.create_body(service, config, target);

        let id = self
            .create_container(&base, &name, &service.image, &body)
            .await?;

        let response = self
            .send(HttpRequest::post(format!("{}/containers/{}/start", base, id)))
            .await?;
        if !matches!(response.status, 204 | 304) && !response.is_success() {
            return Err(DeployError::Rejected(format!(
                "start failed: {}",
                response.message()
            )));
        }

        info!(service = %service.id, target = %target.id, container = %id, "Docker container started");

        Ok(DeploymentHandle {
            service: service.id.clone(),
            target: target.clone(),
            platform: PlatformType::Docker,
            resource_id: id,
            config_fingerprint: config.fingerprint(),
        })
    }

    async fn get_status(&self, handle: &DeploymentHandle) -> Result<WorkloadStatus, DeployError> {
        let base = Self::api_base(&handle.target).map_err(DeployError::Rejected)?;
        let response = self
            .send(HttpRequest::get(format!(
                "{}/containers/{}/json",
                base, handle.resource_id
            )))
            .await?;

        match response.status {
            404 => Ok(WorkloadStatus::Stopped),
            s if (200..300).contains(&s) => Ok(status_from_inspect(&response.body)),
            _ => Err(DeployError::Rejected(response.message())),
        }
    }

    async fn stop(&self, handle: &DeploymentHandle) -> Result<(), DeployError> {
        let base = Self::api_base(&handle.target).map_err(DeployError::Rejected)?;
        let response = self
            .send(HttpRequest::post(format!(
                "{}/containers/{}/stop",
                base, handle.resource_id
            )))
            .await?;

        match response.status {
            204 | 304 | 404 => {
                info!(service = %handle.service, container = %handle.resource_id, "Docker container stopped");
                Ok(())
            }
            s if (200..300).contains(&s) => Ok(()),
            _ => Err(DeployError::Rejected(response.message())),
        }
    }

    async fn cleanup(&self, service: &ServiceDefinition, target: &DeployTarget) {
        let Ok(base) = Self::api_base(target) else {
            return;
        };
        let url = format!(
            "{}/containers/{}?force=true",
            base,
            Self::container_name(&service.id)
        );
        if let Err(e) = self.send(HttpRequest::delete(url)).await {
            warn!(service = %service.id, target = %target.id, error = %e.describe(), "Docker cleanup failed");
        }
    }
}
