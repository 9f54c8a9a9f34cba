use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::adapters::retry::{send_with_retry, RequestFailure};
use crate::domain::config::RetryPolicy;
use crate::domain::{
    DeployError, DeployTarget, DeploymentHandle, Endpoint, InfrastructureScan, PlatformType,
    ResolvedConfig, ScanError, ServiceDefinition, TargetLocator, WorkloadStatus,
};
use crate::ports::{DeploymentPlatform, HttpClient, HttpRequest, HttpResponse, InfraCatalog};

const INFRA_LABEL: &str = "stackwire.io/infra";
const NAME_LABEL: &str = "app.kubernetes.io/name";
const MANAGED_LABEL: &str = "app.kubernetes.io/managed-by";
const FINGERPRINT_ANNOTATION: &str = "stackwire.io/config-fingerprint";

/// Kubernetes API platform. Talks to the API server directly with a bearer
/// token resolved into the deploy target.
pub struct KubernetesPlatform {
    client: Arc<dyn HttpClient>,
    retry: RetryPolicy,
    infra_kinds: Arc<dyn InfraCatalog>,
}

/// API server address and namespace pulled from a target.
struct Cluster<'a> {
    api: &'a str,
    namespace: &'a str,
    token: Option<&'a str>,
}

impl<'a> Cluster<'a> {
    fn from_target(target: &'a DeployTarget) -> Result<Self, String> {
        match &target.locator {
            TargetLocator::Kubernetes {
                api_server,
                namespace,
                ..
            } => Ok(Self {
                api: api_server.trim_end_matches('/'),
                namespace,
                token: target.credential.as_ref().map(|c| c.expose()),
            }),
            other => Err(format!(
                "target {} is a {} target, not kubernetes",
                target.id,
                other.platform()
            )),
        }
    }

    fn core(&self, resource: &str) -> String {
        format!("{}/api/v1/namespaces/{}/{}", self.api, self.namespace, resource)
    }

    fn apps(&self, resource: &str) -> String {
        format!(
            "{}/apis/apps/v1/namespaces/{}/{}",
            self.api, self.namespace, resource
        )
    }

    fn request(&self, request: HttpRequest) -> HttpRequest {
        request.bearer(self.token)
    }
}

/// DNS-1123 label for a service id.
fn resource_name(service_id: &str) -> String {
    service_id.to_lowercase().replace('_', "-")
}

fn workload_name(service_id: &str) -> String {
    format!("stackwire-{}", resource_name(service_id))
}

/// Map a non-success API response to a deploy error.
fn rejection(response: &HttpResponse, action: &str) -> DeployError {
    let message = response.message();
    if response.status == 403 && message.contains("exceeded quota") {
        DeployError::QuotaExceeded(message)
    } else {
        DeployError::Rejected(format!("{} failed (HTTP {}): {}", action, response.status, message))
    }
}

impl KubernetesPlatform {
    pub fn new(
        client: Arc<dyn HttpClient>,
        retry: RetryPolicy,
        infra_kinds: Arc<dyn InfraCatalog>,
    ) -> Self {
        Self {
            client,
            retry,
            infra_kinds,
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RequestFailure> {
        send_with_retry(self.client.as_ref(), &self.retry, request).await
    }

    /// POST a resource, replacing it with PUT when it already exists.
    async fn apply(
        &self,
        cluster: &Cluster<'_>,
        collection_url: &str,
        name: &str,
        body: Value,
        action: &str,
    ) -> Result<(), DeployError> {
        let response = self
            .send(cluster.request(HttpRequest::post(collection_url).json(body.clone())))
            .await?;
        let response = if response.status == 409 {
            debug!(resource = name, "Resource exists, replacing");
            self.send(
                cluster.request(
                    HttpRequest::put(format!("{}/{}", collection_url, name)).json(body),
                ),
            )
            .await?
        } else {
            response
        };

        if response.is_success() {
            Ok(())
        } else {
            Err(rejection(&response, action))
        }
    }

    /// Delete a resource; absent resources count as deleted.
    async fn remove(&self, cluster: &Cluster<'_>, url: String) -> Result<(), DeployError> {
        let response = self.send(cluster.request(HttpRequest::delete(url))).await?;
        if response.is_success() || response.status == 404 {
            Ok(())
        } else {
            Err(rejection(&response, "delete"))
        }
    }

    fn scan_services(&self, target: &str, namespace: &str, items: &[Value]) -> InfrastructureScan {
        let kinds = self.infra_kinds.specs();
        let mut scan = InfrastructureScan::new(target);
        for spec in &kinds {
            scan.entries.entry(spec.kind.clone()).or_default();
        }

        for item in items {
            let metadata = item.get("metadata");
            let Some(name) = metadata
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let label = metadata
                .and_then(|m| m.get("labels"))
                .and_then(|l| l.get(INFRA_LABEL))
                .and_then(Value::as_str);
            let ports: Vec<u16> = item
                .get("spec")
                .and_then(|s| s.get("ports"))
                .and_then(Value::as_array)
                .map(|ports| {
                    ports
                        .iter()
                        .filter_map(|p| p.get("port").and_then(Value::as_u64))
                        .filter_map(|p| u16::try_from(p).ok())
                        .collect()
                })
                .unwrap_or_default();

            for spec in &kinds {
                if label != Some(spec.kind.as_str()) && !spec.matches_name(name) {
                    continue;
                }
                let port = if ports.contains(&spec.default_port) {
                    spec.default_port
                } else {
                    ports.first().copied().unwrap_or(spec.default_port)
                };
                let host = format!("{}.{}.svc.cluster.local", name, namespace);
                debug!(kind = %spec.kind, service = name, port, "Matched infrastructure service");
                scan.record(&spec.kind, Endpoint::new(host, port));
            }
        }
        scan
    }

    fn secret_body(&self, name: &str, namespace: &str, config: &ResolvedConfig) -> Value {
        let data: Map<String, Value> = config
            .secret_keys
            .iter()
            .filter_map(|key| config.env.get(key).map(|v| (key.clone(), json!(v))))
            .collect();
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": { MANAGED_LABEL: "stackwire" },
            },
            "type": "Opaque",
            "stringData": data,
        })
    }

    fn deployment_body(
        &self,
        service: &ServiceDefinition,
        config: &ResolvedConfig,
        namespace: &str,
        secret_name: &str,
    ) -> Value {
        let name = workload_name(&service.id);
        let fingerprint = config.fingerprint();
        let labels = json!({
            NAME_LABEL: name,
            MANAGED_LABEL: "stackwire",
        });

        let env: Vec<Value> = config
            .env
            .iter()
            .map(|(key, value)| {
                if config.secret_keys.contains(key) {
                    json!({
                        "name": key,
                        "valueFrom": { "secretKeyRef": { "name": secret_name, "key": key } },
                    })
                } else {
                    json!({ "name": key, "value": value })
                }
            })
            .collect();

        let ports: Vec<Value> = service
            .exposes
            .iter()
            .map(|e| {
                json!({
                    "name": resource_name(&e.name),
                    "containerPort": e.port,
                    "protocol": e.protocol.to_uppercase(),
                })
            })
            .collect();

        let mut container = json!({
            "name": resource_name(&service.id),
            "image": service.image,
            "env": env,
            "ports": ports,
        });
        if let (Some(path), Some(port)) = (service.health_path(), service.primary_port()) {
            container["readinessProbe"] = json!({
                "httpGet": { "path": path, "port": port },
                "periodSeconds": 10,
            });
        }

        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": labels,
                "annotations": { FINGERPRINT_ANNOTATION: fingerprint },
            },
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": { NAME_LABEL: name } },
                "template": {
                    "metadata": {
                        "labels": labels,
                        "annotations": { FINGERPRINT_ANNOTATION: fingerprint },
                    },
                    "spec": { "containers": [container] },
                },
            },
        })
    }

    fn service_body(&self, service: &ServiceDefinition, namespace: &str) -> Value {
        let ports: Vec<Value> = service
            .exposes
            .iter()
            .map(|e| {
                json!({
                    "name": resource_name(&e.name),
                    "port": e.port,
                    "targetPort": e.port,
                    "protocol": e.protocol.to_uppercase(),
                })
            })
            .collect();
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": resource_name(&service.id),
                "namespace": namespace,
                "labels": { MANAGED_LABEL: "stackwire" },
            },
            "spec": {
                "selector": { NAME_LABEL: workload_name(&service.id) },
                "ports": ports,
            },
        })
    }

    async fn delete_all(&self, cluster: &Cluster<'_>, service_id: &str) -> Result<(), DeployError> {
        let name = workload_name(service_id);
        self.remove(cluster, format!("{}/{}", cluster.apps("deployments"), name))
            .await?;
        self.remove(
            cluster,
            format!("{}/{}", cluster.core("services"), resource_name(service_id)),
        )
        .await?;
        self.remove(
            cluster,
            format!("{}/{}-env", cluster.core("secrets"), name),
        )
        .await
    }
}

fn status_from_deployment(body: &Value) -> WorkloadStatus {
    let desired = body
        .get("spec")
        .and_then(|s| s.get("replicas"))
        .and_then(Value::as_u64)
        .unwrap_or(1);
    let status = body.get("status");
    let ready = status
        .and_then(|s| s.get("readyReplicas"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let deadline_exceeded = status
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Progressing")
                    && c.get("status").and_then(Value::as_str) == Some("False")
                    && c.get("reason").and_then(Value::as_str) == Some("ProgressDeadlineExceeded")
            })
        })
        .unwrap_or(false);

    if deadline_exceeded {
        WorkloadStatus::Failed
    } else if desired == 0 {
        WorkloadStatus::Stopped
    } else if ready >= desired {
        WorkloadStatus::Running
    } else if ready > 0 {
        WorkloadStatus::Degraded
    } else {
        WorkloadStatus::Pending
    }
}

#[async_trait]
impl DeploymentPlatform for KubernetesPlatform {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Kubernetes
    }

    async fn get_infrastructure(
        &self,
        target: &DeployTarget,
    ) -> Result<InfrastructureScan, ScanError> {
        let scan_error = |reason: String| ScanError {
            target: target.id.clone(),
            reason,
        };
        let cluster = Cluster::from_target(target).map_err(scan_error)?;

        let response = self
            .send(cluster.request(HttpRequest::get(cluster.core("services"))))
            .await
            .map_err(|f| f.into_scan_error(&target.id))?;
        if !response.is_success() {
            return Err(scan_error(response.message()));
        }

        let items = response
            .body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let scan = self.scan_services(&target.id, cluster.namespace, &items);
        info!(
            target = %target.id,
            services = items.len(),
            found = scan.entries.values().filter(|e| e.found).count(),
            "Kubernetes infrastructure scanned"
        );
        Ok(scan)
    }

    async fn deploy(
        &self,
        service: &ServiceDefinition,
        config: &ResolvedConfig,
        target: &DeployTarget,
    ) -> Result<DeploymentHandle, DeployError> {
        let cluster = Cluster::from_target(target).map_err(DeployError::Rejected)?;
        let name = workload_name(&service.id);
        let secret_name = format!("{}-env", name);

        if !config.secret_keys.is_empty() {
            let body = self.secret_body(&secret_name, cluster.namespace, config);
            self.apply(&cluster, &cluster.core("secrets"), &secret_name, body, "secret")
                .await?;
        }

        let body = self.deployment_body(service, config, cluster.namespace, &secret_name);
        self.apply(&cluster, &cluster.apps("deployments"), &name, body, "deployment")
            .await?;

        if !service.exposes.is_empty() {
            let body = self.service_body(service, cluster.namespace);
            self.apply(
                &cluster,
                &cluster.core("services"),
                &resource_name(&service.id),
                body,
                "service",
            )
            .await?;
        }

        info!(
            service = %service.id,
            target = %target.id,
            deployment = %name,
            "Kubernetes deployment applied"
        );

        Ok(DeploymentHandle {
            service: service.id.clone(),
            target: target.clone(),
            platform: PlatformType::Kubernetes,
            resource_id: name,
            config_fingerprint: config.fingerprint(),
        })
    }

    async fn get_status(&self, handle: &DeploymentHandle) -> Result<WorkloadStatus, DeployError> {
        let cluster = Cluster::from_target(&handle.target).map_err(DeployError::Rejected)?;
        let response = self
            .send(cluster.request(HttpRequest::get(format!(
                "{}/{}",
                cluster.apps("deployments"),
                handle.resource_id
            ))))
            .await?;

        match response.status {
            404 => Ok(WorkloadStatus::Stopped),
            s if (200..300).contains(&s) => Ok(status_from_deployment(&response.body)),
            _ => Err(rejection(&response, "status")),
        }
    }

    async fn stop(&self, handle: &DeploymentHandle) -> Result<(), DeployError> {
        let cluster = Cluster::from_target(&handle.target).map_err(DeployError::Rejected)?;
        self.delete_all(&cluster, &handle.service).await?;
        info!(service = %handle.service, deployment = %handle.resource_id, "Kubernetes deployment removed");
        Ok(())
    }

    async fn cleanup(&self, service: &ServiceDefinition, target: &DeployTarget) {
        let Ok(cluster) = Cluster::from_target(target) else {
            return;
        };
        if let Err(e) = self.delete_all(&cluster, &service.id).await {
            warn!(service = %service.id, target = %target.id, error = %e, "Kubernetes cleanup failed");
        }
    }
}
