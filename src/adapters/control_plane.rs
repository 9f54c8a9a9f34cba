use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::domain::DomainError;
use crate::ports::{HttpClient, HttpMethod, HttpRequest, HttpResponse};

/// ControlPlaneClient is the only path to Docker and Kubernetes control
/// planes. Requests are allowed only to hosts of known deploy targets and
/// to subdomains of configured mesh domains, unless `allow_any` is set.
pub struct ControlPlaneClient {
    client: Client,
    allow_any: AtomicBool,
    allowed_hosts: RwLock<Vec<String>>,
    allowed_domains: RwLock<Vec<String>>,
}

impl ControlPlaneClient {
    /// Create a new client with a per-request timeout.
    pub fn new(timeout: Duration, allowed_hosts: Vec<String>) -> Result<Self, DomainError> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .user_agent(format!("stackwire/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DomainError::HttpRequest(format!("Failed to create HTTP client: {}", e)))?;

        debug!(allowed_hosts = ?allowed_hosts, "ControlPlaneClient initialized");

        Ok(Self {
            client,
            allow_any: AtomicBool::new(false),
            allowed_hosts: RwLock::new(allowed_hosts),
            allowed_domains: RwLock::new(Vec::new()),
        })
    }

    /// Disable the host allowlist.
    pub fn set_allow_any(&self, allow_any: bool) {
        self.allow_any.store(allow_any, Ordering::SeqCst);
    }

    /// Replace the allowed host list.
    pub fn set_allowed_hosts(&self, hosts: Vec<String>) {
        let mut guard = self.allowed_hosts.write();
        *guard = hosts;
        debug!(allowed_hosts = ?*guard, "ControlPlaneClient allowed hosts updated");
    }

    /// Allow every host under these domains, e.g. `mesh.internal` admits
    /// `node-3.mesh.internal`.
    pub fn set_allowed_domains(&self, domains: Vec<String>) {
        let domains: Vec<String> = domains
            .into_iter()
            .map(|d| d.trim_start_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        debug!(allowed_domains = ?domains, "ControlPlaneClient allowed domains updated");
        *self.allowed_domains.write() = domains;
    }

    fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if self.allowed_hosts.read().iter().any(|h| h.eq_ignore_ascii_case(&host)) {
            return true;
        }
        self.allowed_domains.read().iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }

    fn check_url(&self, url: &str) -> Result<(), DomainError> {
        if self.allow_any.load(Ordering::SeqCst) {
            return Ok(());
        }

        let parsed = Url::parse(url).map_err(|e| DomainError::HttpRequest(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| DomainError::HttpRequest("Invalid URL: no host".to_string()))?;

        if !self.host_allowed(host) {
            warn!(url = url, host = host, "Control-plane request blocked: unknown host");
            return Err(DomainError::NetworkBlocked {
                reason: format!("Host '{}' is not a registered deploy target", host),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HttpClient for ControlPlaneClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, DomainError> {
        self.check_url(&request.url)?;

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DomainError::HttpRequest(e.to_string()))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DomainError::HttpRequest(e.to_string()))?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        debug!(method = ?request.method, url = %request.url, status, "Control-plane request");
        Ok(HttpResponse { status, body })
    }

    fn is_url_allowed(&self, url: &str) -> bool {
        self.check_url(url).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(hosts: &[&str]) -> ControlPlaneClient {
        ControlPlaneClient::new(
            Duration::from_secs(1),
            hosts.iter().map(|h| h.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_known_host_allowed() {
        let client = client(&["node-1.mesh"]);
        assert!(client.is_url_allowed("http://node-1.mesh:2375/v1.43/containers/json"));
    }

    #[test]
    fn test_unknown_host_blocked() {
        let client = client(&["node-1.mesh"]);
        assert!(!client.is_url_allowed("http://evil.example.com/"));
        assert!(!client.is_url_allowed("not a url"));
    }

    #[test]
    fn test_allow_any_and_updates() {
        let client = client(&[]);
        assert!(!client.is_url_allowed("https://10.0.0.1:6443/api"));

        client.set_allowed_hosts(vec!["10.0.0.1".to_string()]);
        assert!(client.is_url_allowed("https://10.0.0.1:6443/api"));

        client.set_allow_any(true);
        assert!(client.is_url_allowed("https://anything.example/"));
    }

    #[test]
    fn test_mesh_domain_admits_subdomains_only() {
        let client = client(&[]);
        client.set_allowed_domains(vec![".Mesh.Internal".to_string()]);
        assert!(client.is_url_allowed("http://node-3.mesh.internal:2375/v1.43/info"));
        assert!(client.is_url_allowed("http://mesh.internal/"));
        assert!(!client.is_url_allowed("http://evilmesh.internal/"));
        assert!(!client.is_url_allowed("http://mesh.internal.example.com/"));
        assert!(!client.is_url_allowed("http://node-3/"));
    }

    #[tokio::test]
    async fn test_blocked_request_fails_before_network() {
        let client = client(&[]);
        let err = client
            .send(HttpRequest::get("http://unregistered.example/"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NetworkBlocked { .. }));
    }
}
