use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::infrastructure::AuthEmbedding;
use crate::domain::target::TargetRecord;

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Enable file logging with rotation.
    pub file_logging: bool,
    /// Maximum number of log files to keep.
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: true,
            max_files: 7,
        }
    }
}

/// Deploy API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8040".to_string(),
        }
    }
}

/// A bearer token accepted by the Deploy API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Hex SHA-256 of the token; the token itself is never stored.
    pub sha256: String,
    pub principal: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Deploy API authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// When false, every request runs as an anonymous principal with all scopes.
    pub enabled: bool,
    pub tokens: Vec<TokenConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tokens: Vec::new(),
        }
    }
}

/// Where service and provider descriptors live.
/// Relative paths are taken from the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub services_dir: PathBuf,
    pub providers_dir: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            services_dir: PathBuf::from("services"),
            providers_dir: PathBuf::from("providers"),
        }
    }
}

/// Global settings layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Operator overrides applied to every service.
    pub overrides: BTreeMap<String, String>,
    /// Explicit environment overrides applied to every service.
    pub env: BTreeMap<String, String>,
}

/// Credentials embedded into an infrastructure connection URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InfraAuthConfig {
    pub username: Option<String>,
    /// Secret-store key holding the password.
    pub password_secret: Option<String>,
    pub database: Option<String>,
}

/// A custom infrastructure kind declared under `[infrastructure.kinds.<name>]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraKindConfig {
    pub scheme: String,
    pub port: u16,
    /// Environment variable receiving the connection URL.
    pub env_var: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub auth: AuthEmbedding,
    /// Path used when no database is configured.
    #[serde(default)]
    pub path: Option<String>,
}

/// `[infrastructure]`: custom kinds plus per-kind credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfrastructureConfig {
    #[serde(default)]
    pub kinds: BTreeMap<String, InfraKindConfig>,
    /// Infra kind → auth embedding rules.
    #[serde(flatten)]
    pub auth: BTreeMap<String, InfraAuthConfig>,
}

/// Infrastructure scan cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub ttl_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { ttl_secs: 120 }
    }
}

impl ScanConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Bounded exponential backoff for transient platform errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff_ms.saturating_mul(1 << shift);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// Platform adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub retry: RetryPolicy,
    pub request_timeout_secs: u64,
    pub deploy_timeout_secs: u64,
    /// Shared Docker network for services and infrastructure.
    pub docker_network: String,
    /// Engine API port assumed for mesh nodes without a target record.
    pub docker_api_port: u16,
    pub health_interval_secs: u64,
    /// Control-plane hosts reachable without a target record.
    pub allowed_hosts: Vec<String>,
    /// Domains whose subdomains are reachable control planes.
    pub mesh_domains: Vec<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout_secs: 10,
            deploy_timeout_secs: 120,
            docker_network: "stackwire".to_string(),
            docker_api_port: 2375,
            health_interval_secs: 15,
            allowed_hosts: vec!["localhost".to_string()],
            mesh_domains: Vec::new(),
        }
    }
}

impl PlatformConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub catalog: CatalogConfig,
    /// Capability → default provider id.
    pub defaults: BTreeMap<String, String>,
    pub settings: SettingsConfig,
    pub infrastructure: InfrastructureConfig,
    pub scan: ScanConfig,
    pub platform: PlatformConfig,
    pub targets: Vec<TargetRecord>,
}

impl AppConfig {
    /// Create a new AppConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
[defaults]
llm = "openai-default"

[scan]
ttl_secs = 60
"#,
        )
        .unwrap();
        assert_eq!(config.defaults["llm"], "openai-default");
        assert_eq!(config.scan.ttl(), Duration::from_secs(60));
        assert_eq!(config.platform.docker_network, "stackwire");
        assert!(config.auth.enabled);
    }

    #[test]
    fn test_infrastructure_kinds_and_auth_share_a_table() {
        let config: AppConfig = toml::from_str(
            r#"
[infrastructure.postgres]
username = "app"
password_secret = "pg_password"

[infrastructure.kinds.nats]
scheme = "nats"
port = 4222
env_var = "NATS_URL"
aliases = ["jetstream"]

[infrastructure.kinds.rabbit]
scheme = "amqp"
port = 5672
env_var = "AMQP_URL"
auth = "user_password"
path = "/vhost"

[platform]
mesh_domains = ["mesh.internal"]
"#,
        )
        .unwrap();

        let infra = &config.infrastructure;
        assert_eq!(infra.auth.len(), 1);
        assert_eq!(infra.auth["postgres"].username.as_deref(), Some("app"));
        assert_eq!(infra.kinds.len(), 2);
        assert_eq!(infra.kinds["nats"].auth, AuthEmbedding::None);
        assert_eq!(infra.kinds["nats"].aliases, vec!["jetstream"]);
        assert_eq!(infra.kinds["rabbit"].auth, AuthEmbedding::UserPassword);
        assert_eq!(infra.kinds["rabbit"].path.as_deref(), Some("/vhost"));
        assert_eq!(config.platform.mesh_domains, vec!["mesh.internal"]);
        assert_eq!(config.platform.allowed_hosts, vec!["localhost"]);
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(9), Duration::from_millis(1_000));
    }
}
