use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use url::Url;

use crate::domain::config::InfraKindConfig;
use crate::domain::{AuthEmbedding, Endpoint, InfraKindSpec};
use crate::ports::{InfraCatalog, SecretValue};

/// Credentials embedded into an infrastructure connection URL.
#[derive(Debug, Clone, Default)]
pub struct InfraAuth {
    pub username: Option<String>,
    pub password: Option<SecretValue>,
    pub database: Option<String>,
}

impl InfraAuth {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none() && self.database.is_none()
    }
}

/// Turns a discovered endpoint into a connection string for one kind.
pub trait UrlBuilder: Send + Sync {
    fn build(&self, endpoint: &Endpoint, auth: &InfraAuth) -> Result<String, String>;

    /// Whether the built URL would carry a password.
    fn embeds_secret(&self, auth: &InfraAuth) -> bool {
        auth.password.is_some()
    }
}

/// `<scheme>://[auth@]host:port[/path]` builder.
#[derive(Debug, Clone)]
pub struct SchemeUrlBuilder {
    scheme: String,
    auth: AuthEmbedding,
    /// Path used when no database is configured.
    default_path: Option<String>,
}

impl SchemeUrlBuilder {
    pub fn new(scheme: impl Into<String>, auth: AuthEmbedding) -> Self {
        Self {
            scheme: scheme.into(),
            auth,
            default_path: None,
        }
    }

    pub fn with_default_path(mut self, path: impl Into<String>) -> Self {
        self.default_path = Some(path.into());
        self
    }
}

impl UrlBuilder for SchemeUrlBuilder {
    fn build(&self, endpoint: &Endpoint, auth: &InfraAuth) -> Result<String, String> {
        let mut url = Url::parse(&format!("{}://{}", self.scheme, endpoint))
            .map_err(|e| format!("invalid endpoint {}: {}", endpoint, e))?;

        let embed = |url: &mut Url| -> Result<(), ()> {
            match self.auth {
                AuthEmbedding::UserPassword => {
                    if let Some(username) = &auth.username {
                        url.set_username(username)?;
                        if let Some(password) = &auth.password {
                            url.set_password(Some(password.expose()))?;
                        }
                    }
                }
                AuthEmbedding::PasswordOnly => {
                    if let Some(password) = &auth.password {
                        url.set_password(Some(password.expose()))?;
                    }
                }
                AuthEmbedding::None => {}
            }
            Ok(())
        };
        embed(&mut url).map_err(|_| format!("cannot embed credentials for {}", endpoint))?;

        if let Some(path) = auth.database.as_deref().or(self.default_path.as_deref()) {
            url.set_path(path);
        }

        Ok(url.as_str().trim_end_matches('/').to_string())
    }

    fn embeds_secret(&self, auth: &InfraAuth) -> bool {
        match self.auth {
            AuthEmbedding::UserPassword => auth.username.is_some() && auth.password.is_some(),
            AuthEmbedding::PasswordOnly => auth.password.is_some(),
            AuthEmbedding::None => false,
        }
    }
}

/// A registered infrastructure kind.
#[derive(Clone)]
pub struct InfraKind {
    pub spec: InfraKindSpec,
    /// Environment variable receiving the connection URL.
    pub env_var: String,
    builder: Arc<dyn UrlBuilder>,
}

/// Per-kind connection URL builders. Knows nothing about platforms.
///
/// Shared behind an `Arc`; kinds may be added after startup and are seen by
/// the resolver and by every platform scan from then on.
#[derive(Default)]
pub struct InfrastructureRegistry {
    kinds: RwLock<BTreeMap<String, InfraKind>>,
}

impl InfrastructureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with mongo, redis, postgres, qdrant and neo4j.
    pub fn builtin() -> Self {
        let registry = Self::new();
        registry.register(
            spec("mongo", &["mongodb"], 27017),
            "MONGODB_URI",
            SchemeUrlBuilder::new("mongodb", AuthEmbedding::UserPassword),
        );
        registry.register(
            spec("redis", &[], 6379),
            "REDIS_URL",
            SchemeUrlBuilder::new("redis", AuthEmbedding::PasswordOnly).with_default_path("/0"),
        );
        registry.register(
            spec("postgres", &["postgresql"], 5432),
            "DATABASE_URL",
            SchemeUrlBuilder::new("postgresql", AuthEmbedding::UserPassword),
        );
        registry.register(
            spec("qdrant", &[], 6333),
            "QDRANT_URL",
            SchemeUrlBuilder::new("http", AuthEmbedding::None),
        );
        registry.register(
            spec("neo4j", &[], 7687),
            "NEO4J_URI",
            SchemeUrlBuilder::new("bolt", AuthEmbedding::None),
        );
        registry
    }

    /// Add or replace a kind.
    pub fn register(
        &self,
        spec: InfraKindSpec,
        env_var: impl Into<String>,
        builder: impl UrlBuilder + 'static,
    ) {
        self.kinds.write().insert(
            spec.kind.clone(),
            InfraKind {
                spec,
                env_var: env_var.into(),
                builder: Arc::new(builder),
            },
        );
    }

    /// Register the `[infrastructure.kinds.<name>]` tables.
    pub fn register_kinds(&self, kinds: &BTreeMap<String, InfraKindConfig>) {
        for (name, kind) in kinds {
            let spec = InfraKindSpec {
                kind: name.to_lowercase(),
                aliases: kind.aliases.iter().map(|a| a.to_lowercase()).collect(),
                default_port: kind.port,
            };
            let mut builder = SchemeUrlBuilder::new(kind.scheme.clone(), kind.auth);
            if let Some(path) = &kind.path {
                builder = builder.with_default_path(path.clone());
            }
            info!(kind = %spec.kind, env_var = %kind.env_var, port = kind.port, "Infrastructure kind registered");
            self.register(spec, kind.env_var.clone(), builder);
        }
    }

    /// Look up a kind by name or alias.
    pub fn get(&self, kind: &str) -> Option<InfraKind> {
        let kind = kind.to_lowercase();
        let kinds = self.kinds.read();
        kinds
            .get(&kind)
            .or_else(|| {
                kinds
                    .values()
                    .find(|k| k.spec.aliases.iter().any(|a| *a == kind))
            })
            .cloned()
    }

    /// Canonical kind name for a name or alias.
    pub fn canonical(&self, kind: &str) -> Option<String> {
        self.get(kind).map(|k| k.spec.kind)
    }

    pub fn env_var(&self, kind: &str) -> Option<String> {
        self.get(kind).map(|k| k.env_var)
    }

    pub fn build_url(
        &self,
        kind: &str,
        endpoint: &Endpoint,
        auth: &InfraAuth,
    ) -> Result<String, String> {
        let entry = self
            .get(kind)
            .ok_or_else(|| format!("unknown infrastructure kind '{}'", kind))?;
        entry.builder.build(endpoint, auth)
    }

    /// Whether the URL for `kind` would contain a password.
    pub fn embeds_secret(&self, kind: &str, auth: &InfraAuth) -> bool {
        self.get(kind)
            .map(|k| k.builder.embeds_secret(auth))
            .unwrap_or(false)
    }
}

impl InfraCatalog for InfrastructureRegistry {
    /// Discovery hints handed to platforms.
    fn specs(&self) -> Vec<InfraKindSpec> {
        self.kinds.read().values().map(|k| k.spec.clone()).collect()
    }
}

fn spec(kind: &str, aliases: &[&str], default_port: u16) -> InfraKindSpec {
    InfraKindSpec {
        kind: kind.to_string(),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
        default_port,
    }
}
