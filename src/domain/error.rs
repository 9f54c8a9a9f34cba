use serde::Serialize;
use thiserror::Error;

use crate::domain::deployment::DeploymentState;

/// Domain-level errors for Stackwire.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network request blocked: {reason}")]
    NetworkBlocked { reason: String },

    #[error("HTTP request failed: {0}")]
    HttpRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid deployment state transition from {from:?} to {to:?}")]
    StateTransition {
        from: DeploymentState,
        to: DeploymentState,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Deploy(#[from] DeployError),
}

impl DomainError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        DomainError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Malformed or conflicting catalog descriptors.
///
/// Raised at load time; the offending entry is excluded from the catalog
/// while the rest keeps serving.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigurationError {
    #[error("Invalid descriptor {source_name}: {reason}")]
    InvalidDescriptor { source_name: String, reason: String },

    #[error("Duplicate provider id: {id}")]
    DuplicateProvider { id: String },

    #[error("Duplicate service id: {id}")]
    DuplicateService { id: String },

    #[error("Provider {provider} references unknown capability {capability}")]
    UnknownCapability { provider: String, capability: String },
}

/// Stable kind tag for a [`ResolutionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionErrorKind {
    MissingRequiredCapability,
    MissingCredential,
    UnresolvedInfrastructure,
    UnknownService,
    InvalidBinding,
    StateUnavailable,
}

/// Why a service cannot get past `Unresolved`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Service {service} requires capability {capability} but nothing provides it")]
    MissingRequiredCapability { service: String, capability: String },

    #[error("Provider {provider} credential ({source_desc}) resolved to an empty value")]
    MissingCredential {
        provider: String,
        source_desc: String,
    },

    #[error("Service {service} requires infrastructure {kind} which is not present on {target}")]
    UnresolvedInfrastructure {
        service: String,
        kind: String,
        target: String,
    },

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Binding {service}.{capability} -> {provider} is not deployable: {reason}")]
    InvalidBinding {
        service: String,
        capability: String,
        provider: String,
        reason: String,
    },

    #[error("Stored wiring or settings for {service} could not be read: {reason}")]
    StateUnavailable { service: String, reason: String },
}

impl ResolutionError {
    pub fn kind(&self) -> ResolutionErrorKind {
        match self {
            ResolutionError::MissingRequiredCapability { .. } => {
                ResolutionErrorKind::MissingRequiredCapability
            }
            ResolutionError::MissingCredential { .. } => ResolutionErrorKind::MissingCredential,
            ResolutionError::UnresolvedInfrastructure { .. } => {
                ResolutionErrorKind::UnresolvedInfrastructure
            }
            ResolutionError::UnknownService(_) => ResolutionErrorKind::UnknownService,
            ResolutionError::InvalidBinding { .. } => ResolutionErrorKind::InvalidBinding,
            ResolutionError::StateUnavailable { .. } => ResolutionErrorKind::StateUnavailable,
        }
    }
}

/// Stable kind tag for a [`DeployError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeployErrorKind {
    PlatformUnreachable,
    QuotaExceeded,
    Rejected,
    Cancelled,
}

/// Platform failures surfaced after the platform's own retries are exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    #[error("Platform unreachable: {0}")]
    PlatformUnreachable(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Rejected by platform: {0}")]
    Rejected(String),

    #[error("Deploy cancelled: {0}")]
    Cancelled(String),
}

impl DeployError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::PlatformUnreachable(_) => DeployErrorKind::PlatformUnreachable,
            DeployError::QuotaExceeded(_) => DeployErrorKind::QuotaExceeded,
            DeployError::Rejected(_) => DeployErrorKind::Rejected,
            DeployError::Cancelled(_) => DeployErrorKind::Cancelled,
        }
    }
}

/// Infrastructure discovery failure. Never fatal: callers degrade it to
/// "infrastructure not found".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Infrastructure scan of {target} failed: {reason}")]
pub struct ScanError {
    pub target: String,
    pub reason: String,
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for DomainError {
    fn from(err: toml::de::Error) -> Self {
        DomainError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DomainError {
    fn from(err: toml::ser::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
