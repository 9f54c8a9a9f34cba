pub mod capability;
pub mod config;
pub mod deployment;
pub mod error;
pub mod infrastructure;
pub mod provider;
pub mod resolved;
pub mod service;
pub mod target;
pub mod wiring;

pub use capability::{Capability, CapabilityCatalog, ConfigField, FieldType};
pub use config::AppConfig;
pub use deployment::{DeploymentHandle, DeploymentRecord, DeploymentState, WorkloadStatus};
pub use error::{
    ConfigurationError, DeployError, DeployErrorKind, DomainError, ResolutionError,
    ResolutionErrorKind, ScanError,
};
pub use infrastructure::{
    AuthEmbedding, Endpoint, InfraEntry, InfraKindSpec, InfrastructureScan,
};
pub use provider::{ConnectionTemplate, CredentialSource, Provider};
pub use resolved::{LayerName, LayeredSettings, ResolvedConfig, SettingsLayer};
pub use service::{ExposedInterface, Requirement, ServiceDefinition};
pub use target::{DeployTarget, PlatformType, TargetCredential, TargetLocator, TargetRecord};
pub use wiring::{ServiceWiring, WiringBinding, WiringEvent};
