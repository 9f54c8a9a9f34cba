mod controller;
pub mod deployment_manager;
pub mod descriptors;
pub mod infra_registry;
pub mod manifest_store;
pub mod platforms;
pub mod provider_registry;
pub mod resolver;
pub mod scan_cache;
pub mod settings_store;
pub mod target_directory;
pub mod wiring_store;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{AppController, CatalogView, ReloadSummary};
pub use deployment_manager::DeploymentManager;
pub use infra_registry::{InfraAuth, InfrastructureRegistry, UrlBuilder};
pub use manifest_store::ManifestStore;
pub use platforms::PlatformRegistry;
pub use provider_registry::{ProviderRegistry, ProviderView};
pub use resolver::CapabilityResolver;
pub use scan_cache::ScanCache;
pub use settings_store::{ServiceSettings, SettingsStore};
pub use target_directory::TargetDirectory;
pub use wiring_store::WiringStore;
