pub mod config_store;
pub mod control_plane;
pub mod docker;
pub mod document_store;
pub mod kubernetes;
pub mod retry;
pub mod secret_store;
pub mod token_validator;

#[cfg(test)]
pub(crate) mod testing;

pub use config_store::TomlConfigStore;
pub use control_plane::ControlPlaneClient;
pub use docker::DockerPlatform;
pub use document_store::{InMemoryDocumentStore, JsonFileDocumentStore};
pub use kubernetes::KubernetesPlatform;
pub use secret_store::{FileSecretStore, InMemorySecretStore};
pub use token_validator::StaticTokenValidator;
