pub mod config;
pub mod document_store;
pub mod http;
pub mod identity;
pub mod platform;
pub mod secret_store;

pub use config::ConfigStore;
pub use document_store::DocumentStore;
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use identity::{Principal, TokenValidator, SCOPE_ADMIN, SCOPE_DEPLOY, SCOPE_READ};
pub use platform::{DeploymentPlatform, InfraCatalog};
pub use secret_store::{SecretStore, SecretValue};
