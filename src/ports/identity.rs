use std::collections::BTreeSet;

use crate::domain::DomainError;

/// Scope required by read-only Deploy API routes.
pub const SCOPE_READ: &str = "read";
/// Scope required by routes that change wiring, settings or deployments.
pub const SCOPE_DEPLOY: &str = "deploy";
/// Scope required for catalog reloads.
pub const SCOPE_ADMIN: &str = "admin";

/// Identity established from a validated bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub scopes: BTreeSet<String>,
}

impl Principal {
    /// Principal used when authentication is disabled.
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            scopes: [SCOPE_READ, SCOPE_DEPLOY, SCOPE_ADMIN]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// `admin` implies every other scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope) || self.scopes.contains(SCOPE_ADMIN)
    }
}

/// Port to the external identity provider.
///
/// The core needs nothing beyond "principal id + scopes"; how the token is
/// validated belongs to the implementation.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Principal, DomainError>;
}
