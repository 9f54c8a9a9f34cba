use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::config::TokenConfig;
use crate::domain::DomainError;
use crate::ports::{Principal, TokenValidator};

/// Validates bearer tokens against SHA-256 hashes from the configuration.
pub struct StaticTokenValidator {
    tokens: Vec<TokenConfig>,
}

impl StaticTokenValidator {
    pub fn new(tokens: Vec<TokenConfig>) -> Self {
        Self { tokens }
    }

    /// Hex SHA-256 of a token, as stored under `[[auth.tokens]]`.
    pub fn hash(token: &str) -> String {
        format!("{:x}", Sha256::digest(token.as_bytes()))
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> Result<Principal, DomainError> {
        if token.trim().is_empty() {
            return Err(DomainError::Unauthorized("empty bearer token".to_string()));
        }

        let digest = Self::hash(token);
        let entry = self
            .tokens
            .iter()
            .find(|t| t.sha256.eq_ignore_ascii_case(&digest))
            .ok_or_else(|| DomainError::Unauthorized("unknown bearer token".to_string()))?;

        debug!(principal = %entry.principal, "Bearer token validated");
        Ok(Principal {
            id: entry.principal.clone(),
            scopes: entry.scopes.iter().cloned().collect(),
        })
    }
}
