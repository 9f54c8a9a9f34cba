use std::fmt;

use zeroize::Zeroizing;

use crate::domain::DomainError;

/// A secret string, zeroed on drop and redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Zeroizing<String>);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

/// Port for secret lookup.
pub trait SecretStore: Send + Sync {
    /// Look up a secret by key. Returns `None` if the key is unknown.
    fn get(&self, key: &str) -> Result<Option<SecretValue>, DomainError>;

    /// Re-read the backing source, if any.
    fn reload(&self) -> Result<(), DomainError> {
        Ok(())
    }
}
