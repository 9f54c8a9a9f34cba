use serde_json::Value;

use crate::domain::DomainError;

/// Key-value document store for wiring, settings and target records.
///
/// Documents are JSON values grouped into named collections. The engine
/// treats the store as plain get/set/list; no query semantics are assumed.
pub trait DocumentStore: Send + Sync {
    /// Fetch one document. Returns `None` if the key is absent.
    fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, DomainError>;

    /// Insert or replace a document.
    fn set(&self, collection: &str, key: &str, value: &Value) -> Result<(), DomainError>;

    /// All documents of a collection, sorted by key.
    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, DomainError>;

    /// Remove a document. Removing an absent key is not an error.
    fn delete(&self, collection: &str, key: &str) -> Result<(), DomainError>;
}
