use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::DomainError;

/// Named settings layer, declared in ascending precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerName {
    /// Capability field defaults, provider values and URLs, service env.
    Defaults,
    /// Operator overrides from configuration and the settings store.
    Operator,
    /// Resolved credentials.
    Secrets,
    /// URLs built from the infrastructure scan.
    Infrastructure,
    /// Explicit environment overrides; always wins.
    Explicit,
}

impl fmt::Display for LayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerName::Defaults => "defaults",
            LayerName::Operator => "operator",
            LayerName::Secrets => "secrets",
            LayerName::Infrastructure => "infrastructure",
            LayerName::Explicit => "explicit",
        };
        f.write_str(name)
    }
}

/// One layer of key/value settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsLayer {
    pub name: LayerName,
    values: BTreeMap<String, String>,
    secret_keys: BTreeSet<String>,
}

impl SettingsLayer {
    pub fn new(name: LayerName) -> Self {
        Self {
            name,
            values: BTreeMap::new(),
            secret_keys: BTreeSet::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn set_secret(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.secret_keys.insert(key.clone());
        self.values.insert(key, value.into());
    }

    pub fn extend<I, K, V>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in values {
            self.set(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Ordered stack of layers merged left to right.
#[derive(Debug, Clone, Default)]
pub struct LayeredSettings {
    layers: Vec<SettingsLayer>,
    secret_keys: BTreeSet<String>,
}

impl LayeredSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer; layers must arrive in strictly ascending order.
    pub fn push(&mut self, layer: SettingsLayer) -> Result<(), DomainError> {
        if let Some(last) = self.layers.last() {
            if layer.name <= last.name {
                return Err(DomainError::Config(format!(
                    "settings layer {} cannot follow {}",
                    layer.name, last.name
                )));
            }
        }
        self.layers.push(layer);
        Ok(())
    }

    /// Treat `key` as secret whichever layer supplies it.
    pub fn mark_secret(&mut self, key: impl Into<String>) {
        self.secret_keys.insert(key.into());
    }

    /// Merge all layers; on collision the later layer wins.
    ///
    /// A key stays secret once any layer or [`mark_secret`](Self::mark_secret)
    /// flags it, even when a plain layer supplies the winning value.
    pub fn merge(&self) -> MergedSettings {
        let mut merged = MergedSettings::default();
        for layer in &self.layers {
            for (key, value) in &layer.values {
                merged.values.insert(key.clone(), value.clone());
                merged.provenance.insert(key.clone(), layer.name);
                if layer.secret_keys.contains(key) || self.secret_keys.contains(key) {
                    merged.secret_keys.insert(key.clone());
                }
            }
        }
        merged
    }
}

/// Output of [`LayeredSettings::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedSettings {
    pub values: BTreeMap<String, String>,
    pub provenance: BTreeMap<String, LayerName>,
    pub secret_keys: BTreeSet<String>,
}

/// Final flat environment for one (service, target) pair.
///
/// Recomputed whenever its inputs change; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub service: String,
    pub target: String,
    pub env: BTreeMap<String, String>,
    pub provenance: BTreeMap<String, LayerName>,
    #[serde(skip)]
    pub secret_keys: BTreeSet<String>,
    /// Capability → provider actually used.
    pub bindings: BTreeMap<String, String>,
    /// Optional capabilities and infrastructure that were skipped.
    pub skipped: Vec<String>,
}

impl ResolvedConfig {
    pub fn from_merged(
        service: impl Into<String>,
        target: impl Into<String>,
        merged: MergedSettings,
        bindings: BTreeMap<String, String>,
        skipped: Vec<String>,
    ) -> Self {
        Self {
            service: service.into(),
            target: target.into(),
            env: merged.values,
            provenance: merged.provenance,
            secret_keys: merged.secret_keys,
            bindings,
            skipped,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// SHA-256 over the sorted environment, stable across calls.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.env {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// `KEY=VALUE` pairs in key order.
    pub fn to_env_list(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect()
    }

    /// Copy with secret values replaced, safe to return over the API.
    pub fn masked(&self) -> ResolvedConfig {
        let mut masked = self.clone();
        for key in &self.secret_keys {
            if let Some(value) = masked.env.get_mut(key) {
                *value = "***".to_string();
            }
        }
        masked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: LayerName, pairs: &[(&str, &str)]) -> SettingsLayer {
        let mut layer = SettingsLayer::new(name);
        layer.extend(pairs.iter().copied());
        layer
    }

    #[test]
    fn test_higher_layer_wins() {
        let mut settings = LayeredSettings::new();
        settings
            .push(layer(LayerName::Defaults, &[("A", "default"), ("B", "default")]))
            .unwrap();
        settings
            .push(layer(LayerName::Infrastructure, &[("A", "scan")]))
            .unwrap();
        settings
            .push(layer(LayerName::Explicit, &[("A", "explicit")]))
            .unwrap();

        let merged = settings.merge();
        assert_eq!(merged.values["A"], "explicit");
        assert_eq!(merged.provenance["A"], LayerName::Explicit);
        assert_eq!(merged.values["B"], "default");
    }

    #[test]
    fn test_layers_must_ascend() {
        let mut settings = LayeredSettings::new();
        settings.push(SettingsLayer::new(LayerName::Secrets)).unwrap();
        assert!(settings.push(SettingsLayer::new(LayerName::Operator)).is_err());
        assert!(settings.push(SettingsLayer::new(LayerName::Secrets)).is_err());
    }

    #[test]
    fn test_secret_flag_survives_plain_override() {
        let mut secrets = SettingsLayer::new(LayerName::Secrets);
        secrets.set_secret("LLM_API_KEY", "sk-1");
        let mut settings = LayeredSettings::new();
        settings.push(secrets).unwrap();
        settings
            .push(layer(LayerName::Explicit, &[("LLM_API_KEY", "sk-operator")]))
            .unwrap();

        let merged = settings.merge();
        assert_eq!(merged.values["LLM_API_KEY"], "sk-operator");
        assert!(merged.secret_keys.contains("LLM_API_KEY"));
    }

    #[test]
    fn test_marked_key_is_secret_from_any_layer() {
        let mut settings = LayeredSettings::new();
        settings.mark_secret("MEMORY_API_KEY");
        settings
            .push(layer(LayerName::Operator, &[("MEMORY_API_KEY", "m-1"), ("MEMORY_SERVER_URL", "http://m")]))
            .unwrap();

        let merged = settings.merge();
        assert!(merged.secret_keys.contains("MEMORY_API_KEY"));
        assert!(!merged.secret_keys.contains("MEMORY_SERVER_URL"));
    }

    #[test]
    fn test_masked_and_fingerprint() {
        let mut secrets = SettingsLayer::new(LayerName::Secrets);
        secrets.set_secret("LLM_API_KEY", "sk-1");
        let mut settings = LayeredSettings::new();
        settings.push(secrets).unwrap();
        let config = ResolvedConfig::from_merged(
            "alpha",
            "local.docker.dev",
            settings.merge(),
            BTreeMap::new(),
            Vec::new(),
        );
        assert_eq!(config.masked().get("LLM_API_KEY"), Some("***"));
        assert_eq!(config.get("LLM_API_KEY"), Some("sk-1"));
        assert_eq!(config.fingerprint(), config.clone().fingerprint());
        assert_eq!(config.fingerprint().len(), 64);
    }
}
