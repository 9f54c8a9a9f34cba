use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Semantic type of a capability configuration field.
///
/// The type decides where the value comes from during resolution:
/// `Url` fields are filled from the provider's connection template,
/// `Secret` fields from its credential source and `String` fields from
/// provider values or the field default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Url,
    Secret,
}

/// One named configuration field a capability requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigField {
    /// Field key, e.g. `base_url`.
    pub key: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    /// Value used when the provider supplies nothing.
    #[serde(default)]
    pub default: Option<String>,
}

impl ConfigField {
    fn new(key: &str, field_type: FieldType, required: bool) -> Self {
        Self {
            key: key.to_string(),
            field_type,
            required,
            default: None,
        }
    }

    fn with_default(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }
}

/// An abstract category of functionality, e.g. `llm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub description: String,
    pub fields: Vec<ConfigField>,
}

impl Capability {
    /// Environment variable name for one of this capability's fields.
    pub fn env_var(&self, field: &ConfigField) -> String {
        env_var_name(&self.id, &field.key)
    }

    /// Whether an environment key belongs to this capability.
    pub fn owns_env_var(&self, key: &str) -> bool {
        self.fields.iter().any(|f| self.env_var(f) == key)
    }
}

/// `<CAPABILITY>_<KEY>`, upper-cased, with non-alphanumerics folded to `_`.
pub fn env_var_name(capability: &str, key: &str) -> String {
    format!("{}_{}", capability, key)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

static BUILTIN_CAPABILITIES: Lazy<Vec<Capability>> = Lazy::new(|| {
    let endpoint = |id: &str, description: &str, model: Option<&str>| {
        let mut fields = vec![
            ConfigField::new("base_url", FieldType::Url, true),
            ConfigField::new("api_key", FieldType::Secret, false),
        ];
        if let Some(model) = model {
            fields.push(ConfigField::new("model", FieldType::String, false).with_default(model));
        }
        Capability {
            id: id.to_string(),
            description: description.to_string(),
            fields,
        }
    };

    vec![
        endpoint("llm", "Large-language-model inference", Some("default")),
        endpoint("transcription", "Speech-to-text transcription", Some("default")),
        endpoint("embedding", "Text embedding generation", Some("default")),
        Capability {
            id: "memory".to_string(),
            description: "Long-term memory storage and retrieval".to_string(),
            fields: vec![
                ConfigField::new("server_url", FieldType::Url, true),
                ConfigField::new("api_key", FieldType::Secret, false),
            ],
        },
        Capability {
            id: "document_store".to_string(),
            description: "Document database".to_string(),
            fields: vec![ConfigField::new("url", FieldType::Url, true)],
        },
        Capability {
            id: "vector_store".to_string(),
            description: "Vector similarity index".to_string(),
            fields: vec![ConfigField::new("url", FieldType::Url, true)],
        },
    ]
});

/// Static catalog of known capability kinds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CapabilityCatalog {
    capabilities: BTreeMap<String, Capability>,
}

impl CapabilityCatalog {
    /// Catalog holding the built-in capabilities.
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        for capability in BUILTIN_CAPABILITIES.iter() {
            catalog.insert(capability.clone());
        }
        catalog
    }

    /// Add or replace a capability definition.
    pub fn insert(&mut self, capability: Capability) {
        self.capabilities.insert(capability.id.clone(), capability);
    }

    pub fn get(&self, id: &str) -> Option<&Capability> {
        self.capabilities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.capabilities.contains_key(id)
    }

    /// Environment keys of every `Secret` field in the catalog.
    pub fn secret_env_vars(&self) -> BTreeSet<String> {
        self.capabilities
            .values()
            .flat_map(|c| {
                c.fields
                    .iter()
                    .filter(|f| f.field_type == FieldType::Secret)
                    .map(move |f| c.env_var(f))
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.values()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
