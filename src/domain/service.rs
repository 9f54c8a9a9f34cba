use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigurationError;

/// Whether a dependency must be satisfied for the service to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Required,
    Optional,
}

/// A capability the service consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityRequirement {
    pub capability: String,
    pub requirement: Requirement,
}

/// A shared backing service the service depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfraDependency {
    pub kind: String,
    pub requirement: Requirement,
}

/// An interface the service exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExposedInterface {
    pub name: String,
    #[serde(rename = "type", default = "default_interface_type")]
    pub interface_type: String,
    #[serde(default)]
    pub path: Option<String>,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_interface_type() -> String {
    "http".to_string()
}

fn default_protocol() -> String {
    "tcp".to_string()
}

/// A deployable service as declared by its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDefinition {
    pub id: String,
    pub image: String,
    pub requirements: Vec<CapabilityRequirement>,
    pub provides: Vec<String>,
    pub infrastructure: Vec<InfraDependency>,
    pub exposes: Vec<ExposedInterface>,
    /// Service-level built-in environment defaults.
    pub env: BTreeMap<String, String>,
}

impl ServiceDefinition {
    /// The requirement entry for a capability, if declared.
    pub fn requirement_for(&self, capability: &str) -> Option<Requirement> {
        self.requirements
            .iter()
            .find(|r| r.capability == capability)
            .map(|r| r.requirement)
    }

    pub fn declares(&self, capability: &str) -> bool {
        self.requirement_for(capability).is_some()
    }

    /// Port of the first exposed interface.
    pub fn primary_port(&self) -> Option<u16> {
        self.exposes.first().map(|e| e.port)
    }

    /// Path used for health checks, preferring an interface named `health`.
    pub fn health_path(&self) -> Option<&str> {
        self.exposes
            .iter()
            .find(|e| e.name == "health")
            .or_else(|| self.exposes.first())
            .and_then(|e| e.path.as_deref())
    }

    pub fn from_toml(source_name: &str, content: &str) -> Result<Self, ConfigurationError> {
        let descriptor: ServiceDescriptor =
            toml::from_str(content).map_err(|e| ConfigurationError::InvalidDescriptor {
                source_name: source_name.to_string(),
                reason: e.to_string(),
            })?;
        descriptor.validate(source_name)
    }
}

/// On-disk shape of a service manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDescriptor {
    pub id: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub infra_services: Vec<String>,
    #[serde(default)]
    pub optional_infra: Vec<String>,
    #[serde(default)]
    pub exposes: Vec<ExposedInterface>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    pub fn validate(self, source_name: &str) -> Result<ServiceDefinition, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidDescriptor {
            source_name: source_name.to_string(),
            reason,
        };

        let id = self.id.trim().to_string();
        if id.is_empty() {
            return Err(invalid("service id is empty".to_string()));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(format!(
                "service id '{}' must be alphanumeric with '-' or '_'",
                id
            )));
        }

        let mut seen = BTreeSet::new();
        let mut requirements = Vec::new();
        for (names, requirement) in [
            (self.requires, Requirement::Required),
            (self.optional, Requirement::Optional),
        ] {
            for capability in names {
                if !seen.insert(capability.clone()) {
                    return Err(invalid(format!(
                        "capability '{}' declared more than once",
                        capability
                    )));
                }
                requirements.push(CapabilityRequirement {
                    capability,
                    requirement,
                });
            }
        }

        let mut seen = BTreeSet::new();
        let mut infrastructure = Vec::new();
        for (kinds, requirement) in [
            (self.infra_services, Requirement::Required),
            (self.optional_infra, Requirement::Optional),
        ] {
            for kind in kinds {
                if !seen.insert(kind.clone()) {
                    return Err(invalid(format!(
                        "infrastructure '{}' declared more than once",
                        kind
                    )));
                }
                infrastructure.push(InfraDependency { kind, requirement });
            }
        }

        let image = self.image.unwrap_or_else(|| format!("{}:latest", id));

        Ok(ServiceDefinition {
            id,
            image,
            requirements,
            provides: self.provides,
            infrastructure,
            exposes: self.exposes,
            env: self.env,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHRONICLE: &str = r#"
id = "chronicle"
requires = ["llm", "transcription"]
optional = ["memory"]
infra_services = ["mongo"]
optional_infra = ["qdrant"]

[env]
LOG_FORMAT = "json"

[[exposes]]
name = "http"
type = "http"
path = "/health"
port = 8000
"#;

    #[test]
    fn test_parse_service_manifest() {
        let service = ServiceDefinition::from_toml("chronicle.toml", CHRONICLE).unwrap();
        assert_eq!(service.id, "chronicle");
        assert_eq!(service.image, "chronicle:latest");
        assert_eq!(service.requirement_for("llm"), Some(Requirement::Required));
        assert_eq!(service.requirement_for("memory"), Some(Requirement::Optional));
        assert_eq!(service.requirement_for("embedding"), None);
        assert_eq!(service.infrastructure.len(), 2);
        assert_eq!(service.primary_port(), Some(8000));
        assert_eq!(service.health_path(), Some("/health"));
    }

    #[test]
    fn test_rejects_duplicate_capability() {
        let content = r#"
id = "dup"
requires = ["llm"]
optional = ["llm"]
"#;
        let err = ServiceDefinition::from_toml("dup.toml", content).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_rejects_bad_id() {
        let content = r#"id = "has space""#;
        assert!(ServiceDefinition::from_toml("bad.toml", content).is_err());
    }
}
