use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::error::ConfigurationError;

/// Where a provider's credential comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSource {
    /// The provider needs no credential.
    #[default]
    None,
    /// Literal value from the descriptor. Never serialized back out.
    Static {
        #[serde(skip_serializing)]
        value: String,
    },
    /// Environment variable of the orchestrator process.
    Env { name: String },
    /// Key in the secret store.
    Secret { key: String },
}

impl CredentialSource {
    /// Human description that never contains the credential itself.
    pub fn describe(&self) -> String {
        match self {
            CredentialSource::None => "none".to_string(),
            CredentialSource::Static { .. } => "static".to_string(),
            CredentialSource::Env { name } => format!("env:{}", name),
            CredentialSource::Secret { key } => format!("secret:{}", key),
        }
    }
}

/// Endpoint URL template; `{host}` and `{port}` are substituted at resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionTemplate(String);

impl ConnectionTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute host and port and check that the result is a URL.
    pub fn render(&self, host: Option<&str>, port: Option<u16>) -> Result<String, String> {
        let mut rendered = self.0.clone();
        if rendered.contains("{host}") {
            let host = host.ok_or_else(|| "template needs {host} but no host is set".to_string())?;
            rendered = rendered.replace("{host}", host);
        }
        if rendered.contains("{port}") {
            let port = port.ok_or_else(|| "template needs {port} but no port is set".to_string())?;
            rendered = rendered.replace("{port}", &port.to_string());
        }
        Url::parse(&rendered).map_err(|e| format!("invalid URL '{}': {}", rendered, e))?;
        Ok(rendered)
    }
}

/// A concrete, interchangeable implementation of one or more capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provider {
    pub id: String,
    pub capabilities: Vec<String>,
    pub connection_template: ConnectionTemplate,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub credential_source: CredentialSource,
    pub enabled: bool,
    /// Default provider for its capabilities when no wiring exists.
    pub default: bool,
    /// Provider-level values for `string` capability fields.
    pub values: BTreeMap<String, String>,
    pub builtin: bool,
}

impl Provider {
    pub fn satisfies(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Rendered endpoint URL.
    pub fn endpoint_url(&self) -> Result<String, String> {
        self.connection_template
            .render(self.host.as_deref(), self.port)
    }

    /// Parse and validate a TOML provider descriptor.
    pub fn from_toml(source_name: &str, content: &str) -> Result<Self, ConfigurationError> {
        let descriptor: ProviderDescriptor =
            toml::from_str(content).map_err(|e| ConfigurationError::InvalidDescriptor {
                source_name: source_name.to_string(),
                reason: e.to_string(),
            })?;
        descriptor.validate(source_name)
    }
}

/// On-disk shape of a provider descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderDescriptor {
    pub id: String,
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub connection_template: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub credential_source: CredentialSource,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl ProviderDescriptor {
    pub fn validate(self, source_name: &str) -> Result<Provider, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidDescriptor {
            source_name: source_name.to_string(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("provider id is empty".to_string()));
        }

        let capabilities = match (self.capability, self.capabilities.is_empty()) {
            (Some(single), true) => vec![single],
            (None, false) => self.capabilities,
            (Some(_), false) => {
                return Err(invalid(
                    "set either `capability` or `capabilities`, not both".to_string(),
                ))
            }
            (None, true) => return Err(invalid("provider declares no capability".to_string())),
        };
        if capabilities.iter().any(|c| c.trim().is_empty()) {
            return Err(invalid("empty capability name".to_string()));
        }

        let template = ConnectionTemplate::new(self.connection_template);
        template
            .render(
                Some(self.host.as_deref().unwrap_or("localhost")),
                Some(self.port.unwrap_or(1)),
            )
            .map_err(invalid)?;

        Ok(Provider {
            id: self.id,
            capabilities,
            connection_template: template,
            host: self.host,
            port: self.port,
            credential_source: self.credential_source,
            enabled: self.enabled,
            default: self.default,
            values: self.values,
            builtin: false,
        })
    }
}
