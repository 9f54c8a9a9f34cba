use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::domain::DomainError;

/// Kind of deployment destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformType {
    Docker,
    Kubernetes,
    Cloud,
}

impl PlatformType {
    /// Parse the type tag embedded in a target identifier.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_lowercase().as_str() {
            "docker" => Some(PlatformType::Docker),
            "k8s" | "kubernetes" => Some(PlatformType::Kubernetes),
            "cloud" => Some(PlatformType::Cloud),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::Docker => "docker",
            PlatformType::Kubernetes => "kubernetes",
            PlatformType::Cloud => "cloud",
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed form of a `<name>.<type>.<env>` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetId {
    pub raw: String,
    pub name: String,
    pub platform: PlatformType,
    pub environment: String,
}

impl FromStr for TargetId {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            DomainError::Config(format!("invalid target id '{}': {}", raw, reason))
        };

        let mut parts: Vec<&str> = raw.split('.').collect();
        if parts.len() < 3 {
            return Err(invalid("expected <name>.<type>.<env>"));
        }
        let environment = parts.pop().unwrap_or_default();
        let tag = parts.pop().unwrap_or_default();
        let name = parts.join(".");
        if name.is_empty() || environment.is_empty() {
            return Err(invalid("name and environment must be non-empty"));
        }
        let platform = PlatformType::from_tag(tag)
            .ok_or_else(|| invalid(&format!("unknown platform tag '{}'", tag)))?;

        Ok(Self {
            raw: raw.to_string(),
            name,
            platform,
            environment: environment.to_string(),
        })
    }
}

/// Operator-maintained record describing how to address a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: String,
    #[serde(flatten)]
    pub locator: TargetLocator,
}

/// Per-platform addressing data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum TargetLocator {
    Docker {
        /// Docker Engine API base URL, e.g. `http://node-1.mesh:2375`.
        api_url: String,
        #[serde(default)]
        network: Option<String>,
    },
    Kubernetes {
        api_server: String,
        #[serde(default = "default_namespace")]
        namespace: String,
        /// Secret-store key holding the bearer token.
        #[serde(default)]
        token_secret: Option<String>,
    },
    Cloud {
        account: String,
    },
}

fn default_namespace() -> String {
    "default".to_string()
}

impl TargetLocator {
    pub fn platform(&self) -> PlatformType {
        match self {
            TargetLocator::Docker { .. } => PlatformType::Docker,
            TargetLocator::Kubernetes { .. } => PlatformType::Kubernetes,
            TargetLocator::Cloud { .. } => PlatformType::Cloud,
        }
    }

    /// Control-plane host name, if the locator has one.
    pub fn control_host(&self) -> Option<String> {
        let url = match self {
            TargetLocator::Docker { api_url, .. } => api_url,
            TargetLocator::Kubernetes { api_server, .. } => api_server,
            TargetLocator::Cloud { .. } => return None,
        };
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

/// Bearer credential for a control plane; redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct TargetCredential(Zeroizing<String>);

impl TargetCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for TargetCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TargetCredential(***)")
    }
}

/// A fully resolved deployment destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget {
    pub id: String,
    pub name: String,
    pub environment: String,
    pub platform: PlatformType,
    pub locator: TargetLocator,
    pub credential: Option<TargetCredential>,
}

impl DeployTarget {
    /// Docker network the target's containers share.
    pub fn docker_network(&self, fallback: &str) -> String {
        match &self.locator {
            TargetLocator::Docker {
                network: Some(network),
                ..
            } => network.clone(),
            _ => fallback.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_id() {
        let id: TargetId = "cluster1.kubernetes.prod".parse().unwrap();
        assert_eq!(id.name, "cluster1");
        assert_eq!(id.platform, PlatformType::Kubernetes);
        assert_eq!(id.environment, "prod");

        let id: TargetId = "node.mesh.docker.dev".parse().unwrap();
        assert_eq!(id.name, "node.mesh");
        assert_eq!(id.platform, PlatformType::Docker);

        let id: TargetId = "edge.k8s.staging".parse().unwrap();
        assert_eq!(id.platform, PlatformType::Kubernetes);
    }

    #[test]
    fn test_parse_target_id_errors() {
        assert!("local".parse::<TargetId>().is_err());
        assert!("a.nomad.prod".parse::<TargetId>().is_err());
        assert!(".docker.prod".parse::<TargetId>().is_err());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = TargetCredential::new("super-secret-token");
        assert!(!format!("{:?}", credential).contains("super-secret"));
    }

    #[test]
    fn test_locator_control_host() {
        let locator = TargetLocator::Docker {
            api_url: "http://node-1.mesh:2375".to_string(),
            network: None,
        };
        assert_eq!(locator.control_host().as_deref(), Some("node-1.mesh"));
    }

    #[test]
    fn test_record_toml_shape() {
        let record: TargetRecord = toml::from_str(
            r#"
id = "cluster1.k8s.prod"
platform = "kubernetes"
api_server = "https://10.0.0.1:6443"
token_secret = "cluster1_token"
"#,
        )
        .unwrap();
        assert_eq!(record.locator.platform(), PlatformType::Kubernetes);
    }
}
