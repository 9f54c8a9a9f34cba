use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// A discovered `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| DomainError::Config(format!("endpoint '{}' is not host:port", s)))?;
        let port = port
            .parse()
            .map_err(|_| DomainError::Config(format!("endpoint '{}' has an invalid port", s)))?;
        if host.is_empty() {
            return Err(DomainError::Config(format!("endpoint '{}' has no host", s)));
        }
        Ok(Self::new(host, port))
    }
}

/// What a scan found for one infrastructure kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InfraEntry {
    pub found: bool,
    pub endpoints: Vec<Endpoint>,
}

/// Infrastructure present on a target, keyed by kind.
///
/// Always re-derivable from the live target; never treated as ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InfrastructureScan {
    pub target: String,
    pub entries: BTreeMap<String, InfraEntry>,
    /// Set when discovery failed and the scan degraded to "nothing found".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InfrastructureScan {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Scan standing in for a failed discovery.
    pub fn unavailable(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            entries: BTreeMap::new(),
            error: Some(reason.into()),
        }
    }

    /// Record an endpoint for a kind, marking it found.
    pub fn record(&mut self, kind: &str, endpoint: Endpoint) {
        let entry = self.entries.entry(kind.to_string()).or_default();
        entry.found = true;
        if !entry.endpoints.contains(&endpoint) {
            entry.endpoints.push(endpoint);
        }
    }

    /// First endpoint for a kind, if it was found.
    pub fn endpoint(&self, kind: &str) -> Option<&Endpoint> {
        self.entries
            .get(kind)
            .filter(|e| e.found)
            .and_then(|e| e.endpoints.first())
    }

    pub fn is_found(&self, kind: &str) -> bool {
        self.endpoint(kind).is_some()
    }
}

/// How credentials appear in the authority part of a connection URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEmbedding {
    /// `user:pass@`
    UserPassword,
    /// `:pass@`
    PasswordOnly,
    #[default]
    None,
}

/// Discovery hints for one infrastructure kind, shared with platforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfraKindSpec {
    pub kind: String,
    /// Names a container or service may carry instead of the kind itself.
    pub aliases: Vec<String>,
    pub default_port: u16,
}

impl InfraKindSpec {
    /// Whether a discovered resource name refers to this kind.
    pub fn matches_name(&self, name: &str) -> bool {
        let name = name.trim_start_matches('/').to_lowercase();
        std::iter::once(&self.kind)
            .chain(self.aliases.iter())
            .any(|alias| {
                name == *alias
                    || name
                        .split(|c: char| c == '-' || c == '_' || c == '.')
                        .any(|part| part == alias)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        let endpoint: Endpoint = "mongo:27017".parse().unwrap();
        assert_eq!(endpoint, Endpoint::new("mongo", 27017));
        assert!("mongo".parse::<Endpoint>().is_err());
        assert!(":27017".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_scan_record_and_lookup() {
        let mut scan = InfrastructureScan::new("local.docker.dev");
        scan.record("mongo", Endpoint::new("mongo", 27017));
        scan.record("mongo", Endpoint::new("mongo", 27017));
        assert!(scan.is_found("mongo"));
        assert_eq!(scan.entries["mongo"].endpoints.len(), 1);
        assert!(!scan.is_found("redis"));
    }

    #[test]
    fn test_kind_name_matching() {
        let spec = InfraKindSpec {
            kind: "mongo".to_string(),
            aliases: vec!["mongodb".to_string()],
            default_port: 27017,
        };
        assert!(spec.matches_name("/mongo"));
        assert!(spec.matches_name("stack-mongodb-1"));
        assert!(!spec.matches_name("mongoose"));
    }
}
