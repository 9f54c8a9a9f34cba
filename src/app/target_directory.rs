use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::target::TargetId;
use crate::domain::{
    DeployTarget, DomainError, PlatformType, TargetCredential, TargetLocator, TargetRecord,
};
use crate::ports::{DocumentStore, SecretStore};

const COLLECTION: &str = "targets";

/// Called with the control-plane hosts of all records whenever they change.
pub type HostsListener = Arc<dyn Fn(Vec<String>) + Send + Sync>;

/// Resolves target identifiers into addressable deploy targets.
///
/// Records come from the configuration seed and the `targets` collection;
/// stored records replace seeded ones with the same id.
pub struct TargetDirectory {
    store: Arc<dyn DocumentStore>,
    secrets: Arc<dyn SecretStore>,
    seed: Vec<TargetRecord>,
    docker_api_port: u16,
    listener: Option<HostsListener>,
}

impl TargetDirectory {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        secrets: Arc<dyn SecretStore>,
        seed: Vec<TargetRecord>,
        docker_api_port: u16,
    ) -> Self {
        Self {
            store,
            secrets,
            seed,
            docker_api_port,
            listener: None,
        }
    }

    pub fn with_hosts_listener(mut self, listener: HostsListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// All target records, sorted by id.
    pub fn records(&self) -> Result<Vec<TargetRecord>, DomainError> {
        let mut records: BTreeMap<String, TargetRecord> = self
            .seed
            .iter()
            .map(|r| (r.id.clone(), r.clone()))
            .collect();
        for (id, value) in self.store.list(COLLECTION)? {
            match serde_json::from_value::<TargetRecord>(value) {
                Ok(record) => {
                    records.insert(record.id.clone(), record);
                }
                Err(e) => warn!(target = %id, error = %e, "Stored target record is malformed"),
            }
        }
        Ok(records.into_values().collect())
    }

    pub fn record(&self, id: &str) -> Result<Option<TargetRecord>, DomainError> {
        if let Some(value) = self.store.get(COLLECTION, id)? {
            return Ok(Some(serde_json::from_value(value)?));
        }
        Ok(self.seed.iter().find(|r| r.id == id).cloned())
    }

    /// Store a record after checking that its id matches its platform.
    pub fn put(&self, record: TargetRecord) -> Result<(), DomainError> {
        let id: TargetId = record.id.parse()?;
        if id.platform != record.locator.platform() {
            return Err(DomainError::Config(format!(
                "target {} is tagged {} but its record describes {}",
                record.id,
                id.platform,
                record.locator.platform()
            )));
        }
        self.store
            .set(COLLECTION, &record.id, &serde_json::to_value(&record)?)?;
        info!(target = %record.id, platform = %id.platform, "Target record stored");
        self.publish_hosts()
    }

    pub fn remove(&self, id: &str) -> Result<(), DomainError> {
        self.store.delete(COLLECTION, id)?;
        self.publish_hosts()
    }

    /// Parse an identifier and resolve it into a deploy target, fetching
    /// whatever the platform needs to address it.
    pub fn from_id(&self, raw: &str) -> Result<DeployTarget, DomainError> {
        let id: TargetId = raw.parse()?;
        let record = self.record(raw)?;

        let locator = match (id.platform, record) {
            (platform, Some(record)) if record.locator.platform() != platform => {
                return Err(DomainError::Config(format!(
                    "target {} is tagged {} but its record describes {}",
                    raw,
                    platform,
                    record.locator.platform()
                )))
            }
            (_, Some(record)) => record.locator,
            (PlatformType::Docker, None) => TargetLocator::Docker {
                api_url: format!("http://{}:{}", id.name, self.docker_api_port),
                network: None,
            },
            (PlatformType::Kubernetes, None) => {
                return Err(DomainError::not_found("target record", raw))
            }
            (PlatformType::Cloud, None) => TargetLocator::Cloud {
                account: id.name.clone(),
            },
        };

        let credential = match &locator {
            TargetLocator::Kubernetes {
                token_secret: Some(key),
                ..
            } => {
                let token = self.secrets.get(key)?.filter(|t| !t.is_empty()).ok_or_else(|| {
                    DomainError::Config(format!(
                        "target {} token secret '{}' is missing",
                        raw, key
                    ))
                })?;
                Some(TargetCredential::new(token.expose()))
            }
            _ => None,
        };

        debug!(target = raw, platform = %id.platform, "Target resolved");

        Ok(DeployTarget {
            id: id.raw,
            name: id.name,
            environment: id.environment,
            platform: id.platform,
            locator,
            credential,
        })
    }

    /// Control-plane hosts of seeded and stored records. Targets resolved
    /// without a record contribute nothing.
    pub fn control_hosts(&self) -> Result<Vec<String>, DomainError> {
        let hosts: BTreeSet<String> = self
            .records()?
            .iter()
            .filter_map(|record| record.locator.control_host())
            .collect();
        Ok(hosts.into_iter().collect())
    }

    fn publish_hosts(&self) -> Result<(), DomainError> {
        if let Some(listener) = &self.listener {
            listener(self.control_hosts()?);
        }
        Ok(())
    }
}
