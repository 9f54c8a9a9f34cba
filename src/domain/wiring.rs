use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Binding from a service's capability requirement to a chosen provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WiringBinding {
    pub service: String,
    pub capability: String,
    pub provider: String,
}

/// All bindings of one service, keyed by capability.
pub type ServiceWiring = BTreeMap<String, String>;

/// Emitted after every wiring mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WiringEvent {
    Bound(WiringBinding),
    Unbound { service: String, capability: String },
}

impl WiringEvent {
    /// Service whose resolved configuration is now stale.
    pub fn service(&self) -> &str {
        match self {
            WiringEvent::Bound(binding) => &binding.service,
            WiringEvent::Unbound { service, .. } => service,
        }
    }
}
