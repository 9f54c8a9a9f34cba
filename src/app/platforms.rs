use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{DeployError, DeployTarget, PlatformType};
use crate::ports::DeploymentPlatform;

/// One platform implementation per target type.
#[derive(Default, Clone)]
pub struct PlatformRegistry {
    platforms: HashMap<PlatformType, Arc<dyn DeploymentPlatform>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, platform: Arc<dyn DeploymentPlatform>) {
        self.platforms.insert(platform.platform_type(), platform);
    }

    /// Pure dispatch on the target's platform type.
    pub fn get_deployment_platform(
        &self,
        target: &DeployTarget,
    ) -> Result<Arc<dyn DeploymentPlatform>, DeployError> {
        self.platforms.get(&target.platform).cloned().ok_or_else(|| {
            DeployError::Rejected(format!(
                "no platform implementation for {} targets ({})",
                target.platform, target.id
            ))
        })
    }
}
