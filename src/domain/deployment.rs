use serde::{Deserialize, Serialize};

use crate::domain::target::{DeployTarget, PlatformType};

/// Deployment state machine for one (service, target) pair.
///
/// State transitions:
/// - Unresolved -> Resolved (successful resolution)
/// - Resolved -> Deploying (platform deploy issued)
/// - Deploying -> Running (first healthy signal)
/// - Running <-> Degraded (failed / recovered health probe)
/// - Running | Degraded -> Stopped (explicit stop)
/// - Deploying | Running | Degraded -> Failed (unrecoverable platform error)
/// - any -> Unresolved (explicit re-deploy)
///
/// Note: `Stopped` and `Failed` are terminal until an explicit re-deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentState {
    Unresolved,
    Resolved,
    Deploying,
    Running,
    Degraded,
    Stopped,
    Failed,
}

impl DeploymentState {
    /// Whether the automatic (non re-deploy) transition `self -> next` is legal.
    #[must_use]
    pub fn can_transition_to(&self, next: DeploymentState) -> bool {
        use DeploymentState::*;
        matches!(
            (self, next),
            (Unresolved, Resolved)
                | (Resolved, Deploying)
                | (Deploying, Running)
                | (Running, Degraded)
                | (Degraded, Running)
                | (Running, Stopped)
                | (Degraded, Stopped)
                | (Deploying, Stopped)
                | (Resolved, Failed)
                | (Deploying, Failed)
                | (Running, Failed)
                | (Degraded, Failed)
        )
    }

    /// Whether a platform handle exists that health probes should poll.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            DeploymentState::Deploying | DeploymentState::Running | DeploymentState::Degraded
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::Stopped | DeploymentState::Failed)
    }
}

/// Workload status as reported by a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadStatus {
    Pending,
    Running,
    Degraded,
    Stopped,
    Failed,
}

/// Reference to a workload created by a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentHandle {
    pub service: String,
    pub target: DeployTarget,
    pub platform: PlatformType,
    /// Platform-native identifier (container id, deployment name).
    pub resource_id: String,
    pub config_fingerprint: String,
}

/// Serializable view of a deployment's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentRecord {
    pub service: String,
    pub target: String,
    pub state: DeploymentState,
    pub resource_id: Option<String>,
    pub config_fingerprint: Option<String>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use DeploymentState::*;
        assert!(Unresolved.can_transition_to(Resolved));
        assert!(Resolved.can_transition_to(Deploying));
        assert!(Deploying.can_transition_to(Running));
        assert!(Running.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopped));
    }

    #[test]
    fn test_terminal_states_do_not_move_on_their_own() {
        use DeploymentState::*;
        for next in [Unresolved, Resolved, Deploying, Running, Degraded] {
            assert!(!Stopped.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
        assert!(Failed.is_terminal());
        assert!(!Unresolved.can_transition_to(Running));
    }
}
