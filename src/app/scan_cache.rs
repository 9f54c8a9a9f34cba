use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::domain::{DeployTarget, InfrastructureScan, ScanError};
use crate::ports::DeploymentPlatform;

type ScanFuture = Shared<BoxFuture<'static, Result<InfrastructureScan, ScanError>>>;

enum Slot {
    Ready {
        scan: InfrastructureScan,
        at: Instant,
    },
    InFlight {
        generation: u64,
        future: ScanFuture,
    },
}

/// Infrastructure scans keyed by target id.
///
/// At most one platform query per target is in flight; concurrent callers
/// share its result. Successful scans live for the TTL or until
/// [`ScanCache::invalidate`]. Failed scans are never cached and degrade to
/// an empty scan.
pub struct ScanCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
    generation: AtomicU64,
}

impl ScanCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn get(
        &self,
        target: &DeployTarget,
        platform: Arc<dyn DeploymentPlatform>,
    ) -> InfrastructureScan {
        let (generation, future) = {
            let mut slots = self.slots.lock();
            match slots.get(&target.id) {
                Some(Slot::Ready { scan, at }) if at.elapsed() < self.ttl => {
                    debug!(target = %target.id, "Infrastructure scan cache hit");
                    return scan.clone();
                }
                Some(Slot::InFlight { generation, future }) => {
                    debug!(target = %target.id, "Joining in-flight infrastructure scan");
                    (*generation, future.clone())
                }
                _ => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let scan_target = target.clone();
                    let future = async move { platform.get_infrastructure(&scan_target).await }
                        .boxed()
                        .shared();
                    slots.insert(
                        target.id.clone(),
                        Slot::InFlight {
                            generation,
                            future: future.clone(),
                        },
                    );
                    (generation, future)
                }
            }
        };

        let result = future.await;

        let mut slots = self.slots.lock();
        let current = matches!(
            slots.get(&target.id),
            Some(Slot::InFlight { generation: g, .. }) if *g == generation
        );
        match result {
            Ok(scan) => {
                if current {
                    slots.insert(
                        target.id.clone(),
                        Slot::Ready {
                            scan: scan.clone(),
                            at: Instant::now(),
                        },
                    );
                }
                scan
            }
            Err(e) => {
                if current {
                    slots.remove(&target.id);
                }
                warn!(target = %target.id, error = %e, "Infrastructure scan failed, treating as nothing found");
                InfrastructureScan::unavailable(target.id.clone(), e.reason)
            }
        }
    }

    /// Cached scan for a target, if fresh.
    pub fn peek(&self, target_id: &str) -> Option<InfrastructureScan> {
        match self.slots.lock().get(target_id) {
            Some(Slot::Ready { scan, at }) if at.elapsed() < self.ttl => Some(scan.clone()),
            _ => None,
        }
    }

    /// Drop the cached scan and detach any in-flight one, whose result will
    /// then not be stored.
    pub fn invalidate(&self, target_id: &str) {
        if self.slots.lock().remove(target_id).is_some() {
            debug!(target = target_id, "Infrastructure scan invalidated");
        }
    }
}
