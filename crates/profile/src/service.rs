//! Cached profile service.
//!
//! Detection is cheap but not free (a handful of subprocess probes), and
//! every plan resolution and remediation pass wants a current snapshot.
//! [`ProfileService`] refreshes at most once per TTL window; readers get a
//! shared immutable snapshot and never block an in-flight refresh for
//! longer than the detection itself.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::detect::detect;
use crate::types::SystemProfile;

/// Default snapshot TTL.
pub const PROFILE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Snapshot {
    profile: Arc<SystemProfile>,
    captured_at: Instant,
}

/// Long-lived service owning the current host profile.
#[derive(Debug)]
pub struct ProfileService {
    ttl: Duration,
    current: RwLock<Option<Snapshot>>,
}

impl Default for ProfileService {
    fn default() -> Self {
        Self::new(PROFILE_TTL)
    }
}

impl ProfileService {
    /// Create a service with a custom TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            current: RwLock::new(None),
        }
    }

    /// Get the current profile, refreshing if the snapshot is stale.
    pub async fn get(&self) -> Arc<SystemProfile> {
        if let Some(profile) = self.fresh_snapshot().await {
            return profile;
        }

        // Writer path. Re-check under the write lock: another task may
        // have refreshed while we waited for it.
        let mut slot = self.current.write().await;
        if let Some(snapshot) = slot.as_ref() {
            if snapshot.captured_at.elapsed() < self.ttl {
                return Arc::clone(&snapshot.profile);
            }
        }

        debug!("profile snapshot expired, re-detecting host");
        let profile = Arc::new(detect().await);
        *slot = Some(Snapshot {
            profile: Arc::clone(&profile),
            captured_at: Instant::now(),
        });
        profile
    }

    /// Drop the snapshot so the next `get` re-detects.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }

    async fn fresh_snapshot(&self) -> Option<Arc<SystemProfile>> {
        let slot = self.current.read().await;
        slot.as_ref()
            .filter(|s| s.captured_at.elapsed() < self.ttl)
            .map(|s| Arc::clone(&s.profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_is_reused_within_ttl() {
        let service = ProfileService::new(Duration::from_secs(60));
        let a = service.get().await;
        let b = service.get().await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_invalidate_forces_redetect() {
        let service = ProfileService::new(Duration::from_secs(60));
        let a = service.get().await;
        service.invalidate().await;
        let b = service.get().await;
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_expired_snapshot_refreshes() {
        let service = ProfileService::new(Duration::from_millis(1));
        let a = service.get().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let b = service.get().await;
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
