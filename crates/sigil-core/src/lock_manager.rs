//! Stripe-based in-process lanes
//!
//! Catch-up for one (projection, tenant) pair must run serially so per-entity
//! sequences are applied in order. Lanes are hashed onto a fixed set of
//! stripes; distinct pairs usually land on distinct stripes and proceed in
//! parallel. Acquisition waits at most the configured timeout.

use crate::error::{Result, SigilError};
use crate::types::TenantId;
use parking_lot::{Mutex, MutexGuard};
use std::time::Duration;
use xxhash_rust::xxh3::xxh3_64;

/// Default lane acquisition timeout (5 seconds)
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

pub struct LockManager {
    stripes: Vec<Mutex<()>>,
    num_stripes: usize,
    default_timeout: Duration,
}

impl LockManager {
    /// Create a lock manager with the given number of stripes
    ///
    /// # Panics
    ///
    /// Panics if `num_stripes` is 0.
    pub fn new(num_stripes: usize, default_timeout: Duration) -> Self {
        assert!(num_stripes > 0, "num_stripes must be positive");
        let stripes = (0..num_stripes).map(|_| Mutex::new(())).collect();

        Self {
            stripes,
            num_stripes,
            default_timeout,
        }
    }

    /// Create a lock manager with default timeout
    pub fn with_stripes(num_stripes: usize) -> Self {
        Self::new(num_stripes, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS))
    }

    fn stripe_index(&self, key: &[u8]) -> usize {
        let hash = xxh3_64(key);
        (hash as usize) % self.num_stripes
    }

    fn lane_key(projection: &str, tenant: &TenantId) -> Vec<u8> {
        let mut key = Vec::with_capacity(projection.len() + tenant.as_str().len() + 1);
        key.extend_from_slice(projection.as_bytes());
        key.push(0);
        key.extend_from_slice(tenant.as_str().as_bytes());
        key
    }

    /// Hold the lane of one projection and tenant
    pub fn lane(&self, projection: &str, tenant: &TenantId) -> Result<MutexGuard<'_, ()>> {
        self.lane_with_timeout(projection, tenant, self.default_timeout)
    }

    pub fn lane_with_timeout(
        &self,
        projection: &str,
        tenant: &TenantId,
        timeout: Duration,
    ) -> Result<MutexGuard<'_, ()>> {
        self.lock_with_timeout(&Self::lane_key(projection, tenant), timeout)
    }

    /// Lock an arbitrary key
    pub fn lock(&self, key: &[u8]) -> Result<MutexGuard<'_, ()>> {
        self.lock_with_timeout(key, self.default_timeout)
    }

    fn lock_with_timeout(&self, key: &[u8], timeout: Duration) -> Result<MutexGuard<'_, ()>> {
        let idx = self.stripe_index(key);
        let start = std::time::Instant::now();
        let guard = self.stripes[idx]
            .try_lock_for(timeout)
            .ok_or(SigilError::LockTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })?;
        crate::observe::record_lock_wait(start.elapsed());
        Ok(guard)
    }

    pub fn num_stripes(&self) -> usize {
        self.num_stripes
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::with_stripes(64)
    }
}
