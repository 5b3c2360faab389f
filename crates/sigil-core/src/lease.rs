//! TTL-based distributed lock
//!
//! Exclusion across service instances goes through a [`LockStore`]. An
//! acquisition is a single compare-and-swap attempt: it either stores a fresh
//! record or fails fast with `SigilError::Contended` while another owner's
//! record is live. Expired records are taken over by the next attempt.

use crate::error::{Result, SigilError};
use crate::traits::{LockKey, LockRecord, LockStore};
use crate::types::TenantId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Lock store held in memory, shared by every handle cloned from one `Arc`
#[derive(Default)]
pub struct MemoryLockStore {
    records: Mutex<HashMap<LockKey, LockRecord>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStore for MemoryLockStore {
    fn try_acquire(&self, key: &LockKey, record: &LockRecord, now: DateTime<Utc>) -> Result<bool> {
        let mut records = self.records.lock();
        if let Some(existing) = records.get(key) {
            if existing.is_live(now) {
                return Ok(false);
            }
        }
        records.insert(key.clone(), record.clone());
        Ok(true)
    }

    fn release(&self, key: &LockKey, token: &str) -> Result<bool> {
        let mut records = self.records.lock();
        match records.get(key) {
            Some(existing) if existing.token == token => {
                records.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn holder(&self, key: &LockKey, now: DateTime<Utc>) -> Result<Option<LockRecord>> {
        Ok(self
            .records
            .lock()
            .get(key)
            .filter(|r| r.is_live(now))
            .cloned())
    }
}

/// Lock client for one service instance
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    owner: String,
}

impl DistributedLock {
    /// Client with a random owner identity
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self::with_owner(store, Uuid::new_v4().to_string())
    }

    pub fn with_owner(store: Arc<dyn LockStore>, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Single non-blocking acquisition attempt
    ///
    /// Returns `SigilError::Contended` if a live holder exists. Store failures
    /// are returned as they are.
    pub fn acquire(&self, resource: &str, tenant: &TenantId, ttl: Duration) -> Result<LockGuard> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| SigilError::Config(format!("lock ttl out of range: {}", e)))?;
        let now = Utc::now();
        let key = LockKey::new(resource, tenant.clone());
        let record = LockRecord {
            owner: self.owner.clone(),
            token: Uuid::new_v4().to_string(),
            expires_at: now + ttl,
        };

        let acquired = self.store.try_acquire(&key, &record, now)?;
        crate::observe::record_lock_attempt(acquired);
        if !acquired {
            tracing::debug!("Lock {} held by a live owner", key);
            return Err(SigilError::Contended {
                resource: resource.to_string(),
                tenant: tenant.to_string(),
            });
        }

        tracing::debug!("Lock {} acquired by {} until {}", key, self.owner, record.expires_at);
        Ok(LockGuard {
            store: self.store.clone(),
            key,
            token: record.token,
            expires_at: record.expires_at,
            released: false,
        })
    }
}

/// Held lock; released on drop
pub struct LockGuard {
    store: Arc<dyn LockStore>,
    key: LockKey,
    token: String,
    expires_at: DateTime<Utc>,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Release explicitly, surfacing store errors
    ///
    /// Returns false if the lock had already expired and been taken over.
    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        self.store.release(&self.key, &self.token)
    }

    /// Leave the record in place until its TTL runs out
    pub fn hold_until_expiry(mut self) -> DateTime<Utc> {
        self.released = true;
        self.expires_at
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.release(&self.key, &self.token) {
            tracing::warn!("Failed to release lock {}: {}", self.key, e);
        }
    }
}
