use crate::error::Result;
use crate::types::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lock keyspace entry: one lock per resource class and tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub resource: String,
    pub tenant: TenantId,
}

impl LockKey {
    pub fn new(resource: impl Into<String>, tenant: TenantId) -> Self {
        Self {
            resource: resource.into(),
            tenant,
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resource, self.tenant)
    }
}

/// Current holder of a lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Identity of the holding instance
    pub owner: String,
    /// Unique per acquisition; release must present it
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Compare-and-swap backing store for distributed locks
pub trait LockStore: Send + Sync {
    /// Store `record` under `key` unless a record that is still live at `now`
    /// exists. Returns whether the record was stored. One round trip, never waits.
    fn try_acquire(&self, key: &LockKey, record: &LockRecord, now: DateTime<Utc>) -> Result<bool>;

    /// Delete the record under `key` if it still carries `token`
    fn release(&self, key: &LockKey, token: &str) -> Result<bool>;

    /// Live holder of `key`, if any
    fn holder(&self, key: &LockKey, now: DateTime<Utc>) -> Result<Option<LockRecord>>;
}
