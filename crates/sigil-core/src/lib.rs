//! Sigil Core: traits and types for the sigil consistency layer
//!
//! This crate defines the core abstractions for materializing relational
//! read-models from an append-only, per-entity event log and for guarding
//! singleton resources across service instances:
//! - Event model: immutable events with per-entity sequences and global positions
//! - Statements: declarative, idempotence-guarded projection mutations
//! - Projections: reducer dispatch by entity type and event kind
//! - Distributed lock: TTL leases over a compare-and-swap store
//! - Retry policy: bounded fixed-delay retry with optional jitter
//!
//! Key properties:
//! - Redelivered events are no-ops; sequence gaps are rejected
//! - Multi statements commit atomically
//! - Lock acquisition never waits; contention is a distinguishable outcome

pub mod config;
pub mod error;
pub mod event_log;
pub mod lease;
pub mod lock_manager;
pub mod observe;
pub mod reducer;
pub mod retry;
pub mod statement;
pub mod table;
pub mod traits;
pub mod types;

pub use config::{BreakerConfig, ProjectionConfig, ProjectorConfig, ProvisionerConfig};
pub use error::{Result, SigilError};
pub use event_log::{EventFilter, EventLog, MemoryEventLog};
pub use lease::{DistributedLock, LockGuard, MemoryLockStore};
pub use lock_manager::LockManager;
pub use reducer::{unexpected_payload, Projection, Reducer};
pub use retry::RetryPolicy;
pub use statement::{col, cond, Column, Condition, OnDuplicate, Operation, Source, Statement, Value};
pub use table::{ColumnDef, ColumnType, Table};
pub use traits::{Applied, LockKey, LockRecord, LockStore, ProjectionStore, ProjectionTxn};
pub use types::{
    ActiveCertificates, CertificateRecord, DomainValidationType, Editor, EntityType, Event,
    EventKind, KeyUsage, NewEvent, Payload, Position, QuotaNotificationSpec, TenantId,
};

/// Common imports for writing projections
pub mod prelude {
    pub use crate::reducer::{unexpected_payload, Projection};
    pub use crate::statement::{col, cond, Operation, Statement, Value};
    pub use crate::table::{ColumnType, Table};
    pub use crate::types::{EntityType, Event, EventKind, Payload};
    pub use crate::{Result, SigilError};
}
