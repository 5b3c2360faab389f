//! Sigil Prelude
//!
//! Import this to get all commonly used types and traits:
//!
//! ```
//! use sigil::prelude::*;
//! ```

// Core types
pub use crate::{
    CertificateRecord, EntityType, Event, EventKind, KeyUsage, NewEvent, Payload, Position,
    Result, SigilDb, SigilError, TenantId,
};

// Configs
pub use crate::{BreakerConfig, ProjectionConfig, ProjectorConfig, ProvisionerConfig};

// Traits
pub use crate::{CertificateCommands, CertificateQuery, EventLog, LockStore, ProjectionStore};

// Implementations
pub use crate::{
    MemoryEventLog, MemoryLockStore, Projector, SqliteEventLog, SqliteLockStore,
    SqliteProjectionStore,
};

// Provisioning
pub use crate::{
    Actor, CertificateProvisioner, ConsistencyChecker, DeferReason, DistributedLock, Provision,
};

// Quotas
pub use crate::{due_notifications, NotifiedThresholds, Quota, QuotaNotifier};

// Re-export common external deps
pub use std::sync::Arc;
pub use tracing;
