//! Sigil: event-sourced read models and exactly-once certificate provisioning
//!
//! Sigil provides:
//! - **Projections**: relational read models (org domains, org metadata,
//!   project members, signing keys) maintained from an append-only event log
//! - **Consistency checks**: whether a read has seen everything in the log
//! - **Certificate provisioning**: get-or-generate for signing certificates,
//!   coordinated across service instances by a TTL lock
//! - **Quota notifications**: threshold evaluation against recorded usage
//!
//! # Quick Start
//!
//! ```no_run
//! use sigil::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let db = SigilDb::open("./data")?;
//! let tenant = TenantId::new("instance-1");
//!
//! db.event_log().append(NewEvent::new(
//!     tenant.clone(),
//!     "org-1",
//!     Payload::OrgDomainAdded {
//!         domain: "example.com".into(),
//!     },
//! ))?;
//!
//! db.catch_up(&tenant)?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod commands;
pub mod consistency;
pub mod db;
pub mod prelude;
pub mod projections;
pub mod provisioner;
pub mod query;
pub mod quota;

// Re-export core types
pub use sigil_core::{
    config::{
        BreakerConfig, ProjectionConfig, ProjectorConfig, ProvisionerConfig, SynchronousMode,
    },
    error::{Result, SigilError},
    event_log::{EventFilter, EventLog, MemoryEventLog},
    lease::{DistributedLock, LockGuard, MemoryLockStore},
    traits::{Applied, LockKey, LockRecord, LockStore, ProjectionStore, ProjectionTxn},
    types::{
        ActiveCertificates, CertificateRecord, Editor, EntityType, Event, EventKind, KeyUsage,
        NewEvent, Payload, Position, TenantId,
    },
    LockManager, RetryPolicy,
};

// Re-export implementations
pub use sigil_projector::{Projector, ProjectorStats};
pub use sigil_sqlite::{SqliteEventLog, SqliteLockStore, SqliteProjectionStore};

// Re-export main types from this crate
pub use circuit_breaker::{BreakerMetrics, BreakerMetricsSnapshot, BreakerState, CircuitBreaker};
pub use commands::{
    Actor, CertificateCommands, GeneratedKeyPair, KeyGenerator, LogCertificateCommands,
};
pub use consistency::ConsistencyChecker;
pub use db::{SigilDb, SigilProjector};
pub use provisioner::{CertificateProvisioner, DeferReason, Provision};
pub use query::{CertificateQuery, ProjectionCertificateQuery};
pub use quota::{due_notifications, DueNotification, NotifiedThresholds, Quota, QuotaNotifier};
