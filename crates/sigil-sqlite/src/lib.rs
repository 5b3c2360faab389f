//! SQLite backends for sigil
//!
//! - Projection store: statement rendering, per-entity sequence guards and
//!   per-tenant watermarks, all inside one immediate transaction per batch
//! - Event log: shareable append-only log with gapless per-entity sequences
//! - Lock store: compare-and-swap lease records for the distributed lock
//!
//! Every store runs in WAL mode by default.

pub mod event_log;
pub mod lock;
pub mod schema;
pub mod sql;
pub mod store;
pub mod txn;

pub use event_log::SqliteEventLog;
pub use lock::SqliteLockStore;
pub use store::SqliteProjectionStore;
pub use txn::SqliteProjectionTxn;
