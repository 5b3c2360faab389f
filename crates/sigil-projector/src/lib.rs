//! Projector: catch-up loop for sigil projections
//!
//! Reads events after a projection's per-tenant watermark, dispatches them to
//! the projection's reducers and applies the statements in one transaction.
//!
//! Key features:
//! - Batching with a per-run event limit
//! - Per-(projection, tenant) serialization
//! - Push-based wake-ups with polling fallback
//! - Graceful shutdown and lag monitoring

pub mod projector;

pub use projector::{Projector, ProjectorStats};
