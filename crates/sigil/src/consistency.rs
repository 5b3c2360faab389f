//! Consistency checker
//!
//! Answers whether a read taken at position `T` has seen everything the log
//! holds for a set of entity types. The comparison goes against the log
//! itself, never against the projection, so a writer that raced ahead of the
//! read is always noticed.

use sigil_core::{EntityType, EventLog, Position, Projection, Result, TenantId};
use std::sync::Arc;

#[derive(Clone)]
pub struct ConsistencyChecker {
    log: Arc<dyn EventLog>,
    entity_types: Vec<EntityType>,
}

impl ConsistencyChecker {
    pub fn new(log: Arc<dyn EventLog>, entity_types: &[EntityType]) -> Self {
        Self {
            log,
            entity_types: entity_types.to_vec(),
        }
    }

    /// Checker over the entity types `projection` consumes, so its watermark
    /// and the log maximum are comparable
    pub fn for_projection(log: Arc<dyn EventLog>, projection: &Projection) -> Self {
        Self::new(log, &projection.entity_types())
    }

    pub fn entity_types(&self) -> &[EntityType] {
        &self.entity_types
    }

    /// True when nothing newer than `reference` exists in the log
    pub fn is_caught_up(&self, tenant: &TenantId, reference: Position) -> Result<bool> {
        let latest = self.log.max_position(&self.entity_types, tenant)?;
        if latest > reference {
            tracing::debug!(
                "tenant {} not caught up: read at {}, log at {}",
                tenant,
                reference,
                latest
            );
            return Ok(false);
        }
        Ok(true)
    }
}
