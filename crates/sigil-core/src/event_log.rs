//! Event log trait and an in-memory implementation
//!
//! The log is append-only and ordered per entity. Every event gets the next
//! sequence of its entity and the next global position; readers filter by
//! tenant and entity type and resume after a position.

use crate::error::{Result, SigilError};
use crate::types::{EntityType, Event, NewEvent, Position, TenantId};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Notify;

/// Selects events for a read
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub tenant: TenantId,
    /// Empty matches every entity type
    pub entity_types: Vec<EntityType>,
    /// Exclusive lower bound
    pub after: Position,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            entity_types: Vec::new(),
            after: Position::ZERO,
            limit: None,
        }
    }

    pub fn entity_types(mut self, entity_types: &[EntityType]) -> Self {
        self.entity_types = entity_types.to_vec();
        self
    }

    pub fn after(mut self, position: Position) -> Self {
        self.after = position;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        event.tenant == self.tenant
            && event.position > self.after
            && (self.entity_types.is_empty() || self.entity_types.contains(&event.entity_type))
    }
}

/// Durable, append-only event log
pub trait EventLog: Send + Sync {
    /// Append one event, assigning its sequence and position
    ///
    /// Fails with `Conflict` if `expected_sequence` is set and does not match
    /// the entity's current sequence.
    fn append(&self, event: NewEvent) -> Result<Event>;

    /// Matching events ordered by position
    fn read(&self, filter: &EventFilter) -> Result<Vec<Event>>;

    /// Highest position among the tenant's events of the given entity types
    ///
    /// `Position::ZERO` if there are none.
    fn max_position(&self, entity_types: &[EntityType], tenant: &TenantId) -> Result<Position>;

    /// Tenants with at least one event
    fn tenants(&self) -> Result<Vec<TenantId>>;
}

impl<L: EventLog + ?Sized> EventLog for Arc<L> {
    fn append(&self, event: NewEvent) -> Result<Event> {
        (**self).append(event)
    }

    fn read(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        (**self).read(filter)
    }

    fn max_position(&self, entity_types: &[EntityType], tenant: &TenantId) -> Result<Position> {
        (**self).max_position(entity_types, tenant)
    }

    fn tenants(&self) -> Result<Vec<TenantId>> {
        (**self).tenants()
    }
}

type SequenceKey = (TenantId, EntityType, String);

#[derive(Default)]
struct MemoryState {
    events: Vec<Event>,
    sequences: HashMap<SequenceKey, u64>,
}

/// Event log held in memory, for tests and single-process embedding
#[derive(Default)]
pub struct MemoryEventLog {
    state: RwLock<MemoryState>,
    notify: Option<Arc<Notify>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake `notify` after every append
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn len(&self) -> usize {
        self.state.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventLog for MemoryEventLog {
    fn append(&self, event: NewEvent) -> Result<Event> {
        let stored = {
            let mut state = self.state.write();
            let key = (
                event.tenant.clone(),
                event.entity_type,
                event.entity_id.clone(),
            );
            let current = state.sequences.get(&key).copied().unwrap_or(0);
            if let Some(expected) = event.expected_sequence {
                if expected != current {
                    return Err(SigilError::Conflict(format!(
                        "{}/{} is at sequence {}, expected {}",
                        event.entity_type, event.entity_id, current, expected
                    )));
                }
            }
            let position = Position(state.events.len() as u64 + 1);
            let stored = event.into_event(current + 1, position, Utc::now());
            state.sequences.insert(key, current + 1);
            state.events.push(stored.clone());
            stored
        };

        if let Some(notify) = &self.notify {
            notify.notify_waiters();
        }
        Ok(stored)
    }

    fn read(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let state = self.state.read();
        let start = filter.after.0 as usize;
        let matching = state
            .events
            .iter()
            .skip(start)
            .filter(|e| filter.matches(e))
            .cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    fn max_position(&self, entity_types: &[EntityType], tenant: &TenantId) -> Result<Position> {
        let state = self.state.read();
        Ok(state
            .events
            .iter()
            .rev()
            .find(|e| &e.tenant == tenant && entity_types.contains(&e.entity_type))
            .map(|e| e.position)
            .unwrap_or(Position::ZERO))
    }

    fn tenants(&self) -> Result<Vec<TenantId>> {
        let state = self.state.read();
        Ok(state
            .events
            .iter()
            .map(|e| e.tenant.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }
}
