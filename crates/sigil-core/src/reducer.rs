//! Reducer dispatcher
//!
//! A [`Projection`] owns a set of tables and maps `(entity type, event kind)`
//! to the reducer that turns such an event into a [`Statement`]. Events with
//! no registered reducer reduce to a no-op so the sequence guard still moves.
//!
//! # Example
//!
//! ```
//! use sigil_core::prelude::*;
//!
//! let projection = Projection::new("org_removals")
//!     .table(Table::new("org_removals").column("org_id", ColumnType::Text).primary_key(&["org_id"]))
//!     .on(EntityType::Org, EventKind::OrgRemoved, |event| {
//!         Ok(Statement::create(event, "org_removals", vec![col("org_id", &event.entity_id)]))
//!     });
//!
//! assert_eq!(projection.entity_types(), vec![EntityType::Org]);
//! ```

use crate::error::{Result, SigilError};
use crate::statement::Statement;
use crate::table::Table;
use crate::types::{EntityType, Event, EventKind};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Pure function mapping one event to one statement
pub type Reducer = Arc<dyn Fn(&Event) -> Result<Statement> + Send + Sync>;

pub struct Projection {
    name: String,
    tables: Vec<Table>,
    reducers: HashMap<(EntityType, EventKind), Reducer>,
}

impl Projection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: Vec::new(),
            reducers: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Register a reducer
    ///
    /// Panics if a reducer for the same entity type and kind is already registered.
    pub fn on<F>(mut self, entity_type: EntityType, kind: EventKind, reducer: F) -> Self
    where
        F: Fn(&Event) -> Result<Statement> + Send + Sync + 'static,
    {
        if let Err(e) = self.try_on(entity_type, kind, reducer) {
            panic!("{}", e);
        }
        self
    }

    /// Register a reducer, returning an error if one is already registered
    pub fn try_on<F>(&mut self, entity_type: EntityType, kind: EventKind, reducer: F) -> Result<()>
    where
        F: Fn(&Event) -> Result<Statement> + Send + Sync + 'static,
    {
        if self.reducers.contains_key(&(entity_type, kind)) {
            return Err(SigilError::InvalidState(format!(
                "Reducer for {}/{} already registered in projection '{}'",
                entity_type, kind, self.name
            )));
        }
        self.reducers.insert((entity_type, kind), Arc::new(reducer));
        Ok(())
    }

    pub fn handles(&self, entity_type: EntityType, kind: EventKind) -> bool {
        self.reducers.contains_key(&(entity_type, kind))
    }

    /// Entity types this projection consumes, including cascade sources
    pub fn entity_types(&self) -> Vec<EntityType> {
        self.reducers
            .keys()
            .map(|(entity_type, _)| *entity_type)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Route an event to its reducer
    pub fn reduce(&self, event: &Event) -> Result<Statement> {
        match self.reducers.get(&(event.entity_type, event.kind())) {
            Some(reducer) => reducer(event),
            None => Ok(Statement::noop(event)),
        }
    }
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("name", &self.name)
            .field("tables", &self.tables.len())
            .field("reducers", &self.reducers.len())
            .finish()
    }
}

/// Error for a reducer handed a payload it was not written for
pub fn unexpected_payload(event: &Event, expected: EventKind) -> SigilError {
    SigilError::InvalidArgument(format!(
        "reduce.wrong.event.type: expected {}, got {} for {}",
        expected,
        event.kind(),
        event.entity_ref()
    ))
}
