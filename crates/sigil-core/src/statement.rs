//! Declarative projection mutations
//!
//! A reducer turns one event into one [`Statement`]. The statement names the
//! event it came from ([`Source`]) so the store can apply it at most once,
//! and carries an [`Operation`] describing the row changes.

use crate::error::{Result, SigilError};
use crate::types::{EntityType, Event, Position, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    TextList(Vec<String>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::TextList(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Column assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value: Value,
}

/// Equality condition; a `Null` value matches `IS NULL`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub value: Value,
}

pub fn col(name: &str, value: impl Into<Value>) -> Column {
    Column {
        name: name.to_string(),
        value: value.into(),
    }
}

pub fn cond(column: &str, value: impl Into<Value>) -> Condition {
    Condition {
        column: column.to_string(),
        value: value.into(),
    }
}

/// Event a statement was reduced from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub tenant: TenantId,
    pub sequence: u64,
    pub position: Position,
}

impl From<&Event> for Source {
    fn from(event: &Event) -> Self {
        Self {
            entity_type: event.entity_type,
            entity_id: event.entity_id.clone(),
            tenant: event.tenant.clone(),
            sequence: event.sequence,
            position: event.position,
        }
    }
}

/// What to do when a Create hits an existing primary key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDuplicate {
    /// Surface `SigilError::Conflict`
    #[default]
    Fail,
    /// Keep the existing row
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Create {
        table: String,
        columns: Vec<Column>,
        on_duplicate: OnDuplicate,
    },
    Update {
        table: String,
        columns: Vec<Column>,
        conditions: Vec<Condition>,
    },
    Delete {
        table: String,
        conditions: Vec<Condition>,
    },
    Upsert {
        table: String,
        columns: Vec<Column>,
        conflict_key: Vec<String>,
        /// Restrict the update branch; the insert branch is unconditional
        conditions: Vec<Condition>,
    },
    /// Applied atomically in order
    Multi(Vec<Operation>),
    NoOp,
}

impl Operation {
    pub fn create(table: &str, columns: Vec<Column>) -> Self {
        Operation::Create {
            table: table.to_string(),
            columns,
            on_duplicate: OnDuplicate::Fail,
        }
    }

    /// Create that keeps an already existing row
    pub fn create_or_ignore(table: &str, columns: Vec<Column>) -> Self {
        Operation::Create {
            table: table.to_string(),
            columns,
            on_duplicate: OnDuplicate::Ignore,
        }
    }

    pub fn update(table: &str, columns: Vec<Column>, conditions: Vec<Condition>) -> Self {
        Operation::Update {
            table: table.to_string(),
            columns,
            conditions,
        }
    }

    pub fn delete(table: &str, conditions: Vec<Condition>) -> Self {
        Operation::Delete {
            table: table.to_string(),
            conditions,
        }
    }

    pub fn upsert(table: &str, conflict_key: &[&str], columns: Vec<Column>) -> Self {
        Operation::Upsert {
            table: table.to_string(),
            columns,
            conflict_key: conflict_key.iter().map(|c| c.to_string()).collect(),
            conditions: Vec::new(),
        }
    }

    /// Add update-branch conditions to an upsert; no effect on other operations
    pub fn when(mut self, extra: Vec<Condition>) -> Self {
        if let Operation::Upsert { conditions, .. } = &mut self {
            conditions.extend(extra);
        }
        self
    }

    /// Leaf operations in application order
    pub fn leaves(&self) -> Vec<&Operation> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Operation>) {
        match self {
            Operation::Multi(ops) => ops.iter().for_each(|op| op.collect_leaves(out)),
            Operation::NoOp => {}
            leaf => out.push(leaf),
        }
    }

    /// Reject shapes no backend can execute safely
    pub fn validate(&self) -> Result<()> {
        match self {
            Operation::Create { table, columns, .. } if columns.is_empty() => Err(
                SigilError::InvalidArgument(format!("create on {} without columns", table)),
            ),
            Operation::Update {
                table,
                columns,
                conditions,
            } => {
                if columns.is_empty() || conditions.is_empty() {
                    return Err(SigilError::InvalidArgument(format!(
                        "update on {} needs columns and conditions",
                        table
                    )));
                }
                Ok(())
            }
            Operation::Delete { table, conditions } if conditions.is_empty() => Err(
                SigilError::InvalidArgument(format!("delete on {} without conditions", table)),
            ),
            Operation::Upsert {
                table,
                columns,
                conflict_key,
                ..
            } => {
                if conflict_key.is_empty() {
                    return Err(SigilError::InvalidArgument(format!(
                        "upsert on {} without conflict key",
                        table
                    )));
                }
                for key in conflict_key {
                    if !columns.iter().any(|c| &c.name == key) {
                        return Err(SigilError::InvalidArgument(format!(
                            "upsert on {}: conflict key column {} not assigned",
                            table, key
                        )));
                    }
                }
                Ok(())
            }
            Operation::Multi(ops) => ops.iter().try_for_each(Operation::validate),
            _ => Ok(()),
        }
    }
}

/// Idempotence-guarded mutation tied to exactly one source event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub source: Source,
    pub operation: Operation,
}

impl Statement {
    pub fn new(event: &Event, operation: Operation) -> Self {
        let operation = match operation {
            Operation::Multi(_) => flatten(operation),
            other => other,
        };
        Self {
            source: Source::from(event),
            operation,
        }
    }

    pub fn create(event: &Event, table: &str, columns: Vec<Column>) -> Self {
        Self::new(event, Operation::create(table, columns))
    }

    pub fn update(
        event: &Event,
        table: &str,
        columns: Vec<Column>,
        conditions: Vec<Condition>,
    ) -> Self {
        Self::new(event, Operation::update(table, columns, conditions))
    }

    pub fn delete(event: &Event, table: &str, conditions: Vec<Condition>) -> Self {
        Self::new(event, Operation::delete(table, conditions))
    }

    pub fn upsert(event: &Event, table: &str, conflict_key: &[&str], columns: Vec<Column>) -> Self {
        Self::new(event, Operation::upsert(table, conflict_key, columns))
    }

    /// Several changes committed as one unit
    pub fn multi(event: &Event, ops: Vec<Operation>) -> Self {
        Self::new(event, Operation::Multi(ops))
    }

    /// Advances the sequence guard without touching rows
    pub fn noop(event: &Event) -> Self {
        Self::new(event, Operation::NoOp)
    }

    pub fn is_noop(&self) -> bool {
        self.operation.leaves().is_empty()
    }
}

fn flatten(op: Operation) -> Operation {
    let mut out = Vec::new();
    flatten_into(op, &mut out);
    match out.len() {
        0 => Operation::NoOp,
        _ => Operation::Multi(out),
    }
}

fn flatten_into(op: Operation, out: &mut Vec<Operation>) {
    match op {
        Operation::Multi(ops) => ops.into_iter().for_each(|op| flatten_into(op, out)),
        Operation::NoOp => {}
        leaf => out.push(leaf),
    }
}
