use crate::types::payload::{EventKind, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical position in the event log - strictly monotonic across all entities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position(pub u64);

impl Position {
    /// Position before the first event
    pub const ZERO: Position = Position(0);

    pub fn next(self) -> Position {
        Position(self.0 + 1)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Isolation boundary under which all data and locks are scoped
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Kind of entity owning a per-entity event sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Instance,
    Org,
    Project,
    User,
    KeyPair,
    Quota,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Instance => "instance",
            EntityType::Org => "org",
            EntityType::Project => "project",
            EntityType::User => "user",
            EntityType::KeyPair => "key_pair",
            EntityType::Quota => "quota",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "instance" => Some(EntityType::Instance),
            "org" => Some(EntityType::Org),
            "project" => Some(EntityType::Project),
            "user" => Some(EntityType::User),
            "key_pair" => Some(EntityType::KeyPair),
            "quota" => Some(EntityType::Quota),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who caused an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Editor {
    pub user_id: String,
    pub service: String,
}

impl Editor {
    pub fn new(user_id: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            service: service.into(),
        }
    }
}

/// Immutable fact stored in the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub tenant: TenantId,
    /// Resource owner (organization) of the entity
    pub owner: String,
    /// Per-entity sequence, starts at 1
    pub sequence: u64,
    pub position: Position,
    pub created_at: DateTime<Utc>,
    pub editor: Editor,
    /// Payload schema version
    pub version: String,
    pub payload: Payload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// `entity_type/entity_id`, used in log lines and errors
    pub fn entity_ref(&self) -> String {
        format!("{}/{}", self.entity_type, self.entity_id)
    }
}

/// Event to be appended; the log assigns sequence, position and timestamp
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub tenant: TenantId,
    pub owner: String,
    pub editor: Editor,
    pub payload: Payload,
    /// When set, the append fails with `Conflict` unless the entity is at this sequence
    pub expected_sequence: Option<u64>,
}

impl NewEvent {
    /// Create a new event; the entity type is taken from the payload's kind
    pub fn new(tenant: TenantId, entity_id: impl Into<String>, payload: Payload) -> Self {
        let owner = tenant.0.clone();
        Self {
            entity_type: payload.kind().entity_type(),
            entity_id: entity_id.into(),
            tenant,
            owner,
            editor: Editor::new("system", "sigil"),
            payload,
            expected_sequence: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_editor(mut self, editor: Editor) -> Self {
        self.editor = editor;
        self
    }

    pub fn with_expected_sequence(mut self, sequence: u64) -> Self {
        self.expected_sequence = Some(sequence);
        self
    }

    /// Materialize into a stored event
    pub fn into_event(self, sequence: u64, position: Position, created_at: DateTime<Utc>) -> Event {
        Event {
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            tenant: self.tenant,
            owner: self.owner,
            sequence,
            position,
            created_at,
            editor: self.editor,
            version: "v1".to_string(),
            payload: self.payload,
        }
    }
}
