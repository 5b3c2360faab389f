//! SQLite-backed event log
//!
//! One database file can be shared by several processes; appends run in an
//! immediate transaction so per-entity sequences stay gapless.

use crate::sql::{from_micros, to_micros};
use crate::store::open_connection;
use parking_lot::Mutex;
use rusqlite::{Connection, Row, TransactionBehavior};
use sigil_core::{
    config::ProjectionConfig,
    error::{Result, SigilError},
    event_log::{EventFilter, EventLog},
    types::{Editor, EntityType, Event, NewEvent, Payload, Position, TenantId},
};
use std::sync::Arc;
use tokio::sync::Notify;

pub struct SqliteEventLog {
    conn: Mutex<Connection>,
    notify: Option<Arc<Notify>>,
}

fn log_err(e: rusqlite::Error) -> SigilError {
    SigilError::EventLog(e.to_string())
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

impl SqliteEventLog {
    pub fn open(cfg: ProjectionConfig) -> Result<Self> {
        let conn = open_connection(&cfg, SigilError::EventLog)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                position INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                owner TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                editor_user TEXT NOT NULL,
                editor_service TEXT NOT NULL,
                version TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                UNIQUE (tenant, entity_type, entity_id, sequence)
            );
            CREATE INDEX IF NOT EXISTS events_tenant_type ON events (tenant, entity_type, position);",
        )
        .map_err(log_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
            notify: None,
        })
    }

    /// Wake `notify` after every append
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    fn row_to_event(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
        Ok(RawEvent {
            position: row.get(0)?,
            tenant: row.get(1)?,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            sequence: row.get(4)?,
            owner: row.get(5)?,
            created_at: row.get(6)?,
            editor_user: row.get(7)?,
            editor_service: row.get(8)?,
            version: row.get(9)?,
            payload: row.get(10)?,
        })
    }
}

struct RawEvent {
    position: i64,
    tenant: String,
    entity_type: String,
    entity_id: String,
    sequence: i64,
    owner: String,
    created_at: i64,
    editor_user: String,
    editor_service: String,
    version: String,
    payload: String,
}

impl RawEvent {
    fn decode(self) -> Result<Event> {
        let entity_type = EntityType::parse(&self.entity_type).ok_or_else(|| {
            SigilError::EventLog(format!("unknown entity type {:?}", self.entity_type))
        })?;
        let payload: Payload = serde_json::from_str(&self.payload)?;
        Ok(Event {
            entity_type,
            entity_id: self.entity_id,
            tenant: TenantId(self.tenant),
            owner: self.owner,
            sequence: self.sequence as u64,
            position: Position(self.position as u64),
            created_at: from_micros(self.created_at)?,
            editor: Editor::new(self.editor_user, self.editor_service),
            version: self.version,
            payload,
        })
    }
}

const SELECT_EVENT: &str = "SELECT position, tenant, entity_type, entity_id, sequence, owner, \
     created_at, editor_user, editor_service, version, payload FROM events";

impl EventLog for SqliteEventLog {
    fn append(&self, event: NewEvent) -> Result<Event> {
        let stored = {
            let mut conn = self.conn.lock();
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(log_err)?;

            let current: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(sequence), 0) FROM events
                     WHERE tenant = ?1 AND entity_type = ?2 AND entity_id = ?3",
                    rusqlite::params![
                        event.tenant.as_str(),
                        event.entity_type.as_str(),
                        event.entity_id
                    ],
                    |row| row.get(0),
                )
                .map_err(log_err)?;
            let current = current as u64;

            if let Some(expected) = event.expected_sequence {
                if expected != current {
                    return Err(SigilError::Conflict(format!(
                        "{}/{} is at sequence {}, expected {}",
                        event.entity_type, event.entity_id, current, expected
                    )));
                }
            }

            // Stored with microsecond precision
            let created_at = from_micros(to_micros(chrono::Utc::now()))?;
            let payload = serde_json::to_string(&event.payload)?;
            tx.execute(
                "INSERT INTO events (tenant, entity_type, entity_id, sequence, owner, created_at,
                    editor_user, editor_service, version, kind, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    event.tenant.as_str(),
                    event.entity_type.as_str(),
                    event.entity_id,
                    (current + 1) as i64,
                    event.owner,
                    to_micros(created_at),
                    event.editor.user_id,
                    event.editor.service,
                    "v1",
                    event.payload.kind().as_str(),
                    payload
                ],
            )
            .map_err(|e| match crate::sql::map_write_error(e) {
                SigilError::Conflict(m) => SigilError::Conflict(m),
                other => SigilError::EventLog(other.to_string()),
            })?;
            let position = tx.last_insert_rowid();
            tx.commit().map_err(log_err)?;

            event.into_event(current + 1, Position(position as u64), created_at)
        };

        if let Some(notify) = &self.notify {
            notify.notify_waiters();
        }
        Ok(stored)
    }

    fn read(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let mut sql = format!("{} WHERE tenant = ?1 AND position > ?2", SELECT_EVENT);
        let mut params: Vec<rusqlite::types::Value> = vec![
            filter.tenant.as_str().to_string().into(),
            (filter.after.0 as i64).into(),
        ];
        if !filter.entity_types.is_empty() {
            sql.push_str(&format!(
                " AND entity_type IN ({})",
                placeholders(3, filter.entity_types.len())
            ));
            params.extend(
                filter
                    .entity_types
                    .iter()
                    .map(|t| rusqlite::types::Value::from(t.as_str().to_string())),
            );
        }
        sql.push_str(" ORDER BY position");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let raw = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&sql).map_err(log_err)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), Self::row_to_event)
                .map_err(log_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(log_err)?
        };
        raw.into_iter().map(RawEvent::decode).collect()
    }

    fn max_position(&self, entity_types: &[EntityType], tenant: &TenantId) -> Result<Position> {
        if entity_types.is_empty() {
            return Ok(Position::ZERO);
        }
        let sql = format!(
            "SELECT COALESCE(MAX(position), 0) FROM events WHERE tenant = ?1 AND entity_type IN ({})",
            placeholders(2, entity_types.len())
        );
        let mut params: Vec<rusqlite::types::Value> = vec![tenant.as_str().to_string().into()];
        params.extend(
            entity_types
                .iter()
                .map(|t| rusqlite::types::Value::from(t.as_str().to_string())),
        );

        let conn = self.conn.lock();
        let max: i64 = conn
            .query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| {
                row.get(0)
            })
            .map_err(log_err)?;
        Ok(Position(max as u64))
    }

    fn tenants(&self) -> Result<Vec<TenantId>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT tenant FROM events ORDER BY tenant")
            .map_err(log_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(log_err)?;
        let tenants = rows
            .map(|r| r.map(TenantId))
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(log_err)?;
        Ok(tenants)
    }
}
