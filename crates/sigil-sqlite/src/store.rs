use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use sigil_core::{
    config::ProjectionConfig,
    error::{Result, SigilError},
    table::Table,
    traits::ProjectionStore,
    types::{EntityType, Position, TenantId},
};
use std::sync::Arc;
use std::time::Duration;

use crate::schema;
use crate::txn::SqliteProjectionTxn;

/// Open a SQLite connection and apply the configured pragmas
///
/// `on_error` maps open failures to the caller's error kind.
pub fn open_connection(
    cfg: &ProjectionConfig,
    on_error: fn(String) -> SigilError,
) -> Result<Connection> {
    // Create parent directory if needed
    if let Some(parent) = cfg.path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open_with_flags(
        &cfg.path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )
    .map_err(|e| on_error(e.to_string()))?;

    configure_connection(&conn, cfg)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection, cfg: &ProjectionConfig) -> Result<()> {
    conn.busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))
        .map_err(|e| SigilError::Config(e.to_string()))?;

    if cfg.wal_mode {
        // journal_mode returns a row, so query it rather than pragma_update
        let _mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| SigilError::Config(e.to_string()))?;
    }

    conn.pragma_update(None, "synchronous", cfg.synchronous.as_pragma())
        .map_err(|e| SigilError::Config(e.to_string()))?;

    conn.pragma_update(None, "cache_size", cfg.cache_size)
        .map_err(|e| SigilError::Config(e.to_string()))?;

    Ok(())
}

/// SQLite-backed projection store
pub struct SqliteProjectionStore {
    conn: Arc<Mutex<Connection>>,
    config: ProjectionConfig,
}

impl SqliteProjectionStore {
    /// Run a read against the projection database
    ///
    /// Blocks while a projection transaction holds the connection, so reads
    /// never observe a partially applied batch.
    pub fn read<R>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<R>) -> Result<R> {
        let conn = self.conn.lock();
        f(&*conn).map_err(|e| SigilError::Projection(e.to_string()))
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    pub fn schema_version(&self) -> Result<u32> {
        schema::schema_version(&self.conn.lock())
    }
}

impl ProjectionStore for SqliteProjectionStore {
    type Txn<'a> = SqliteProjectionTxn<'a>;

    fn open(cfg: ProjectionConfig) -> Result<Self> {
        let conn = open_connection(&cfg, SigilError::Projection)?;
        schema::init(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config: cfg,
        })
    }

    fn close(&self) -> Result<()> {
        // SQLite connection closes automatically on drop
        Ok(())
    }

    fn ensure_tables(&self, tables: &[Table]) -> Result<()> {
        let conn = self.conn.lock();
        for table in tables {
            conn.execute_batch(&schema::create_table_sql(table)?)
                .map_err(|e| SigilError::Projection(e.to_string()))?;
        }
        Ok(())
    }

    fn begin_txn(&self, projection: &str, tenant: &TenantId) -> Result<Self::Txn<'_>> {
        SqliteProjectionTxn::new(self.conn.lock(), projection, tenant)
    }

    fn watermark(&self, projection: &str, tenant: &TenantId) -> Result<Position> {
        let position: Option<i64> = self.read(|conn| {
            conn.query_row(
                "SELECT position FROM projection_state WHERE projection = ?1 AND tenant = ?2",
                rusqlite::params![projection, tenant.as_str()],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(Position(position.unwrap_or(0) as u64))
    }

    fn entity_sequence(
        &self,
        projection: &str,
        tenant: &TenantId,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<u64> {
        let seq: Option<i64> = self.read(|conn| {
            conn.query_row(
                "SELECT sequence FROM projection_sequences
                 WHERE projection = ?1 AND tenant = ?2 AND entity_type = ?3 AND entity_id = ?4",
                rusqlite::params![projection, tenant.as_str(), entity_type.as_str(), entity_id],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(seq.unwrap_or(0) as u64)
    }
}
