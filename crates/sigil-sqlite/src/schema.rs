use crate::sql::ident;
use rusqlite::Connection;
use sigil_core::error::{Result, SigilError};
use sigil_core::table::{ColumnType, Table};

/// Version of the bookkeeping tables created by this crate
pub const SCHEMA_VERSION: u32 = 1;

/// Create projection bookkeeping tables and record the schema version
///
/// Opening a database written by a newer version fails instead of
/// silently downgrading it.
pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS projection_meta (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            schema_version INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS projection_state (
            projection TEXT NOT NULL,
            tenant TEXT NOT NULL,
            position INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (projection, tenant)
        );
        CREATE TABLE IF NOT EXISTS projection_sequences (
            projection TEXT NOT NULL,
            tenant TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            PRIMARY KEY (projection, tenant, entity_type, entity_id)
        );",
    )
    .map_err(|e| SigilError::Projection(e.to_string()))?;

    conn.execute(
        "INSERT OR IGNORE INTO projection_meta (id, schema_version) VALUES (0, ?1)",
        [SCHEMA_VERSION as i64],
    )
    .map_err(|e| SigilError::Projection(e.to_string()))?;

    let current: u32 = conn
        .query_row(
            "SELECT schema_version FROM projection_meta WHERE id = 0",
            [],
            |row| {
                let v: i64 = row.get(0)?;
                Ok(v as u32)
            },
        )
        .map_err(|e| SigilError::Projection(e.to_string()))?;

    if current > SCHEMA_VERSION {
        return Err(SigilError::InvalidState(format!(
            "Projection database has schema version {}, this build supports {}",
            current, SCHEMA_VERSION
        )));
    }
    if current < SCHEMA_VERSION {
        conn.execute(
            "UPDATE projection_meta SET schema_version = ?1, updated_at = datetime('now') WHERE id = 0",
            [SCHEMA_VERSION as i64],
        )
        .map_err(|e| SigilError::Projection(e.to_string()))?;
    }
    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT schema_version FROM projection_meta WHERE id = 0",
        [],
        |row| {
            let v: i64 = row.get(0)?;
            Ok(v as u32)
        },
    )
    .map_err(|e| SigilError::Projection(e.to_string()))
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Text | ColumnType::TextList => "TEXT",
        ColumnType::Int | ColumnType::Bool | ColumnType::Timestamp => "INTEGER",
        ColumnType::Bytes => "BLOB",
    }
}

/// DDL creating a projection table and its indexes if absent
pub fn create_table_sql(table: &Table) -> Result<String> {
    let name = ident(&table.name)?;
    let mut defs = Vec::with_capacity(table.columns.len() + 1);
    for c in &table.columns {
        let not_null = if c.nullable { "" } else { " NOT NULL" };
        defs.push(format!("{} {}{}", ident(&c.name)?, sql_type(c.ty), not_null));
    }
    if !table.primary_key.is_empty() {
        let pk = table
            .primary_key
            .iter()
            .map(|c| ident(c))
            .collect::<Result<Vec<_>>>()?;
        defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }

    let mut sql = format!("CREATE TABLE IF NOT EXISTS {} ({});", name, defs.join(", "));
    for index in &table.indexes {
        let cols = index.iter().map(|c| ident(c)).collect::<Result<Vec<_>>>()?;
        let index_name = ident(&format!("{}_idx_{}", table.name, index.join("_")))?;
        sql.push_str(&format!(
            " CREATE INDEX IF NOT EXISTS {} ON {} ({});",
            index_name,
            name,
            cols.join(", ")
        ));
    }
    Ok(sql)
}
