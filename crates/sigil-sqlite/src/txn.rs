use crate::sql;
use parking_lot::MutexGuard;
use rusqlite::{Connection, OptionalExtension};
use sigil_core::{
    error::{Result, SigilError},
    statement::Statement,
    traits::{Applied, ProjectionTxn},
    types::{EntityType, Position, TenantId},
};

/// Projection transaction for one (projection, tenant) pair
///
/// Holds the connection for its whole lifetime; dropped without commit means
/// rolled back.
pub struct SqliteProjectionTxn<'a> {
    conn: MutexGuard<'a, Connection>,
    projection: String,
    tenant: TenantId,
    in_txn: bool,
}

impl<'a> SqliteProjectionTxn<'a> {
    pub fn new(
        conn: MutexGuard<'a, Connection>,
        projection: &str,
        tenant: &TenantId,
    ) -> Result<Self> {
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])
            .map_err(|e| SigilError::Projection(e.to_string()))?;

        Ok(Self {
            conn,
            projection: projection.to_string(),
            tenant: tenant.clone(),
            in_txn: true,
        })
    }

    fn stored_sequence(&self, entity_type: EntityType, entity_id: &str) -> Result<u64> {
        let seq: Option<i64> = self
            .conn
            .query_row(
                "SELECT sequence FROM projection_sequences
                 WHERE projection = ?1 AND tenant = ?2 AND entity_type = ?3 AND entity_id = ?4",
                rusqlite::params![
                    self.projection,
                    self.tenant.as_str(),
                    entity_type.as_str(),
                    entity_id
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SigilError::Projection(e.to_string()))?;
        Ok(seq.unwrap_or(0) as u64)
    }

    fn apply(&self, statement: &Statement) -> Result<()> {
        for leaf in statement.operation.leaves() {
            sql::render(leaf)?.execute(&self.conn)?;
        }
        self.conn
            .execute(
                "INSERT INTO projection_sequences (projection, tenant, entity_type, entity_id, sequence)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (projection, tenant, entity_type, entity_id)
                 DO UPDATE SET sequence = excluded.sequence",
                rusqlite::params![
                    self.projection,
                    self.tenant.as_str(),
                    statement.source.entity_type.as_str(),
                    statement.source.entity_id,
                    statement.source.sequence as i64
                ],
            )
            .map_err(|e| SigilError::Projection(e.to_string()))?;
        Ok(())
    }
}

impl<'a> ProjectionTxn for SqliteProjectionTxn<'a> {
    fn execute(&mut self, statement: &Statement) -> Result<Applied> {
        let source = &statement.source;
        if source.tenant != self.tenant {
            return Err(SigilError::InvalidArgument(format!(
                "statement for tenant {} executed in transaction for {}",
                source.tenant, self.tenant
            )));
        }
        statement.operation.validate()?;

        let stored = self.stored_sequence(source.entity_type, &source.entity_id)?;
        if source.sequence <= stored {
            tracing::trace!(
                "{}: skipping {}/{} sequence {} (stored {})",
                self.projection,
                source.entity_type,
                source.entity_id,
                source.sequence,
                stored
            );
            return Ok(Applied::Skipped);
        }
        if source.sequence > stored + 1 {
            return Err(SigilError::OutOfOrder {
                entity: format!("{}/{}", source.entity_type, source.entity_id),
                expected: stored + 1,
                got: source.sequence,
            });
        }

        // Savepoint keeps a failed Multi from leaving earlier leaves applied
        self.conn
            .execute("SAVEPOINT stmt", [])
            .map_err(|e| SigilError::Projection(e.to_string()))?;
        match self.apply(statement) {
            Ok(()) => {
                self.conn
                    .execute("RELEASE stmt", [])
                    .map_err(|e| SigilError::Projection(e.to_string()))?;
                Ok(Applied::Applied)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK TO stmt; RELEASE stmt;");
                Err(e)
            }
        }
    }

    fn commit(mut self: Box<Self>, watermark: Position) -> Result<()> {
        if self.in_txn {
            self.conn
                .execute(
                    "INSERT INTO projection_state (projection, tenant, position) VALUES (?1, ?2, ?3)
                     ON CONFLICT (projection, tenant)
                     DO UPDATE SET position = MAX(position, excluded.position), updated_at = datetime('now')",
                    rusqlite::params![self.projection, self.tenant.as_str(), watermark.0 as i64],
                )
                .map_err(|e| SigilError::Projection(e.to_string()))?;

            self.conn
                .execute("COMMIT", [])
                .map_err(|e| SigilError::Projection(e.to_string()))?;

            self.in_txn = false;
        }
        Ok(())
    }

    fn rollback(mut self: Box<Self>) {
        if self.in_txn {
            let _ = self.conn.execute("ROLLBACK", []);
            self.in_txn = false;
        }
    }
}

impl<'a> Drop for SqliteProjectionTxn<'a> {
    fn drop(&mut self) {
        if self.in_txn {
            let _ = self.conn.execute("ROLLBACK", []);
        }
    }
}
