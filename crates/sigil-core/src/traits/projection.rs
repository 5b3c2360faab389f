use crate::error::Result;
use crate::statement::Statement;
use crate::table::Table;
use crate::types::{EntityType, Position, TenantId};

/// Outcome of executing one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Rows were mutated and the entity's sequence advanced
    Applied,
    /// The source event was already applied (redelivery)
    Skipped,
}

/// Transaction scoped to one (projection, tenant) pair
///
/// Note: Not required to be Send, as some backends have thread-affine transactions
pub trait ProjectionTxn {
    /// Execute a statement behind the sequence guard of its source entity
    ///
    /// Returns `Skipped` when the source sequence is not newer than the stored
    /// one, and `OutOfOrder` when it skips ahead of the next expected sequence.
    fn execute(&mut self, statement: &Statement) -> Result<Applied>;

    /// Execute a batch in order, stopping at the first error
    fn execute_batch(&mut self, statements: &[Statement]) -> Result<Vec<Applied>> {
        statements.iter().map(|s| self.execute(s)).collect()
    }

    /// Commit and advance the tenant's watermark (never moves backwards)
    fn commit(self: Box<Self>, watermark: Position) -> Result<()>;

    /// Rollback transaction
    fn rollback(self: Box<Self>);
}

/// Relational read-model storage
///
/// Provides:
/// - Table creation from projection schemas
/// - Per-entity sequence guards and per-tenant watermarks
/// - Transactional statement execution
pub trait ProjectionStore: Send + Sync {
    type Txn<'a>: ProjectionTxn
    where
        Self: 'a;

    /// Open a projection store
    fn open(cfg: crate::config::ProjectionConfig) -> Result<Self>
    where
        Self: Sized;

    /// Close the store
    fn close(&self) -> Result<()>;

    /// Create tables that do not exist yet
    fn ensure_tables(&self, tables: &[Table]) -> Result<()>;

    /// Begin a transaction for one projection and tenant
    fn begin_txn(&self, projection: &str, tenant: &TenantId) -> Result<Self::Txn<'_>>;

    /// Last position committed for the projection and tenant
    fn watermark(&self, projection: &str, tenant: &TenantId) -> Result<Position>;

    /// Last sequence applied for one entity, 0 if none
    fn entity_sequence(
        &self,
        projection: &str,
        tenant: &TenantId,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<u64>;
}
