//! SQLite lock store
//!
//! Acquisition is one upsert whose update branch only fires when the stored
//! record has expired, so the row count tells whether the caller won.

use crate::sql::{from_micros, to_micros};
use crate::store::open_connection;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use sigil_core::{
    config::ProjectionConfig,
    error::{Result, SigilError},
    traits::{LockKey, LockRecord, LockStore},
};

pub struct SqliteLockStore {
    conn: Mutex<Connection>,
}

fn lock_err(e: rusqlite::Error) -> SigilError {
    SigilError::Lock(e.to_string())
}

impl SqliteLockStore {
    pub fn open(cfg: ProjectionConfig) -> Result<Self> {
        let conn = open_connection(&cfg, SigilError::Lock)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS locks (
                resource TEXT NOT NULL,
                tenant TEXT NOT NULL,
                owner TEXT NOT NULL,
                token TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (resource, tenant)
            )",
        )
        .map_err(lock_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl LockStore for SqliteLockStore {
    fn try_acquire(&self, key: &LockKey, record: &LockRecord, now: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .execute(
                "INSERT INTO locks (resource, tenant, owner, token, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (resource, tenant) DO UPDATE SET
                    owner = excluded.owner,
                    token = excluded.token,
                    expires_at = excluded.expires_at
                 WHERE locks.expires_at <= ?6",
                rusqlite::params![
                    key.resource,
                    key.tenant.as_str(),
                    record.owner,
                    record.token,
                    to_micros(record.expires_at),
                    to_micros(now)
                ],
            )
            .map_err(lock_err)?;
        Ok(changed == 1)
    }

    fn release(&self, key: &LockKey, token: &str) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .execute(
                "DELETE FROM locks WHERE resource = ?1 AND tenant = ?2 AND token = ?3",
                rusqlite::params![key.resource, key.tenant.as_str(), token],
            )
            .map_err(lock_err)?;
        Ok(changed == 1)
    }

    fn holder(&self, key: &LockKey, now: DateTime<Utc>) -> Result<Option<LockRecord>> {
        let row: Option<(String, String, i64)> = self
            .conn
            .lock()
            .query_row(
                "SELECT owner, token, expires_at FROM locks
                 WHERE resource = ?1 AND tenant = ?2 AND expires_at > ?3",
                rusqlite::params![key.resource, key.tenant.as_str(), to_micros(now)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(lock_err)?;

        row.map(|(owner, token, expires_at)| {
            Ok(LockRecord {
                owner,
                token,
                expires_at: from_micros(expires_at)?,
            })
        })
        .transpose()
    }
}
