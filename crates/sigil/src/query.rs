//! Read side of the certificate flow

use crate::projections::{keys, TENANT_ID};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use sigil_core::{
    ActiveCertificates, CertificateRecord, KeyUsage, Position, Result, SigilError, TenantId,
};
use sigil_sqlite::sql::{from_micros, to_micros};
use sigil_sqlite::SqliteProjectionStore;
use std::sync::Arc;

pub trait CertificateQuery: Send + Sync {
    /// Certificates of `usage` whose key and certificate both outlive
    /// `not_expiring_before`, oldest first, with the position the answer
    /// reflects
    fn active_certificates(
        &self,
        tenant: &TenantId,
        not_expiring_before: DateTime<Utc>,
        usage: KeyUsage,
    ) -> Result<ActiveCertificates>;
}

/// Certificate query over the `keys` projection
pub struct ProjectionCertificateQuery {
    store: Arc<SqliteProjectionStore>,
}

type KeyRow = (String, String, String, Vec<u8>, i64, Vec<u8>, i64, i64);

impl ProjectionCertificateQuery {
    pub fn new(store: Arc<SqliteProjectionStore>) -> Self {
        Self { store }
    }

    fn to_record(row: KeyRow) -> Result<CertificateRecord> {
        let (id, usage, algorithm, private_key, key_expiry, certificate, cert_expiry, position) =
            row;
        let usage = KeyUsage::parse(&usage)
            .ok_or_else(|| SigilError::Serialization(format!("unknown key usage: {}", usage)))?;
        Ok(CertificateRecord {
            id,
            usage,
            algorithm,
            private_key,
            private_key_expiry: from_micros(key_expiry)?,
            certificate,
            certificate_expiry: from_micros(cert_expiry)?,
            position: Position(position as u64),
        })
    }
}

impl CertificateQuery for ProjectionCertificateQuery {
    fn active_certificates(
        &self,
        tenant: &TenantId,
        not_expiring_before: DateTime<Utc>,
        usage: KeyUsage,
    ) -> Result<ActiveCertificates> {
        let bound = to_micros(not_expiring_before);
        // Rows and watermark come from one locked read so they agree
        let (rows, watermark) = self.store.read(|conn| {
            let watermark: Option<i64> = conn
                .query_row(
                    "SELECT position FROM projection_state WHERE projection = ?1 AND tenant = ?2",
                    rusqlite::params![keys::PROJECTION, tenant.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let sql = format!(
                "SELECT {id}, {usage}, {algorithm}, {private_key}, {private_key_expiry},
                        {certificate}, {certificate_expiry}, {position}
                 FROM {table}
                 WHERE {tenant} = ?1 AND {usage} = ?2
                   AND {certificate_expiry} > ?3 AND {private_key_expiry} > ?3
                 ORDER BY {position}",
                id = keys::ID,
                usage = keys::USAGE,
                algorithm = keys::ALGORITHM,
                private_key = keys::PRIVATE_KEY,
                private_key_expiry = keys::PRIVATE_KEY_EXPIRY,
                certificate = keys::CERTIFICATE,
                certificate_expiry = keys::CERTIFICATE_EXPIRY,
                position = keys::POSITION,
                table = keys::TABLE,
                tenant = TENANT_ID,
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![tenant.as_str(), usage.as_str(), bound],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                        ))
                    },
                )?
                .collect::<rusqlite::Result<Vec<KeyRow>>>()?;
            Ok((rows, watermark))
        })?;

        let records = rows
            .into_iter()
            .map(Self::to_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(ActiveCertificates {
            records,
            latest_position: Position(watermark.unwrap_or(0) as u64),
        })
    }
}
