//! Signing key pairs and their certificates
//!
//! Rows are never updated. Rotation adds a new row and readers pick the
//! newest one that is not about to expire.

use super::{with_instance_removed, TENANT_ID};
use sigil_core::prelude::*;

pub const PROJECTION: &str = "keys";
pub const TABLE: &str = "keys";

pub const ID: &str = "id";
pub const USAGE: &str = "usage";
pub const ALGORITHM: &str = "algorithm";
pub const PRIVATE_KEY: &str = "private_key";
pub const PRIVATE_KEY_EXPIRY: &str = "private_key_expiry";
pub const CERTIFICATE: &str = "certificate";
pub const CERTIFICATE_EXPIRY: &str = "certificate_expiry";
pub const POSITION: &str = "position";
pub const CREATION_DATE: &str = "creation_date";

pub fn table() -> Table {
    Table::new(TABLE)
        .column(TENANT_ID, ColumnType::Text)
        .column(ID, ColumnType::Text)
        .column(USAGE, ColumnType::Text)
        .column(ALGORITHM, ColumnType::Text)
        .column(PRIVATE_KEY, ColumnType::Bytes)
        .column(PRIVATE_KEY_EXPIRY, ColumnType::Timestamp)
        .column(CERTIFICATE, ColumnType::Bytes)
        .column(CERTIFICATE_EXPIRY, ColumnType::Timestamp)
        .column(POSITION, ColumnType::Int)
        .column(CREATION_DATE, ColumnType::Timestamp)
        .primary_key(&[TENANT_ID, ID])
        .index(&[TENANT_ID, USAGE])
}

pub fn projection() -> Projection {
    let projection = Projection::new(PROJECTION).table(table()).on(
        EntityType::KeyPair,
        EventKind::KeyPairAdded,
        reduce_added,
    );
    with_instance_removed(projection, TABLE)
}

fn reduce_added(e: &Event) -> Result<Statement> {
    let Payload::KeyPairAdded {
        usage,
        algorithm,
        private_key,
        private_key_expiry,
        certificate,
        certificate_expiry,
    } = &e.payload
    else {
        return Err(unexpected_payload(e, EventKind::KeyPairAdded));
    };
    Ok(Statement::new(
        e,
        Operation::create_or_ignore(
            TABLE,
            vec![
                col(TENANT_ID, e.tenant.as_str()),
                col(ID, &e.entity_id),
                col(USAGE, usage.as_str()),
                col(ALGORITHM, algorithm),
                col(PRIVATE_KEY, private_key.clone()),
                col(PRIVATE_KEY_EXPIRY, *private_key_expiry),
                col(CERTIFICATE, certificate.clone()),
                col(CERTIFICATE_EXPIRY, *certificate_expiry),
                col(POSITION, e.position.0),
                col(CREATION_DATE, e.created_at),
            ],
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::test_support::event;
    use chrono::{Duration, Utc};
    use sigil_core::{KeyUsage, OnDuplicate};

    #[test]
    fn test_added_records_usage_and_position() {
        let expiry = Utc::now() + Duration::days(365);
        let e = event(
            "key-1",
            1,
            Payload::KeyPairAdded {
                usage: KeyUsage::ResponseSigning,
                algorithm: "RS256".into(),
                private_key: b"key".to_vec(),
                private_key_expiry: expiry,
                certificate: b"cert".to_vec(),
                certificate_expiry: expiry,
            },
        );
        let stmt = projection().reduce(&e).unwrap();
        let Operation::Create {
            columns,
            on_duplicate,
            ..
        } = &stmt.operation
        else {
            panic!("expected create");
        };
        assert_eq!(*on_duplicate, OnDuplicate::Ignore);
        assert!(columns.contains(&col(USAGE, "response_signing")));
        assert!(columns.contains(&col(POSITION, 1u64)));
    }
}
