//! Key/value metadata attached to organizations

use super::{with_instance_removed, TENANT_ID};
use sigil_core::prelude::*;

pub const PROJECTION: &str = "org_metadata";
pub const TABLE: &str = "org_metadata";

pub const ORG_ID: &str = "org_id";
pub const KEY: &str = "key";
pub const VALUE: &str = "value";
pub const RESOURCE_OWNER: &str = "resource_owner";
pub const CREATION_DATE: &str = "creation_date";
pub const CHANGE_DATE: &str = "change_date";
pub const SEQUENCE: &str = "sequence";

pub fn table() -> Table {
    Table::new(TABLE)
        .column(TENANT_ID, ColumnType::Text)
        .column(ORG_ID, ColumnType::Text)
        .column(KEY, ColumnType::Text)
        .nullable(VALUE, ColumnType::Bytes)
        .column(RESOURCE_OWNER, ColumnType::Text)
        .column(CREATION_DATE, ColumnType::Timestamp)
        .column(CHANGE_DATE, ColumnType::Timestamp)
        .column(SEQUENCE, ColumnType::Int)
        .primary_key(&[TENANT_ID, ORG_ID, KEY])
}

pub fn projection() -> Projection {
    let projection = Projection::new(PROJECTION)
        .table(table())
        .on(EntityType::Org, EventKind::OrgMetadataSet, reduce_set)
        .on(EntityType::Org, EventKind::OrgMetadataRemoved, reduce_removed)
        .on(
            EntityType::Org,
            EventKind::OrgMetadataRemovedAll,
            reduce_removed_all,
        )
        .on(EntityType::Org, EventKind::OrgRemoved, reduce_removed_all);
    with_instance_removed(projection, TABLE)
}

fn reduce_set(e: &Event) -> Result<Statement> {
    let Payload::OrgMetadataSet { key, value } = &e.payload else {
        return Err(unexpected_payload(e, EventKind::OrgMetadataSet));
    };
    Ok(Statement::upsert(
        e,
        TABLE,
        &[TENANT_ID, ORG_ID, KEY],
        vec![
            col(TENANT_ID, e.tenant.as_str()),
            col(ORG_ID, &e.entity_id),
            col(KEY, key),
            col(VALUE, value.clone()),
            col(RESOURCE_OWNER, &e.owner),
            col(CREATION_DATE, e.created_at),
            col(CHANGE_DATE, e.created_at),
            col(SEQUENCE, e.sequence),
        ],
    ))
}

fn reduce_removed(e: &Event) -> Result<Statement> {
    let Payload::OrgMetadataRemoved { key } = &e.payload else {
        return Err(unexpected_payload(e, EventKind::OrgMetadataRemoved));
    };
    Ok(Statement::delete(
        e,
        TABLE,
        vec![
            cond(TENANT_ID, e.tenant.as_str()),
            cond(ORG_ID, &e.entity_id),
            cond(KEY, key),
        ],
    ))
}

fn reduce_removed_all(e: &Event) -> Result<Statement> {
    match &e.payload {
        Payload::OrgMetadataRemovedAll | Payload::OrgRemoved => Ok(Statement::delete(
            e,
            TABLE,
            vec![cond(TENANT_ID, e.tenant.as_str()), cond(ORG_ID, &e.entity_id)],
        )),
        _ => Err(unexpected_payload(e, EventKind::OrgMetadataRemovedAll)),
    }
}
