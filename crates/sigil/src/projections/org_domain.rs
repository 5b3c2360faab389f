//! Domains claimed by organizations
//!
//! At most one domain per organization is primary. Reassigning the primary
//! flag demotes the old holder and promotes the new one in one statement.

use super::{with_instance_removed, TENANT_ID};
use sigil_core::prelude::*;
use sigil_core::{Condition, DomainValidationType};

pub const PROJECTION: &str = "org_domains";
pub const TABLE: &str = "org_domains";

pub const ORG_ID: &str = "org_id";
pub const DOMAIN: &str = "domain";
pub const CREATION_DATE: &str = "creation_date";
pub const CHANGE_DATE: &str = "change_date";
pub const IS_VERIFIED: &str = "is_verified";
pub const IS_PRIMARY: &str = "is_primary";
pub const VALIDATION_TYPE: &str = "validation_type";

pub fn table() -> Table {
    Table::new(TABLE)
        .column(TENANT_ID, ColumnType::Text)
        .column(ORG_ID, ColumnType::Text)
        .column(DOMAIN, ColumnType::Text)
        .column(CREATION_DATE, ColumnType::Timestamp)
        .column(CHANGE_DATE, ColumnType::Timestamp)
        .column(IS_VERIFIED, ColumnType::Bool)
        .column(IS_PRIMARY, ColumnType::Bool)
        .column(VALIDATION_TYPE, ColumnType::Int)
        .primary_key(&[TENANT_ID, ORG_ID, DOMAIN])
        .index(&[TENANT_ID, DOMAIN])
}

pub fn projection() -> Projection {
    let projection = Projection::new(PROJECTION)
        .table(table())
        .on(EntityType::Org, EventKind::OrgDomainAdded, reduce_added)
        .on(
            EntityType::Org,
            EventKind::OrgDomainVerificationAdded,
            reduce_verification_added,
        )
        .on(EntityType::Org, EventKind::OrgDomainVerified, reduce_verified)
        .on(EntityType::Org, EventKind::OrgDomainPrimarySet, reduce_primary_set)
        .on(EntityType::Org, EventKind::OrgDomainRemoved, reduce_removed);
    with_instance_removed(projection, TABLE)
}

fn domain_conditions(e: &Event, domain: &str) -> Vec<Condition> {
    vec![
        cond(TENANT_ID, e.tenant.as_str()),
        cond(ORG_ID, &e.entity_id),
        cond(DOMAIN, domain),
    ]
}

fn reduce_added(e: &Event) -> Result<Statement> {
    let Payload::OrgDomainAdded { domain } = &e.payload else {
        return Err(unexpected_payload(e, EventKind::OrgDomainAdded));
    };
    Ok(Statement::create(
        e,
        TABLE,
        vec![
            col(TENANT_ID, e.tenant.as_str()),
            col(ORG_ID, &e.entity_id),
            col(DOMAIN, domain),
            col(CREATION_DATE, e.created_at),
            col(CHANGE_DATE, e.created_at),
            col(IS_VERIFIED, false),
            col(IS_PRIMARY, false),
            col(VALIDATION_TYPE, DomainValidationType::Unspecified.as_i64()),
        ],
    ))
}

fn reduce_verification_added(e: &Event) -> Result<Statement> {
    let Payload::OrgDomainVerificationAdded {
        domain,
        validation_type,
    } = &e.payload
    else {
        return Err(unexpected_payload(e, EventKind::OrgDomainVerificationAdded));
    };
    Ok(Statement::update(
        e,
        TABLE,
        vec![
            col(CHANGE_DATE, e.created_at),
            col(VALIDATION_TYPE, validation_type.as_i64()),
        ],
        domain_conditions(e, domain),
    ))
}

fn reduce_verified(e: &Event) -> Result<Statement> {
    let Payload::OrgDomainVerified { domain } = &e.payload else {
        return Err(unexpected_payload(e, EventKind::OrgDomainVerified));
    };
    Ok(Statement::update(
        e,
        TABLE,
        vec![col(CHANGE_DATE, e.created_at), col(IS_VERIFIED, true)],
        domain_conditions(e, domain),
    ))
}

fn reduce_primary_set(e: &Event) -> Result<Statement> {
    let Payload::OrgDomainPrimarySet { domain } = &e.payload else {
        return Err(unexpected_payload(e, EventKind::OrgDomainPrimarySet));
    };
    Ok(Statement::multi(
        e,
        vec![
            Operation::update(
                TABLE,
                vec![col(CHANGE_DATE, e.created_at), col(IS_PRIMARY, false)],
                vec![
                    cond(TENANT_ID, e.tenant.as_str()),
                    cond(ORG_ID, &e.entity_id),
                    cond(IS_PRIMARY, true),
                ],
            ),
            Operation::update(
                TABLE,
                vec![col(CHANGE_DATE, e.created_at), col(IS_PRIMARY, true)],
                domain_conditions(e, domain),
            ),
        ],
    ))
}

fn reduce_removed(e: &Event) -> Result<Statement> {
    let Payload::OrgDomainRemoved { domain } = &e.payload else {
        return Err(unexpected_payload(e, EventKind::OrgDomainRemoved));
    };
    Ok(Statement::delete(e, TABLE, domain_conditions(e, domain)))
}
