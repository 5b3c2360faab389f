//! Read models maintained from the event log
//!
//! Every table carries a `tenant_id` column so removing an instance can wipe
//! all of its rows regardless of which entity produced them.

pub mod keys;
pub mod org_domain;
pub mod org_metadata;
pub mod project_member;

use sigil_core::prelude::*;

/// Column holding the tenant in every projection table
pub const TENANT_ID: &str = "tenant_id";

/// Register the instance-removed cascade that deletes every row of `table`
/// belonging to the removed tenant
pub fn with_instance_removed(projection: Projection, table: &'static str) -> Projection {
    projection.on(EntityType::Instance, EventKind::InstanceRemoved, move |e| {
        match &e.payload {
            Payload::InstanceRemoved => Ok(Statement::delete(
                e,
                table,
                vec![cond(TENANT_ID, e.tenant.as_str())],
            )),
            _ => Err(unexpected_payload(e, EventKind::InstanceRemoved)),
        }
    })
}

/// Every projection the service runs
pub fn standard() -> Vec<Projection> {
    vec![
        org_domain::projection(),
        org_metadata::projection(),
        project_member::projection(),
        keys::projection(),
    ]
}
