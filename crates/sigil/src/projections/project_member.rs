//! Project memberships and their roles
//!
//! Removing a user deletes the user's memberships in every project. That
//! reducer is keyed on the user entity, so it runs regardless of where the
//! project's own event stream stands.

use super::{with_instance_removed, TENANT_ID};
use sigil_core::prelude::*;
use sigil_core::Condition;

pub const PROJECTION: &str = "project_members";
pub const TABLE: &str = "project_members";

pub const PROJECT_ID: &str = "project_id";
pub const USER_ID: &str = "user_id";
pub const ROLES: &str = "roles";
pub const RESOURCE_OWNER: &str = "resource_owner";
pub const CREATION_DATE: &str = "creation_date";
pub const CHANGE_DATE: &str = "change_date";
pub const SEQUENCE: &str = "sequence";

pub fn table() -> Table {
    Table::new(TABLE)
        .column(TENANT_ID, ColumnType::Text)
        .column(PROJECT_ID, ColumnType::Text)
        .column(USER_ID, ColumnType::Text)
        .column(ROLES, ColumnType::TextList)
        .column(RESOURCE_OWNER, ColumnType::Text)
        .column(CREATION_DATE, ColumnType::Timestamp)
        .column(CHANGE_DATE, ColumnType::Timestamp)
        .column(SEQUENCE, ColumnType::Int)
        .primary_key(&[TENANT_ID, PROJECT_ID, USER_ID])
        .index(&[TENANT_ID, USER_ID])
}

pub fn projection() -> Projection {
    let projection = Projection::new(PROJECTION)
        .table(table())
        .on(EntityType::Project, EventKind::ProjectMemberAdded, reduce_added)
        .on(
            EntityType::Project,
            EventKind::ProjectMemberChanged,
            reduce_changed,
        )
        .on(
            EntityType::Project,
            EventKind::ProjectMemberRemoved,
            reduce_removed,
        )
        .on(
            EntityType::Project,
            EventKind::ProjectMemberCascadeRemoved,
            reduce_removed,
        )
        .on(EntityType::Project, EventKind::ProjectRemoved, reduce_project_removed)
        .on(EntityType::User, EventKind::UserRemoved, reduce_user_removed);
    with_instance_removed(projection, TABLE)
}

fn member_conditions(e: &Event, user_id: &str) -> Vec<Condition> {
    vec![
        cond(TENANT_ID, e.tenant.as_str()),
        cond(PROJECT_ID, &e.entity_id),
        cond(USER_ID, user_id),
    ]
}

fn reduce_added(e: &Event) -> Result<Statement> {
    let Payload::ProjectMemberAdded { user_id, roles } = &e.payload else {
        return Err(unexpected_payload(e, EventKind::ProjectMemberAdded));
    };
    Ok(Statement::create(
        e,
        TABLE,
        vec![
            col(TENANT_ID, e.tenant.as_str()),
            col(PROJECT_ID, &e.entity_id),
            col(USER_ID, user_id),
            col(ROLES, roles.clone()),
            col(RESOURCE_OWNER, &e.owner),
            col(CREATION_DATE, e.created_at),
            col(CHANGE_DATE, e.created_at),
            col(SEQUENCE, e.sequence),
        ],
    ))
}

fn reduce_changed(e: &Event) -> Result<Statement> {
    let Payload::ProjectMemberChanged { user_id, roles } = &e.payload else {
        return Err(unexpected_payload(e, EventKind::ProjectMemberChanged));
    };
    Ok(Statement::update(
        e,
        TABLE,
        vec![
            col(ROLES, roles.clone()),
            col(CHANGE_DATE, e.created_at),
            col(SEQUENCE, e.sequence),
        ],
        member_conditions(e, user_id),
    ))
}

fn reduce_removed(e: &Event) -> Result<Statement> {
    let user_id = match &e.payload {
        Payload::ProjectMemberRemoved { user_id }
        | Payload::ProjectMemberCascadeRemoved { user_id } => user_id,
        _ => return Err(unexpected_payload(e, EventKind::ProjectMemberRemoved)),
    };
    Ok(Statement::delete(e, TABLE, member_conditions(e, user_id)))
}

fn reduce_project_removed(e: &Event) -> Result<Statement> {
    let Payload::ProjectRemoved = &e.payload else {
        return Err(unexpected_payload(e, EventKind::ProjectRemoved));
    };
    Ok(Statement::delete(
        e,
        TABLE,
        vec![
            cond(TENANT_ID, e.tenant.as_str()),
            cond(PROJECT_ID, &e.entity_id),
        ],
    ))
}

fn reduce_user_removed(e: &Event) -> Result<Statement> {
    let Payload::UserRemoved = &e.payload else {
        return Err(unexpected_payload(e, EventKind::UserRemoved));
    };
    Ok(Statement::delete(
        e,
        TABLE,
        vec![cond(TENANT_ID, e.tenant.as_str()), cond(USER_ID, &e.entity_id)],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::test_support::event;

    #[test]
    fn test_user_removed_spans_projects() {
        let e = event("user-7", 3, Payload::UserRemoved);
        assert_eq!(e.entity_type, EntityType::User);
        let stmt = projection().reduce(&e).unwrap();
        assert_eq!(
            stmt.operation,
            Operation::delete(
                TABLE,
                vec![cond(TENANT_ID, "instance-1"), cond(USER_ID, "user-7")]
            )
        );
    }

    #[test]
    fn test_cascade_removed_uses_member_key() {
        let e = event(
            "proj1",
            4,
            Payload::ProjectMemberCascadeRemoved {
                user_id: "user-7".into(),
            },
        );
        let stmt = projection().reduce(&e).unwrap();
        let Operation::Delete { conditions, .. } = &stmt.operation else {
            panic!("expected delete");
        };
        assert!(conditions.contains(&cond(PROJECT_ID, "proj1")));
        assert!(conditions.contains(&cond(USER_ID, "user-7")));
    }

    #[test]
    fn test_changed_rewrites_roles() {
        let e = event(
            "proj1",
            2,
            Payload::ProjectMemberChanged {
                user_id: "user-7".into(),
                roles: vec!["PROJECT_OWNER".into()],
            },
        );
        let stmt = projection().reduce(&e).unwrap();
        let Operation::Update { columns, .. } = &stmt.operation else {
            panic!("expected update");
        };
        assert!(columns.contains(&col(ROLES, vec!["PROJECT_OWNER".to_string()])));
        assert!(columns.contains(&col(SEQUENCE, 2u64)));
    }
}
