//! Domain projections materialized through SQLite

use chrono::Utc;
use sigil::prelude::*;
use sigil::projections::org_domain;
use sigil::{ProjectionTxn, SigilError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tempfile::TempDir;

fn open() -> (SigilDb, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = SigilDb::open(dir.path()).unwrap();
    (db, dir)
}

fn tenant() -> TenantId {
    TenantId::new("instance-1")
}

fn append(db: &SigilDb, tenant: &TenantId, entity_id: &str, payload: Payload) -> Event {
    db.event_log()
        .append(NewEvent::new(tenant.clone(), entity_id, payload))
        .unwrap()
}

fn count(db: &SigilDb, sql: &str) -> i64 {
    db.projection()
        .read(|conn| conn.query_row(sql, [], |row| row.get(0)))
        .unwrap()
}

fn metadata(db: &SigilDb) -> Vec<(String, String, Vec<u8>)> {
    db.projection()
        .read(|conn| {
            let mut stmt =
                conn.prepare("SELECT org_id, key, value FROM org_metadata ORDER BY org_id, key")?;
            let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
            rows.collect()
        })
        .unwrap()
}

fn set_metadata(db: &SigilDb, org: &str, key: &str, value: &str) -> Event {
    append(
        db,
        &tenant(),
        org,
        Payload::OrgMetadataSet {
            key: key.into(),
            value: value.as_bytes().to_vec(),
        },
    )
}

#[test]
fn test_metadata_upsert_converges_to_later_value() {
    let (db, _dir) = open();
    set_metadata(&db, "org1", "color", "blue");
    set_metadata(&db, "org1", "color", "red");

    db.catch_up(&tenant()).unwrap();

    assert_eq!(
        metadata(&db),
        vec![("org1".to_string(), "color".to_string(), b"red".to_vec())]
    );
}

#[test]
fn test_redelivery_leaves_state_unchanged() {
    let (db, _dir) = open();
    set_metadata(&db, "org1", "color", "blue");
    set_metadata(&db, "org1", "size", "xl");
    append(
        &db,
        &tenant(),
        "org1",
        Payload::OrgMetadataRemoved { key: "size".into() },
    );
    db.catch_up(&tenant()).unwrap();
    let before = metadata(&db);

    // Forget every watermark so the whole log is delivered again
    db.projection()
        .read(|conn| conn.execute("DELETE FROM projection_state", []))
        .unwrap();
    let stats = db.catch_up(&tenant()).unwrap();

    assert_eq!(stats.events_applied, 0);
    assert!(stats.events_skipped > 0);
    assert_eq!(metadata(&db), before);
}

#[test]
fn test_out_of_order_delivery_is_rejected() {
    let (db, _dir) = open();
    let projection = org_domain::projection();
    let store = db.projection();
    store.ensure_tables(projection.tables()).unwrap();

    let added = NewEvent::new(
        tenant(),
        "org1",
        Payload::OrgDomainAdded {
            domain: "example.com".into(),
        },
    )
    .into_event(1, Position(1), Utc::now());
    let verified = NewEvent::new(
        tenant(),
        "org1",
        Payload::OrgDomainVerified {
            domain: "example.com".into(),
        },
    )
    .into_event(2, Position(2), Utc::now());

    // Second event first
    let mut txn = store.begin_txn(org_domain::PROJECTION, &tenant()).unwrap();
    let err = txn
        .execute(&projection.reduce(&verified).unwrap())
        .unwrap_err();
    assert!(matches!(
        err,
        SigilError::OutOfOrder {
            expected: 1,
            got: 2,
            ..
        }
    ));
    Box::new(txn).rollback();
    assert_eq!(count(&db, "SELECT COUNT(*) FROM org_domains"), 0);

    // In order converges
    let mut txn = store.begin_txn(org_domain::PROJECTION, &tenant()).unwrap();
    for e in [&added, &verified] {
        txn.execute(&projection.reduce(e).unwrap()).unwrap();
    }
    Box::new(txn).commit(Position(2)).unwrap();
    assert_eq!(
        count(&db, "SELECT COUNT(*) FROM org_domains WHERE is_verified = 1"),
        1
    );
}

#[test]
fn test_at_most_one_primary_domain_at_any_time() {
    let (db, _dir) = open();
    let domains = ["a.example.com", "b.example.com", "c.example.com"];
    for domain in domains {
        append(
            &db,
            &tenant(),
            "org1",
            Payload::OrgDomainAdded {
                domain: domain.into(),
            },
        );
    }
    db.catch_up(&tenant()).unwrap();

    let db = Arc::new(db);
    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let db = db.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut max_seen = 0;
            while !done.load(Ordering::SeqCst) {
                let primaries = count(
                    &db,
                    "SELECT COUNT(*) FROM org_domains WHERE org_id = 'org1' AND is_primary = 1",
                );
                max_seen = max_seen.max(primaries);
            }
            max_seen
        })
    };

    for round in 0..30 {
        append(
            &db,
            &tenant(),
            "org1",
            Payload::OrgDomainPrimarySet {
                domain: domains[round % domains.len()].into(),
            },
        );
        db.catch_up(&tenant()).unwrap();
    }
    done.store(true, Ordering::SeqCst);

    assert!(reader.join().unwrap() <= 1);
    let primary: String = db
        .projection()
        .read(|conn| {
            conn.query_row(
                "SELECT domain FROM org_domains WHERE is_primary = 1",
                [],
                |row| row.get(0),
            )
        })
        .unwrap();
    // Round 29 set domains[29 % 3]
    assert_eq!(primary, "c.example.com");
}

#[test]
fn test_user_removed_cascades_across_projects() {
    let (db, _dir) = open();
    for project in ["proj1", "proj2"] {
        for user in ["u1", "u2"] {
            append(
                &db,
                &tenant(),
                project,
                Payload::ProjectMemberAdded {
                    user_id: user.into(),
                    roles: vec!["PROJECT_OWNER".into()],
                },
            );
        }
    }
    append(&db, &tenant(), "u1", Payload::UserRemoved);
    db.catch_up(&tenant()).unwrap();

    assert_eq!(
        count(&db, "SELECT COUNT(*) FROM project_members WHERE user_id = 'u1'"),
        0
    );
    assert_eq!(
        count(&db, "SELECT COUNT(*) FROM project_members WHERE user_id = 'u2'"),
        2
    );
}

#[test]
fn test_member_roles_are_stored_as_list() {
    let (db, _dir) = open();
    append(
        &db,
        &tenant(),
        "proj1",
        Payload::ProjectMemberAdded {
            user_id: "u1".into(),
            roles: vec!["PROJECT_OWNER".into()],
        },
    );
    append(
        &db,
        &tenant(),
        "proj1",
        Payload::ProjectMemberChanged {
            user_id: "u1".into(),
            roles: vec!["PROJECT_OWNER".into(), "PROJECT_VIEWER".into()],
        },
    );
    db.catch_up(&tenant()).unwrap();

    let roles: String = db
        .projection()
        .read(|conn| {
            conn.query_row(
                "SELECT roles FROM project_members WHERE user_id = 'u1'",
                [],
                |row| row.get(0),
            )
        })
        .unwrap();
    assert_eq!(roles, r#"["PROJECT_OWNER","PROJECT_VIEWER"]"#);
}

#[test]
fn test_instance_removed_wipes_only_that_tenant() {
    let (db, _dir) = open();
    let other = TenantId::new("instance-2");
    for t in [tenant(), other.clone()] {
        append(
            &db,
            &t,
            "org1",
            Payload::OrgDomainAdded {
                domain: "example.com".into(),
            },
        );
        append(
            &db,
            &t,
            "org1",
            Payload::OrgMetadataSet {
                key: "color".into(),
                value: b"blue".to_vec(),
            },
        );
        append(
            &db,
            &t,
            "proj1",
            Payload::ProjectMemberAdded {
                user_id: "u1".into(),
                roles: vec![],
            },
        );
    }
    append(&db, &tenant(), "instance-1", Payload::InstanceRemoved);

    db.catch_up(&tenant()).unwrap();
    db.catch_up(&other).unwrap();

    for table in ["org_domains", "org_metadata", "project_members"] {
        assert_eq!(
            count(
                &db,
                &format!("SELECT COUNT(*) FROM {} WHERE tenant_id = 'instance-1'", table)
            ),
            0,
            "{} not wiped",
            table
        );
        assert_eq!(
            count(
                &db,
                &format!("SELECT COUNT(*) FROM {} WHERE tenant_id = 'instance-2'", table)
            ),
            1,
            "{} lost foreign rows",
            table
        );
    }
}
