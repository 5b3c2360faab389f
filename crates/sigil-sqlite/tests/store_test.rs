use chrono::Utc;
use sigil_core::prelude::*;
use sigil_core::{
    Applied, NewEvent, Position, ProjectionConfig, ProjectionStore, ProjectionTxn, TenantId,
};
use sigil_sqlite::SqliteProjectionStore;
use tempfile::TempDir;

const PROJECTION: &str = "items";

fn create_test_store() -> (SqliteProjectionStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteProjectionStore::open(ProjectionConfig::new(dir.path().join("p.db"))).unwrap();
    store
        .ensure_tables(&[Table::new("items")
            .column("tenant", ColumnType::Text)
            .column("id", ColumnType::Text)
            .column("label", ColumnType::Text)
            .column("is_primary", ColumnType::Bool)
            .primary_key(&["tenant", "id"])])
        .unwrap();
    (store, dir)
}

fn tenant() -> TenantId {
    TenantId::new("t1")
}

fn event(entity: &str, sequence: u64, position: u64) -> Event {
    NewEvent::new(tenant(), entity, Payload::OrgRemoved).into_event(
        sequence,
        Position(position),
        Utc::now(),
    )
}

fn insert(e: &Event, id: &str, label: &str) -> Statement {
    Statement::create(
        e,
        "items",
        vec![
            col("tenant", e.tenant.as_str()),
            col("id", id),
            col("label", label),
            col("is_primary", false),
        ],
    )
}

fn run(store: &SqliteProjectionStore, statements: &[Statement], watermark: u64) -> Result<Vec<Applied>> {
    let mut txn = store.begin_txn(PROJECTION, &tenant())?;
    match txn.execute_batch(statements) {
        Ok(applied) => {
            Box::new(txn).commit(Position(watermark))?;
            Ok(applied)
        }
        Err(e) => {
            Box::new(txn).rollback();
            Err(e)
        }
    }
}

fn labels(store: &SqliteProjectionStore) -> Vec<(String, String)> {
    store
        .read(|conn| {
            let mut stmt = conn.prepare("SELECT id, label FROM items ORDER BY id")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
        .unwrap()
}

#[test]
fn test_redelivery_is_skipped() {
    let (store, _dir) = create_test_store();
    let e1 = event("org1", 1, 1);

    let first = run(&store, &[insert(&e1, "a", "one")], 1).unwrap();
    assert_eq!(first, vec![Applied::Applied]);

    // Same event again would collide on the primary key if it were applied
    let second = run(&store, &[insert(&e1, "a", "one")], 1).unwrap();
    assert_eq!(second, vec![Applied::Skipped]);

    assert_eq!(labels(&store), vec![("a".into(), "one".into())]);
    assert_eq!(
        store
            .entity_sequence(PROJECTION, &tenant(), EntityType::Org, "org1")
            .unwrap(),
        1
    );
}

#[test]
fn test_sequence_gap_is_rejected_and_rolled_back() {
    let (store, _dir) = create_test_store();
    let e1 = event("org1", 1, 1);
    let e3 = event("org1", 3, 3);

    let err = run(&store, &[insert(&e1, "a", "one"), insert(&e3, "b", "three")], 3).unwrap_err();
    assert!(matches!(
        err,
        SigilError::OutOfOrder {
            expected: 2,
            got: 3,
            ..
        }
    ));

    // Whole batch rolled back, watermark untouched
    assert!(labels(&store).is_empty());
    assert_eq!(store.watermark(PROJECTION, &tenant()).unwrap(), Position::ZERO);
}

#[test]
fn test_create_conflict_surfaces() {
    let (store, _dir) = create_test_store();
    run(&store, &[insert(&event("org1", 1, 1), "a", "one")], 1).unwrap();
    let err = run(&store, &[insert(&event("org2", 1, 2), "a", "two")], 2).unwrap_err();
    assert!(matches!(err, SigilError::Conflict(_)));
}

#[test]
fn test_create_or_ignore_keeps_existing_row() {
    let (store, _dir) = create_test_store();
    run(&store, &[insert(&event("org1", 1, 1), "a", "one")], 1).unwrap();

    let e = event("org2", 1, 2);
    let stmt = Statement::new(
        &e,
        Operation::create_or_ignore(
            "items",
            vec![
                col("tenant", "t1"),
                col("id", "a"),
                col("label", "two"),
                col("is_primary", false),
            ],
        ),
    );
    assert_eq!(run(&store, &[stmt], 2).unwrap(), vec![Applied::Applied]);
    assert_eq!(labels(&store), vec![("a".into(), "one".into())]);
}

#[test]
fn test_failed_multi_leaves_nothing_applied() {
    let (store, _dir) = create_test_store();
    run(&store, &[insert(&event("org1", 1, 1), "a", "one")], 1).unwrap();

    let e = event("org1", 2, 2);
    let stmt = Statement::multi(
        &e,
        vec![
            Operation::update("items", vec![col("label", "changed")], vec![cond("id", "a")]),
            // Collides with "a"
            Operation::create(
                "items",
                vec![
                    col("tenant", "t1"),
                    col("id", "a"),
                    col("label", "dup"),
                    col("is_primary", false),
                ],
            ),
        ],
    );

    let mut txn = store.begin_txn(PROJECTION, &tenant()).unwrap();
    assert!(matches!(txn.execute(&stmt), Err(SigilError::Conflict(_))));
    // The transaction stays usable and the first leaf was undone
    Box::new(txn).commit(Position(1)).unwrap();

    assert_eq!(labels(&store), vec![("a".into(), "one".into())]);
    assert_eq!(
        store
            .entity_sequence(PROJECTION, &tenant(), EntityType::Org, "org1")
            .unwrap(),
        1
    );
}

#[test]
fn test_update_matching_nothing_is_not_an_error() {
    let (store, _dir) = create_test_store();
    let e = event("org1", 1, 1);
    let stmt = Statement::update(&e, "items", vec![col("label", "x")], vec![cond("id", "missing")]);
    assert_eq!(run(&store, &[stmt], 1).unwrap(), vec![Applied::Applied]);
}

#[test]
fn test_upsert_converges_to_latest_value() {
    let (store, _dir) = create_test_store();
    let upsert = |e: &Event, label: &str| {
        Statement::upsert(
            e,
            "items",
            &["tenant", "id"],
            vec![
                col("tenant", "t1"),
                col("id", "k"),
                col("label", label),
                col("is_primary", false),
            ],
        )
    };
    run(&store, &[upsert(&event("org1", 1, 1), "first")], 1).unwrap();
    run(&store, &[upsert(&event("org1", 2, 2), "second")], 2).unwrap();
    assert_eq!(labels(&store), vec![("k".into(), "second".into())]);
}

#[test]
fn test_watermark_never_moves_backwards() {
    let (store, _dir) = create_test_store();
    run(&store, &[insert(&event("org1", 1, 5), "a", "one")], 5).unwrap();
    run(&store, &[], 3).unwrap();
    assert_eq!(store.watermark(PROJECTION, &tenant()).unwrap(), Position(5));
}

#[test]
fn test_foreign_tenant_statement_is_rejected() {
    let (store, _dir) = create_test_store();
    let e = NewEvent::new(TenantId::new("other"), "org1", Payload::OrgRemoved).into_event(
        1,
        Position(1),
        Utc::now(),
    );
    let err = run(&store, &[Statement::noop(&e)], 1).unwrap_err();
    assert!(matches!(err, SigilError::InvalidArgument(_)));
}
