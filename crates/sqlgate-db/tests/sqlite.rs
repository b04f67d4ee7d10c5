//! Integration tests for the embedded-file dialect.
//!
//! Each test uses its own temporary database file (or an in-memory
//! database), so they run in parallel without a live service.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing
)]

use sqlgate_db::models::{SponsorVerifications, Users};
use sqlgate_db::{
    Database, DatabaseConfig, DbError, DialectKind, ErrorKind, Order, Params, SelectOptions,
    SqliteConfig, TableDef, Value, ensure_schema, params,
};
use tempfile::TempDir;

static KV: TableDef = TableDef::new("kv", "id", &["id", "v"]);

fn temp_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db = Database::sqlite(SqliteConfig::new(dir.path().join("test.db")));
    (dir, db)
}

async fn with_kv(db: &Database) {
    db.execute(
        "CREATE TABLE kv (id INTEGER PRIMARY KEY, v TEXT)",
        &Params::new(),
    )
    .await
    .expect("create kv");
}

#[tokio::test]
async fn insert_then_get_round_trips() {
    let (_dir, db) = temp_db();
    with_kv(&db).await;
    let kv = KV.mapper(&db);

    assert_eq!(kv.insert(&params! { "id" => 1, "v" => "a" }).await.unwrap(), 1);
    let row = kv.get(&params! { "id" => 1 }).await.unwrap().unwrap();

    assert_eq!(row.get("id"), Some(&Value::Int(1)));
    assert_eq!(row.get("v"), Some(&Value::Text("a".to_owned())));
    assert_eq!(row.len(), 2);
}

#[tokio::test]
async fn update_changes_exactly_one_row() {
    let (_dir, db) = temp_db();
    with_kv(&db).await;
    let kv = KV.mapper(&db);
    kv.insert(&params! { "id" => 1, "v" => "a" }).await.unwrap();
    kv.insert(&params! { "id" => 2, "v" => "a" }).await.unwrap();

    let changed = kv
        .update(&params! { "id" => 1 }, &params! { "v" => "b" })
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let row = kv.get_by_pk(1).await.unwrap().unwrap();
    assert_eq!(row.get("v"), Some(&Value::Text("b".to_owned())));
    let other = kv.get_by_pk(2).await.unwrap().unwrap();
    assert_eq!(other.get("v"), Some(&Value::Text("a".to_owned())));
}

#[tokio::test]
async fn overlapping_update_never_reaches_the_engine() {
    // No table exists: an engine round trip would fail with a query error.
    let (_dir, db) = temp_db();
    let err = KV
        .mapper(&db)
        .update(&params! { "id" => 1 }, &params! { "id" => 2 })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Mapping);
}

#[tokio::test]
async fn select_orders_limits_and_projects() {
    let (_dir, db) = temp_db();
    with_kv(&db).await;
    let kv = KV.mapper(&db);
    for (id, v) in [(1, "x"), (2, "y"), (3, "z")] {
        kv.insert(&params! { "id" => id, "v" => v }).await.unwrap();
    }

    let rows = kv
        .select(
            &SelectOptions::default()
                .columns(["v"])
                .order_by("id", Order::Desc)
                .limit(2),
        )
        .await
        .unwrap();
    let values: Vec<_> = rows.iter().map(|r| r.get("v").cloned()).collect();
    assert_eq!(
        values,
        [Some(Value::from("z")), Some(Value::from("y"))]
    );
    assert!(rows.iter().all(|r| r.len() == 1));

    assert!(kv.exists(&params! { "v" => "x" }).await.unwrap());
    assert_eq!(kv.delete(&params! { "v" => "x" }).await.unwrap(), 1);
    assert!(!kv.exists(&params! { "v" => "x" }).await.unwrap());
}

#[tokio::test]
async fn recurring_names_bind_once() {
    let (_dir, db) = temp_db();
    with_kv(&db).await;
    db.execute(
        "INSERT INTO kv (id, v) VALUES (:id, :v)",
        &params! { "id" => 7, "v" => "7" },
    )
    .await
    .unwrap();
    let row = db
        .fetchone(
            "SELECT id FROM kv WHERE id = :n AND CAST(v AS INTEGER) = :n",
            &params! { "n" => 7 },
        )
        .await
        .unwrap();
    assert!(row.is_some());
}

#[tokio::test]
async fn missing_parameter_is_a_translation_error() {
    let (_dir, db) = temp_db();
    let err = db
        .fetchall("SELECT :a AS a, :b AS b", &params! { "a" => 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Translation(_)));
}

#[tokio::test]
async fn engine_errors_are_query_errors() {
    let (_dir, db) = temp_db();
    let err = db
        .execute("INSERT INTO missing_table VALUES (1)", &Params::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
}

#[tokio::test]
async fn list_tables_is_sorted_and_empty_after_drop_all() {
    let (_dir, db) = temp_db();
    ensure_schema(&db).await.unwrap();
    with_kv(&db).await;

    // AUTOINCREMENT creates sqlite_sequence, which is internal.
    assert_eq!(
        db.list_tables().await.unwrap(),
        ["kv", "sponsor_verifications", "users"]
    );

    let report = db.drop_all_tables().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.succeeded.len(), 3);
    assert!(db.list_tables().await.unwrap().is_empty());
}

#[tokio::test]
async fn clear_all_keeps_tables_and_removes_rows() {
    let (_dir, db) = temp_db();
    with_kv(&db).await;
    KV.mapper(&db)
        .insert(&params! { "id" => 1, "v" => "a" })
        .await
        .unwrap();

    let report = db.clear_all_tables().await.unwrap();
    assert_eq!(report.succeeded, ["kv"]);
    assert_eq!(db.list_tables().await.unwrap(), ["kv"]);
    assert!(
        db.fetchall("SELECT * FROM kv", &Params::new())
            .await
            .unwrap()
            .is_empty()
    );
}

/// `parent` sorts before `zchild`, which references it.
async fn with_linked_tables(db: &Database) {
    for sql in [
        "CREATE TABLE parent (id INTEGER PRIMARY KEY)",
        "CREATE TABLE zchild (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL REFERENCES parent(id))",
        "INSERT INTO parent (id) VALUES (1)",
        "INSERT INTO zchild (id, parent_id) VALUES (1, 1)",
    ] {
        db.execute(sql, &Params::new()).await.expect(sql);
    }
}

#[tokio::test]
async fn drop_all_handles_foreign_key_order() {
    let (_dir, db) = temp_db();
    with_linked_tables(&db).await;

    let report = db.drop_all_tables().await.unwrap();
    assert!(report.is_complete(), "failed: {:?}", report.failed);
    assert_eq!(report.succeeded, ["zchild", "parent"]);
    assert!(db.list_tables().await.unwrap().is_empty());
}

#[tokio::test]
async fn clear_all_handles_foreign_key_order() {
    let (_dir, db) = temp_db();
    with_linked_tables(&db).await;

    let report = db.clear_all_tables().await.unwrap();
    assert!(report.is_complete(), "failed: {:?}", report.failed);
    assert_eq!(db.list_tables().await.unwrap(), ["parent", "zchild"]);
    for table in ["parent", "zchild"] {
        let rows = db
            .fetchall(&format!("SELECT * FROM {table}"), &Params::new())
            .await
            .unwrap();
        assert!(rows.is_empty(), "{table} still has rows");
    }
}

#[tokio::test]
async fn unresolvable_failures_are_reported_once() {
    let (_dir, db) = temp_db();
    with_kv(&db).await;
    db.execute(
        "CREATE TRIGGER kv_keep BEFORE DELETE ON kv BEGIN SELECT RAISE(ABORT, 'kept'); END",
        &Params::new(),
    )
    .await
    .unwrap();
    KV.mapper(&db)
        .insert(&params! { "id" => 1, "v" => "a" })
        .await
        .unwrap();

    let report = db.clear_all_tables().await.unwrap();
    assert!(report.succeeded.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].table, "kv");
    assert_eq!(report.failed[0].error.kind(), ErrorKind::Query);
}

#[tokio::test]
async fn table_schema_reports_declared_types_in_order() {
    let (_dir, db) = temp_db();
    with_kv(&db).await;

    let schema = db.table_schema("kv").await.unwrap();
    let columns: Vec<_> = schema
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.data_type.as_str()))
        .collect();
    assert_eq!(columns, [("id", "INTEGER"), ("v", "TEXT")]);

    let err = db.table_schema("nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaIntrospection);
}

#[tokio::test]
async fn dropped_transaction_rolls_back() {
    let (_dir, db) = temp_db();
    with_kv(&db).await;
    {
        let mut tx = db.transaction().await.unwrap();
        tx.execute(
            "INSERT INTO kv (id, v) VALUES (:id, :v)",
            &params! { "id" => 1, "v" => "a" },
        )
        .await
        .unwrap();
        let inside = tx
            .fetchone("SELECT v FROM kv WHERE id = :id", &params! { "id" => 1 })
            .await
            .unwrap();
        assert!(inside.is_some());
    }
    let after = db
        .fetchone("SELECT v FROM kv WHERE id = :id", &params! { "id" => 1 })
        .await
        .unwrap();
    assert!(after.is_none());
}

#[tokio::test]
async fn committed_transaction_persists() {
    let (_dir, db) = temp_db();
    with_kv(&db).await;
    let mut tx = db.transaction().await.unwrap();
    tx.execute(
        "INSERT INTO kv (id, v) VALUES (:id, :v)",
        &params! { "id" => 1, "v" => "a" },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    assert!(KV.mapper(&db).get_by_pk(1).await.unwrap().is_some());
}

#[tokio::test]
async fn run_in_transaction_rolls_back_on_error() {
    let (_dir, db) = temp_db();
    with_kv(&db).await;
    let result: Result<(), DbError> = db
        .run_in_transaction(|tx| {
            Box::pin(async move {
                tx.execute(
                    "INSERT INTO kv (id, v) VALUES (:id, :v)",
                    &params! { "id" => 1, "v" => "a" },
                )
                .await?;
                Err(DbError::Mapping("abort".to_owned()))
            })
        })
        .await;
    assert!(result.is_err());
    assert!(KV.mapper(&db).get_by_pk(1).await.unwrap().is_none());
}

#[tokio::test]
async fn parent_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("bot.db");
    let db = Database::sqlite(SqliteConfig::new(&path));
    db.init().await.unwrap();
    assert!(path.exists());
    db.close().await;
}

#[tokio::test]
async fn close_then_reuse_reopens_the_file() {
    let (_dir, db) = temp_db();
    with_kv(&db).await;
    KV.mapper(&db)
        .insert(&params! { "id" => 1, "v" => "a" })
        .await
        .unwrap();
    db.close().await;
    assert!(db.pool_status().await.is_none());
    assert!(KV.mapper(&db).get_by_pk(1).await.unwrap().is_some());
}

#[tokio::test]
async fn from_config_selects_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DatabaseConfig::default();
    config.sqlite.path = dir.path().join("cfg.db");
    let db = Database::from_config(&config).unwrap();
    assert_eq!(db.dialect(), DialectKind::EmbeddedFile);
    ensure_schema(&db).await.unwrap();
    ensure_schema(&db).await.unwrap();
}

#[tokio::test]
async fn user_repository_flags_and_referrals() {
    let db = Database::sqlite(SqliteConfig::in_memory());
    ensure_schema(&db).await.unwrap();
    let users = Users::new(&db);

    assert!(!users.is_banned(10).await.unwrap());
    users.ban(10).await.unwrap();
    assert!(users.is_banned(10).await.unwrap());
    users.ban(10).await.unwrap();
    users.unban(10).await.unwrap();
    assert!(!users.is_banned(10).await.unwrap());
    users.unban(99).await.unwrap();
    assert!(users.get(99).await.unwrap().is_none());

    assert!(!users.set_referral(20, 20).await.unwrap());
    assert!(users.set_referral(20, 10).await.unwrap());
    assert!(!users.set_referral(20, 11).await.unwrap());
    assert!(users.set_referral(10, 11).await.unwrap());
    let user = users.get(20).await.unwrap().unwrap();
    assert_eq!(user.referred_by, Some(10));
    assert!(!user.is_admin);
    assert!(!users.is_admin(20).await.unwrap());
}

#[tokio::test]
async fn sponsor_verifications_newest_first() {
    let db = Database::sqlite(SqliteConfig::in_memory());
    ensure_schema(&db).await.unwrap();
    let log = SponsorVerifications::new(&db);

    log.record(5, Some("@a,@b"), "all", false).await.unwrap();
    log.record(5, None, "all", true).await.unwrap();
    log.record(6, None, "any", true).await.unwrap();

    let recent = log.recent_for_user(5, 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent[0].success);
    assert_eq!(recent[0].channels_missing, None);
    assert_eq!(recent[1].channels_missing.as_deref(), Some("@a,@b"));
    assert!(recent[0].id > recent[1].id);

    assert_eq!(log.recent_for_user(5, 1).await.unwrap().len(), 1);
}
