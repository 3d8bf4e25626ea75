use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tidemark_common::{EngineKind, Result};
use tidemark_db::{Ledger, SqlExecutor, SqliteConnection};
use tidemark_engine::{DefinitionContext, ExecutionStatus};
use tidemark_runner::{
    REASON_NOT_ALLOWED, RollbackOptions, RunNextOptions, RunOptions, RunStatus, Runner,
    SharedConnection, Source, StaticCatalog, StatusOptions, share,
};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Open a fresh on-disk target with an `events` table migrations can log into.
async fn open_target(dir: &TempDir) -> SharedConnection {
    let conn = SqliteConnection::open(&dir.path().join("target.db")).unwrap();
    let shared = share(Box::new(conn));
    shared
        .lock()
        .await
        .execute_batch("CREATE TABLE events (name TEXT NOT NULL)")
        .unwrap();
    shared
}

/// A migration that creates table `name` and logs `name` into `events`.
fn logging_table(name: &'static str) -> impl FnOnce(&mut DefinitionContext) -> Result<()> {
    move |ctx: &mut DefinitionContext| {
        ctx.migration(format!("create {name}"), move |ctx| {
            ctx.database(EngineKind::Sqlite, move |ctx| {
                ctx.up(move |db| {
                    db.execute_batch(&format!("CREATE TABLE {name} (id INTEGER PRIMARY KEY)"))?;
                    db.execute("INSERT INTO events (name) VALUES (?1)", &[name.into()])?;
                    Ok(())
                })?;
                ctx.down_sql(format!("DROP TABLE {name}"))
            })
        })
    }
}

fn failing(ctx: &mut DefinitionContext) -> Result<()> {
    ctx.migration("always fails", |ctx| {
        ctx.database(EngineKind::Sqlite, |ctx| {
            ctx.up(|db| {
                db.execute_batch("CREATE TABLE half_done (id INTEGER)")?;
                anyhow::bail!("constraint violated")
            })?;
            ctx.down_sql("SELECT 1")
        })
    })
}

fn catalog_abc(b_fails: bool) -> Arc<StaticCatalog> {
    let mut catalog = StaticCatalog::new();
    catalog
        .register(Source::new("a", ts(1)), logging_table("a"))
        .unwrap();
    if b_fails {
        catalog.register(Source::new("b", ts(2)), failing).unwrap();
    } else {
        catalog
            .register(Source::new("b", ts(2)), logging_table("b"))
            .unwrap();
    }
    catalog
        .register(Source::new("c", ts(3)), logging_table("c"))
        .unwrap();
    Arc::new(catalog)
}

async fn prepared_runner(conn: &SharedConnection, catalog: Arc<StaticCatalog>) -> Runner {
    let runner = Runner::local("main", Arc::clone(conn), Ledger::default(), catalog);
    runner.prepare().await.unwrap();
    runner
}

async fn events(conn: &SharedConnection) -> Vec<String> {
    let mut guard = conn.lock().await;
    guard
        .query("SELECT name FROM events ORDER BY rowid", &[])
        .unwrap()
        .iter()
        .map(|row| row.text(0).unwrap().unwrap())
        .collect()
}

async fn applied_ids(conn: &SharedConnection) -> Vec<String> {
    let mut guard = conn.lock().await;
    Ledger::default()
        .query(&mut **guard, None)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect()
}

async fn table_exists(conn: &SharedConnection, name: &str) -> bool {
    let mut guard = conn.lock().await;
    !guard
        .query(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[name.into()],
        )
        .unwrap()
        .is_empty()
}

#[tokio::test]
async fn run_applies_pending_migrations_in_timestamp_order() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let runner = prepared_runner(&conn, catalog_abc(false)).await;

    let report = runner.run(RunOptions::default()).await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.found, 3);
    assert_eq!(report.applied, 3);
    assert_eq!(events(&conn).await, vec!["a", "b", "c"]);

    let again = runner.run(RunOptions::default()).await.unwrap();
    assert_eq!(again.status, RunStatus::Complete);
    assert_eq!(again.applied, 0);
    assert_eq!(again.skipped, 3);
    assert!(
        again
            .outcomes
            .iter()
            .all(|o| o.reason.as_deref() == Some(&format!("migration {} already applied", o.id)[..]))
    );
}

#[tokio::test]
async fn run_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let runner = prepared_runner(&conn, catalog_abc(true)).await;

    let report = runner.run(RunOptions::default()).await.unwrap();
    assert_eq!(report.status, RunStatus::Error);
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.outcomes.len(), 2);
    assert!(
        report.outcomes[1]
            .error
            .as_deref()
            .unwrap()
            .contains("constraint violated")
    );

    assert_eq!(events(&conn).await, vec!["a"]);
    assert_eq!(applied_ids(&conn).await, vec!["a"]);
    assert!(!table_exists(&conn, "half_done").await);
    assert!(!table_exists(&conn, "c").await);
}

#[tokio::test]
async fn forced_run_continues_past_failures() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let runner = prepared_runner(&conn, catalog_abc(true)).await;

    let report = runner
        .run(RunOptions {
            force: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Error);
    assert_eq!(report.applied, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(events(&conn).await, vec!["a", "c"]);
    assert_eq!(applied_ids(&conn).await.len(), 2);
}

#[tokio::test]
async fn panicking_migration_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let mut catalog = StaticCatalog::new();
    catalog
        .register(Source::new("panics", ts(1)), |ctx| {
            ctx.migration("panics", |ctx| {
                ctx.database(EngineKind::Sqlite, |ctx| {
                    ctx.up(|_| panic!("index out of range"))
                })
            })
        })
        .unwrap()
        .register(Source::new("after_panic", ts(2)), logging_table("after_panic"))
        .unwrap();
    let runner = prepared_runner(&conn, Arc::new(catalog)).await;

    let report = runner
        .run(RunOptions {
            force: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.applied, 1);
    assert!(
        report.outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("index out of range")
    );
    assert_eq!(applied_ids(&conn).await, vec!["after_panic"]);
}

#[tokio::test]
async fn missing_engine_implementation_is_skipped_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let mut catalog = StaticCatalog::new();
    catalog
        .register(Source::new("pg_only", ts(1)), |ctx| {
            ctx.migration("postgres extension", |ctx| {
                ctx.database(EngineKind::Postgres, |ctx| {
                    ctx.up_sql("CREATE EXTENSION IF NOT EXISTS pgcrypto")
                })
            })
        })
        .unwrap();
    let runner = prepared_runner(&conn, Arc::new(catalog)).await;

    let report = runner.run(RunOptions::default()).await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.outcomes[0].status, ExecutionStatus::Skipped);
    assert!(
        report.outcomes[0]
            .reason
            .as_deref()
            .unwrap()
            .contains("no implementation for engine sqlite")
    );
    assert!(applied_ids(&conn).await.is_empty());
}

#[tokio::test]
async fn rollback_reverts_most_recent_first() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let mut catalog = StaticCatalog::new();
    catalog
        .register(Source::new("a", ts(1)), logging_table("a"))
        .unwrap()
        .register(Source::new("b", ts(2)), logging_table("b"))
        .unwrap();
    let runner = prepared_runner(&conn, Arc::new(catalog)).await;
    runner.run(RunOptions::default()).await.unwrap();

    {
        let mut guard = conn.lock().await;
        guard
            .execute_batch(
                "UPDATE _migrations SET applied_at = '2024-01-01T00:00:10.000Z' WHERE id = 'a';
                 UPDATE _migrations SET applied_at = '2024-01-01T00:00:20.000Z' WHERE id = 'b';",
            )
            .unwrap();
    }

    let report = runner.rollback(RollbackOptions::default()).await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.reverted, 1);
    assert_eq!(report.outcomes[0].id, "b");
    assert_eq!(applied_ids(&conn).await, vec!["a"]);
    assert!(!table_exists(&conn, "b").await);
    assert!(table_exists(&conn, "a").await);
}

#[tokio::test]
async fn rollback_ties_prefer_the_newest_definition() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let mut catalog = StaticCatalog::new();
    catalog
        .register(Source::new("older", ts(1)), logging_table("older"))
        .unwrap()
        .register(Source::new("newer", ts(2)), logging_table("newer"))
        .unwrap();
    let runner = prepared_runner(&conn, Arc::new(catalog)).await;
    runner.run(RunOptions::default()).await.unwrap();

    {
        let mut guard = conn.lock().await;
        guard
            .execute_batch("UPDATE _migrations SET applied_at = '2024-01-01T00:00:00.000Z'")
            .unwrap();
    }

    let report = runner.rollback(RollbackOptions::default()).await.unwrap();
    assert_eq!(report.outcomes[0].id, "newer");
}

/// One source declaring a table and then an index on it.
fn table_then_index(ctx: &mut DefinitionContext) -> Result<()> {
    ctx.migration("create users", |ctx| {
        ctx.database(EngineKind::Sqlite, |ctx| {
            ctx.up_sql("CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT)")?;
            ctx.down_sql("DROP TABLE users")
        })
    })?;
    ctx.migration("index users", |ctx| {
        ctx.database(EngineKind::Sqlite, |ctx| {
            ctx.up_sql("CREATE INDEX users_email ON users (email)")?;
            ctx.down_sql("DROP INDEX users_email")
        })
    })
}

#[tokio::test]
async fn same_source_ties_follow_declaration_order() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let mut catalog = StaticCatalog::new();
    catalog
        .register(Source::new("schema", ts(1)), table_then_index)
        .unwrap();
    let runner = prepared_runner(&conn, Arc::new(catalog)).await;
    runner.run(RunOptions::default()).await.unwrap();

    {
        let mut guard = conn.lock().await;
        guard
            .execute_batch("UPDATE _migrations SET applied_at = '2024-01-01T00:00:00.000Z'")
            .unwrap();
    }

    let states = runner.find_migrations(&[]).await.unwrap();
    let ids: Vec<_> = states.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["schema", "schema.1"]);

    let report = runner.rollback(RollbackOptions::default()).await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.reverted, 1);
    assert_eq!(report.outcomes[0].id, "schema.1");
    assert_eq!(applied_ids(&conn).await, vec!["schema"]);
    assert!(table_exists(&conn, "users").await);

    let report = runner.rollback(RollbackOptions::default()).await.unwrap();
    assert_eq!(report.outcomes[0].id, "schema");
    assert!(applied_ids(&conn).await.is_empty());
    assert!(!table_exists(&conn, "users").await);
}

#[tokio::test]
async fn rollback_honours_allowed_ids_and_count() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let runner = prepared_runner(&conn, catalog_abc(false)).await;
    runner.run(RunOptions::default()).await.unwrap();

    let report = runner
        .rollback(RollbackOptions {
            count: 5,
            allowed_ids: vec!["a".into()],
        })
        .await
        .unwrap();
    assert_eq!(report.reverted, 1);
    assert_eq!(report.outcomes[0].id, "a");

    let mut remaining = applied_ids(&conn).await;
    remaining.sort();
    assert_eq!(remaining, vec!["b", "c"]);
}

#[tokio::test]
async fn rollback_with_nothing_applied_reports_why() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let runner = prepared_runner(&conn, catalog_abc(false)).await;

    let report = runner.rollback(RollbackOptions::default()).await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.reverted, 0);
    assert_eq!(report.message.as_deref(), Some("nothing to roll back"));
}

#[tokio::test]
async fn run_next_applies_exactly_one() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let runner = prepared_runner(&conn, catalog_abc(false)).await;

    let report = runner.run_next(RunNextOptions::default()).await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.outcomes[0].id, "a");
    assert_eq!(applied_ids(&conn).await, vec!["a"]);
}

#[tokio::test]
async fn run_next_skips_ids_outside_the_allowed_list() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let runner = prepared_runner(&conn, catalog_abc(false)).await;

    let report = runner
        .run_next(RunNextOptions {
            allowed_ids: vec!["c".into()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.outcomes[0].reason.as_deref(), Some(REASON_NOT_ALLOWED));
    assert_eq!(report.outcomes[2].id, "c");
    assert_eq!(applied_ids(&conn).await, vec!["c"]);

    let none = runner
        .run_next(RunNextOptions {
            allowed_ids: vec!["c".into()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(none.status, RunStatus::Complete);
    assert_eq!(none.applied, 0);
    assert_eq!(
        none.message.as_deref(),
        Some("no pending migration is in the allowed list")
    );
}

#[tokio::test]
async fn run_next_with_nothing_pending_reports_why() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let runner = prepared_runner(&conn, catalog_abc(false)).await;
    runner.run(RunOptions::default()).await.unwrap();

    let report = runner.run_next(RunNextOptions::default()).await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.applied, 0);
    assert_eq!(report.message.as_deref(), Some("no pending migrations"));
}

#[tokio::test]
async fn find_migrations_lists_applied_before_pending() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let runner = prepared_runner(&conn, catalog_abc(false)).await;
    runner
        .run_next(RunNextOptions {
            allowed_ids: vec!["c".into()],
            ..Default::default()
        })
        .await
        .unwrap();

    let states = runner.find_migrations(&[]).await.unwrap();
    let ids: Vec<_> = states.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "a", "b"]);
    assert!(states[0].applied && states[0].applied_at.is_some());
    assert!(!states[1].applied && states[1].applied_at.is_none());
}

#[tokio::test]
async fn status_is_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let runner = Runner::local("main", Arc::clone(&conn), Ledger::default(), catalog_abc(false));

    let report = runner.status(StatusOptions::default()).await.unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.pending, 3);
    assert_eq!(report.migrations.len(), 3);

    let mut guard = conn.lock().await;
    assert!(!Ledger::default().exists(&mut **guard).unwrap());
}

#[tokio::test]
async fn tags_narrow_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_target(&dir).await;
    let mut catalog = StaticCatalog::new();
    catalog
        .register(Source::new("schema", ts(1)).tag("schema"), logging_table("schema_t"))
        .unwrap()
        .register(Source::new("seed", ts(2)).tag("seed"), logging_table("seed_t"))
        .unwrap();
    let runner = prepared_runner(&conn, Arc::new(catalog)).await;

    let report = runner
        .run(RunOptions {
            tags: vec!["seed".into()],
            force: false,
        })
        .await
        .unwrap();
    assert_eq!(report.found, 1);
    assert_eq!(applied_ids(&conn).await, vec!["seed"]);

    let status = runner
        .status(StatusOptions {
            tags: vec!["schema".into()],
        })
        .await
        .unwrap();
    assert_eq!(status.pending, 1);
    assert_eq!(status.applied, 0);
}
