//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::StoreError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS tasks (
            domain TEXT NOT NULL,
            id TEXT NOT NULL,
            parent_id TEXT,
            description TEXT NOT NULL,
            creator TEXT NOT NULL,
            assignee TEXT,
            completed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            derived_completed INTEGER NOT NULL DEFAULT 0,
            derived_size INTEGER NOT NULL DEFAULT 1,
            derived_atomic_count INTEGER NOT NULL DEFAULT 1,
            derived_has_open_work INTEGER NOT NULL DEFAULT 0,
            derived_depth INTEGER NOT NULL DEFAULT 0,
            derived_assignees TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (domain, id)
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(domain, parent_id);

        CREATE TABLE IF NOT EXISTS task_index (
            domain TEXT NOT NULL,
            task_id TEXT NOT NULL,
            path TEXT NOT NULL DEFAULT '[]',
            depth INTEGER NOT NULL DEFAULT 0,
            assignees TEXT NOT NULL DEFAULT '[]',
            completed INTEGER NOT NULL DEFAULT 0,
            atomic INTEGER NOT NULL DEFAULT 1,
            has_open_work INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (domain, task_id)
        );
        CREATE INDEX IF NOT EXISTS idx_task_index_depth ON task_index(domain, depth);
        CREATE INDEX IF NOT EXISTS idx_task_index_completed ON task_index(domain, completed);

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        );
    "#,
}];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                StoreError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| StoreError::Migration(format!("Bad migration version: {e}"))),
        None => Ok(0),
    }
}

/// Record a migration as applied.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
