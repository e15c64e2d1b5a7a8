//! Database Schema Migration System
//!
//! Versioned migrations for the SQLite schema.
//! Each migration is applied atomically and tracked in the schema_version table.

use crate::error::{DbError, DbResult};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::types::Timestamp;

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
    pub down_sql: Option<&'static str>,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema with records and ACLs",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at INTEGER NOT NULL
                );

                -- Records; deleted rows are kept as tombstones so ids are never reused
                CREATE TABLE IF NOT EXISTS records (
                    id TEXT PRIMARY KEY,
                    collection TEXT NOT NULL,
                    data BLOB NOT NULL,
                    acl TEXT NOT NULL,
                    owner TEXT NOT NULL,
                    tags TEXT NOT NULL,
                    protected INTEGER NOT NULL DEFAULT 0,
                    version INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS acls (
                    id TEXT PRIMARY KEY,
                    rights TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
            "#,
            down_sql: Some(
                r#"
                DROP TABLE IF EXISTS acls;
                DROP TABLE IF EXISTS records;
                DROP TABLE IF EXISTS schema_version;
            "#,
            ),
        },
        Migration {
            version: 2,
            description: "Index live records by ACL for reference counting",
            up_sql: r#"
                CREATE INDEX IF NOT EXISTS idx_records_acl
                    ON records(acl) WHERE deleted = 0;
            "#,
            down_sql: Some(
                r#"
                DROP INDEX IF EXISTS idx_records_acl;
            "#,
            ),
        },
    ]
}

/// Get current schema version from database
pub fn get_current_version(pool: &Pool<SqliteConnectionManager>) -> DbResult<i32> {
    let conn = pool.get()?;

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .unwrap_or(Some(0))
        .unwrap_or(0);

    Ok(version)
}

/// Apply a single migration
fn apply_migration(pool: &Pool<SqliteConnectionManager>, migration: &Migration) -> DbResult<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    tx.execute_batch(migration.up_sql).map_err(|e| {
        DbError::Internal(format!("Migration {} failed: {}", migration.version, e))
    })?;

    tx.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
        params![migration.version, Timestamp::now().as_millis() as i64],
    )?;

    tx.commit()?;

    Ok(())
}

/// Run all pending migrations
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> DbResult<()> {
    let current_version = get_current_version(pool)?;

    let pending: Vec<_> = get_migrations()
        .into_iter()
        .filter(|m| m.version > current_version)
        .collect();

    for migration in pending {
        tracing::info!(
            version = migration.version,
            "Applying migration: {}",
            migration.description
        );
        apply_migration(pool, &migration)?;
    }

    Ok(())
}

/// Rollback a migration (if down_sql is available)
pub fn rollback_migration(pool: &Pool<SqliteConnectionManager>, version: i32) -> DbResult<()> {
    let migration = get_migrations()
        .into_iter()
        .find(|m| m.version == version)
        .ok_or_else(|| DbError::Internal(format!("Migration version {} not found", version)))?;

    let down_sql = migration.down_sql.ok_or_else(|| {
        DbError::Internal(format!("No rollback available for version {}", version))
    })?;

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    tx.execute_batch(down_sql)
        .map_err(|e| DbError::Internal(format!("Rollback {} failed: {}", version, e)))?;

    // The initial migration drops schema_version itself
    if version > 1 {
        tx.execute("DELETE FROM schema_version WHERE version = ?", params![version])?;
    }

    tx.commit()?;

    Ok(())
}
