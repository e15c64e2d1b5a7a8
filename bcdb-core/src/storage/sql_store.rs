//! SQLite-based Storage
//!
//! Persists records and ACLs in SQLite. Uses connection pooling for
//! concurrent readers; every call runs on the blocking thread pool.

use super::{migrations, RecordSlot, Storage};
use crate::error::{DbError, DbResult};
use crate::model::{Acl, Record, RightsMap, Tags};
use crate::types::{AclId, RecordId, SortOrder, Timestamp, UserId};
use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const RECORD_COLUMNS: &str =
    "id, collection, data, acl, owner, tags, protected, version, created_at, updated_at, deleted";

const ACL_COLUMNS: &str = "id, rights, created_at, updated_at";

/// SQLite-backed storage
#[derive(Clone)]
pub struct SqlStorage {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqlStorage {
    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(db_path: P, pool_size: u32) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        Self::with_pool(pool)
    }

    /// Private in-memory database. Limited to a single connection, since
    /// every sqlite memory connection is its own database.
    pub fn memory() -> DbResult<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        Self::with_pool(pool)
    }

    fn with_pool(pool: Pool<SqliteConnectionManager>) -> DbResult<Self> {
        migrations::migrate(&pool)?;
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Run `f` with a pooled connection on the blocking thread pool
    async fn with_conn<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PooledConnection<SqliteConnectionManager>) -> DbResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(RecordSlot, bool)> {
    let deleted: bool = row.get(10)?;
    if deleted {
        return Ok((RecordSlot::Deleted, true));
    }

    let tags_json: String = row.get(5)?;
    let tags: Tags = serde_json::from_str(&tags_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let record = Record {
        id: RecordId(row.get(0)?),
        collection: row.get(1)?,
        data: row.get(2)?,
        acl: AclId(row.get(3)?),
        owner: UserId(row.get(4)?),
        tags,
        protected: row.get(6)?,
        version: row.get::<_, i64>(7)?.max(0) as u64,
        created_at: Timestamp::from_millis(row.get::<_, i64>(8)?.max(0) as u64),
        updated_at: Timestamp::from_millis(row.get::<_, i64>(9)?.max(0) as u64),
    };
    Ok((RecordSlot::Live(record), false))
}

fn acl_from_row(row: &Row<'_>) -> rusqlite::Result<Acl> {
    let rights_json: String = row.get(1)?;
    let rights: RightsMap = serde_json::from_str(&rights_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Acl {
        id: AclId(row.get(0)?),
        rights,
        created_at: Timestamp::from_millis(row.get::<_, i64>(2)?.max(0) as u64),
        updated_at: Timestamp::from_millis(row.get::<_, i64>(3)?.max(0) as u64),
    })
}

fn scan_sql(table: &str, columns: &str, live_only: bool, order: SortOrder) -> String {
    let (cmp, dir) = match order {
        SortOrder::Ascending => (">", "ASC"),
        SortOrder::Descending => ("<", "DESC"),
    };
    let live = if live_only { "deleted = 0 AND " } else { "" };
    format!(
        "SELECT {columns} FROM {table} WHERE {live}(?1 IS NULL OR id {cmp} ?1) ORDER BY id {dir} LIMIT ?2"
    )
}

#[async_trait]
impl Storage for SqlStorage {
    async fn load_record(&self, id: &RecordId) -> DbResult<Option<RecordSlot>> {
        let id = id.0.clone();
        self.with_conn(move |conn| {
            let slot = conn
                .query_row(
                    &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"),
                    params![id],
                    record_from_row,
                )
                .optional()?;
            Ok(slot.map(|(slot, _)| slot))
        })
        .await
    }

    async fn save_record(&self, record: &Record) -> DbResult<()> {
        let record = record.clone();
        let tags = serde_json::to_string(&record.tags)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO records (id, collection, data, acl, owner, tags, protected, version, created_at, updated_at, deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)
                 ON CONFLICT(id) DO UPDATE SET
                    collection = excluded.collection,
                    data = excluded.data,
                    acl = excluded.acl,
                    owner = excluded.owner,
                    tags = excluded.tags,
                    protected = excluded.protected,
                    version = excluded.version,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    deleted = 0",
                params![
                    record.id.0,
                    record.collection,
                    record.data,
                    record.acl.0,
                    record.owner.0,
                    tags,
                    record.protected,
                    record.version as i64,
                    record.created_at.as_millis() as i64,
                    record.updated_at.as_millis() as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn tombstone_record(&self, id: &RecordId) -> DbResult<()> {
        let id = id.0.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE records SET deleted = 1, data = X'', tags = '{}' WHERE id = ?",
                params![id],
            )?;
            if changed == 0 {
                return Err(DbError::not_found(format!("record {}", id)));
            }
            Ok(())
        })
        .await
    }

    async fn scan_records(
        &self,
        after: Option<&RecordId>,
        order: SortOrder,
        limit: usize,
    ) -> DbResult<Vec<Record>> {
        let after = after.map(|id| id.0.clone());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&scan_sql("records", RECORD_COLUMNS, true, order))?;
            let rows = stmt.query_map(params![after, limit as i64], record_from_row)?;

            let mut records = Vec::new();
            for row in rows {
                if let (RecordSlot::Live(record), _) = row? {
                    records.push(record);
                }
            }
            Ok(records)
        })
        .await
    }

    async fn count_acl_references(&self, acl: &AclId) -> DbResult<u64> {
        let acl = acl.0.clone();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM records WHERE acl = ? AND deleted = 0",
                params![acl],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn load_acl(&self, id: &AclId) -> DbResult<Option<Acl>> {
        let id = id.0.clone();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {ACL_COLUMNS} FROM acls WHERE id = ?"),
                    params![id],
                    acl_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn save_acl(&self, acl: &Acl) -> DbResult<()> {
        let acl = acl.clone();
        let rights = serde_json::to_string(&acl.rights)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO acls (id, rights, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    rights = excluded.rights,
                    updated_at = excluded.updated_at",
                params![
                    acl.id.0,
                    rights,
                    acl.created_at.as_millis() as i64,
                    acl.updated_at.as_millis() as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_acl(&self, id: &AclId) -> DbResult<()> {
        let id = id.0.clone();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM acls WHERE id = ?", params![id])?;
            Ok(())
        })
        .await
    }

    async fn scan_acls(
        &self,
        after: Option<&AclId>,
        order: SortOrder,
        limit: usize,
    ) -> DbResult<Vec<Acl>> {
        let after = after.map(|id| id.0.clone());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&scan_sql("acls", ACL_COLUMNS, false, order))?;
            let acls = stmt
                .query_map(params![after, limit as i64], acl_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(acls)
        })
        .await
    }
}
