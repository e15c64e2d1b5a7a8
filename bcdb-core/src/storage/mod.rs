//! Storage backends for records and ACLs
//!
//! The [`Storage`] trait is the persistence seam underneath the record store
//! and ACL registry. Implementations must ensure:
//! - Atomic writes (a reader never sees half a record)
//! - Consistency (reads see the latest committed write)
//! - Ordered scans by id, resumable from an exclusive cursor
//!
//! Serialization of concurrent writers is not the backend's job; the record
//! store and ACL registry hold per-id locks around every mutation.

use crate::config::{StorageBackend, StoreConfig};
use crate::error::DbResult;
use crate::model::{Acl, Record};
use crate::types::{AclId, RecordId, SortOrder};
use async_trait::async_trait;
use std::sync::Arc;

pub mod memory_store;
pub mod migrations;
pub mod sql_store;

pub use memory_store::MemoryStorage;
pub use sql_store::SqlStorage;

/// State of a record id in storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSlot {
    Live(Record),
    /// The id was used and deleted; it must never be reused
    Deleted,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Load a record slot by id, `None` if the id was never used
    async fn load_record(&self, id: &RecordId) -> DbResult<Option<RecordSlot>>;

    /// Insert or atomically replace a live record
    async fn save_record(&self, record: &Record) -> DbResult<()>;

    /// Replace a record with a tombstone
    async fn tombstone_record(&self, id: &RecordId) -> DbResult<()>;

    /// Up to `limit` live records strictly after `after` in `order`
    async fn scan_records(
        &self,
        after: Option<&RecordId>,
        order: SortOrder,
        limit: usize,
    ) -> DbResult<Vec<Record>>;

    /// Number of live records referencing `acl`
    async fn count_acl_references(&self, acl: &AclId) -> DbResult<u64>;

    async fn load_acl(&self, id: &AclId) -> DbResult<Option<Acl>>;

    /// Insert or atomically replace an ACL
    async fn save_acl(&self, acl: &Acl) -> DbResult<()>;

    async fn delete_acl(&self, id: &AclId) -> DbResult<()>;

    /// Up to `limit` ACLs strictly after `after` in `order`
    async fn scan_acls(
        &self,
        after: Option<&AclId>,
        order: SortOrder,
        limit: usize,
    ) -> DbResult<Vec<Acl>>;
}

/// Open the backend selected by the store configuration
pub fn open_storage(config: &StoreConfig) -> DbResult<Arc<dyn Storage>> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Arc::new(MemoryStorage::new()))
        }
        StorageBackend::Sqlite => {
            if let Some(parent) = config.sqlite_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(crate::error::DbError::internal)?;
                }
            }
            tracing::info!(path = %config.sqlite_path.display(), "Using sqlite storage");
            Ok(Arc::new(SqlStorage::open(&config.sqlite_path, config.pool_size)?))
        }
    }
}
