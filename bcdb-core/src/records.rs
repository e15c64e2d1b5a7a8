/*
    records.rs - Record Store

    Keyed document storage. Every operation on one record id runs under
    that id's lock; mutations hold the exclusive lock, reads the shared one.
    Lock order is always record first, then ACL(s) in id order.
*/

use crate::access::Authorize;
use crate::acl::AclRegistry;
use crate::error::{DbError, DbResult};
use crate::locks::KeyedLocks;
use crate::model::{validate_tags, NewRecord, Record, RecordMeta, RecordUpdate};
use crate::storage::{RecordSlot, Storage};
use crate::types::{RecordId, Right, Timestamp, UserId};
use std::sync::Arc;
use tracing::{debug, info};

pub struct RecordStore {
    storage: Arc<dyn Storage>,
    acls: Arc<AclRegistry>,
    locks: KeyedLocks<RecordId>,
}

impl RecordStore {
    pub fn new(storage: Arc<dyn Storage>, acls: Arc<AclRegistry>) -> Self {
        Self {
            storage,
            acls,
            locks: KeyedLocks::new(),
        }
    }

    async fn load_live(&self, id: &RecordId) -> DbResult<Record> {
        match self.storage.load_record(id).await? {
            Some(RecordSlot::Live(record)) => Ok(record),
            Some(RecordSlot::Deleted) | None => Err(DbError::not_found(format!("record {}", id))),
        }
    }

    /// Create a record. The referenced ACL must exist and grant write.
    pub async fn set(&self, auth: &dyn Authorize, owner: &UserId, new: NewRecord) -> DbResult<Record> {
        let acl_id = new
            .acl
            .ok_or_else(|| DbError::invalid("record needs an acl reference"))?;
        validate_tags(&new.tags)?;

        let id = new.id.unwrap_or_else(RecordId::generate);
        let _guard = self.locks.write(&id).await;

        if self.storage.load_record(&id).await?.is_some() {
            return Err(DbError::AlreadyExists(format!("record {}", id)));
        }

        let pinned = self.acls.pin(&acl_id).await?;
        auth.require(&pinned.acl, Right::Write)?;

        let now = Timestamp::now();
        let record = Record {
            id,
            collection: new.collection,
            data: new.data,
            acl: acl_id,
            owner: owner.clone(),
            tags: new.tags,
            protected: new.protected,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.storage.save_record(&record).await?;

        info!(record = %record.id, acl = %record.acl, size = record.data.len(), "Created record");
        Ok(record)
    }

    /// Fetch a readable record, optionally scoped to a collection
    pub async fn get(
        &self,
        auth: &dyn Authorize,
        id: &RecordId,
        collection: Option<&str>,
    ) -> DbResult<Record> {
        let _guard = self.locks.read(id).await;
        let record = self.load_live(id).await?;

        // Rights first, so the collection of an unreadable record stays hidden
        let pinned = self.acls.pin(&record.acl).await?;
        auth.require(&pinned.acl, Right::Read)?;

        if collection.is_some_and(|c| c != record.collection) {
            return Err(DbError::not_found(format!("record {}", id)));
        }
        Ok(record)
    }

    /// Metadata-only variant of [`RecordStore::get`]
    pub async fn head(
        &self,
        auth: &dyn Authorize,
        id: &RecordId,
        collection: Option<&str>,
    ) -> DbResult<RecordMeta> {
        self.get(auth, id, collection).await.map(|r| r.meta())
    }

    /// Apply `update` to an existing record.
    ///
    /// Needs write on the current ACL. Moving the record to another ACL
    /// additionally needs grant on both the old and the new one.
    pub async fn update(
        &self,
        auth: &dyn Authorize,
        id: &RecordId,
        update: RecordUpdate,
    ) -> DbResult<Record> {
        validate_tags(&update.tags)?;

        let _guard = self.locks.write(id).await;
        let current = self.load_live(id).await?;

        let target = update.acl.as_ref().filter(|acl| **acl != current.acl);
        let pinned = match target {
            Some(next) => self.acls.pin_all(&[&current.acl, next]).await?,
            None => vec![self.acls.pin(&current.acl).await?],
        };

        for p in &pinned {
            if p.acl.id == current.acl {
                auth.require(&p.acl, Right::Write)?;
            }
            if target.is_some() {
                auth.require(&p.acl, Right::Grant)?;
            }
        }

        if let Some(expected) = update.expected_version {
            if expected != current.version {
                return Err(DbError::VersionConflict {
                    id: id.to_string(),
                    expected,
                    actual: current.version,
                });
            }
        }

        let next = update.apply(&current);
        self.storage.save_record(&next).await?;

        debug!(record = %id, version = next.version, "Updated record");
        Ok(next)
    }

    /// Delete a record, leaving a tombstone so the id is never reused
    pub async fn delete(&self, auth: &dyn Authorize, id: &RecordId) -> DbResult<()> {
        let _guard = self.locks.write(id).await;
        let current = self.load_live(id).await?;

        let pinned = self.acls.pin(&current.acl).await?;
        auth.require(&pinned.acl, Right::Delete)?;

        if current.protected {
            return Err(DbError::Conflict(format!("record {} is protected", id)));
        }

        self.storage.tombstone_record(id).await?;
        info!(record = %id, "Deleted record");
        Ok(())
    }
}
