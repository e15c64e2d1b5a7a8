//! In-Memory Storage
//!
//! `BTreeMap`-backed implementation for tests and ephemeral instances.

use super::{RecordSlot, Storage};
use crate::error::DbResult;
use crate::model::{Acl, Record};
use crate::types::{AclId, RecordId, SortOrder};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage
#[derive(Clone, Default)]
pub struct MemoryStorage {
    records: Arc<RwLock<BTreeMap<RecordId, RecordSlot>>>,
    acls: Arc<RwLock<BTreeMap<AclId, Acl>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Walk `map` from the exclusive cursor in `order`, keeping what `pick` accepts
fn page<K: Ord, V, T>(
    map: &BTreeMap<K, V>,
    after: Option<&K>,
    order: SortOrder,
    limit: usize,
    pick: impl Fn(&V) -> Option<T>,
) -> Vec<T> {
    let iter: Box<dyn Iterator<Item = (&K, &V)> + '_> = match (order, after) {
        (SortOrder::Ascending, None) => Box::new(map.iter()),
        (SortOrder::Ascending, Some(k)) => {
            Box::new(map.range((Bound::Excluded(k), Bound::Unbounded)))
        }
        (SortOrder::Descending, None) => Box::new(map.iter().rev()),
        (SortOrder::Descending, Some(k)) => {
            Box::new(map.range((Bound::Unbounded, Bound::Excluded(k))).rev())
        }
    };

    iter.filter_map(|(_, v)| pick(v)).take(limit).collect()
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load_record(&self, id: &RecordId) -> DbResult<Option<RecordSlot>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn save_record(&self, record: &Record) -> DbResult<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), RecordSlot::Live(record.clone()));
        Ok(())
    }

    async fn tombstone_record(&self, id: &RecordId) -> DbResult<()> {
        self.records.write().await.insert(id.clone(), RecordSlot::Deleted);
        Ok(())
    }

    async fn scan_records(
        &self,
        after: Option<&RecordId>,
        order: SortOrder,
        limit: usize,
    ) -> DbResult<Vec<Record>> {
        let records = self.records.read().await;
        Ok(page(&records, after, order, limit, |slot| match slot {
            RecordSlot::Live(record) => Some(record.clone()),
            RecordSlot::Deleted => None,
        }))
    }

    async fn count_acl_references(&self, acl: &AclId) -> DbResult<u64> {
        let records = self.records.read().await;
        let count = records
            .values()
            .filter(|slot| matches!(slot, RecordSlot::Live(r) if &r.acl == acl))
            .count();
        Ok(count as u64)
    }

    async fn load_acl(&self, id: &AclId) -> DbResult<Option<Acl>> {
        Ok(self.acls.read().await.get(id).cloned())
    }

    async fn save_acl(&self, acl: &Acl) -> DbResult<()> {
        self.acls.write().await.insert(acl.id.clone(), acl.clone());
        Ok(())
    }

    async fn delete_acl(&self, id: &AclId) -> DbResult<()> {
        self.acls.write().await.remove(id);
        Ok(())
    }

    async fn scan_acls(
        &self,
        after: Option<&AclId>,
        order: SortOrder,
        limit: usize,
    ) -> DbResult<Vec<Acl>> {
        let acls = self.acls.read().await;
        Ok(page(&acls, after, order, limit, |acl| Some(acl.clone())))
    }
}
