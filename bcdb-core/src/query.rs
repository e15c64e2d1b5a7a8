//! Query Engine
//!
//! Evaluates filters against stored records and ACLs and streams the
//! matches. A background task sweeps storage in id order, one batch at a
//! time, resuming strictly after the last id it saw. Results pass through
//! a bounded channel, so a slow consumer pauses the sweep and a dropped
//! consumer ends it. Read rights are checked per item against the ACL as
//! it currently stands, once buffer space for the item is held.
//!
//! Streams are best-effort-live: records written or deleted while a sweep
//! is running may or may not be observed. Without concurrent writes every
//! match is yielded exactly once.

use crate::access::Authorize;
use crate::error::{DbError, DbResult};
use crate::model::{Acl, Record, RecordMeta, Tags};
use crate::storage::Storage;
use crate::stream::result_channel;
use crate::types::{AclId, Right, Rights, SortOrder, Timestamp, UserId};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub use crate::stream::ResultStream;

/// Records fetched from storage per sweep step
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Results buffered ahead of a slow consumer
pub const DEFAULT_STREAM_BUFFER: usize = 16;

/// Half-open time window: `after` inclusive, `before` exclusive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub after: Option<Timestamp>,
    pub before: Option<Timestamp>,
}

impl TimeRange {
    pub fn validate(&self, name: &str) -> DbResult<()> {
        if let (Some(after), Some(before)) = (self.after, self.before) {
            if after >= before {
                return Err(DbError::invalid(format!(
                    "{} range is empty: {} >= {}",
                    name, after, before
                )));
            }
        }
        Ok(())
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.after.map_or(true, |a| ts >= a) && self.before.map_or(true, |b| ts < b)
    }
}

/// Predicate over records for List and Find. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Glob over record ids (`*`, `?`, `[...]`)
    pub id_pattern: Option<String>,
    pub collection: Option<String>,
    pub acl: Option<AclId>,
    pub owner: Option<UserId>,
    /// Every pair must be present on the record
    pub tags: Tags,
    pub created: TimeRange,
    pub updated: TimeRange,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl RecordFilter {
    fn compile(self) -> DbResult<CompiledFilter> {
        self.created.validate("created")?;
        self.updated.validate("updated")?;
        let pattern = self
            .id_pattern
            .as_deref()
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| DbError::invalid(format!("bad id pattern: {}", e)))?;
        Ok(CompiledFilter { pattern, filter: self })
    }
}

struct CompiledFilter {
    pattern: Option<glob::Pattern>,
    filter: RecordFilter,
}

impl CompiledFilter {
    fn matches(&self, record: &Record) -> bool {
        let f = &self.filter;
        self.pattern
            .as_ref()
            .map_or(true, |p| p.matches(record.id.as_str()))
            && f.collection.as_ref().map_or(true, |c| *c == record.collection)
            && f.acl.as_ref().map_or(true, |a| *a == record.acl)
            && f.owner.as_ref().map_or(true, |o| *o == record.owner)
            && f.tags.iter().all(|(k, v)| record.tags.get(k) == Some(v))
            && f.created.contains(record.created_at)
            && f.updated.contains(record.updated_at)
    }

    fn order(&self) -> SortOrder {
        if self.filter.descending {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        }
    }
}

/// Predicate over ACLs for Acl.List
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclFilter {
    /// Only ACLs with an entry for this user
    pub user: Option<UserId>,
    /// Only ACLs where the user (or, without `user`, anyone) holds at least these rights
    pub rights: Rights,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl AclFilter {
    fn matches(&self, acl: &Acl) -> bool {
        match &self.user {
            Some(user) => acl
                .rights
                .get(user)
                .is_some_and(|held| held.contains(self.rights)),
            None => self.rights.is_empty() || acl.rights.values().any(|held| held.contains(self.rights)),
        }
    }
}

#[derive(Clone)]
pub struct QueryEngine {
    storage: Arc<dyn Storage>,
    batch_size: usize,
    buffer: usize,
}

impl QueryEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_settings(storage, DEFAULT_BATCH_SIZE, DEFAULT_STREAM_BUFFER)
    }

    pub fn with_settings(storage: Arc<dyn Storage>, batch_size: usize, buffer: usize) -> Self {
        Self {
            storage,
            batch_size: batch_size.max(1),
            buffer: buffer.max(1),
        }
    }

    /// Metadata of matching records readable by `auth`
    pub fn list(&self, auth: Arc<dyn Authorize>, filter: RecordFilter) -> DbResult<ResultStream<RecordMeta>> {
        self.sweep_records(auth, filter, "list", |r| r.meta())
    }

    /// Full matching records readable by `auth`
    pub fn find(&self, auth: Arc<dyn Authorize>, filter: RecordFilter) -> DbResult<ResultStream<Record>> {
        self.sweep_records(auth, filter, "find", |r| r)
    }

    fn sweep_records<T, F>(
        &self,
        auth: Arc<dyn Authorize>,
        filter: RecordFilter,
        kind: &'static str,
        map: F,
    ) -> DbResult<ResultStream<T>>
    where
        T: Send + 'static,
        F: Fn(Record) -> T + Send + 'static,
    {
        let filter = filter.compile()?;
        let (sink, stream) = result_channel(self.buffer);
        let storage = self.storage.clone();
        let batch_size = self.batch_size;

        tokio::spawn(async move {
            let order = filter.order();
            let limit = filter.filter.limit.unwrap_or(usize::MAX);
            let mut cursor = None;
            let mut sent = 0usize;

            'sweep: while sent < limit {
                let batch = match storage.scan_records(cursor.as_ref(), order, batch_size).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!(kind, error = %e, "Record sweep failed");
                        sink.fail(e);
                        return;
                    }
                };
                let exhausted = batch.len() < batch_size;

                for record in batch {
                    if sink.is_closed() {
                        break 'sweep;
                    }
                    cursor = Some(record.id.clone());
                    if !filter.matches(&record) {
                        continue;
                    }

                    let Some(permit) = sink.reserve().await else {
                        break 'sweep;
                    };
                    // Checked once buffer space is held, against the ACL as
                    // it stands now
                    let can_read = match storage.load_acl(&record.acl).await {
                        Ok(Some(acl)) => auth.rights_on(&acl).has(Right::Read),
                        Ok(None) => false,
                        Err(e) => {
                            drop(permit);
                            warn!(kind, error = %e, "Record sweep failed");
                            sink.fail(e);
                            return;
                        }
                    };
                    if !can_read {
                        continue;
                    }

                    permit.send(map(record));
                    counter!("bcdb.stream.items", "kind" => kind).increment(1);
                    sent += 1;
                    if sent >= limit {
                        break 'sweep;
                    }
                }

                if exhausted {
                    break;
                }
            }
            debug!(kind, sent, "Record sweep finished");
        });

        Ok(stream)
    }

    /// ACLs matching `filter` on which `auth` holds some right
    pub fn list_acls(&self, auth: Arc<dyn Authorize>, filter: AclFilter) -> DbResult<ResultStream<Acl>> {
        let (sink, stream) = result_channel(self.buffer);
        let storage = self.storage.clone();
        let batch_size = self.batch_size;

        tokio::spawn(async move {
            let order = if filter.descending {
                SortOrder::Descending
            } else {
                SortOrder::Ascending
            };
            let limit = filter.limit.unwrap_or(usize::MAX);
            let mut cursor: Option<AclId> = None;
            let mut sent = 0usize;

            'sweep: while sent < limit {
                let batch = match storage.scan_acls(cursor.as_ref(), order, batch_size).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!(error = %e, "ACL sweep failed");
                        sink.fail(e);
                        return;
                    }
                };
                let exhausted = batch.len() < batch_size;

                for scanned in batch {
                    if sink.is_closed() {
                        break 'sweep;
                    }
                    cursor = Some(scanned.id.clone());
                    if auth.rights_on(&scanned).is_empty() {
                        continue;
                    }

                    let Some(permit) = sink.reserve().await else {
                        break 'sweep;
                    };
                    // Reload so a paused stream never yields stale rights
                    let acl = match storage.load_acl(&scanned.id).await {
                        Ok(Some(acl)) => acl,
                        Ok(None) => continue,
                        Err(e) => {
                            drop(permit);
                            warn!(error = %e, "ACL sweep failed");
                            sink.fail(e);
                            return;
                        }
                    };
                    if auth.rights_on(&acl).is_empty() || !filter.matches(&acl) {
                        continue;
                    }

                    permit.send(acl);
                    counter!("bcdb.stream.items", "kind" => "acl_list").increment(1);
                    sent += 1;
                    if sent >= limit {
                        break 'sweep;
                    }
                }

                if exhausted {
                    break;
                }
            }
            debug!(sent, "ACL sweep finished");
        });

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Caller;
    use crate::model::RightsMap;
    use crate::storage::MemoryStorage;
    use crate::types::RecordId;
    use futures::StreamExt;

    fn record(id: &str, acl: &str, at: u64) -> Record {
        Record {
            id: RecordId::parse(id).unwrap(),
            collection: if id.starts_with("doc") { "docs".into() } else { String::new() },
            data: id.as_bytes().to_vec(),
            acl: AclId::parse(acl).unwrap(),
            owner: UserId::new("u1"),
            tags: Tags::from([("n".to_string(), at.to_string())]),
            protected: false,
            version: 1,
            created_at: Timestamp::from_millis(at),
            updated_at: Timestamp::from_millis(at),
        }
    }

    fn acl(id: &str, user: &str, rights: &str) -> Acl {
        Acl {
            id: AclId::parse(id).unwrap(),
            rights: RightsMap::from([(UserId::new(user), rights.parse().unwrap())]),
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
        }
    }

    async fn seeded() -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        storage.save_acl(&acl("open", "u1", "r")).await.unwrap();
        storage.save_acl(&acl("closed", "u2", "rw")).await.unwrap();
        for (i, id) in ["doc-1", "doc-2", "doc-3", "note-1"].iter().enumerate() {
            storage.save_record(&record(id, "open", 10 * (i as u64 + 1))).await.unwrap();
        }
        storage.save_record(&record("doc-secret", "closed", 50)).await.unwrap();
        storage
    }

    fn u1() -> Arc<dyn Authorize> {
        Arc::new(Caller::user("u1"))
    }

    async fn ids(stream: ResultStream<RecordMeta>) -> Vec<String> {
        stream
            .map(|r| r.unwrap().id.as_str().to_string())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_list_skips_unreadable() {
        let engine = QueryEngine::with_settings(seeded().await, 2, 1);
        let stream = engine.list(u1(), RecordFilter::default()).unwrap();
        assert_eq!(ids(stream).await, vec!["doc-1", "doc-2", "doc-3", "note-1"]);
    }

    #[tokio::test]
    async fn test_filters_combine() {
        let engine = QueryEngine::new(seeded().await);
        let filter = RecordFilter {
            id_pattern: Some("doc-*".into()),
            created: TimeRange {
                after: Some(Timestamp::from_millis(20)),
                before: None,
            },
            descending: true,
            ..Default::default()
        };
        let stream = engine.list(u1(), filter).unwrap();
        assert_eq!(ids(stream).await, vec!["doc-3", "doc-2"]);

        let by_tag = RecordFilter {
            tags: Tags::from([("n".to_string(), "10".to_string())]),
            collection: Some("docs".into()),
            ..Default::default()
        };
        assert_eq!(ids(engine.list(u1(), by_tag).unwrap()).await, vec!["doc-1"]);
    }

    #[tokio::test]
    async fn test_empty_match_ends_cleanly() {
        let engine = QueryEngine::new(seeded().await);
        let filter = RecordFilter {
            collection: Some("nothing".into()),
            ..Default::default()
        };
        let items: Vec<_> = engine.find(u1(), filter).unwrap().collect().await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_filters_rejected_upfront() {
        let engine = QueryEngine::new(seeded().await);
        let bad_glob = RecordFilter {
            id_pattern: Some("[".into()),
            ..Default::default()
        };
        assert!(matches!(engine.list(u1(), bad_glob), Err(DbError::InvalidArgument(_))));

        let bad_range = RecordFilter {
            updated: TimeRange {
                after: Some(Timestamp::from_millis(5)),
                before: Some(Timestamp::from_millis(5)),
            },
            ..Default::default()
        };
        assert!(matches!(engine.find(u1(), bad_range), Err(DbError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_limit_and_early_drop() {
        let engine = QueryEngine::with_settings(seeded().await, 1, 1);
        let limited = RecordFilter {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(ids(engine.list(u1(), limited).unwrap()).await, vec!["doc-1", "doc-2"]);

        let mut stream = engine.find(u1(), RecordFilter::default()).unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.data, b"doc-1");
        drop(stream);
    }

    #[tokio::test]
    async fn test_acl_list_filters() {
        let storage = seeded().await;
        let engine = QueryEngine::new(storage);

        let mine: Vec<_> = engine
            .list_acls(u1(), AclFilter::default())
            .unwrap()
            .map(|a| a.unwrap().id)
            .collect()
            .await;
        assert_eq!(mine, vec![AclId::parse("open").unwrap()]);

        let owner: Arc<dyn Authorize> = Arc::new(Caller::owner("root"));
        let writable = AclFilter {
            rights: "w".parse().unwrap(),
            ..Default::default()
        };
        let found: Vec<_> = engine
            .list_acls(owner, writable)
            .unwrap()
            .map(|a| a.unwrap().id)
            .collect()
            .await;
        assert_eq!(found, vec![AclId::parse("closed").unwrap()]);
    }
}
