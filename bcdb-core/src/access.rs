//! Access Controller
//!
//! The single entry point for callers. Forwards each call with the
//! caller's identity to the record store, ACL registry or query engine,
//! which check the rights the operation needs under their locks. Every
//! call is counted and timed.
//!
//! Rights per operation: read for Get, Head, List and Find; write for Set
//! and Update; delete for Delete; grant for ACL changes. Acl.Get and
//! Acl.List accept any right on the ACL, and Acl.Create is open.

use crate::acl::AclRegistry;
use crate::config::StoreConfig;
use crate::error::{DbError, DbResult};
use crate::metrics::Timer;
use crate::model::{Acl, NewRecord, Record, RecordMeta, RecordUpdate, RightsMap};
use crate::query::{AclFilter, QueryEngine, RecordFilter, ResultStream};
use crate::records::RecordStore;
use crate::storage::{open_storage, Storage};
use crate::types::{AclId, RecordId, Right, Rights, UserId};
use metrics::counter;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Decides which rights a caller holds on an ACL
pub trait Authorize: Send + Sync {
    /// Rights the caller effectively holds on `acl`
    fn rights_on(&self, acl: &Acl) -> Rights;

    /// Fail with `PermissionDenied` unless `right` is held on `acl`
    fn require(&self, acl: &Acl, right: Right) -> DbResult<()> {
        if self.rights_on(acl).has(right) {
            Ok(())
        } else {
            Err(DbError::denied(format!("{} right required on acl {}", right, acl.id)))
        }
    }
}

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user: UserId,
    /// Instance owner; bypasses every rights check
    pub owner: bool,
}

impl Caller {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            user: UserId::new(name),
            owner: false,
        }
    }

    pub fn owner(name: impl Into<String>) -> Self {
        Self {
            user: UserId::new(name),
            owner: true,
        }
    }
}

impl Authorize for Caller {
    fn rights_on(&self, acl: &Acl) -> Rights {
        if self.owner {
            Rights::all()
        } else {
            acl.rights_of(&self.user)
        }
    }
}

/// Operations mediated by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Set,
    Get,
    Head,
    Update,
    Delete,
    List,
    Find,
    AclGet,
    AclCreate,
    AclList,
    AclSet,
    AclGrant,
    AclRevoke,
    AclDelete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Set => "set",
            Operation::Get => "get",
            Operation::Head => "head",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::List => "list",
            Operation::Find => "find",
            Operation::AclGet => "acl_get",
            Operation::AclCreate => "acl_create",
            Operation::AclList => "acl_list",
            Operation::AclSet => "acl_set",
            Operation::AclGrant => "acl_grant",
            Operation::AclRevoke => "acl_revoke",
            Operation::AclDelete => "acl_delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mediates every record and ACL operation
pub struct AccessController {
    records: RecordStore,
    acls: Arc<AclRegistry>,
    query: QueryEngine,
}

impl AccessController {
    pub fn new(storage: Arc<dyn Storage>, query: QueryEngine) -> Self {
        let acls = Arc::new(AclRegistry::new(storage.clone()));
        Self {
            records: RecordStore::new(storage, acls.clone()),
            acls,
            query,
        }
    }

    /// Controller over `storage` with default query settings
    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        let query = QueryEngine::new(storage.clone());
        Self::new(storage, query)
    }

    /// Open the configured backend and wire every component over it
    pub fn open(config: &StoreConfig) -> DbResult<Self> {
        let storage = open_storage(config)?;
        let query = QueryEngine::with_settings(
            storage.clone(),
            config.scan_batch_size,
            config.stream_buffer,
        );
        Ok(Self::new(storage, query))
    }

    async fn observe<T, F>(&self, caller: &Caller, op: Operation, fut: F) -> DbResult<T>
    where
        F: std::future::Future<Output = DbResult<T>>,
    {
        let timer = Timer::new("bcdb.operation.duration_ms");
        counter!("bcdb.requests.total", "op" => op.as_str()).increment(1);

        let result = fut.await;
        timer.stop();

        match &result {
            Ok(_) => debug!(user = %caller.user, %op, "Request completed"),
            Err(DbError::PermissionDenied(reason)) => {
                counter!("bcdb.requests.denied", "op" => op.as_str()).increment(1);
                warn!(user = %caller.user, %op, %reason, "Request denied");
            }
            Err(DbError::Internal(reason)) => {
                warn!(user = %caller.user, %op, %reason, "Request failed")
            }
            Err(e) => debug!(user = %caller.user, %op, error = %e, "Request rejected"),
        }
        result
    }

    /// Create a record. Without an ACL reference a private ACL granting
    /// the caller every right is created first, and removed again if the
    /// record cannot be written.
    pub async fn set(&self, caller: &Caller, mut new: NewRecord) -> DbResult<Record> {
        self.observe(caller, Operation::Set, async {
            let private = match new.acl {
                Some(_) => None,
                None => {
                    let acl = self
                        .acls
                        .create(RightsMap::from([(caller.user.clone(), Rights::all())]))
                        .await?;
                    new.acl = Some(acl.id.clone());
                    Some(acl.id)
                }
            };

            let result = self.records.set(caller, &caller.user, new).await;
            if let (Err(_), Some(acl)) = (&result, &private) {
                if let Err(e) = self.acls.delete(caller, acl).await {
                    warn!(acl = %acl, error = %e, "Failed to remove private ACL");
                }
            }
            result
        })
        .await
    }

    pub async fn get(
        &self,
        caller: &Caller,
        id: &RecordId,
        collection: Option<&str>,
    ) -> DbResult<Record> {
        self.observe(caller, Operation::Get, self.records.get(caller, id, collection))
            .await
    }

    pub async fn head(
        &self,
        caller: &Caller,
        id: &RecordId,
        collection: Option<&str>,
    ) -> DbResult<RecordMeta> {
        self.observe(caller, Operation::Head, self.records.head(caller, id, collection))
            .await
    }

    pub async fn update(
        &self,
        caller: &Caller,
        id: &RecordId,
        update: RecordUpdate,
    ) -> DbResult<Record> {
        self.observe(caller, Operation::Update, self.records.update(caller, id, update))
            .await
    }

    pub async fn delete(&self, caller: &Caller, id: &RecordId) -> DbResult<()> {
        self.observe(caller, Operation::Delete, self.records.delete(caller, id))
            .await
    }

    /// Stream metadata of matching records the caller can read
    pub async fn list(
        &self,
        caller: &Caller,
        filter: RecordFilter,
    ) -> DbResult<ResultStream<RecordMeta>> {
        let auth = Arc::new(caller.clone());
        self.observe(caller, Operation::List, async {
            self.query.list(auth, filter)
        })
        .await
    }

    /// Stream full matching records the caller can read
    pub async fn find(&self, caller: &Caller, filter: RecordFilter) -> DbResult<ResultStream<Record>> {
        let auth = Arc::new(caller.clone());
        self.observe(caller, Operation::Find, async {
            self.query.find(auth, filter)
        })
        .await
    }

    pub async fn acl_get(&self, caller: &Caller, id: &AclId) -> DbResult<Acl> {
        self.observe(caller, Operation::AclGet, self.acls.get(caller, id))
            .await
    }

    /// Any authenticated caller may create an ACL
    pub async fn acl_create(&self, caller: &Caller, rights: RightsMap) -> DbResult<Acl> {
        self.observe(caller, Operation::AclCreate, self.acls.create(rights))
            .await
    }

    /// Stream ACLs the caller holds some right on
    pub async fn acl_list(&self, caller: &Caller, filter: AclFilter) -> DbResult<ResultStream<Acl>> {
        let auth = Arc::new(caller.clone());
        self.observe(caller, Operation::AclList, async {
            self.query.list_acls(auth, filter)
        })
        .await
    }

    pub async fn acl_set(&self, caller: &Caller, id: &AclId, rights: RightsMap) -> DbResult<Acl> {
        self.observe(caller, Operation::AclSet, self.acls.set(caller, id, rights))
            .await
    }

    pub async fn acl_grant(
        &self,
        caller: &Caller,
        id: &AclId,
        user: UserId,
        rights: Rights,
    ) -> DbResult<Acl> {
        self.observe(caller, Operation::AclGrant, self.acls.grant(caller, id, user, rights))
            .await
    }

    pub async fn acl_revoke(
        &self,
        caller: &Caller,
        id: &AclId,
        user: UserId,
        rights: Rights,
    ) -> DbResult<Acl> {
        self.observe(caller, Operation::AclRevoke, self.acls.revoke(caller, id, user, rights))
            .await
    }

    pub async fn acl_delete(&self, caller: &Caller, id: &AclId) -> DbResult<()> {
        self.observe(caller, Operation::AclDelete, self.acls.delete(caller, id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn controller() -> AccessController {
        AccessController::with_storage(Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn test_owner_holds_everything() {
        let acl = Acl {
            id: AclId::parse("a1").unwrap(),
            rights: RightsMap::new(),
            created_at: crate::types::Timestamp::from_millis(0),
            updated_at: crate::types::Timestamp::from_millis(0),
        };
        assert_eq!(Caller::owner("root").rights_on(&acl), Rights::all());
        assert!(Caller::user("bob").require(&acl, Right::Read).is_err());
    }

    #[tokio::test]
    async fn test_set_without_acl_creates_private_acl() {
        let ctl = controller();
        let alice = Caller::user("alice");

        let record = ctl
            .set(&alice, NewRecord { data: b"x".to_vec(), ..Default::default() })
            .await
            .unwrap();

        let acl = ctl.acl_get(&alice, &record.acl).await.unwrap();
        assert_eq!(acl.rights_of(&alice.user), Rights::all());
        assert_eq!(acl.rights.len(), 1);
        assert_eq!(record.owner, alice.user);
    }

    #[tokio::test]
    async fn test_failed_set_removes_private_acl() {
        let ctl = controller();
        let alice = Caller::user("alice");
        let id = RecordId::parse("r1").unwrap();

        ctl.set(&alice, NewRecord { id: Some(id.clone()), ..Default::default() })
            .await
            .unwrap();
        let err = ctl
            .set(&alice, NewRecord { id: Some(id), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::AlreadyExists(_)));

        use futures::StreamExt;
        let acls: Vec<_> = ctl
            .acl_list(&Caller::owner("root"), AclFilter::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(acls.len(), 1);
    }

    #[tokio::test]
    async fn test_acl_visibility_needs_any_right() {
        use futures::StreamExt;
        let ctl = controller();
        let alice = Caller::user("alice");
        let bob = Caller::user("bob");
        let carol = Caller::user("carol");

        let acl = ctl
            .acl_create(
                &alice,
                RightsMap::from([
                    (alice.user.clone(), Rights::all()),
                    (bob.user.clone(), "w".parse().unwrap()),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(ctl.acl_get(&bob, &acl.id).await.unwrap().id, acl.id);
        let seen: Vec<_> = ctl
            .acl_list(&bob, AclFilter::default())
            .await
            .unwrap()
            .map(|a| a.unwrap().id)
            .collect()
            .await;
        assert_eq!(seen, vec![acl.id.clone()]);

        assert!(matches!(
            ctl.acl_get(&carol, &acl.id).await,
            Err(DbError::PermissionDenied(_))
        ));
        let hidden: Vec<_> = ctl
            .acl_list(&carol, AclFilter::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert!(hidden.is_empty());
    }
}
