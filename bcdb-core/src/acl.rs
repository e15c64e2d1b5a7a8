//! ACL Registry
//!
//! Owns the named permission sets that records point at. Every mutation of
//! one ACL is serialized through its exclusive lock; record writes that
//! reference an ACL hold the shared lock (see [`AclRegistry::pin`]), which
//! is what keeps deletion from leaving dangling references behind.

use crate::access::Authorize;
use crate::error::{DbError, DbResult};
use crate::locks::{KeyReadGuard, KeyedLocks};
use crate::model::{normalize_rights, Acl, RightsMap};
use crate::storage::Storage;
use crate::types::{AclId, Right, Rights, Timestamp, UserId};
use std::sync::Arc;
use tracing::{debug, info};

/// An ACL held under its shared lock
pub struct PinnedAcl {
    pub acl: Acl,
    _guard: KeyReadGuard,
}

pub struct AclRegistry {
    storage: Arc<dyn Storage>,
    locks: KeyedLocks<AclId>,
}

fn validate_rights(rights: &RightsMap) -> DbResult<()> {
    if rights.keys().any(|user| user.as_str().is_empty()) {
        return Err(DbError::invalid("acl entry with empty user"));
    }
    Ok(())
}

impl AclRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            locks: KeyedLocks::new(),
        }
    }

    /// Load without locking or authorization
    pub(crate) async fn load(&self, id: &AclId) -> DbResult<Acl> {
        self.storage
            .load_acl(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("acl {}", id)))
    }

    /// Take the shared lock on `id` and load it. Writers to the ACL wait
    /// until the pin is dropped.
    pub async fn pin(&self, id: &AclId) -> DbResult<PinnedAcl> {
        let guard = self.locks.read(id).await;
        let acl = self.load(id).await?;
        Ok(PinnedAcl { acl, _guard: guard })
    }

    /// Pin several ACLs, locking in id order
    pub async fn pin_all(&self, ids: &[&AclId]) -> DbResult<Vec<PinnedAcl>> {
        let mut sorted: Vec<&AclId> = ids.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut pinned = Vec::with_capacity(sorted.len());
        for id in sorted {
            pinned.push(self.pin(id).await?);
        }
        Ok(pinned)
    }

    /// Allocate a new ACL with a fresh id
    pub async fn create(&self, rights: RightsMap) -> DbResult<Acl> {
        validate_rights(&rights)?;
        let now = Timestamp::now();
        let acl = Acl {
            id: AclId::generate(),
            rights: normalize_rights(rights),
            created_at: now,
            updated_at: now,
        };

        let _guard = self.locks.write(&acl.id).await;
        self.storage.save_acl(&acl).await?;
        info!(acl = %acl.id, users = acl.rights.len(), "Created ACL");
        Ok(acl)
    }

    /// Fetch an ACL; the caller must hold some right on it
    pub async fn get(&self, auth: &dyn Authorize, id: &AclId) -> DbResult<Acl> {
        let pinned = self.pin(id).await?;
        if auth.rights_on(&pinned.acl).is_empty() {
            return Err(DbError::denied(format!("no rights on acl {}", id)));
        }
        Ok(pinned.acl)
    }

    /// Replace the full rights mapping
    pub async fn set(&self, auth: &dyn Authorize, id: &AclId, rights: RightsMap) -> DbResult<Acl> {
        validate_rights(&rights)?;
        self.mutate(auth, id, move |acl| acl.rights = normalize_rights(rights))
            .await
    }

    /// Union `rights` into the user's set
    pub async fn grant(
        &self,
        auth: &dyn Authorize,
        id: &AclId,
        user: UserId,
        rights: Rights,
    ) -> DbResult<Acl> {
        if user.as_str().is_empty() {
            return Err(DbError::invalid("grant to empty user"));
        }
        self.mutate(auth, id, move |acl| acl.grant(user, rights)).await
    }

    /// Remove `rights` from the user's set
    pub async fn revoke(
        &self,
        auth: &dyn Authorize,
        id: &AclId,
        user: UserId,
        rights: Rights,
    ) -> DbResult<Acl> {
        self.mutate(auth, id, move |acl| acl.revoke(&user, rights))
            .await
    }

    /// Delete an ACL no live record references
    pub async fn delete(&self, auth: &dyn Authorize, id: &AclId) -> DbResult<()> {
        let _guard = self.locks.write(id).await;
        let acl = self.load(id).await?;
        auth.require(&acl, Right::Grant)?;

        let references = self.storage.count_acl_references(id).await?;
        if references > 0 {
            return Err(DbError::Conflict(format!(
                "acl {} is referenced by {} record(s)",
                id, references
            )));
        }

        self.storage.delete_acl(id).await?;
        info!(acl = %id, "Deleted ACL");
        Ok(())
    }

    async fn mutate<F>(&self, auth: &dyn Authorize, id: &AclId, change: F) -> DbResult<Acl>
    where
        F: FnOnce(&mut Acl),
    {
        let _guard = self.locks.write(id).await;
        let mut acl = self.load(id).await?;
        auth.require(&acl, Right::Grant)?;

        change(&mut acl);
        acl.updated_at = Timestamp::now_after(acl.updated_at);
        self.storage.save_acl(&acl).await?;

        debug!(acl = %id, users = acl.rights.len(), "Updated ACL");
        Ok(acl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Caller;
    use crate::storage::MemoryStorage;

    fn registry() -> AclRegistry {
        AclRegistry::new(Arc::new(MemoryStorage::new()))
    }

    fn user(name: &str) -> UserId {
        UserId::new(name)
    }

    fn rights(s: &str) -> Rights {
        s.parse().unwrap()
    }

    async fn acl_for(registry: &AclRegistry, name: &str, r: &str) -> Acl {
        registry
            .create(RightsMap::from([(user(name), rights(r))]))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_drops_empty_entries() {
        let registry = registry();
        let acl = registry
            .create(RightsMap::from([
                (user("alice"), rights("r")),
                (user("bob"), Rights::empty()),
            ]))
            .await
            .unwrap();
        assert_eq!(acl.rights.len(), 1);
    }

    #[tokio::test]
    async fn test_get_requires_some_right() {
        let registry = registry();
        let acl = acl_for(&registry, "alice", "r").await;

        assert!(registry.get(&Caller::user("alice"), &acl.id).await.is_ok());
        assert!(matches!(
            registry.get(&Caller::user("bob"), &acl.id).await,
            Err(DbError::PermissionDenied(_))
        ));
        assert!(matches!(
            registry.get(&Caller::user("alice"), &AclId::parse("nope").unwrap()).await,
            Err(DbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_grant_needs_grant_right() {
        let registry = registry();
        let acl = acl_for(&registry, "alice", "rw").await;

        let err = registry
            .grant(&Caller::user("alice"), &acl.id, user("bob"), rights("r"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::PermissionDenied(_)));

        let updated = registry
            .grant(&Caller::owner("root"), &acl.id, user("bob"), rights("r"))
            .await
            .unwrap();
        assert_eq!(updated.rights_of(&user("bob")), rights("r"));
    }

    #[tokio::test]
    async fn test_set_replaces_everything() {
        let registry = registry();
        let acl = acl_for(&registry, "alice", "rwdg").await;

        let updated = registry
            .set(
                &Caller::user("alice"),
                &acl.id,
                RightsMap::from([(user("carol"), rights("r"))]),
            )
            .await
            .unwrap();
        assert!(updated.rights_of(&user("alice")).is_empty());
        assert_eq!(updated.rights_of(&user("carol")), rights("r"));
        assert!(updated.updated_at >= acl.updated_at);
    }

    #[tokio::test]
    async fn test_delete_unreferenced() {
        let registry = registry();
        let acl = acl_for(&registry, "alice", "g").await;

        registry.delete(&Caller::user("alice"), &acl.id).await.unwrap();
        assert!(matches!(
            registry.load(&acl.id).await,
            Err(DbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pin_blocks_writers() {
        let registry = Arc::new(registry());
        let acl = acl_for(&registry, "alice", "rwdg").await;

        let pinned = registry.pin(&acl.id).await.unwrap();
        let writer = {
            let registry = registry.clone();
            let id = acl.id.clone();
            tokio::spawn(async move {
                registry
                    .grant(&Caller::user("alice"), &id, user("bob"), rights("r"))
                    .await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        drop(pinned);
        writer.await.unwrap().unwrap();
    }
}
