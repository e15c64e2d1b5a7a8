/*
    model.rs - Records, record metadata and ACLs

    Records are owned by the record store and mutated only through its
    update path. ACLs are owned by the registry; many records may share
    one ACL.
*/

use crate::error::{DbError, DbResult};
use crate::types::{AclId, RecordId, Right, Rights, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of tag keys reserved for the store itself
pub const RESERVED_TAG_PREFIX: char = ':';

/// User metadata attached to a record
pub type Tags = BTreeMap<String, String>;

/// Reject reserved or empty tag keys
pub fn validate_tags(tags: &Tags) -> DbResult<()> {
    for key in tags.keys() {
        if key.is_empty() {
            return Err(DbError::invalid("tag key must not be empty"));
        }
        if key.starts_with(RESERVED_TAG_PREFIX) {
            return Err(DbError::invalid(format!(
                "not allowed use of reserved tag: {}",
                key
            )));
        }
    }
    Ok(())
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub collection: String,
    pub data: Vec<u8>,
    pub acl: AclId,
    pub owner: UserId,
    pub tags: Tags,
    pub protected: bool,
    /// Incremented by every successful update; starts at 1
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Record {
    /// Metadata view without the payload
    pub fn meta(&self) -> RecordMeta {
        RecordMeta {
            id: self.id.clone(),
            collection: self.collection.clone(),
            acl: self.acl.clone(),
            owner: self.owner.clone(),
            tags: self.tags.clone(),
            protected: self.protected,
            version: self.version,
            size: self.data.len() as u64,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Record metadata, as returned by list queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: RecordId,
    pub collection: String,
    pub acl: AclId,
    pub owner: UserId,
    pub tags: Tags,
    pub protected: bool,
    pub version: u64,
    pub size: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Input for creating a record
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    pub id: Option<RecordId>,
    pub collection: String,
    pub data: Vec<u8>,
    /// When absent, a private ACL is created for the caller
    pub acl: Option<AclId>,
    pub tags: Tags,
    pub protected: bool,
}

/// Input for updating a record. Absent fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub data: Option<Vec<u8>>,
    pub acl: Option<AclId>,
    pub tags: Tags,
    /// Replace the tag map instead of merging into it
    pub replace_tags: bool,
    /// Optimistic concurrency token: the version the caller last saw
    pub expected_version: Option<u64>,
}

impl RecordUpdate {
    pub fn data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            ..Default::default()
        }
    }

    /// Produce the next state of `current`. Does not check permissions.
    pub fn apply(&self, current: &Record) -> Record {
        let mut next = current.clone();
        if let Some(data) = &self.data {
            next.data = data.clone();
        }
        if let Some(acl) = &self.acl {
            next.acl = acl.clone();
        }
        if self.replace_tags {
            next.tags = self.tags.clone();
        } else {
            next.tags.extend(self.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        next.version = current.version + 1;
        next.updated_at = Timestamp::now_after(current.updated_at);
        next
    }
}

/// Mapping from user to the rights they hold
pub type RightsMap = BTreeMap<UserId, Rights>;

/// Drop users whose right set is empty
pub fn normalize_rights(mut rights: RightsMap) -> RightsMap {
    rights.retain(|_, r| !r.is_empty());
    rights
}

/// Named permission set referenced by records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    pub id: AclId,
    pub rights: RightsMap,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Acl {
    /// Rights held by `user`, empty if not listed
    pub fn rights_of(&self, user: &UserId) -> Rights {
        self.rights.get(user).copied().unwrap_or_default()
    }

    pub fn allows(&self, user: &UserId, right: Right) -> bool {
        self.rights_of(user).has(right)
    }

    /// Union `rights` into the user's set
    pub fn grant(&mut self, user: UserId, rights: Rights) {
        let entry = self.rights.entry(user).or_default();
        *entry = entry.union(rights);
        self.rights.retain(|_, r| !r.is_empty());
    }

    /// Remove `rights` from the user's set; an emptied set removes the user
    pub fn revoke(&mut self, user: &UserId, rights: Rights) {
        if let Some(current) = self.rights.get_mut(user) {
            *current = current.difference(rights);
            if current.is_empty() {
                self.rights.remove(user);
            }
        }
    }
}
