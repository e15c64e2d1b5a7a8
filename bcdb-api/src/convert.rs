//! Conversions between wire messages and core types.
//!
//! Inbound conversions validate and fail with `InvalidArgument`.

use crate::proto;
use bcdb_core::{
    Acl, AclFilter, AclId, DbError, DbResult, NewRecord, Record, RecordFilter, RecordId,
    RecordMeta, RecordUpdate, Rights, RightsMap, Tags, TimeRange, Timestamp, UserId,
};
use std::collections::HashMap;

fn tags_in(tags: HashMap<String, String>) -> Tags {
    tags.into_iter().collect()
}

fn tags_out(tags: Tags) -> HashMap<String, String> {
    tags.into_iter().collect()
}

pub fn record_id(id: String) -> DbResult<RecordId> {
    RecordId::parse(id)
}

pub fn acl_id(id: String) -> DbResult<AclId> {
    AclId::parse(id)
}

pub fn rights_in(rights: HashMap<String, String>) -> DbResult<RightsMap> {
    rights
        .into_iter()
        .map(|(user, r)| r.parse::<Rights>().map(|r| (UserId::new(user), r)))
        .collect()
}

fn rights_out(rights: RightsMap) -> HashMap<String, String> {
    rights
        .into_iter()
        .map(|(user, r)| (user.0, r.to_string()))
        .collect()
}

fn range_in(range: Option<proto::TimeRange>) -> TimeRange {
    range
        .map(|r| TimeRange {
            after: r.after.map(Timestamp::from_millis),
            before: r.before.map(Timestamp::from_millis),
        })
        .unwrap_or_default()
}

impl From<Record> for proto::Record {
    fn from(r: Record) -> Self {
        Self {
            id: r.id.0,
            collection: r.collection,
            data: r.data,
            acl: r.acl.0,
            owner: r.owner.0,
            tags: tags_out(r.tags),
            protected: r.protected,
            version: r.version,
            created_at: r.created_at.as_millis(),
            updated_at: r.updated_at.as_millis(),
        }
    }
}

impl From<RecordMeta> for proto::RecordMeta {
    fn from(m: RecordMeta) -> Self {
        Self {
            id: m.id.0,
            collection: m.collection,
            acl: m.acl.0,
            owner: m.owner.0,
            tags: tags_out(m.tags),
            protected: m.protected,
            version: m.version,
            created_at: m.created_at.as_millis(),
            updated_at: m.updated_at.as_millis(),
            size: m.size,
        }
    }
}

impl From<Acl> for proto::Acl {
    fn from(acl: Acl) -> Self {
        Self {
            id: acl.id.0,
            rights: rights_out(acl.rights),
            created_at: acl.created_at.as_millis(),
            updated_at: acl.updated_at.as_millis(),
        }
    }
}

impl TryFrom<proto::SetRequest> for NewRecord {
    type Error = DbError;

    fn try_from(req: proto::SetRequest) -> DbResult<Self> {
        Ok(NewRecord {
            id: req.id.map(record_id).transpose()?,
            collection: req.collection,
            data: req.data,
            acl: req.acl.map(acl_id).transpose()?,
            tags: tags_in(req.tags),
            protected: req.protected,
        })
    }
}

/// Split an update request into the target id and the change
pub fn update_in(req: proto::UpdateRequest) -> DbResult<(RecordId, RecordUpdate)> {
    let id = record_id(req.id)?;
    let update = RecordUpdate {
        data: req.data,
        acl: req.acl.map(acl_id).transpose()?,
        tags: tags_in(req.tags),
        replace_tags: req.replace_tags,
        expected_version: req.expected_version,
    };
    Ok((id, update))
}

impl TryFrom<proto::QueryRequest> for RecordFilter {
    type Error = DbError;

    fn try_from(req: proto::QueryRequest) -> DbResult<Self> {
        Ok(RecordFilter {
            id_pattern: req.id_pattern,
            collection: req.collection,
            acl: req.acl.map(acl_id).transpose()?,
            owner: req.owner.map(UserId::new),
            tags: tags_in(req.tags),
            created: range_in(req.created),
            updated: range_in(req.updated),
            descending: req.descending,
            limit: req.limit.map(|l| l as usize),
        })
    }
}

impl TryFrom<proto::AclListRequest> for AclFilter {
    type Error = DbError;

    fn try_from(req: proto::AclListRequest) -> DbResult<Self> {
        Ok(AclFilter {
            user: req.user.map(UserId::new),
            rights: req.rights.parse()?,
            descending: req.descending,
            limit: req.limit.map(|l| l as usize),
        })
    }
}
