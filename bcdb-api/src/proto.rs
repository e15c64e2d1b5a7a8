//! Wire messages for the `bcdb` package and the generated service stubs.
//!
//! Timestamps are Unix milliseconds. Rights travel as `rwdg` strings.

use std::collections::HashMap;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Record {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub collection: String,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
    #[prost(string, tag = "4")]
    pub acl: String,
    #[prost(string, tag = "5")]
    pub owner: String,
    #[prost(map = "string, string", tag = "6")]
    pub tags: HashMap<String, String>,
    #[prost(bool, tag = "7")]
    pub protected: bool,
    #[prost(uint64, tag = "8")]
    pub version: u64,
    #[prost(uint64, tag = "9")]
    pub created_at: u64,
    #[prost(uint64, tag = "10")]
    pub updated_at: u64,
}

/// A record without its payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct RecordMeta {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub collection: String,
    #[prost(string, tag = "4")]
    pub acl: String,
    #[prost(string, tag = "5")]
    pub owner: String,
    #[prost(map = "string, string", tag = "6")]
    pub tags: HashMap<String, String>,
    #[prost(bool, tag = "7")]
    pub protected: bool,
    #[prost(uint64, tag = "8")]
    pub version: u64,
    #[prost(uint64, tag = "9")]
    pub created_at: u64,
    #[prost(uint64, tag = "10")]
    pub updated_at: u64,
    #[prost(uint64, tag = "11")]
    pub size: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetRequest {
    /// Server assigned when absent
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(string, tag = "2")]
    pub collection: String,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
    /// A private ACL is created when absent
    #[prost(string, optional, tag = "4")]
    pub acl: Option<String>,
    #[prost(map = "string, string", tag = "5")]
    pub tags: HashMap<String, String>,
    #[prost(bool, tag = "6")]
    pub protected: bool,
}

/// Used by Get and Head
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, optional, tag = "2")]
    pub collection: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub data: Option<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub acl: Option<String>,
    #[prost(map = "string, string", tag = "4")]
    pub tags: HashMap<String, String>,
    #[prost(bool, tag = "5")]
    pub replace_tags: bool,
    #[prost(uint64, optional, tag = "6")]
    pub expected_version: Option<u64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct DeleteResponse {}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct TimeRange {
    #[prost(uint64, optional, tag = "1")]
    pub after: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub before: Option<u64>,
}

/// Record filter for List and Find
#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryRequest {
    #[prost(string, optional, tag = "1")]
    pub id_pattern: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub collection: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub acl: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub owner: Option<String>,
    #[prost(map = "string, string", tag = "5")]
    pub tags: HashMap<String, String>,
    #[prost(message, optional, tag = "6")]
    pub created: Option<TimeRange>,
    #[prost(message, optional, tag = "7")]
    pub updated: Option<TimeRange>,
    #[prost(bool, tag = "8")]
    pub descending: bool,
    #[prost(uint32, optional, tag = "9")]
    pub limit: Option<u32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Acl {
    #[prost(string, tag = "1")]
    pub id: String,
    /// User to `rwdg` rights string
    #[prost(map = "string, string", tag = "2")]
    pub rights: HashMap<String, String>,
    #[prost(uint64, tag = "3")]
    pub created_at: u64,
    #[prost(uint64, tag = "4")]
    pub updated_at: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AclGetRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AclCreateRequest {
    #[prost(map = "string, string", tag = "1")]
    pub rights: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AclListRequest {
    #[prost(string, optional, tag = "1")]
    pub user: Option<String>,
    /// Minimum rights held; empty matches any
    #[prost(string, tag = "2")]
    pub rights: String,
    #[prost(bool, tag = "3")]
    pub descending: bool,
    #[prost(uint32, optional, tag = "4")]
    pub limit: Option<u32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AclSetRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(map = "string, string", tag = "2")]
    pub rights: HashMap<String, String>,
}

/// Used by Grant and Revoke
#[derive(Clone, PartialEq, prost::Message)]
pub struct AclUsersRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub user: String,
    #[prost(string, tag = "3")]
    pub rights: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AclDeleteRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

include!(concat!(env!("OUT_DIR"), "/bcdb.Bcdb.rs"));
include!(concat!(env!("OUT_DIR"), "/bcdb.Acl.rs"));
