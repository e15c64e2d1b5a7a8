//! BCDB core: a document store with ACL-based access control.
//!
//! Records are opaque payloads that each reference one ACL. Every call goes
//! through the [`AccessController`], which authorizes it against that ACL
//! before the [`RecordStore`], [`AclRegistry`] or [`QueryEngine`] act.

pub mod access;
pub mod acl;
pub mod config;
pub mod error;
pub mod locks;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod query;
pub mod records;
pub mod shutdown;
pub mod storage;
pub mod stream;
pub mod types;

pub use access::{AccessController, Authorize, Caller, Operation};
pub use acl::AclRegistry;
pub use config::{Config, ConfigError, StorageBackend, StoreConfig};
pub use error::{DbError, DbResult};
pub use logging::{init_logging, LogLevel};
pub use model::{Acl, NewRecord, Record, RecordMeta, RecordUpdate, RightsMap, Tags};
pub use query::{AclFilter, QueryEngine, RecordFilter, ResultStream, TimeRange};
pub use records::RecordStore;
pub use types::{AclId, RecordId, Right, Rights, SortOrder, Timestamp, UserId};
