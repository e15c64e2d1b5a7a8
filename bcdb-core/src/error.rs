/*
    error.rs - Error taxonomy shared by every BCDB component

    Every operation of the record store, ACL registry, query engine and
    access controller fails with one of these variants. Failed mutations
    never partially apply.
*/

use thiserror::Error;

/// Errors surfaced by database operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    /// Target record or ACL does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the requested id exists (or existed)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Caller lacks the right required for the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Optimistic concurrency token did not match
    #[error("Version conflict on {id}: expected {expected}, current {actual}")]
    VersionConflict { id: String, expected: u64, actual: u64 },

    /// Operation is forbidden by the current state (protected record, referenced ACL)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed id, filter, tag or rights string
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(what: impl Into<String>) -> Self {
        DbError::NotFound(what.into())
    }

    pub fn denied(what: impl Into<String>) -> Self {
        DbError::PermissionDenied(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        DbError::InvalidArgument(what.into())
    }

    pub fn internal(what: impl std::fmt::Display) -> Self {
        DbError::Internal(what.to_string())
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::Internal(format!("sqlite: {}", err))
    }
}

impl From<r2d2::Error> for DbError {
    fn from(err: r2d2::Error) -> Self {
        DbError::Internal(format!("connection pool: {}", err))
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Internal(format!("serialization: {}", err))
    }
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::Internal(format!("blocking task failed: {}", err))
    }
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_conflict_display() {
        let err = DbError::VersionConflict { id: "r1".into(), expected: 2, actual: 3 };
        assert_eq!(err.to_string(), "Version conflict on r1: expected 2, current 3");
    }

    #[test]
    fn test_sqlite_error_is_internal() {
        let err: DbError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, DbError::Internal(_)));
    }
}
