use bcdb_core::DbError;
use thiserror::Error;
use tonic::{Code, Status};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ApiError> for Status {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::AuthenticationFailed(msg) => Status::new(Code::Unauthenticated, msg),
            ApiError::Db(e) => {
                let code = match &e {
                    DbError::NotFound(_) => Code::NotFound,
                    DbError::AlreadyExists(_) => Code::AlreadyExists,
                    DbError::PermissionDenied(_) => Code::PermissionDenied,
                    DbError::VersionConflict { .. } => Code::Aborted,
                    DbError::Conflict(_) => Code::FailedPrecondition,
                    DbError::InvalidArgument(_) => Code::InvalidArgument,
                    DbError::Internal(_) => Code::Internal,
                };
                Status::new(code, e.to_string())
            }
            ApiError::Internal(e) => Status::new(Code::Internal, e.to_string()),
        }
    }
}

impl From<DbError> for Status {
    fn from(err: DbError) -> Self {
        ApiError::Db(err).into()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_error_codes() {
        let cases = [
            (DbError::not_found("r1"), Code::NotFound),
            (DbError::AlreadyExists("r1".into()), Code::AlreadyExists),
            (DbError::denied("r1"), Code::PermissionDenied),
            (
                DbError::VersionConflict { id: "r1".into(), expected: 1, actual: 2 },
                Code::Aborted,
            ),
            (DbError::Conflict("protected".into()), Code::FailedPrecondition),
            (DbError::invalid("bad id"), Code::InvalidArgument),
            (DbError::internal("disk"), Code::Internal),
        ];
        for (err, code) in cases {
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn test_auth_failure_is_unauthenticated() {
        let status = Status::from(ApiError::AuthenticationFailed("no key".into()));
        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "no key");
    }
}
