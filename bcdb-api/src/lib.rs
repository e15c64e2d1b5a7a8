//! gRPC surface of BCDB: the `bcdb.Bcdb` and `bcdb.Acl` services.

pub mod auth;
pub mod convert;
pub mod error;
pub mod proto;
pub mod server;
pub mod services;

pub use auth::{hash_key, Authenticator};
pub use error::{ApiError, ApiResult};
pub use server::ApiServer;
