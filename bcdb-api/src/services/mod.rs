mod acl_service;
mod bcdb_service;

pub use acl_service::AclServiceImpl;
pub use bcdb_service::{BcdbServiceImpl, ResponseStream};
