//! Generates the tonic client and server stubs for the `bcdb.Bcdb` and
//! `bcdb.Acl` services. Messages are hand-written prost structs in
//! `src/proto.rs`, so no protoc is needed.

use tonic_build::manual::{Builder, Method, Service};

const CODEC: &str = "tonic::codec::ProstCodec";

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{}", input))
        .output_type(format!("crate::proto::{}", output))
        .codec_path(CODEC)
        .build()
}

fn streaming(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{}", input))
        .output_type(format!("crate::proto::{}", output))
        .codec_path(CODEC)
        .server_streaming()
        .build()
}

fn main() {
    let bcdb = Service::builder()
        .name("Bcdb")
        .package("bcdb")
        .method(unary("set", "Set", "SetRequest", "Record"))
        .method(unary("get", "Get", "GetRequest", "Record"))
        .method(unary("head", "Head", "GetRequest", "RecordMeta"))
        .method(unary("update", "Update", "UpdateRequest", "Record"))
        .method(unary("delete", "Delete", "DeleteRequest", "DeleteResponse"))
        .method(streaming("list", "List", "QueryRequest", "RecordMeta"))
        .method(streaming("find", "Find", "QueryRequest", "Record"))
        .build();

    let acl = Service::builder()
        .name("Acl")
        .package("bcdb")
        .method(unary("get", "Get", "AclGetRequest", "Acl"))
        .method(unary("create", "Create", "AclCreateRequest", "Acl"))
        .method(streaming("list", "List", "AclListRequest", "Acl"))
        .method(unary("set", "Set", "AclSetRequest", "Acl"))
        .method(unary("grant", "Grant", "AclUsersRequest", "Acl"))
        .method(unary("revoke", "Revoke", "AclUsersRequest", "Acl"))
        .method(unary("delete", "Delete", "AclDeleteRequest", "DeleteResponse"))
        .build();

    Builder::new().compile(&[bcdb, acl]);
    println!("cargo:rerun-if-changed=build.rs");
}
