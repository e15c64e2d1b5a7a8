/// End-to-end tests against a real server on an ephemeral port

use argon2::{Algorithm, Argon2, Params, Version};
use bcdb_api::auth::{hash_key_with, AUTHORIZATION_HEADER, USER_HEADER};
use bcdb_api::proto::{self, acl_client::AclClient, bcdb_client::BcdbClient};
use bcdb_api::{ApiServer, Authenticator};
use bcdb_core::storage::SqlStorage;
use bcdb_core::AccessController;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::StreamExt;
use tonic::transport::Channel;
use tonic::{Code, Request};

struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    _dir: tempfile::TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

fn cheap_hash(key: &str) -> String {
    let params = Params::new(1024, 1, 1, None).unwrap();
    hash_key_with(&Argon2::new(Algorithm::Argon2id, Version::V0x13, params), key).unwrap()
}

async fn start() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqlStorage::open(dir.path().join("bcdb.db"), 4).unwrap();
    let controller = Arc::new(AccessController::with_storage(Arc::new(storage)));

    let users = HashMap::from([
        ("u1".to_string(), cheap_hash("k1")),
        ("u2".to_string(), cheap_hash("k2")),
        ("root".to_string(), cheap_hash("kr")),
    ]);
    let auth = Arc::new(Authenticator::new(users, Some("root".to_string())));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();

    tokio::spawn(async move {
        ApiServer::new(controller, auth)
            .serve_with_listener(TcpListenerStream::new(listener), async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });

    TestServer {
        addr,
        stop: Some(stop),
        _dir: dir,
    }
}

async fn channel(server: &TestServer) -> Channel {
    Channel::from_shared(format!("http://{}", server.addr))
        .unwrap()
        .connect()
        .await
        .unwrap()
}

fn as_user<T>(user: &str, key: &str, message: T) -> Request<T> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert(USER_HEADER, user.parse().unwrap());
    request
        .metadata_mut()
        .insert(AUTHORIZATION_HEADER, format!("Bearer {}", key).parse().unwrap());
    request
}

fn u1<T>(message: T) -> Request<T> {
    as_user("u1", "k1", message)
}

fn u2<T>(message: T) -> Request<T> {
    as_user("u2", "k2", message)
}

fn rights(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(u, r)| (u.to_string(), r.to_string()))
        .collect()
}

#[tokio::test]
async fn test_set_get_and_permission_denied() {
    let server = start().await;
    let channel = channel(&server).await;
    let mut acls = AclClient::new(channel.clone());
    let mut db = BcdbClient::new(channel);

    let a1 = acls
        .create(u1(proto::AclCreateRequest { rights: rights(&[("u1", "rw")]) }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(a1.rights["u1"], "rw--");

    let r1 = db
        .set(u1(proto::SetRequest {
            data: b"x".to_vec(),
            acl: Some(a1.id.clone()),
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(r1.version, 1);

    let got = db
        .get(u1(proto::GetRequest { id: r1.id.clone(), collection: None }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(got.data, b"x");
    assert_eq!(got.acl, a1.id);

    let denied = db
        .get(u2(proto::GetRequest { id: r1.id.clone(), collection: None }))
        .await
        .unwrap_err();
    assert_eq!(denied.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn test_missing_or_bad_credentials() {
    let server = start().await;
    let mut db = BcdbClient::new(channel(&server).await);

    let anonymous = db
        .get(Request::new(proto::GetRequest { id: "r1".into(), collection: None }))
        .await
        .unwrap_err();
    assert_eq!(anonymous.code(), Code::Unauthenticated);

    let wrong_key = db
        .get(as_user("u1", "k2", proto::GetRequest { id: "r1".into(), collection: None }))
        .await
        .unwrap_err();
    assert_eq!(wrong_key.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn test_error_codes() {
    let server = start().await;
    let mut db = BcdbClient::new(channel(&server).await);

    let record = db
        .set(u1(proto::SetRequest {
            id: Some("doc".into()),
            data: b"v1".to_vec(),
            protected: true,
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner();

    let duplicate = db
        .set(u1(proto::SetRequest { id: Some("doc".into()), ..Default::default() }))
        .await
        .unwrap_err();
    assert_eq!(duplicate.code(), Code::AlreadyExists);

    let missing = db
        .update(u1(proto::UpdateRequest { id: "ghost".into(), ..Default::default() }))
        .await
        .unwrap_err();
    assert_eq!(missing.code(), Code::NotFound);

    let stale = db
        .update(u1(proto::UpdateRequest {
            id: record.id.clone(),
            data: Some(b"v2".to_vec()),
            expected_version: Some(7),
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(stale.code(), Code::Aborted);

    let protected = db
        .delete(u1(proto::DeleteRequest { id: record.id.clone() }))
        .await
        .unwrap_err();
    assert_eq!(protected.code(), Code::FailedPrecondition);

    let bad_id = db
        .get(u1(proto::GetRequest { id: String::new(), collection: None }))
        .await
        .unwrap_err();
    assert_eq!(bad_id.code(), Code::InvalidArgument);

    let updated = db
        .update(u1(proto::UpdateRequest {
            id: record.id.clone(),
            data: Some(b"v2".to_vec()),
            expected_version: Some(1),
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.created_at, record.created_at);
    assert!(updated.updated_at >= record.updated_at);
}

#[tokio::test]
async fn test_list_and_find_streams() {
    let server = start().await;
    let mut db = BcdbClient::new(channel(&server).await);

    for i in 0..10 {
        db.set(u1(proto::SetRequest {
            id: Some(format!("note-{:02}", i)),
            collection: "notes".into(),
            data: vec![i as u8; 8],
            tags: HashMap::from([("parity".to_string(), (i % 2).to_string())]),
            ..Default::default()
        }))
        .await
        .unwrap();
    }

    let even: Vec<_> = db
        .list(u1(proto::QueryRequest {
            tags: HashMap::from([("parity".to_string(), "0".to_string())]),
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner()
        .map(|m| m.unwrap().id)
        .collect()
        .await;
    assert_eq!(even, vec!["note-00", "note-02", "note-04", "note-06", "note-08"]);

    let found: Vec<_> = db
        .find(u1(proto::QueryRequest {
            id_pattern: Some("note-0[789]".into()),
            descending: true,
            limit: Some(2),
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner()
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id, "note-09");
    assert_eq!(found[0].data, vec![9u8; 8]);

    let nothing: Vec<_> = db
        .list(u2(proto::QueryRequest::default()))
        .await
        .unwrap()
        .into_inner()
        .collect()
        .await;
    assert!(nothing.is_empty());

    let invalid = db
        .find(u1(proto::QueryRequest {
            id_pattern: Some("[".into()),
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(invalid.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_acl_lifecycle() {
    let server = start().await;
    let channel = channel(&server).await;
    let mut acls = AclClient::new(channel.clone());
    let mut db = BcdbClient::new(channel);

    let acl = acls
        .create(u1(proto::AclCreateRequest { rights: rights(&[("u1", "rwdg")]) }))
        .await
        .unwrap()
        .into_inner();

    let granted = acls
        .grant(u1(proto::AclUsersRequest {
            id: acl.id.clone(),
            user: "u2".into(),
            rights: "r".into(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(granted.rights["u2"], "r---");

    let seen_by_u2 = acls
        .get(u2(proto::AclGetRequest { id: acl.id.clone() }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(seen_by_u2.id, acl.id);

    let not_granter = acls
        .grant(u2(proto::AclUsersRequest {
            id: acl.id.clone(),
            user: "u2".into(),
            rights: "w".into(),
        }))
        .await
        .unwrap_err();
    assert_eq!(not_granter.code(), Code::PermissionDenied);

    let revoked = acls
        .revoke(u1(proto::AclUsersRequest {
            id: acl.id.clone(),
            user: "u2".into(),
            rights: "r".into(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(!revoked.rights.contains_key("u2"));

    let record = db
        .set(u1(proto::SetRequest { acl: Some(acl.id.clone()), ..Default::default() }))
        .await
        .unwrap()
        .into_inner();

    let referenced = acls
        .delete(u1(proto::AclDeleteRequest { id: acl.id.clone() }))
        .await
        .unwrap_err();
    assert_eq!(referenced.code(), Code::FailedPrecondition);

    let listed: Vec<_> = acls
        .list(u1(proto::AclListRequest { rights: "g".into(), ..Default::default() }))
        .await
        .unwrap()
        .into_inner()
        .map(|a| a.unwrap().id)
        .collect()
        .await;
    assert_eq!(listed, vec![acl.id.clone()]);

    db.delete(u1(proto::DeleteRequest { id: record.id })).await.unwrap();
    acls.delete(u1(proto::AclDeleteRequest { id: acl.id.clone() }))
        .await
        .unwrap();

    let replaced = acls
        .set(as_user(
            "root",
            "kr",
            proto::AclSetRequest { id: acl.id, rights: rights(&[("u2", "r")]) },
        ))
        .await
        .unwrap_err();
    assert_eq!(replaced.code(), Code::NotFound);
}
