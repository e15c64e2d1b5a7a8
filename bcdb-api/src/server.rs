use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;
use tonic::transport::Server;
use tracing::info;

use crate::auth::Authenticator;
use crate::proto::{acl_server::AclServer, bcdb_server::BcdbServer};
use crate::services::{AclServiceImpl, BcdbServiceImpl};
use bcdb_core::AccessController;

/// The `bcdb.Bcdb` and `bcdb.Acl` services over one controller
pub struct ApiServer {
    controller: Arc<AccessController>,
    auth: Arc<Authenticator>,
}

impl ApiServer {
    pub fn new(controller: Arc<AccessController>, auth: Arc<Authenticator>) -> Self {
        Self { controller, auth }
    }

    fn router(self) -> Router {
        let bcdb = BcdbServiceImpl::new(self.controller.clone(), self.auth.clone());
        let acl = AclServiceImpl::new(self.controller, self.auth);

        Server::builder()
            .add_service(BcdbServer::new(bcdb))
            .add_service(AclServer::new(acl))
    }

    /// Serve on `addr` until `shutdown` resolves
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()>,
    {
        info!(%addr, "BCDB gRPC server listening");
        self.router().serve_with_shutdown(addr, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve_with_listener<F>(
        self,
        listener: TcpListenerStream,
        shutdown: F,
    ) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()>,
    {
        self.router()
            .serve_with_incoming_shutdown(listener, shutdown)
            .await
    }
}
