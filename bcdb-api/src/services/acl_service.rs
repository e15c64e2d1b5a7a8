use std::sync::Arc;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};

use super::ResponseStream;
use crate::auth::Authenticator;
use crate::convert;
use crate::proto::{self, acl_server};
use bcdb_core::{AccessController, AclFilter, Rights, UserId};

pub struct AclServiceImpl {
    controller: Arc<AccessController>,
    auth: Arc<Authenticator>,
}

impl AclServiceImpl {
    pub fn new(controller: Arc<AccessController>, auth: Arc<Authenticator>) -> Self {
        Self { controller, auth }
    }
}

#[tonic::async_trait]
impl acl_server::Acl for AclServiceImpl {
    type ListStream = ResponseStream<proto::Acl>;

    async fn get(
        &self,
        request: Request<proto::AclGetRequest>,
    ) -> Result<Response<proto::Acl>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let id = convert::acl_id(request.into_inner().id)?;

        let acl = self.controller.acl_get(&caller, &id).await?;
        Ok(Response::new(acl.into()))
    }

    async fn create(
        &self,
        request: Request<proto::AclCreateRequest>,
    ) -> Result<Response<proto::Acl>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let rights = convert::rights_in(request.into_inner().rights)?;

        let acl = self.controller.acl_create(&caller, rights).await?;
        Ok(Response::new(acl.into()))
    }

    async fn list(
        &self,
        request: Request<proto::AclListRequest>,
    ) -> Result<Response<Self::ListStream>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let filter = AclFilter::try_from(request.into_inner())?;

        let stream = self.controller.acl_list(&caller, filter).await?;
        let stream = stream.map(|item| item.map(proto::Acl::from).map_err(Status::from));
        Ok(Response::new(Box::pin(stream) as Self::ListStream))
    }

    async fn set(
        &self,
        request: Request<proto::AclSetRequest>,
    ) -> Result<Response<proto::Acl>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let req = request.into_inner();
        let id = convert::acl_id(req.id)?;
        let rights = convert::rights_in(req.rights)?;

        let acl = self.controller.acl_set(&caller, &id, rights).await?;
        Ok(Response::new(acl.into()))
    }

    async fn grant(
        &self,
        request: Request<proto::AclUsersRequest>,
    ) -> Result<Response<proto::Acl>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let req = request.into_inner();
        let id = convert::acl_id(req.id)?;
        let rights = req.rights.parse::<Rights>()?;

        let acl = self
            .controller
            .acl_grant(&caller, &id, UserId::new(req.user), rights)
            .await?;
        Ok(Response::new(acl.into()))
    }

    async fn revoke(
        &self,
        request: Request<proto::AclUsersRequest>,
    ) -> Result<Response<proto::Acl>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let req = request.into_inner();
        let id = convert::acl_id(req.id)?;
        let rights = req.rights.parse::<Rights>()?;

        let acl = self
            .controller
            .acl_revoke(&caller, &id, UserId::new(req.user), rights)
            .await?;
        Ok(Response::new(acl.into()))
    }

    async fn delete(
        &self,
        request: Request<proto::AclDeleteRequest>,
    ) -> Result<Response<proto::DeleteResponse>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let id = convert::acl_id(request.into_inner().id)?;

        self.controller.acl_delete(&caller, &id).await?;
        Ok(Response::new(proto::DeleteResponse {}))
    }
}
