use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status};

use crate::auth::Authenticator;
use crate::convert;
use crate::proto::{self, bcdb_server};
use bcdb_core::{AccessController, NewRecord, RecordFilter};

pub type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

pub struct BcdbServiceImpl {
    controller: Arc<AccessController>,
    auth: Arc<Authenticator>,
}

impl BcdbServiceImpl {
    pub fn new(controller: Arc<AccessController>, auth: Arc<Authenticator>) -> Self {
        Self { controller, auth }
    }
}

#[tonic::async_trait]
impl bcdb_server::Bcdb for BcdbServiceImpl {
    type ListStream = ResponseStream<proto::RecordMeta>;
    type FindStream = ResponseStream<proto::Record>;

    async fn set(
        &self,
        request: Request<proto::SetRequest>,
    ) -> Result<Response<proto::Record>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let new = NewRecord::try_from(request.into_inner())?;

        let record = self.controller.set(&caller, new).await?;
        Ok(Response::new(record.into()))
    }

    async fn get(
        &self,
        request: Request<proto::GetRequest>,
    ) -> Result<Response<proto::Record>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let req = request.into_inner();
        let id = convert::record_id(req.id)?;

        let record = self
            .controller
            .get(&caller, &id, req.collection.as_deref())
            .await?;
        Ok(Response::new(record.into()))
    }

    async fn head(
        &self,
        request: Request<proto::GetRequest>,
    ) -> Result<Response<proto::RecordMeta>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let req = request.into_inner();
        let id = convert::record_id(req.id)?;

        let meta = self
            .controller
            .head(&caller, &id, req.collection.as_deref())
            .await?;
        Ok(Response::new(meta.into()))
    }

    async fn update(
        &self,
        request: Request<proto::UpdateRequest>,
    ) -> Result<Response<proto::Record>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let (id, update) = convert::update_in(request.into_inner())?;

        let record = self.controller.update(&caller, &id, update).await?;
        Ok(Response::new(record.into()))
    }

    async fn delete(
        &self,
        request: Request<proto::DeleteRequest>,
    ) -> Result<Response<proto::DeleteResponse>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let id = convert::record_id(request.into_inner().id)?;

        self.controller.delete(&caller, &id).await?;
        Ok(Response::new(proto::DeleteResponse {}))
    }

    async fn list(
        &self,
        request: Request<proto::QueryRequest>,
    ) -> Result<Response<Self::ListStream>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let filter = RecordFilter::try_from(request.into_inner())?;

        let stream = self.controller.list(&caller, filter).await?;
        let stream = stream.map(|item| item.map(proto::RecordMeta::from).map_err(Status::from));
        Ok(Response::new(Box::pin(stream) as Self::ListStream))
    }

    async fn find(
        &self,
        request: Request<proto::QueryRequest>,
    ) -> Result<Response<Self::FindStream>, Status> {
        let caller = self.auth.authenticate(request.metadata()).await?;
        let filter = RecordFilter::try_from(request.into_inner())?;

        let stream = self.controller.find(&caller, filter).await?;
        let stream = stream.map(|item| item.map(proto::Record::from).map_err(Status::from));
        Ok(Response::new(Box::pin(stream) as Self::FindStream))
    }
}
