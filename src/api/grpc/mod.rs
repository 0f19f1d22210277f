pub mod convert;

use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::feed::ChangeFeed;
use crate::models::carrier::CarrierProfile;
use crate::state::AppState;
use crate::store::{ClaimOutcome, PresenceStore, RequestLedger, RequestQuery};

use convert::{
    carrier_from_proto, carrier_to_proto, event_to_proto, filter_from_proto, parse_carrier_type,
    parse_uuid, request_from_proto, request_to_proto,
};

pub mod pb {
    tonic::include_proto!("carrier_match");
}

use pb::carrier_match_server::CarrierMatch;
use pb::{
    ClaimRequestRequest, ClaimRequestResponse, DeliveryRequest, GetCarrierRequest,
    GetCarrierResponse, GetRequestRequest, GetRequestResponse, ListCarriersResponse,
    ListOnlineCarriersRequest, ListOpenRequestsRequest, ListRequestsRequest, ListRequestsResponse,
    ReopenRequestRequest, RowsAffected, UpdateLocationRequest, UpdatePresenceRequest,
    UpdateRequestResponse, WatchChangesRequest, WithdrawRequestRequest,
};

pub struct GrpcCarrierMatchService {
    state: Arc<AppState>,
}

impl GrpcCarrierMatchService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl CarrierMatch for GrpcCarrierMatchService {
    async fn insert_request(
        &self,
        request: Request<DeliveryRequest>,
    ) -> Result<Response<DeliveryRequest>, Status> {
        let row = request_from_proto(request.into_inner())?;
        if !row.is_open() {
            return Err(Status::invalid_argument(
                "new requests must be pending and unassigned",
            ));
        }

        let row = self.state.backend.insert_request(row).await?;
        Ok(Response::new(request_to_proto(&row)))
    }

    async fn get_request(
        &self,
        request: Request<GetRequestRequest>,
    ) -> Result<Response<GetRequestResponse>, Status> {
        let id = parse_uuid("id", &request.into_inner().id)?;
        let row = self
            .state
            .backend
            .get_request(id)
            .await?
            .ok_or_else(|| Status::not_found(format!("request {id} not found")))?;

        Ok(Response::new(GetRequestResponse {
            request: Some(request_to_proto(&row)),
        }))
    }

    async fn list_open_requests(
        &self,
        request: Request<ListOpenRequestsRequest>,
    ) -> Result<Response<ListRequestsResponse>, Status> {
        let carrier_type = parse_carrier_type(&request.into_inner().carrier_type)?
            .ok_or_else(|| Status::invalid_argument("carrier_type is required"))?;

        let requests = self
            .state
            .backend
            .open_requests(carrier_type)
            .await?
            .iter()
            .map(request_to_proto)
            .collect();

        Ok(Response::new(ListRequestsResponse { requests }))
    }

    async fn claim_request(
        &self,
        request: Request<ClaimRequestRequest>,
    ) -> Result<Response<ClaimRequestResponse>, Status> {
        let req = request.into_inner();
        let id = parse_uuid("id", &req.id)?;
        let carrier_id = parse_uuid("carrier_id", &req.carrier_id)?;

        let response = match self.state.backend.claim(id, carrier_id).await? {
            ClaimOutcome::Won(row) => ClaimRequestResponse {
                claimed: true,
                request: Some(request_to_proto(&row)),
            },
            ClaimOutcome::Lost => ClaimRequestResponse {
                claimed: false,
                request: None,
            },
        };

        Ok(Response::new(response))
    }

    async fn reopen_request(
        &self,
        request: Request<ReopenRequestRequest>,
    ) -> Result<Response<UpdateRequestResponse>, Status> {
        let id = parse_uuid("id", &request.into_inner().id)?;
        let row = self.state.backend.reopen(id).await?;

        Ok(Response::new(UpdateRequestResponse {
            request: row.as_ref().map(request_to_proto),
        }))
    }

    async fn withdraw_request(
        &self,
        request: Request<WithdrawRequestRequest>,
    ) -> Result<Response<UpdateRequestResponse>, Status> {
        let req = request.into_inner();
        let id = parse_uuid("id", &req.id)?;
        let requester_id = parse_uuid("requester_id", &req.requester_id)?;
        let row = self.state.backend.withdraw(id, requester_id).await?;

        Ok(Response::new(UpdateRequestResponse {
            request: row.as_ref().map(request_to_proto),
        }))
    }

    async fn list_requests(
        &self,
        request: Request<ListRequestsRequest>,
    ) -> Result<Response<ListRequestsResponse>, Status> {
        let req = request.into_inner();
        let query = match (req.requester_id.is_empty(), req.carrier_id.is_empty()) {
            (false, true) => RequestQuery::ByRequester(parse_uuid("requester_id", &req.requester_id)?),
            (true, false) => {
                RequestQuery::ByAssignedCarrier(parse_uuid("carrier_id", &req.carrier_id)?)
            }
            _ => {
                return Err(Status::invalid_argument(
                    "exactly one of requester_id, carrier_id is required",
                ));
            }
        };

        let requests = self
            .state
            .backend
            .list_requests(query)
            .await?
            .iter()
            .map(request_to_proto)
            .collect();

        Ok(Response::new(ListRequestsResponse { requests }))
    }

    async fn create_carrier(
        &self,
        request: Request<pb::CarrierProfile>,
    ) -> Result<Response<pb::CarrierProfile>, Status> {
        let profile: CarrierProfile = carrier_from_proto(request.into_inner())?;
        if profile.display_name.trim().is_empty() {
            return Err(Status::invalid_argument("display_name cannot be empty"));
        }

        let profile = self.state.backend.create_profile(profile).await?;
        Ok(Response::new(carrier_to_proto(&profile)))
    }

    async fn get_carrier(
        &self,
        request: Request<GetCarrierRequest>,
    ) -> Result<Response<GetCarrierResponse>, Status> {
        let carrier_id = parse_uuid("carrier_id", &request.into_inner().carrier_id)?;
        let profile = self
            .state
            .backend
            .get_profile(carrier_id)
            .await?
            .ok_or_else(|| Status::not_found(format!("carrier {carrier_id} not found")))?;

        Ok(Response::new(GetCarrierResponse {
            carrier: Some(carrier_to_proto(&profile)),
        }))
    }

    async fn update_presence(
        &self,
        request: Request<UpdatePresenceRequest>,
    ) -> Result<Response<RowsAffected>, Status> {
        let req = request.into_inner();
        let carrier_id = parse_uuid("carrier_id", &req.carrier_id)?;
        let rows = self
            .state
            .backend
            .update_presence(carrier_id, req.online, req.location.map(Into::into))
            .await?;

        Ok(Response::new(RowsAffected { rows }))
    }

    async fn update_location(
        &self,
        request: Request<UpdateLocationRequest>,
    ) -> Result<Response<RowsAffected>, Status> {
        let req = request.into_inner();
        let carrier_id = parse_uuid("carrier_id", &req.carrier_id)?;
        let location = req
            .location
            .ok_or_else(|| Status::invalid_argument("location is required"))?;

        let rows = self
            .state
            .backend
            .update_location(carrier_id, location.into())
            .await?;

        Ok(Response::new(RowsAffected { rows }))
    }

    async fn list_online_carriers(
        &self,
        request: Request<ListOnlineCarriersRequest>,
    ) -> Result<Response<ListCarriersResponse>, Status> {
        let carrier_type = parse_carrier_type(&request.into_inner().carrier_type)?;
        let carriers = self
            .state
            .backend
            .online_carriers(carrier_type)
            .await?
            .iter()
            .map(carrier_to_proto)
            .collect();

        Ok(Response::new(ListCarriersResponse { carriers }))
    }

    type WatchChangesStream = Pin<Box<dyn Stream<Item = Result<pb::ChangeEvent, Status>> + Send>>;

    async fn watch_changes(
        &self,
        request: Request<WatchChangesRequest>,
    ) -> Result<Response<Self::WatchChangesStream>, Status> {
        let filter = filter_from_proto(&request.into_inner())?;
        let subscription = self.state.backend.subscribe(filter).await?;
        info!(?filter, "grpc change feed opened");

        let stream = subscription
            .into_stream()
            .map(|event| Ok(event_to_proto(&event)));

        Ok(Response::new(Box::pin(stream)))
    }
}
