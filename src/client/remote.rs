use async_trait::async_trait;
use tokio_stream::StreamExt;
use tonic::transport::Channel;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::grpc::convert::{
    carrier_from_proto, carrier_to_proto, event_from_proto, filter_to_proto, request_from_proto,
    request_to_proto,
};
use crate::api::grpc::pb;
use crate::api::grpc::pb::carrier_match_client::CarrierMatchClient;
use crate::error::AppError;
use crate::feed::{ChangeFeed, FeedFilter, Subscription};
use crate::models::carrier::{CarrierProfile, CarrierType, GeoPoint};
use crate::models::request::DeliveryRequest;
use crate::store::{ClaimOutcome, PresenceStore, RequestLedger, RequestQuery};

#[derive(Clone)]
pub struct RemoteBackend {
    client: CarrierMatchClient<Channel>,
}

impl RemoteBackend {
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self, AppError> {
        let endpoint = endpoint.into();
        let client = CarrierMatchClient::connect(endpoint.clone()).await?;
        debug!(%endpoint, "connected to carrier-match backend");
        Ok(Self { client })
    }

    fn client(&self) -> CarrierMatchClient<Channel> {
        self.client.clone()
    }
}

fn not_found_as_none<T>(result: Result<T, tonic::Status>) -> Result<Option<T>, AppError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(status) if status.code() == tonic::Code::NotFound => Ok(None),
        Err(status) => Err(status.into()),
    }
}

fn required<T>(value: Option<T>, what: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::Internal(format!("backend response without {what}")))
}

#[async_trait]
impl RequestLedger for RemoteBackend {
    async fn insert_request(&self, request: DeliveryRequest) -> Result<DeliveryRequest, AppError> {
        let row = self
            .client()
            .insert_request(request_to_proto(&request))
            .await?
            .into_inner();
        request_from_proto(row)
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<DeliveryRequest>, AppError> {
        let response = self
            .client()
            .get_request(pb::GetRequestRequest { id: id.to_string() })
            .await;

        match not_found_as_none(response)? {
            Some(response) => {
                let row = required(response.into_inner().request, "request")?;
                request_from_proto(row).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn open_requests(&self, carrier_type: CarrierType) -> Result<Vec<DeliveryRequest>, AppError> {
        self.client()
            .list_open_requests(pb::ListOpenRequestsRequest {
                carrier_type: carrier_type.as_str().to_string(),
            })
            .await?
            .into_inner()
            .requests
            .into_iter()
            .map(request_from_proto)
            .collect()
    }

    async fn claim(&self, id: Uuid, carrier_id: Uuid) -> Result<ClaimOutcome, AppError> {
        let response = self
            .client()
            .claim_request(pb::ClaimRequestRequest {
                id: id.to_string(),
                carrier_id: carrier_id.to_string(),
            })
            .await?
            .into_inner();

        if !response.claimed {
            return Ok(ClaimOutcome::Lost);
        }
        let row = required(response.request, "claimed request")?;
        Ok(ClaimOutcome::Won(request_from_proto(row)?))
    }

    async fn reopen(&self, id: Uuid) -> Result<Option<DeliveryRequest>, AppError> {
        self.client()
            .reopen_request(pb::ReopenRequestRequest { id: id.to_string() })
            .await?
            .into_inner()
            .request
            .map(request_from_proto)
            .transpose()
    }

    async fn withdraw(&self, id: Uuid, requester_id: Uuid) -> Result<Option<DeliveryRequest>, AppError> {
        self.client()
            .withdraw_request(pb::WithdrawRequestRequest {
                id: id.to_string(),
                requester_id: requester_id.to_string(),
            })
            .await?
            .into_inner()
            .request
            .map(request_from_proto)
            .transpose()
    }

    async fn list_requests(&self, query: RequestQuery) -> Result<Vec<DeliveryRequest>, AppError> {
        let mut req = pb::ListRequestsRequest::default();
        match query {
            RequestQuery::ByRequester(id) => req.requester_id = id.to_string(),
            RequestQuery::ByAssignedCarrier(id) => req.carrier_id = id.to_string(),
        }

        self.client()
            .list_requests(req)
            .await?
            .into_inner()
            .requests
            .into_iter()
            .map(request_from_proto)
            .collect()
    }
}

#[async_trait]
impl PresenceStore for RemoteBackend {
    async fn create_profile(&self, profile: CarrierProfile) -> Result<CarrierProfile, AppError> {
        let row = self
            .client()
            .create_carrier(carrier_to_proto(&profile))
            .await?
            .into_inner();
        carrier_from_proto(row)
    }

    async fn get_profile(&self, carrier_id: Uuid) -> Result<Option<CarrierProfile>, AppError> {
        let response = self
            .client()
            .get_carrier(pb::GetCarrierRequest {
                carrier_id: carrier_id.to_string(),
            })
            .await;

        match not_found_as_none(response)? {
            Some(response) => {
                let row = required(response.into_inner().carrier, "carrier")?;
                carrier_from_proto(row).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn update_presence(
        &self,
        carrier_id: Uuid,
        online: bool,
        location: Option<GeoPoint>,
    ) -> Result<u64, AppError> {
        let response = self
            .client()
            .update_presence(pb::UpdatePresenceRequest {
                carrier_id: carrier_id.to_string(),
                online,
                location: location.map(Into::into),
            })
            .await?;
        Ok(response.into_inner().rows)
    }

    async fn update_location(&self, carrier_id: Uuid, location: GeoPoint) -> Result<u64, AppError> {
        let response = self
            .client()
            .update_location(pb::UpdateLocationRequest {
                carrier_id: carrier_id.to_string(),
                location: Some(location.into()),
            })
            .await?;
        Ok(response.into_inner().rows)
    }

    async fn online_carriers(
        &self,
        carrier_type: Option<CarrierType>,
    ) -> Result<Vec<CarrierProfile>, AppError> {
        self.client()
            .list_online_carriers(pb::ListOnlineCarriersRequest {
                carrier_type: carrier_type.map(|ct| ct.as_str().to_string()).unwrap_or_default(),
            })
            .await?
            .into_inner()
            .carriers
            .into_iter()
            .map(carrier_from_proto)
            .collect()
    }
}

#[async_trait]
impl ChangeFeed for RemoteBackend {
    async fn subscribe(&self, filter: FeedFilter) -> Result<Subscription, AppError> {
        let stream = self
            .client()
            .watch_changes(filter_to_proto(filter))
            .await?
            .into_inner()
            .filter_map(move |item| match item {
                Ok(event) => match event_from_proto(event) {
                    Ok(event) => Some(event),
                    Err(err) => {
                        warn!(?filter, error = %err, "dropping malformed change event");
                        None
                    }
                },
                Err(status) => {
                    warn!(?filter, error = %status, "change feed stream error");
                    None
                }
            });

        Ok(Subscription::new(filter, stream))
    }
}
