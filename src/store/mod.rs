pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::carrier::{CarrierProfile, CarrierType, GeoPoint};
use crate::models::request::DeliveryRequest;

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Won(DeliveryRequest),
    Lost,
}

impl ClaimOutcome {
    pub fn rows_affected(&self) -> u64 {
        match self {
            ClaimOutcome::Won(_) => 1,
            ClaimOutcome::Lost => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestQuery {
    ByRequester(Uuid),
    ByAssignedCarrier(Uuid),
}

#[async_trait]
pub trait RequestLedger: Send + Sync {
    async fn insert_request(&self, request: DeliveryRequest) -> Result<DeliveryRequest, AppError>;

    async fn get_request(&self, id: Uuid) -> Result<Option<DeliveryRequest>, AppError>;

    async fn open_requests(&self, carrier_type: CarrierType) -> Result<Vec<DeliveryRequest>, AppError>;

    /// Sets `assigned_carrier_id` and `accepted` together, only while the row
    /// is still pending and unassigned.
    async fn claim(&self, id: Uuid, carrier_id: Uuid) -> Result<ClaimOutcome, AppError>;

    /// Re-broadcasts an unassigned request as pending. Returns `None` when the
    /// request is assigned or missing; an assignment is never undone.
    async fn reopen(&self, id: Uuid) -> Result<Option<DeliveryRequest>, AppError>;

    async fn withdraw(&self, id: Uuid, requester_id: Uuid) -> Result<Option<DeliveryRequest>, AppError>;

    async fn list_requests(&self, query: RequestQuery) -> Result<Vec<DeliveryRequest>, AppError>;
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn create_profile(&self, profile: CarrierProfile) -> Result<CarrierProfile, AppError>;

    /// `Ok(None)` means the row does not exist; a row hidden by the access
    /// policy yields `PolicyRejected`.
    async fn get_profile(&self, carrier_id: Uuid) -> Result<Option<CarrierProfile>, AppError>;

    async fn update_presence(
        &self,
        carrier_id: Uuid,
        online: bool,
        location: Option<GeoPoint>,
    ) -> Result<u64, AppError>;

    async fn update_location(&self, carrier_id: Uuid, location: GeoPoint) -> Result<u64, AppError>;

    async fn online_carriers(
        &self,
        carrier_type: Option<CarrierType>,
    ) -> Result<Vec<CarrierProfile>, AppError>;
}
