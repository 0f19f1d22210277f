use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::directions::locate_parties;
use crate::models::carrier::CarrierType;
use crate::models::request::{DeliveryRequest, NewDeliveryRequest};
use crate::state::AppState;
use crate::store::{ClaimOutcome, RequestLedger, RequestQuery};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/requests", post(create_request).get(list_requests))
        .route("/requests/open", get(open_requests))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/claim", post(claim_request))
        .route("/requests/:id/reopen", post(reopen_request))
        .route("/requests/:id/withdraw", post(withdraw_request))
}

#[derive(Deserialize)]
pub struct CreateRequestBody {
    pub requester_id: Uuid,
    #[serde(flatten)]
    pub request: NewDeliveryRequest,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub requester_id: Option<Uuid>,
    pub carrier_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct OpenQuery {
    pub carrier_type: String,
}

#[derive(Deserialize)]
pub struct ClaimBody {
    pub carrier_id: Uuid,
}

#[derive(Deserialize)]
pub struct WithdrawBody {
    pub requester_id: Uuid,
}

#[derive(Serialize)]
pub struct ClaimResponse {
    pub claimed: bool,
    pub rows_affected: u64,
    pub request: Option<DeliveryRequest>,
}

#[derive(Serialize)]
pub struct UpdateResponse {
    pub updated: bool,
    pub request: Option<DeliveryRequest>,
}

async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRequestBody>,
) -> Result<Json<DeliveryRequest>, AppError> {
    let mut new_request = payload.request;
    new_request.validate()?;
    if let Some(directions) = &state.directions {
        locate_parties(directions.as_ref(), &mut new_request).await;
    }

    let request = new_request.into_request(payload.requester_id)?;
    let request = state.backend.insert_request(request).await?;
    Ok(Json(request))
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<DeliveryRequest>>, AppError> {
    let query = match (query.requester_id, query.carrier_id) {
        (Some(id), None) => RequestQuery::ByRequester(id),
        (None, Some(id)) => RequestQuery::ByAssignedCarrier(id),
        _ => {
            return Err(AppError::BadRequest(
                "exactly one of requester_id, carrier_id is required".to_string(),
            ));
        }
    };

    Ok(Json(state.backend.list_requests(query).await?))
}

async fn open_requests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OpenQuery>,
) -> Result<Json<Vec<DeliveryRequest>>, AppError> {
    let carrier_type: CarrierType = query.carrier_type.parse()?;
    Ok(Json(state.backend.open_requests(carrier_type).await?))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryRequest>, AppError> {
    state
        .backend
        .get_request(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("request {id} not found")))
}

async fn claim_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ClaimBody>,
) -> Result<Json<ClaimResponse>, AppError> {
    let outcome = state.backend.claim(id, payload.carrier_id).await?;
    let rows_affected = outcome.rows_affected();

    let response = match outcome {
        ClaimOutcome::Won(request) => ClaimResponse {
            claimed: true,
            rows_affected,
            request: Some(request),
        },
        ClaimOutcome::Lost => ClaimResponse {
            claimed: false,
            rows_affected,
            request: None,
        },
    };

    Ok(Json(response))
}

async fn reopen_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<UpdateResponse>, AppError> {
    let request = state.backend.reopen(id).await?;

    Ok(Json(UpdateResponse {
        updated: request.is_some(),
        request,
    }))
}

async fn withdraw_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<WithdrawBody>,
) -> Result<Json<UpdateResponse>, AppError> {
    let request = state.backend.withdraw(id, payload.requester_id).await?;

    Ok(Json(UpdateResponse {
        updated: request.is_some(),
        request,
    }))
}
