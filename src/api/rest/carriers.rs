use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::carrier::{CarrierProfile, CarrierType, GeoPoint};
use crate::state::AppState;
use crate::store::PresenceStore;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/carriers", post(create_carrier).get(list_carriers))
        .route("/carriers/:id", get(get_carrier))
        .route("/carriers/:id/presence", patch(update_presence))
        .route("/carriers/:id/location", patch(update_location))
}

#[derive(Deserialize)]
pub struct CreateCarrierRequest {
    pub carrier_id: Option<Uuid>,
    pub carrier_type: String,
    pub display_name: String,
    pub profile_image_url: Option<String>,
}

#[derive(Deserialize)]
pub struct ListCarriersQuery {
    pub carrier_type: Option<String>,
    #[serde(default)]
    pub online: bool,
}

#[derive(Deserialize)]
pub struct UpdatePresenceRequest {
    pub online: bool,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Serialize)]
pub struct WriteResponse {
    pub rows_affected: u64,
    pub carrier: Option<CarrierProfile>,
}

fn parse_carrier_type(raw: Option<&str>) -> Result<Option<CarrierType>, AppError> {
    raw.filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .transpose()
}

fn check_point(point: &GeoPoint) -> Result<(), AppError> {
    if point.is_valid() {
        Ok(())
    } else {
        Err(AppError::validation("location", "coordinates out of range"))
    }
}

async fn create_carrier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCarrierRequest>,
) -> Result<Json<CarrierProfile>, AppError> {
    if payload.display_name.trim().is_empty() {
        return Err(AppError::validation("display_name", "display name cannot be empty"));
    }

    let carrier_type: CarrierType = payload.carrier_type.parse()?;
    let mut profile = CarrierProfile::new(
        payload.carrier_id.unwrap_or_else(Uuid::new_v4),
        carrier_type,
        payload.display_name.trim(),
    );
    profile.profile_image_url = payload.profile_image_url;

    let profile = state.backend.create_profile(profile).await?;
    Ok(Json(profile))
}

async fn list_carriers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListCarriersQuery>,
) -> Result<Json<Vec<CarrierProfile>>, AppError> {
    let carrier_type = parse_carrier_type(query.carrier_type.as_deref())?;

    let carriers = if query.online {
        state.backend.online_carriers(carrier_type).await?
    } else {
        state
            .backend
            .all_carriers()
            .into_iter()
            .filter(|c| carrier_type.is_none_or(|wanted| c.carrier_type == wanted))
            .collect()
    };

    Ok(Json(carriers))
}

async fn get_carrier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CarrierProfile>, AppError> {
    state
        .backend
        .get_profile(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("carrier {id} not found")))
}

async fn update_presence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePresenceRequest>,
) -> Result<Json<WriteResponse>, AppError> {
    if let Some(point) = &payload.location {
        check_point(point)?;
    }

    let rows_affected = state
        .backend
        .update_presence(id, payload.online, payload.location)
        .await?;
    let carrier = state.backend.get_profile(id).await?;

    Ok(Json(WriteResponse {
        rows_affected,
        carrier,
    }))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<WriteResponse>, AppError> {
    check_point(&payload.location)?;

    let rows_affected = state.backend.update_location(id, payload.location).await?;
    let carrier = state.backend.get_profile(id).await?;

    Ok(Json(WriteResponse {
        rows_affected,
        carrier,
    }))
}
