use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::carrier::GeoPoint;
use crate::pricing::{Quote, quote_all};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/quotes", post(create_quotes))
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum Place {
    Point(GeoPoint),
    Address { address: String },
}

#[derive(Deserialize)]
pub struct QuoteRequest {
    pub pickup: Place,
    pub dropoff: Place,
}

#[derive(Serialize)]
pub struct QuoteResponse {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub quotes: Vec<Quote>,
}

async fn resolve(state: &AppState, field: &'static str, place: Place) -> Result<GeoPoint, AppError> {
    let point = match place {
        Place::Point(point) => point,
        Place::Address { address } => {
            let directions = state.directions.as_ref().ok_or_else(|| {
                AppError::validation(field, "addresses need geocoding, which is not configured")
            })?;
            directions
                .geocode(&address)
                .await?
                .ok_or_else(|| AppError::validation(field, format!("address not found: {address}")))?
        }
    };

    if !point.is_valid() {
        return Err(AppError::validation(field, "coordinates out of range"));
    }
    Ok(point)
}

async fn create_quotes(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QuoteRequest>,
) -> Result<Json<QuoteResponse>, AppError> {
    let pickup = resolve(&state, "pickup", payload.pickup).await?;
    let dropoff = resolve(&state, "dropoff", payload.dropoff).await?;

    let quotes = quote_all(state.directions.as_deref(), pickup, dropoff).await;

    Ok(Json(QuoteResponse {
        pickup,
        dropoff,
        quotes,
    }))
}
