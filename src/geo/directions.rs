use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::carrier::{CarrierType, GeoPoint};
use crate::models::request::NewDeliveryRequest;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    Walking,
    Bicycling,
    Driving,
}

impl TravelMode {
    pub fn for_carrier(carrier_type: CarrierType) -> Self {
        match carrier_type {
            CarrierType::Carrier => TravelMode::Walking,
            CarrierType::Bicycle => TravelMode::Bicycling,
            CarrierType::Bike | CarrierType::Car => TravelMode::Driving,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Walking => "walking",
            TravelMode::Bicycling => "bicycling",
            TravelMode::Driving => "driving",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub distance_km: f64,
    pub duration_min: u32,
    pub polyline: Option<String>,
}

#[async_trait]
pub trait Directions: Send + Sync {
    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        mode: TravelMode,
    ) -> Result<Option<Route>, AppError>;

    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>, AppError>;
}

/// Fills in missing party coordinates from their addresses. A failed lookup
/// leaves them empty.
pub async fn locate_parties(directions: &dyn Directions, payload: &mut NewDeliveryRequest) {
    for (party_role, party) in [("sender", &mut payload.sender), ("receiver", &mut payload.receiver)] {
        if party.coordinates.is_some() {
            continue;
        }

        match directions.geocode(&party.location).await {
            Ok(Some(point)) if point.is_valid() => party.coordinates = Some(point),
            Ok(_) => debug!(party_role, "address not geocoded"),
            Err(err) => warn!(party_role, error = %err, "geocoding failed; coordinates left empty"),
        }
    }
}

pub struct GoogleDirections {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GoogleDirections {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    routes: Vec<RouteBody>,
}

#[derive(Deserialize)]
struct RouteBody {
    #[serde(default)]
    legs: Vec<LegBody>,
    overview_polyline: Option<PolylineBody>,
}

#[derive(Deserialize)]
struct LegBody {
    distance: ValueBody,
    duration: ValueBody,
}

#[derive(Deserialize)]
struct ValueBody {
    value: f64,
}

#[derive(Deserialize)]
struct PolylineBody {
    points: String,
}

#[derive(Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    geometry: GeometryBody,
}

#[derive(Deserialize)]
struct GeometryBody {
    location: GeoPoint,
}

fn first_route(body: DirectionsResponse) -> Option<Route> {
    if body.status != "OK" {
        debug!(status = %body.status, "directions returned no route");
        return None;
    }

    let route = body.routes.into_iter().next()?;
    let leg = route.legs.first()?;

    Some(Route {
        distance_km: leg.distance.value / 1_000.0,
        duration_min: (leg.duration.value / 60.0).round() as u32,
        polyline: route.overview_polyline.map(|p| p.points),
    })
}

#[async_trait]
impl Directions for GoogleDirections {
    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        mode: TravelMode,
    ) -> Result<Option<Route>, AppError> {
        let url = format!("{}/directions/json", self.base_url);
        let origin = format!("{},{}", origin.lat, origin.lng);
        let destination = format!("{},{}", destination.lat, destination.lng);

        let response = self
            .http
            .get(url)
            .query(&[
                ("origin", origin.as_str()),
                ("destination", destination.as_str()),
                ("mode", mode.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: DirectionsResponse = response.json().await?;
        Ok(first_route(body))
    }

    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>, AppError> {
        if address.trim().is_empty() {
            return Ok(None);
        }

        let url = format!("{}/geocode/json", self.base_url);
        let response = self
            .http
            .get(url)
            .query(&[("address", address), ("key", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?;

        let body: GeocodeResponse = response.json().await?;
        if body.status != "OK" {
            warn!(status = %body.status, "geocoding returned no result");
            return Ok(None);
        }

        Ok(body.results.into_iter().next().map(|r| r.geometry.location))
    }
}
