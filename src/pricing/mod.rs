use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geo::directions::{Directions, TravelMode};
use crate::geo::haversine_km;
use crate::models::carrier::{CarrierType, GeoPoint};

const PER_MINUTE: f64 = 50.0;
const PER_KM: f64 = 100.0;

pub fn base_fare(carrier_type: CarrierType) -> f64 {
    match carrier_type {
        CarrierType::Carrier => 1_500.0,
        CarrierType::Bicycle => 2_500.0,
        CarrierType::Bike => 3_500.0,
        CarrierType::Car => 4_000.0,
    }
}

fn nominal_speed_kmh(mode: TravelMode) -> f64 {
    match mode {
        TravelMode::Walking => 5.0,
        TravelMode::Bicycling => 15.0,
        TravelMode::Driving => 30.0,
    }
}

pub fn estimate_eta_min(distance_km: f64, mode: TravelMode) -> u32 {
    let minutes = distance_km.max(0.0) / nominal_speed_kmh(mode) * 60.0;
    minutes.ceil() as u32
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Directions,
    Estimate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub carrier_type: CarrierType,
    pub mode: TravelMode,
    pub distance_km: f64,
    pub eta_min: u32,
    pub price: u64,
    pub source: QuoteSource,
}

pub fn quote(carrier_type: CarrierType, distance_km: f64, eta_min: u32, source: QuoteSource) -> Quote {
    let total = base_fare(carrier_type) + PER_MINUTE * eta_min as f64 + PER_KM * distance_km.max(0.0);

    Quote {
        carrier_type,
        mode: TravelMode::for_carrier(carrier_type),
        distance_km,
        eta_min,
        price: total.round() as u64,
        source,
    }
}

/// One quote per carrier type. Routes are looked up once per travel mode;
/// a failed lookup falls back to straight-line distance and a nominal speed.
pub async fn quote_all(
    directions: Option<&dyn Directions>,
    pickup: GeoPoint,
    dropoff: GeoPoint,
) -> Vec<Quote> {
    let straight_km = haversine_km(&pickup, &dropoff);
    let mut routes: HashMap<TravelMode, Option<(f64, u32)>> = HashMap::new();

    let mut quotes = Vec::with_capacity(CarrierType::ALL.len());
    for carrier_type in CarrierType::ALL {
        let mode = TravelMode::for_carrier(carrier_type);

        if !routes.contains_key(&mode) {
            let looked_up = match directions {
                Some(directions) => match directions.route(pickup, dropoff, mode).await {
                    Ok(route) => route.map(|r| (r.distance_km, r.duration_min)),
                    Err(err) => {
                        warn!(error = %err, mode = mode.as_str(), "directions lookup failed; estimating");
                        None
                    }
                },
                None => None,
            };
            routes.insert(mode, looked_up);
        }

        let q = match routes.get(&mode).copied().flatten() {
            Some((distance_km, eta_min)) => quote(carrier_type, distance_km, eta_min, QuoteSource::Directions),
            None => quote(
                carrier_type,
                straight_km,
                estimate_eta_min(straight_km, mode),
                QuoteSource::Estimate,
            ),
        };
        quotes.push(q);
    }

    quotes
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::{QuoteSource, estimate_eta_min, quote, quote_all};
    use crate::error::AppError;
    use crate::geo::directions::{Directions, Route, TravelMode};
    use crate::models::carrier::{CarrierType, GeoPoint};

    struct FixedDirections {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Directions for FixedDirections {
        async fn route(
            &self,
            _origin: GeoPoint,
            _destination: GeoPoint,
            mode: TravelMode,
        ) -> Result<Option<Route>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match mode {
                TravelMode::Walking => Err(AppError::Unavailable("timeout".to_string())),
                _ => Ok(Some(Route {
                    distance_km: 10.0,
                    duration_min: 20,
                    polyline: None,
                })),
            }
        }

        async fn geocode(&self, _address: &str) -> Result<Option<GeoPoint>, AppError> {
            Ok(None)
        }
    }

    #[test]
    fn price_adds_base_time_and_distance() {
        let q = quote(CarrierType::Bike, 10.0, 20, QuoteSource::Directions);
        assert_eq!(q.price, 3_500 + 1_000 + 1_000);
        assert_eq!(q.mode, TravelMode::Driving);
    }

    #[test]
    fn car_costs_more_than_walking_carrier_for_same_trip() {
        let walk = quote(CarrierType::Carrier, 3.0, 36, QuoteSource::Estimate);
        let car = quote(CarrierType::Car, 3.0, 36, QuoteSource::Estimate);
        assert!(car.price > walk.price);
    }

    #[test]
    fn eta_estimate_rounds_up() {
        assert_eq!(estimate_eta_min(10.0, TravelMode::Driving), 20);
        assert_eq!(estimate_eta_min(0.1, TravelMode::Walking), 2);
        assert_eq!(estimate_eta_min(0.0, TravelMode::Walking), 0);
    }

    #[tokio::test]
    async fn failed_lookup_falls_back_to_estimate() {
        let directions = FixedDirections {
            calls: AtomicUsize::new(0),
        };
        let pickup = GeoPoint { lat: 6.6018, lng: 3.3515 };
        let dropoff = GeoPoint { lat: 6.4474, lng: 3.4723 };

        let quotes = quote_all(Some(&directions), pickup, dropoff).await;

        assert_eq!(quotes.len(), 4);
        assert_eq!(quotes[0].source, QuoteSource::Estimate);
        assert!(quotes[1..].iter().all(|q| q.source == QuoteSource::Directions));
        // walking, bicycling, driving: bike and car share one lookup
        assert_eq!(directions.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_directions_client_estimates_everything() {
        let pickup = GeoPoint { lat: 6.6018, lng: 3.3515 };
        let quotes = quote_all(None, pickup, pickup).await;

        assert!(quotes.iter().all(|q| q.source == QuoteSource::Estimate));
        assert_eq!(quotes[0].price, 1_500);
    }
}
