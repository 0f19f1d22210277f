use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CarrierType {
    Carrier,
    Bicycle,
    Bike,
    Car,
}

impl CarrierType {
    pub const ALL: [CarrierType; 4] = [
        CarrierType::Carrier,
        CarrierType::Bicycle,
        CarrierType::Bike,
        CarrierType::Car,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CarrierType::Carrier => "Carrier",
            CarrierType::Bicycle => "Bicycle",
            CarrierType::Bike => "Bike",
            CarrierType::Car => "Car",
        }
    }
}

impl fmt::Display for CarrierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CarrierType {
    type Err = AppError;

    // Accepts the card titles shown to senders as well as the stored names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Carrier" => Ok(CarrierType::Carrier),
            "Bicycle" | "Bicycle Carrier" => Ok(CarrierType::Bicycle),
            "Bike" | "Bike Carrier" => Ok(CarrierType::Bike),
            "Car" | "Car Carrier" => Ok(CarrierType::Car),
            other => Err(AppError::validation(
                "carrier_type",
                format!("unknown carrier type: {other}, expected Carrier/Bicycle/Bike/Car"),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarrierProfile {
    pub carrier_id: Uuid,
    pub carrier_type: CarrierType,
    pub online: bool,
    pub location: Option<GeoPoint>,
    pub display_name: String,
    pub profile_image_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CarrierProfile {
    pub fn new(carrier_id: Uuid, carrier_type: CarrierType, display_name: impl Into<String>) -> Self {
        Self {
            carrier_id,
            carrier_type,
            online: false,
            location: None,
            display_name: display_name.into(),
            profile_image_url: None,
            updated_at: Utc::now(),
        }
    }
}
