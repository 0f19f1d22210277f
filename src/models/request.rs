use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::carrier::{CarrierType, GeoPoint};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[serde(alias = "broadcasting")]
    Pending,
    Accepted,
    Declined,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Declined => "declined",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" | "broadcasting" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "declined" => Ok(RequestStatus::Declined),
            other => Err(AppError::BadRequest(format!("unknown request status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    #[default]
    Arrival,
    Home,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Arrival => "arrival",
            DeliveryMethod::Home => "home",
        }
    }
}

impl FromStr for DeliveryMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arrival" => Ok(DeliveryMethod::Arrival),
            "home" => Ok(DeliveryMethod::Home),
            other => Err(AppError::validation(
                "delivery_method",
                format!("unknown delivery method: {other}, expected arrival/home"),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Party {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub contact: String,
    pub location: String,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub carrier_type: CarrierType,
    pub sender: Party,
    pub receiver: Party,
    pub item_type: String,
    pub quantity: u32,
    pub insurance: bool,
    pub inter_state: bool,
    pub delivery_method: DeliveryMethod,
    // Whole currency units, as quoted to the requester. Advisory only.
    pub price: Option<u64>,
    pub status: RequestStatus,
    pub assigned_carrier_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRequest {
    pub fn is_open(&self) -> bool {
        self.status == RequestStatus::Pending && self.assigned_carrier_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDeliveryRequest {
    pub carrier_type: CarrierType,
    pub sender: Party,
    pub receiver: Party,
    pub item_type: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub insurance: bool,
    #[serde(default)]
    pub inter_state: bool,
    #[serde(default)]
    pub delivery_method: DeliveryMethod,
    #[serde(default)]
    pub price: Option<u64>,
}

fn default_quantity() -> u32 {
    1
}

impl NewDeliveryRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.sender.location.trim().is_empty() {
            return Err(AppError::validation("sender.location", "sender location is required"));
        }
        if self.receiver.name.trim().is_empty() {
            return Err(AppError::validation("receiver.name", "receiver name is required"));
        }
        if self.receiver.contact.trim().is_empty() {
            return Err(AppError::validation("receiver.contact", "receiver contact is required"));
        }
        if self.receiver.location.trim().is_empty() {
            return Err(AppError::validation(
                "receiver.location",
                "receiver location is required",
            ));
        }
        if self.item_type.trim().is_empty() {
            return Err(AppError::validation("item_type", "item type is required"));
        }
        if self.quantity == 0 {
            return Err(AppError::validation("quantity", "quantity must be > 0"));
        }

        for (field, coordinates) in [
            ("sender.coordinates", self.sender.coordinates),
            ("receiver.coordinates", self.receiver.coordinates),
        ] {
            if let Some(point) = coordinates {
                if !point.is_valid() {
                    return Err(AppError::validation(field, "coordinates out of range"));
                }
            }
        }

        Ok(())
    }

    pub fn into_request(self, requester_id: Uuid) -> Result<DeliveryRequest, AppError> {
        self.validate()?;

        let now = Utc::now();
        Ok(DeliveryRequest {
            id: Uuid::new_v4(),
            requester_id,
            carrier_type: self.carrier_type,
            sender: self.sender,
            receiver: self.receiver,
            item_type: self.item_type.trim().to_string(),
            quantity: self.quantity,
            insurance: self.insurance,
            inter_state: self.inter_state,
            delivery_method: self.delivery_method,
            price: self.price,
            status: RequestStatus::Pending,
            assigned_carrier_id: None,
            created_at: now,
            updated_at: now,
        })
    }
}
