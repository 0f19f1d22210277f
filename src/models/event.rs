use serde::{Deserialize, Serialize};

use crate::models::carrier::CarrierProfile;
use crate::models::request::DeliveryRequest;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "table", content = "new", rename_all = "snake_case")]
pub enum ChangedRow {
    DeliveryRequest(DeliveryRequest),
    CarrierProfile(CarrierProfile),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub row: ChangedRow,
}

impl ChangeEvent {
    pub fn request(kind: ChangeKind, request: DeliveryRequest) -> Self {
        Self {
            kind,
            row: ChangedRow::DeliveryRequest(request),
        }
    }

    pub fn carrier(kind: ChangeKind, profile: CarrierProfile) -> Self {
        Self {
            kind,
            row: ChangedRow::CarrierProfile(profile),
        }
    }

    pub fn as_request(&self) -> Option<&DeliveryRequest> {
        match &self.row {
            ChangedRow::DeliveryRequest(request) => Some(request),
            ChangedRow::CarrierProfile(_) => None,
        }
    }

    pub fn as_carrier(&self) -> Option<&CarrierProfile> {
        match &self.row {
            ChangedRow::CarrierProfile(profile) => Some(profile),
            ChangedRow::DeliveryRequest(_) => None,
        }
    }
}
