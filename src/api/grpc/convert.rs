use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::pb;
use crate::error::AppError;
use crate::feed::FeedFilter;
use crate::models::carrier::{CarrierProfile, CarrierType, GeoPoint};
use crate::models::event::{ChangeEvent, ChangeKind, ChangedRow};
use crate::models::request::{DeliveryRequest, Party, RequestStatus};

pub fn parse_uuid(field: &'static str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::validation(field, format!("not a uuid: {raw}")))
}

fn parse_optional_uuid(field: &'static str, raw: &str) -> Result<Option<Uuid>, AppError> {
    if raw.is_empty() {
        Ok(None)
    } else {
        parse_uuid(field, raw).map(Some)
    }
}

fn parse_time(field: &'static str, raw: &str) -> Result<DateTime<Utc>, AppError> {
    if raw.is_empty() {
        return Ok(Utc::now());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| AppError::validation(field, format!("bad timestamp {raw}: {err}")))
}

/// Empty string means "no filter".
pub fn parse_carrier_type(raw: &str) -> Result<Option<CarrierType>, AppError> {
    if raw.is_empty() {
        Ok(None)
    } else {
        raw.parse().map(Some)
    }
}

impl From<GeoPoint> for pb::GeoPoint {
    fn from(point: GeoPoint) -> Self {
        pb::GeoPoint {
            lat: point.lat,
            lng: point.lng,
        }
    }
}

impl From<pb::GeoPoint> for GeoPoint {
    fn from(point: pb::GeoPoint) -> Self {
        GeoPoint {
            lat: point.lat,
            lng: point.lng,
        }
    }
}

fn party_to_proto(party: &Party) -> pb::Party {
    pb::Party {
        name: party.name.clone(),
        contact: party.contact.clone(),
        location: party.location.clone(),
        coordinates: party.coordinates.map(Into::into),
    }
}

fn party_from_proto(party: Option<pb::Party>) -> Party {
    party
        .map(|p| Party {
            name: p.name,
            contact: p.contact,
            location: p.location,
            coordinates: p.coordinates.map(Into::into),
        })
        .unwrap_or_default()
}

pub fn request_to_proto(r: &DeliveryRequest) -> pb::DeliveryRequest {
    pb::DeliveryRequest {
        id: r.id.to_string(),
        requester_id: r.requester_id.to_string(),
        carrier_type: r.carrier_type.as_str().to_string(),
        sender: Some(party_to_proto(&r.sender)),
        receiver: Some(party_to_proto(&r.receiver)),
        item_type: r.item_type.clone(),
        quantity: r.quantity,
        insurance: r.insurance,
        inter_state: r.inter_state,
        delivery_method: r.delivery_method.as_str().to_string(),
        price: r.price,
        status: r.status.as_str().to_string(),
        assigned_carrier_id: r
            .assigned_carrier_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
        created_at: r.created_at.to_rfc3339(),
        updated_at: r.updated_at.to_rfc3339(),
    }
}

pub fn request_from_proto(r: pb::DeliveryRequest) -> Result<DeliveryRequest, AppError> {
    Ok(DeliveryRequest {
        id: parse_uuid("id", &r.id)?,
        requester_id: parse_uuid("requester_id", &r.requester_id)?,
        carrier_type: r.carrier_type.parse()?,
        sender: party_from_proto(r.sender),
        receiver: party_from_proto(r.receiver),
        item_type: r.item_type,
        quantity: r.quantity,
        insurance: r.insurance,
        inter_state: r.inter_state,
        delivery_method: if r.delivery_method.is_empty() {
            Default::default()
        } else {
            r.delivery_method.parse()?
        },
        price: r.price,
        status: if r.status.is_empty() {
            RequestStatus::Pending
        } else {
            r.status.parse()?
        },
        assigned_carrier_id: parse_optional_uuid("assigned_carrier_id", &r.assigned_carrier_id)?,
        created_at: parse_time("created_at", &r.created_at)?,
        updated_at: parse_time("updated_at", &r.updated_at)?,
    })
}

pub fn carrier_to_proto(c: &CarrierProfile) -> pb::CarrierProfile {
    pb::CarrierProfile {
        carrier_id: c.carrier_id.to_string(),
        carrier_type: c.carrier_type.as_str().to_string(),
        online: c.online,
        location: c.location.map(Into::into),
        display_name: c.display_name.clone(),
        profile_image_url: c.profile_image_url.clone().unwrap_or_default(),
        updated_at: c.updated_at.to_rfc3339(),
    }
}

pub fn carrier_from_proto(c: pb::CarrierProfile) -> Result<CarrierProfile, AppError> {
    Ok(CarrierProfile {
        carrier_id: parse_uuid("carrier_id", &c.carrier_id)?,
        carrier_type: c.carrier_type.parse()?,
        online: c.online,
        location: c.location.map(Into::into),
        display_name: c.display_name,
        profile_image_url: Some(c.profile_image_url).filter(|url| !url.is_empty()),
        updated_at: parse_time("updated_at", &c.updated_at)?,
    })
}

pub fn event_to_proto(event: &ChangeEvent) -> pb::ChangeEvent {
    let record = match &event.row {
        ChangedRow::DeliveryRequest(r) => pb::change_event::Record::Request(request_to_proto(r)),
        ChangedRow::CarrierProfile(c) => pb::change_event::Record::Carrier(carrier_to_proto(c)),
    };

    pb::ChangeEvent {
        kind: event.kind.as_str().to_string(),
        record: Some(record),
    }
}

pub fn event_from_proto(event: pb::ChangeEvent) -> Result<ChangeEvent, AppError> {
    let kind = match event.kind.as_str() {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        other => return Err(AppError::BadRequest(format!("unknown change kind: {other}"))),
    };

    match event.record {
        Some(pb::change_event::Record::Request(r)) => {
            Ok(ChangeEvent::request(kind, request_from_proto(r)?))
        }
        Some(pb::change_event::Record::Carrier(c)) => {
            Ok(ChangeEvent::carrier(kind, carrier_from_proto(c)?))
        }
        None => Err(AppError::BadRequest("change event without a row".to_string())),
    }
}

pub fn filter_to_proto(filter: FeedFilter) -> pb::WatchChangesRequest {
    let mut req = pb::WatchChangesRequest::default();
    match filter {
        FeedFilter::CarrierType(ct) => req.carrier_type = ct.as_str().to_string(),
        FeedFilter::RequestId(id) => req.request_id = id.to_string(),
        FeedFilter::RequesterId(id) => req.requester_id = id.to_string(),
        FeedFilter::CarrierId(id) => req.carrier_id = id.to_string(),
    }
    req
}

pub fn filter_from_proto(req: &pb::WatchChangesRequest) -> Result<FeedFilter, AppError> {
    FeedFilter::from_parts(
        parse_carrier_type(&req.carrier_type)?,
        parse_optional_uuid("request_id", &req.request_id)?,
        parse_optional_uuid("requester_id", &req.requester_id)?,
        parse_optional_uuid("carrier_id", &req.carrier_id)?,
    )
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::request::fixtures::new_request;

    #[test]
    fn unassigned_request_travels_with_empty_assignee() {
        let request = new_request(CarrierType::Bicycle)
            .into_request(Uuid::new_v4())
            .unwrap();

        let wire = request_to_proto(&request);
        assert_eq!(wire.assigned_carrier_id, "");
        assert_eq!(wire.status, "pending");

        let back = request_from_proto(wire).unwrap();
        assert_eq!(back.assigned_carrier_id, None);
        assert_eq!(back.id, request.id);
    }

    #[test]
    fn broadcasting_status_reads_as_pending() {
        let mut wire = request_to_proto(
            &new_request(CarrierType::Car)
                .into_request(Uuid::new_v4())
                .unwrap(),
        );
        wire.status = "broadcasting".to_string();

        let back = request_from_proto(wire).unwrap();
        assert!(back.is_open());
    }

    #[test]
    fn watch_request_carries_exactly_one_filter() {
        let id = Uuid::new_v4();
        let wire = filter_to_proto(FeedFilter::RequestId(id));

        assert!(wire.carrier_type.is_empty());
        assert_eq!(filter_from_proto(&wire).unwrap(), FeedFilter::RequestId(id));
        assert!(filter_from_proto(&pb::WatchChangesRequest::default()).is_err());
    }

    #[test]
    fn bad_uuid_is_a_validation_error() {
        let err = parse_uuid("carrier_id", "nope").unwrap_err();
        assert!(matches!(err, AppError::Validation { field: "carrier_id", .. }));
    }
}
