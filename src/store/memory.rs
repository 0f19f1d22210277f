use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::feed::{ChangeFeed, FeedFilter, Subscription};
use crate::models::carrier::{CarrierProfile, CarrierType, GeoPoint};
use crate::models::event::{ChangeEvent, ChangeKind};
use crate::models::request::{DeliveryRequest, RequestStatus};
use crate::observability::metrics::Metrics;
use crate::store::{ClaimOutcome, PresenceStore, RequestLedger, RequestQuery};

pub struct MemoryBackend {
    requests: DashMap<Uuid, DeliveryRequest>,
    carriers: DashMap<Uuid, CarrierProfile>,
    write_restricted: DashSet<Uuid>,
    events_tx: broadcast::Sender<ChangeEvent>,
    metrics: Metrics,
}

impl MemoryBackend {
    pub fn new(event_buffer_size: usize, metrics: Metrics) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            requests: DashMap::new(),
            carriers: DashMap::new(),
            write_restricted: DashSet::new(),
            events_tx,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn carrier_count(&self) -> usize {
        self.carriers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events_tx.receiver_count()
    }

    pub fn all_carriers(&self) -> Vec<CarrierProfile> {
        self.carriers.iter().map(|entry| entry.value().clone()).collect()
    }

    // Row-level policy: writes to this carrier's row affect zero rows while
    // the row stays readable.
    pub fn restrict_writes(&self, carrier_id: Uuid) {
        self.write_restricted.insert(carrier_id);
    }

    pub fn lift_restriction(&self, carrier_id: Uuid) {
        self.write_restricted.remove(&carrier_id);
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is not an error.
        let _ = self.events_tx.send(event);
    }
}

#[async_trait]
impl RequestLedger for MemoryBackend {
    async fn insert_request(&self, request: DeliveryRequest) -> Result<DeliveryRequest, AppError> {
        match self.requests.entry(request.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "request {} already exists",
                request.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let row = slot.insert(request);
                self.publish(ChangeEvent::request(ChangeKind::Insert, row.clone()));

                self.metrics.requests_created_total.inc();
                if row.is_open() {
                    self.metrics.open_requests.inc();
                }

                info!(
                    request_id = %row.id,
                    carrier_type = %row.carrier_type,
                    "delivery request created"
                );
                Ok(row.clone())
            }
        }
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<DeliveryRequest>, AppError> {
        Ok(self.requests.get(&id).map(|entry| entry.value().clone()))
    }

    async fn open_requests(&self, carrier_type: CarrierType) -> Result<Vec<DeliveryRequest>, AppError> {
        let mut open: Vec<DeliveryRequest> = self
            .requests
            .iter()
            .filter(|entry| entry.carrier_type == carrier_type && entry.is_open())
            .map(|entry| entry.value().clone())
            .collect();

        open.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(open)
    }

    async fn claim(&self, id: Uuid, carrier_id: Uuid) -> Result<ClaimOutcome, AppError> {
        let start = Instant::now();

        let outcome = match self.requests.get_mut(&id) {
            Some(mut row) if row.is_open() => {
                row.assigned_carrier_id = Some(carrier_id);
                row.status = RequestStatus::Accepted;
                row.updated_at = Utc::now();

                self.publish(ChangeEvent::request(ChangeKind::Update, row.clone()));
                ClaimOutcome::Won(row.clone())
            }
            _ => ClaimOutcome::Lost,
        };

        let label = match &outcome {
            ClaimOutcome::Won(_) => {
                self.metrics.open_requests.dec();
                info!(request_id = %id, carrier_id = %carrier_id, "request claimed");
                "won"
            }
            ClaimOutcome::Lost => {
                debug!(request_id = %id, carrier_id = %carrier_id, "claim affected no rows");
                "lost"
            }
        };

        self.metrics.claims_total.with_label_values(&[label]).inc();
        self.metrics
            .claim_latency_seconds
            .with_label_values(&[label])
            .observe(start.elapsed().as_secs_f64());

        Ok(outcome)
    }

    async fn reopen(&self, id: Uuid) -> Result<Option<DeliveryRequest>, AppError> {
        let Some(mut row) = self.requests.get_mut(&id) else {
            return Ok(None);
        };

        if row.assigned_carrier_id.is_some() {
            debug!(request_id = %id, "reopen ignored: request already assigned");
            return Ok(None);
        }

        if !row.is_open() {
            self.metrics.open_requests.inc();
        }

        row.status = RequestStatus::Pending;
        row.updated_at = Utc::now();
        self.publish(ChangeEvent::request(ChangeKind::Update, row.clone()));

        info!(request_id = %id, "request re-broadcast");
        Ok(Some(row.clone()))
    }

    async fn withdraw(&self, id: Uuid, requester_id: Uuid) -> Result<Option<DeliveryRequest>, AppError> {
        let Some(mut row) = self.requests.get_mut(&id) else {
            return Ok(None);
        };

        if row.requester_id != requester_id || !row.is_open() {
            return Ok(None);
        }

        row.status = RequestStatus::Declined;
        row.updated_at = Utc::now();
        self.publish(ChangeEvent::request(ChangeKind::Update, row.clone()));
        self.metrics.open_requests.dec();

        info!(request_id = %id, "request withdrawn by requester");
        Ok(Some(row.clone()))
    }

    async fn list_requests(&self, query: RequestQuery) -> Result<Vec<DeliveryRequest>, AppError> {
        let mut rows: Vec<DeliveryRequest> = self
            .requests
            .iter()
            .filter(|entry| match query {
                RequestQuery::ByRequester(id) => entry.requester_id == id,
                RequestQuery::ByAssignedCarrier(id) => entry.assigned_carrier_id == Some(id),
            })
            .map(|entry| entry.value().clone())
            .collect();

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

#[async_trait]
impl PresenceStore for MemoryBackend {
    async fn create_profile(&self, profile: CarrierProfile) -> Result<CarrierProfile, AppError> {
        match self.carriers.entry(profile.carrier_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "carrier {} already has a profile",
                profile.carrier_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let row = slot.insert(profile);
                if row.online {
                    self.metrics.carriers_online.inc();
                }
                self.publish(ChangeEvent::carrier(ChangeKind::Insert, row.clone()));

                info!(
                    carrier_id = %row.carrier_id,
                    carrier_type = %row.carrier_type,
                    "carrier profile created"
                );
                Ok(row.clone())
            }
        }
    }

    async fn get_profile(&self, carrier_id: Uuid) -> Result<Option<CarrierProfile>, AppError> {
        Ok(self.carriers.get(&carrier_id).map(|entry| entry.value().clone()))
    }

    async fn update_presence(
        &self,
        carrier_id: Uuid,
        online: bool,
        location: Option<GeoPoint>,
    ) -> Result<u64, AppError> {
        if self.write_restricted.contains(&carrier_id) {
            warn!(carrier_id = %carrier_id, "presence write rejected by access policy");
            return Ok(0);
        }

        let Some(mut row) = self.carriers.get_mut(&carrier_id) else {
            return Ok(0);
        };

        match (row.online, online) {
            (false, true) => self.metrics.carriers_online.inc(),
            (true, false) => self.metrics.carriers_online.dec(),
            _ => {}
        }

        row.online = online;
        row.location = location;
        row.updated_at = Utc::now();
        self.publish(ChangeEvent::carrier(ChangeKind::Update, row.clone()));

        info!(carrier_id = %carrier_id, online, has_location = location.is_some(), "presence updated");
        Ok(1)
    }

    async fn update_location(&self, carrier_id: Uuid, location: GeoPoint) -> Result<u64, AppError> {
        if self.write_restricted.contains(&carrier_id) {
            return Ok(0);
        }

        match self.carriers.get_mut(&carrier_id) {
            Some(mut row) if row.online => {
                row.location = Some(location);
                row.updated_at = Utc::now();
                self.publish(ChangeEvent::carrier(ChangeKind::Update, row.clone()));
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn online_carriers(
        &self,
        carrier_type: Option<CarrierType>,
    ) -> Result<Vec<CarrierProfile>, AppError> {
        Ok(self
            .carriers
            .iter()
            .filter(|entry| entry.online)
            .filter(|entry| carrier_type.is_none_or(|wanted| entry.carrier_type == wanted))
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, filter: FeedFilter) -> Result<Subscription, AppError> {
        let subscription = Subscription::from_broadcast(filter, self.events_tx.subscribe());
        debug!(?filter, subscribers = self.subscriber_count(), "change feed subscribed");
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::MemoryBackend;
    use crate::feed::{ChangeFeed, FeedFilter};
    use crate::models::carrier::{CarrierProfile, CarrierType, GeoPoint};
    use crate::models::event::ChangeKind;
    use crate::models::request::fixtures::new_request;
    use crate::models::request::RequestStatus;
    use crate::observability::metrics::Metrics;
    use crate::store::{ClaimOutcome, PresenceStore, RequestLedger, RequestQuery};

    fn backend() -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::new(256, Metrics::new()))
    }

    #[tokio::test]
    async fn second_claim_affects_no_rows_and_keeps_first_winner() {
        let backend = backend();
        let request = new_request(CarrierType::Bike).into_request(Uuid::new_v4()).unwrap();
        backend.insert_request(request.clone()).await.unwrap();

        let first = Uuid::from_u128(1);
        let second = Uuid::from_u128(2);

        let outcome = backend.claim(request.id, first).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::Won(_)));

        let outcome = backend.claim(request.id, second).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::Lost);
        assert_eq!(outcome.rows_affected(), 0);

        let stored = backend.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Accepted);
        assert_eq!(stored.assigned_carrier_id, Some(first));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_exactly_one_winner() {
        let backend = backend();
        let request = new_request(CarrierType::Car).into_request(Uuid::new_v4()).unwrap();
        backend.insert_request(request.clone()).await.unwrap();

        let mut handles = Vec::new();
        for seed in 0..32u128 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend.claim(request.id, Uuid::from_u128(seed + 100)).await.unwrap()
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            if let ClaimOutcome::Won(row) = handle.await.unwrap() {
                winners.push(row.assigned_carrier_id);
            }
        }

        assert_eq!(winners.len(), 1);
        let stored = backend.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.assigned_carrier_id, winners[0]);
    }

    #[tokio::test]
    async fn reopen_never_unassigns() {
        let backend = backend();
        let request = new_request(CarrierType::Bike).into_request(Uuid::new_v4()).unwrap();
        backend.insert_request(request.clone()).await.unwrap();
        backend.claim(request.id, Uuid::from_u128(7)).await.unwrap();

        assert!(backend.reopen(request.id).await.unwrap().is_none());

        let stored = backend.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Accepted);
        assert_eq!(stored.assigned_carrier_id, Some(Uuid::from_u128(7)));
    }

    #[tokio::test]
    async fn withdrawn_request_is_closed_until_reopened() {
        let backend = backend();
        let requester = Uuid::new_v4();
        let request = new_request(CarrierType::Bicycle).into_request(requester).unwrap();
        backend.insert_request(request.clone()).await.unwrap();

        assert!(backend.withdraw(request.id, Uuid::new_v4()).await.unwrap().is_none());
        let withdrawn = backend.withdraw(request.id, requester).await.unwrap().unwrap();
        assert_eq!(withdrawn.status, RequestStatus::Declined);
        assert!(backend.open_requests(CarrierType::Bicycle).await.unwrap().is_empty());
        assert_eq!(
            backend.claim(request.id, Uuid::new_v4()).await.unwrap(),
            ClaimOutcome::Lost
        );

        let reopened = backend.reopen(request.id).await.unwrap().unwrap();
        assert_eq!(reopened.status, RequestStatus::Pending);
        assert_eq!(backend.open_requests(CarrierType::Bicycle).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_requests_are_newest_first_and_typed() {
        let backend = backend();
        let older = new_request(CarrierType::Bike).into_request(Uuid::new_v4()).unwrap();
        let mut newer = new_request(CarrierType::Bike).into_request(Uuid::new_v4()).unwrap();
        newer.created_at = older.created_at + chrono::Duration::seconds(5);
        let other = new_request(CarrierType::Car).into_request(Uuid::new_v4()).unwrap();

        for request in [older.clone(), newer.clone(), other] {
            backend.insert_request(request).await.unwrap();
        }

        let open = backend.open_requests(CarrierType::Bike).await.unwrap();
        assert_eq!(open.iter().map(|r| r.id).collect::<Vec<_>>(), vec![newer.id, older.id]);

        let mine = backend
            .list_requests(RequestQuery::ByRequester(older.requester_id))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn restricted_row_is_readable_but_not_writable() {
        let backend = backend();
        let carrier_id = Uuid::new_v4();
        backend
            .create_profile(CarrierProfile::new(carrier_id, CarrierType::Bike, "Bayo"))
            .await
            .unwrap();
        backend.restrict_writes(carrier_id);

        assert_eq!(backend.update_presence(carrier_id, true, None).await.unwrap(), 0);
        assert!(backend.get_profile(carrier_id).await.unwrap().is_some());

        backend.lift_restriction(carrier_id);
        assert_eq!(backend.update_presence(carrier_id, true, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn location_updates_only_apply_while_online() {
        let backend = backend();
        let carrier_id = Uuid::new_v4();
        backend
            .create_profile(CarrierProfile::new(carrier_id, CarrierType::Car, "Ngozi"))
            .await
            .unwrap();
        let point = GeoPoint { lat: 6.45, lng: 3.39 };

        assert_eq!(backend.update_location(carrier_id, point).await.unwrap(), 0);

        backend.update_presence(carrier_id, true, None).await.unwrap();
        assert_eq!(backend.update_location(carrier_id, point).await.unwrap(), 1);
        assert_eq!(backend.online_carriers(Some(CarrierType::Car)).await.unwrap().len(), 1);
        assert!(backend.online_carriers(Some(CarrierType::Bike)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_publishes_update_to_request_subscribers() {
        let backend = backend();
        let request = new_request(CarrierType::Bike).into_request(Uuid::new_v4()).unwrap();
        backend.insert_request(request.clone()).await.unwrap();

        let mut subscription = backend.subscribe(FeedFilter::RequestId(request.id)).await.unwrap();
        assert_eq!(backend.subscriber_count(), 1);

        backend.claim(request.id, Uuid::from_u128(9)).await.unwrap();

        let event = subscription.next().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(
            event.as_request().unwrap().assigned_carrier_id,
            Some(Uuid::from_u128(9))
        );

        drop(subscription);
        assert_eq!(backend.subscriber_count(), 0);
    }
}
