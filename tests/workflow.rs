use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carrier_match::client::device::SimulatedLocation;
use carrier_match::client::matching::{MatchingEngine, MatchingHandle, Notice, Signal};
use carrier_match::client::presence::{CarrierIdentity, PresenceController};
use carrier_match::client::wait::{WaitController, WaitState};
use carrier_match::config::{MatchingConfig, PresenceConfig, WaitConfig};
use carrier_match::error::AppError;
use carrier_match::geo::directions::{Directions, Route, TravelMode};
use carrier_match::models::carrier::{CarrierType, GeoPoint};
use carrier_match::models::request::{
    DeliveryMethod, DeliveryRequest, NewDeliveryRequest, Party, RequestStatus,
};
use carrier_match::observability::metrics::Metrics;
use carrier_match::store::memory::MemoryBackend;
use carrier_match::store::{ClaimOutcome, PresenceStore, RequestLedger, RequestQuery};
use uuid::Uuid;

const IKEJA: GeoPoint = GeoPoint {
    lat: 6.6018,
    lng: 3.3515,
};

fn backend() -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::new(256, Metrics::new()))
}

fn new_request(carrier_type: CarrierType) -> NewDeliveryRequest {
    NewDeliveryRequest {
        carrier_type,
        sender: Party {
            name: "Tolu".to_string(),
            contact: "+2348000000001".to_string(),
            location: "12 Allen Avenue, Ikeja".to_string(),
            coordinates: Some(IKEJA),
        },
        receiver: Party {
            name: "Kemi".to_string(),
            contact: "+2348000000002".to_string(),
            location: "4 Admiralty Way, Lekki".to_string(),
            coordinates: None,
        },
        item_type: "Documents".to_string(),
        quantity: 1,
        insurance: false,
        inter_state: false,
        delivery_method: DeliveryMethod::Arrival,
        price: Some(5_600),
    }
}

fn wait_config(countdown_secs: u32) -> WaitConfig {
    WaitConfig {
        countdown_secs,
        reconcile_every_secs: 5,
        tick: Duration::from_millis(50),
        online_poll_interval: Duration::from_millis(50),
    }
}

struct Carrier {
    presence: Arc<PresenceController>,
    engine: Arc<MatchingEngine>,
    handle: MatchingHandle,
}

async fn carrier(backend: &Arc<MemoryBackend>, location: SimulatedLocation, online: bool) -> Carrier {
    let identity = CarrierIdentity {
        carrier_id: Uuid::new_v4(),
        carrier_type: CarrierType::Bike,
        display_name: "Segun".to_string(),
    };

    let presence = Arc::new(PresenceController::new(
        identity.clone(),
        backend.clone(),
        Arc::new(location),
        PresenceConfig {
            fix_timeout: Duration::from_millis(100),
            emit_interval: Duration::from_secs(60),
            min_distance_m: 20.0,
        },
    ));
    if online {
        presence.set_online(true).await.unwrap();
    }

    let engine = MatchingEngine::new(
        identity,
        backend.clone(),
        backend.clone(),
        MatchingConfig {
            poll_interval: Duration::from_millis(100),
        },
    );
    let handle = engine.start(presence.subscribe()).await.unwrap();

    Carrier {
        presence,
        engine,
        handle,
    }
}

async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn prompted(carrier: &Carrier, request_id: Uuid) -> bool {
    carrier
        .engine
        .prompt()
        .is_some_and(|request| request.id == request_id)
}

#[tokio::test]
async fn two_bike_carriers_race_and_requester_sees_the_winner() {
    let backend = backend();
    let a = carrier(&backend, SimulatedLocation::at(IKEJA), true).await;
    let b = carrier(&backend, SimulatedLocation::at(IKEJA), true).await;

    let requester = WaitController::new(
        Uuid::new_v4(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        wait_config(30),
    );
    let session = requester.submit(new_request(CarrierType::Bike)).await.unwrap();
    let request_id = session.request_id();

    eventually("both carriers prompted", || {
        prompted(&a, request_id) && prompted(&b, request_id)
    })
    .await;
    eventually("online count", || session.online_carriers() == 2).await;

    assert_eq!(a.engine.accept(request_id).await, Notice::Accepted(request_id));
    assert_eq!(
        b.engine.accept(request_id).await,
        Notice::NoLongerAvailable(request_id)
    );
    assert!(a.engine.prompt().is_none());
    assert!(b.engine.prompt().is_none());

    let row = backend.get_request(request_id).await.unwrap().unwrap();
    assert_eq!(row.status, RequestStatus::Accepted);
    assert_eq!(row.assigned_carrier_id, Some(a.presence.identity().carrier_id));

    let outcome = tokio::time::timeout(Duration::from_secs(1), session.settled())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WaitState::Assigned {
            carrier_id: a.presence.identity().carrier_id
        }
    );

    session.close().await;
    a.handle.stop().await;
    b.handle.stop().await;
}

#[tokio::test]
async fn carrier_without_location_permission_still_gets_prompts() {
    let backend = backend();
    let carrier = carrier(&backend, SimulatedLocation::denied(), true).await;
    let carrier_id = carrier.presence.identity().carrier_id;

    let row = backend.get_profile(carrier_id).await.unwrap().unwrap();
    assert!(row.online);
    assert!(row.location.is_none());

    let request = new_request(CarrierType::Bike)
        .into_request(Uuid::new_v4())
        .unwrap();
    let request_id = request.id;
    backend.insert_request(request).await.unwrap();

    eventually("prompt without coordinates", || prompted(&carrier, request_id)).await;
    carrier.handle.stop().await;
}

#[tokio::test]
async fn offline_carrier_is_never_prompted_until_it_goes_online() {
    let backend = backend();
    let carrier = carrier(&backend, SimulatedLocation::at(IKEJA), false).await;

    let request = new_request(CarrierType::Bike)
        .into_request(Uuid::new_v4())
        .unwrap();
    let request_id = request.id;
    backend.insert_request(request).await.unwrap();

    carrier.engine.poll_once().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(carrier.engine.prompt().is_none());

    carrier.presence.set_online(true).await.unwrap();
    eventually("prompt after going online", || prompted(&carrier, request_id)).await;

    carrier.presence.set_online(false).await.unwrap();
    eventually("prompt cleared when offline", || carrier.engine.prompt().is_none()).await;
    carrier.handle.stop().await;
}

#[tokio::test]
async fn decline_leaves_request_open_for_other_carriers() {
    let backend = backend();
    let a = carrier(&backend, SimulatedLocation::at(IKEJA), true).await;
    let b = carrier(&backend, SimulatedLocation::at(IKEJA), true).await;

    let request = new_request(CarrierType::Bike)
        .into_request(Uuid::new_v4())
        .unwrap();
    let request_id = request.id;
    backend.insert_request(request).await.unwrap();

    eventually("both carriers prompted", || {
        prompted(&a, request_id) && prompted(&b, request_id)
    })
    .await;

    a.engine.decline(request_id);
    assert!(a.engine.prompt().is_none());

    let row = backend.get_request(request_id).await.unwrap().unwrap();
    assert_eq!(row.status, RequestStatus::Pending);
    assert_eq!(row.assigned_carrier_id, None);

    // Later polls keep the declined request away from A but not from B.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(a.engine.prompt().is_none());
    assert!(prompted(&b, request_id));

    // A re-broadcast is a new offer.
    backend.reopen(request_id).await.unwrap().unwrap();
    eventually("re-offered after reopen", || prompted(&a, request_id)).await;

    a.handle.stop().await;
    b.handle.stop().await;
}

#[tokio::test]
async fn retry_after_timeout_rebroadcasts_once_then_adopts_assignment() {
    let backend = backend();
    let requester = WaitController::new(
        Uuid::new_v4(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        wait_config(3),
    );

    let session = requester.submit(new_request(CarrierType::Car)).await.unwrap();
    let request_id = session.request_id();

    let outcome = tokio::time::timeout(Duration::from_secs(1), session.settled())
        .await
        .unwrap();
    assert_eq!(outcome, WaitState::TimedOut);
    let row = backend.get_request(request_id).await.unwrap().unwrap();
    assert_eq!(row.status, RequestStatus::Pending);

    assert!(session.retry().await.unwrap());
    assert!(matches!(session.state(), WaitState::Waiting { .. }));

    let outcome = tokio::time::timeout(Duration::from_secs(1), session.settled())
        .await
        .unwrap();
    assert_eq!(outcome, WaitState::TimedOut);

    // A carrier wins the race between the timeout and the retry.
    let winner = Uuid::new_v4();
    backend.claim(request_id, winner).await.unwrap();

    let restarted = session.retry().await.unwrap();
    assert!(!restarted);
    assert_eq!(session.state(), WaitState::Assigned { carrier_id: winner });

    let row = backend.get_request(request_id).await.unwrap().unwrap();
    assert_eq!(row.status, RequestStatus::Accepted);
    assert_eq!(row.assigned_carrier_id, Some(winner));

    // Once assigned, retry is ignored outright.
    assert!(!session.retry().await.unwrap());
    assert_eq!(
        backend.get_request(request_id).await.unwrap().unwrap().assigned_carrier_id,
        Some(winner)
    );

    session.close().await;
}

#[tokio::test]
async fn closing_sessions_releases_feed_subscriptions() {
    let backend = backend();
    let requester = WaitController::new(
        Uuid::new_v4(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        wait_config(30),
    );
    let carrier = carrier(&backend, SimulatedLocation::at(IKEJA), true).await;
    let session = requester.submit(new_request(CarrierType::Bike)).await.unwrap();

    assert_eq!(backend.subscriber_count(), 2);

    session.close().await;
    carrier.handle.stop().await;
    assert_eq!(backend.subscriber_count(), 0);
}

// Open-request reads return a snapshot that is already `delay` old on arrival.
struct SlowReads {
    inner: Arc<MemoryBackend>,
    delay: Duration,
}

#[async_trait]
impl RequestLedger for SlowReads {
    async fn insert_request(&self, request: DeliveryRequest) -> Result<DeliveryRequest, AppError> {
        self.inner.insert_request(request).await
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<DeliveryRequest>, AppError> {
        self.inner.get_request(id).await
    }

    async fn open_requests(&self, carrier_type: CarrierType) -> Result<Vec<DeliveryRequest>, AppError> {
        let snapshot = self.inner.open_requests(carrier_type).await?;
        tokio::time::sleep(self.delay).await;
        Ok(snapshot)
    }

    async fn claim(&self, id: Uuid, carrier_id: Uuid) -> Result<ClaimOutcome, AppError> {
        self.inner.claim(id, carrier_id).await
    }

    async fn reopen(&self, id: Uuid) -> Result<Option<DeliveryRequest>, AppError> {
        self.inner.reopen(id).await
    }

    async fn withdraw(&self, id: Uuid, requester_id: Uuid) -> Result<Option<DeliveryRequest>, AppError> {
        self.inner.withdraw(id, requester_id).await
    }

    async fn list_requests(&self, query: RequestQuery) -> Result<Vec<DeliveryRequest>, AppError> {
        self.inner.list_requests(query).await
    }
}

#[tokio::test]
async fn read_landing_after_a_won_claim_does_not_re_prompt() {
    let backend = backend();
    let ledger = Arc::new(SlowReads {
        inner: backend.clone(),
        delay: Duration::from_millis(200),
    });
    let identity = CarrierIdentity {
        carrier_id: Uuid::from_u128(1),
        carrier_type: CarrierType::Bike,
        display_name: "Segun".to_string(),
    };
    let engine = MatchingEngine::new(
        identity,
        ledger,
        backend.clone(),
        MatchingConfig {
            poll_interval: Duration::from_secs(60),
        },
    );
    engine.apply(Signal::Presence(true));

    let request = new_request(CarrierType::Bike)
        .into_request(Uuid::new_v4())
        .unwrap();
    let request_id = request.id;
    backend.insert_request(request).await.unwrap();

    let polling = tokio::spawn({
        let engine = engine.clone();
        async move { engine.poll_once().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(engine.accept(request_id).await, Notice::Accepted(request_id));
    polling.await.unwrap().unwrap();

    let row = backend.get_request(request_id).await.unwrap().unwrap();
    assert_eq!(row.assigned_carrier_id, Some(Uuid::from_u128(1)));
    assert!(engine.prompt().is_none());
    assert_eq!(engine.notice(), Some(Notice::Accepted(request_id)));
}

#[tokio::test]
async fn withdrawn_request_is_never_rebroadcast_by_retry() {
    let backend = backend();
    let requester = WaitController::new(
        Uuid::new_v4(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        wait_config(3),
    );
    let session = requester.submit(new_request(CarrierType::Bike)).await.unwrap();
    let request_id = session.request_id();

    assert!(session.withdraw().await.unwrap());
    assert_eq!(session.state(), WaitState::Withdrawn);

    // Well past the countdown: still withdrawn, never timed out.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(session.state(), WaitState::Withdrawn);
    assert!(!session.retry().await.unwrap());

    let row = backend.get_request(request_id).await.unwrap().unwrap();
    assert_eq!(row.status, RequestStatus::Declined);
    assert!(backend.open_requests(CarrierType::Bike).await.unwrap().is_empty());

    session.close().await;
}

// Resolves any address mentioning Lekki; everything else fails.
struct LekkiGeocoder;

#[async_trait]
impl Directions for LekkiGeocoder {
    async fn route(
        &self,
        _origin: GeoPoint,
        _destination: GeoPoint,
        _mode: TravelMode,
    ) -> Result<Option<Route>, AppError> {
        Ok(None)
    }

    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>, AppError> {
        if address.contains("Lekki") {
            Ok(Some(GeoPoint {
                lat: 6.4474,
                lng: 3.4723,
            }))
        } else {
            Err(AppError::Unavailable("geocoder down".to_string()))
        }
    }
}

#[tokio::test]
async fn submit_geocodes_receiver_and_survives_geocoder_failure() {
    let backend = backend();
    let requester = WaitController::new(
        Uuid::new_v4(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        wait_config(30),
    )
    .with_directions(Arc::new(LekkiGeocoder));

    let mut payload = new_request(CarrierType::Bike);
    payload.sender.coordinates = None;
    payload.sender.location = "Unknown Close, Ikeja".to_string();

    let session = requester.submit(payload).await.unwrap();
    let row = backend.get_request(session.request_id()).await.unwrap().unwrap();

    assert_eq!(
        row.receiver.coordinates,
        Some(GeoPoint {
            lat: 6.4474,
            lng: 3.4723
        })
    );
    assert!(row.sender.coordinates.is_none());
    assert!(matches!(session.state(), WaitState::Waiting { .. }));

    session.close().await;
}
