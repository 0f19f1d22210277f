use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::device::{LocationProvider, Permission};
use crate::client::task::SupervisedTask;
use crate::config::PresenceConfig;
use crate::error::AppError;
use crate::feed::{ChangeFeed, FeedFilter};
use crate::geo::haversine_m;
use crate::models::carrier::{CarrierProfile, CarrierType, GeoPoint};
use crate::store::PresenceStore;

#[derive(Debug, Clone)]
pub struct CarrierIdentity {
    pub carrier_id: Uuid,
    pub carrier_type: CarrierType,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PresenceState {
    pub online: bool,
    pub location: Option<GeoPoint>,
}

pub struct PresenceController {
    identity: CarrierIdentity,
    store: Arc<dyn PresenceStore>,
    location: Arc<dyn LocationProvider>,
    config: PresenceConfig,
    state: Arc<watch::Sender<PresenceState>>,
    emitter: Mutex<Option<SupervisedTask>>,
}

impl PresenceController {
    pub fn new(
        identity: CarrierIdentity,
        store: Arc<dyn PresenceStore>,
        location: Arc<dyn LocationProvider>,
        config: PresenceConfig,
    ) -> Self {
        let (state, _unused_rx) = watch::channel(PresenceState::default());

        Self {
            identity,
            store,
            location,
            config,
            state: Arc::new(state),
            emitter: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &CarrierIdentity {
        &self.identity
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().online
    }

    pub fn current(&self) -> PresenceState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceState> {
        self.state.subscribe()
    }

    pub async fn is_emitting(&self) -> bool {
        self.emitter
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub async fn set_online(&self, online: bool) -> Result<PresenceState, AppError> {
        let mut emitter = self.emitter.lock().await;

        if online {
            self.go_online(&mut emitter).await
        } else {
            self.go_offline(&mut emitter).await
        }
    }

    async fn go_online(&self, emitter: &mut Option<SupervisedTask>) -> Result<PresenceState, AppError> {
        let carrier_id = self.identity.carrier_id;

        let (permission, fix) = self.acquire_fix().await;
        self.write_presence(true, fix).await?;

        let state = PresenceState {
            online: true,
            location: fix,
        };
        self.state.send_replace(state);

        if let Some(previous) = emitter.take() {
            previous.stop().await;
        }
        if permission == Permission::Granted {
            *emitter = Some(self.spawn_emitter());
        }

        info!(carrier_id = %carrier_id, has_location = fix.is_some(), "carrier online");
        Ok(state)
    }

    async fn go_offline(&self, emitter: &mut Option<SupervisedTask>) -> Result<PresenceState, AppError> {
        let carrier_id = self.identity.carrier_id;
        let was_emitting = emitter.is_some();

        // The loop must be gone before the offline write lands.
        if let Some(task) = emitter.take() {
            task.stop().await;
        }

        if let Err(err) = self.write_presence(false, None).await {
            if was_emitting && self.is_online() {
                *emitter = Some(self.spawn_emitter());
            }
            return Err(err);
        }

        let state = PresenceState::default();
        self.state.send_replace(state);

        info!(carrier_id = %carrier_id, "carrier offline");
        Ok(state)
    }

    async fn acquire_fix(&self) -> (Permission, Option<GeoPoint>) {
        let carrier_id = self.identity.carrier_id;

        match self.location.request_permission().await {
            Permission::Denied => {
                info!(carrier_id = %carrier_id, "location permission denied; online without coordinates");
                (Permission::Denied, None)
            }
            Permission::Granted => {
                match timeout(self.config.fix_timeout, self.location.current_position()).await {
                    Ok(Ok(point)) if point.is_valid() => (Permission::Granted, Some(point)),
                    Ok(Ok(point)) => {
                        warn!(carrier_id = %carrier_id, ?point, "discarding invalid location fix");
                        (Permission::Granted, None)
                    }
                    Ok(Err(err)) => {
                        warn!(carrier_id = %carrier_id, error = %err, "location fix failed");
                        (Permission::Granted, None)
                    }
                    Err(_) => {
                        warn!(
                            carrier_id = %carrier_id,
                            timeout_ms = self.config.fix_timeout.as_millis() as u64,
                            "location fix timed out"
                        );
                        (Permission::Granted, None)
                    }
                }
            }
        }
    }

    /// One write of flag and location. A zero-row update is resolved by a read:
    /// a missing row is created, a present row means the policy refused.
    async fn write_presence(&self, online: bool, location: Option<GeoPoint>) -> Result<(), AppError> {
        let carrier_id = self.identity.carrier_id;

        if self.store.update_presence(carrier_id, online, location).await? > 0 {
            return Ok(());
        }

        if self.store.get_profile(carrier_id).await?.is_some() {
            warn!(carrier_id = %carrier_id, "presence write affected no rows on an existing profile");
            return Err(AppError::PolicyRejected(format!(
                "presence write for carrier {carrier_id} affected no rows"
            )));
        }

        let mut profile = CarrierProfile::new(
            carrier_id,
            self.identity.carrier_type,
            self.identity.display_name.clone(),
        );
        profile.online = online;
        profile.location = location;

        match self.store.create_profile(profile).await {
            Ok(_) => {
                info!(carrier_id = %carrier_id, "carrier profile created on first toggle");
                Ok(())
            }
            Err(AppError::Conflict(_)) => {
                // Created by someone else between the read and the insert.
                if self.store.update_presence(carrier_id, online, location).await? > 0 {
                    Ok(())
                } else {
                    Err(AppError::PolicyRejected(format!(
                        "presence write for carrier {carrier_id} affected no rows"
                    )))
                }
            }
            Err(err) => Err(err),
        }
    }

    fn spawn_emitter(&self) -> SupervisedTask {
        let carrier_id = self.identity.carrier_id;
        let store = self.store.clone();
        let location = self.location.clone();
        let state = self.state.clone();
        let fix_timeout = self.config.fix_timeout;
        let min_distance_m = self.config.min_distance_m;

        SupervisedTask::periodic("location-emitter", self.config.emit_interval, false, move || {
            let store = store.clone();
            let location = location.clone();
            let state = state.clone();

            async move {
                let point = timeout(fix_timeout, location.current_position())
                    .await
                    .map_err(|_| AppError::Unavailable("location fix timed out".to_string()))??;

                let last = state.borrow().location;
                if let Some(last) = last {
                    if haversine_m(&last, &point) < min_distance_m {
                        return Ok(());
                    }
                }

                if store.update_location(carrier_id, point).await? == 0 {
                    debug!(carrier_id = %carrier_id, "location update affected no rows");
                    return Ok(());
                }

                state.send_modify(|current| current.location = Some(point));
                debug!(carrier_id = %carrier_id, lat = point.lat, lng = point.lng, "location emitted");
                Ok(())
            }
        })
    }

    pub async fn apply_remote(&self, profile: &CarrierProfile) {
        if profile.carrier_id != self.identity.carrier_id || profile.online || !self.is_online() {
            return;
        }

        let mut emitter = self.emitter.lock().await;
        if let Some(task) = emitter.take() {
            task.stop().await;
        }
        self.state.send_replace(PresenceState::default());

        info!(carrier_id = %profile.carrier_id, "carrier taken offline remotely");
    }

    pub async fn follow_own_row(
        self: &Arc<Self>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Result<SupervisedTask, AppError> {
        let mut subscription = feed
            .subscribe(FeedFilter::CarrierId(self.identity.carrier_id))
            .await?;
        let controller = Arc::clone(self);

        Ok(SupervisedTask::spawn("own-presence-row", move |cancel| async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = subscription.next() => match event {
                        Some(event) => {
                            if let Some(profile) = event.as_carrier() {
                                controller.apply_remote(profile).await;
                            }
                        }
                        None => {
                            warn!("presence row feed closed");
                            break;
                        }
                    },
                }
            }
        }))
    }
}
