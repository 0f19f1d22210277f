//! Requester-side waiting: `Waiting(T) -> Assigned | TimedOut | Withdrawn`, and
//! `TimedOut -> Waiting(T)` on an explicit retry.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::task::SupervisedTask;
use crate::config::WaitConfig;
use crate::error::AppError;
use crate::feed::{ChangeFeed, FeedFilter, Subscription};
use crate::geo::directions::{Directions, locate_parties};
use crate::models::carrier::CarrierType;
use crate::models::request::{DeliveryRequest, NewDeliveryRequest, RequestStatus};
use crate::store::{PresenceStore, RequestLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Waiting { remaining: u32 },
    Assigned { carrier_id: Uuid },
    TimedOut,
    Withdrawn,
}

impl WaitState {
    pub fn start(countdown: u32) -> Self {
        if countdown == 0 {
            WaitState::TimedOut
        } else {
            WaitState::Waiting {
                remaining: countdown,
            }
        }
    }

    pub fn tick(&mut self) -> bool {
        match *self {
            WaitState::Waiting { remaining } if remaining > 1 => {
                *self = WaitState::Waiting {
                    remaining: remaining - 1,
                };
                true
            }
            WaitState::Waiting { .. } => {
                *self = WaitState::TimedOut;
                true
            }
            _ => false,
        }
    }

    /// Any non-empty assignee ends the wait, from any non-final state.
    pub fn observe(&mut self, request: &DeliveryRequest) -> bool {
        if self.is_final() {
            return false;
        }

        match (request.assigned_carrier_id, request.status) {
            (Some(carrier_id), _) => {
                *self = WaitState::Assigned { carrier_id };
                true
            }
            (None, RequestStatus::Declined) => {
                *self = WaitState::Withdrawn;
                true
            }
            (None, _) => false,
        }
    }

    pub fn can_retry(&self) -> bool {
        matches!(self, WaitState::TimedOut)
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, WaitState::Waiting { .. })
    }

    pub fn is_final(&self) -> bool {
        matches!(self, WaitState::Assigned { .. } | WaitState::Withdrawn)
    }
}

pub struct WaitController {
    requester_id: Uuid,
    ledger: Arc<dyn RequestLedger>,
    presence: Arc<dyn PresenceStore>,
    feed: Arc<dyn ChangeFeed>,
    directions: Option<Arc<dyn Directions>>,
    config: WaitConfig,
}

impl WaitController {
    pub fn new(
        requester_id: Uuid,
        ledger: Arc<dyn RequestLedger>,
        presence: Arc<dyn PresenceStore>,
        feed: Arc<dyn ChangeFeed>,
        config: WaitConfig,
    ) -> Self {
        Self {
            requester_id,
            ledger,
            presence,
            feed,
            directions: None,
            config,
        }
    }

    pub fn with_directions(mut self, directions: Arc<dyn Directions>) -> Self {
        self.directions = Some(directions);
        self
    }

    /// Subscribes to the request's own row before inserting it, so no update
    /// can slip between the insert and the subscription.
    pub async fn submit(&self, mut payload: NewDeliveryRequest) -> Result<WaitSession, AppError> {
        payload.validate()?;
        if let Some(directions) = &self.directions {
            locate_parties(directions.as_ref(), &mut payload).await;
        }

        let request = payload.into_request(self.requester_id)?;
        let subscription = self.feed.subscribe(FeedFilter::RequestId(request.id)).await?;
        let request = self.ledger.insert_request(request).await?;

        info!(request_id = %request.id, carrier_type = %request.carrier_type, "waiting for a carrier");
        Ok(self.session(request, subscription))
    }

    pub async fn resume(&self, request_id: Uuid) -> Result<WaitSession, AppError> {
        let subscription = self.feed.subscribe(FeedFilter::RequestId(request_id)).await?;
        let request = self
            .ledger
            .get_request(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("request {request_id} not found")))?;

        Ok(self.session(request, subscription))
    }

    fn session(&self, request: DeliveryRequest, subscription: Subscription) -> WaitSession {
        let mut initial = WaitState::start(self.config.countdown_secs);
        initial.observe(&request);

        let (state_tx, _unused_rx) = watch::channel(initial);
        let state = Arc::new(state_tx);
        let (online_tx, online_rx) = watch::channel(0usize);

        let driver = spawn_driver(
            request.id,
            subscription,
            self.ledger.clone(),
            state.clone(),
            self.config.clone(),
        );

        let presence = self.presence.clone();
        let carrier_type = request.carrier_type;
        let online_poller = SupervisedTask::periodic(
            "online-carrier-count",
            self.config.online_poll_interval,
            true,
            move || {
                let presence = presence.clone();
                let online_tx = online_tx.clone();
                async move {
                    let count = presence.online_carriers(Some(carrier_type)).await?.len();
                    online_tx.send_replace(count);
                    Ok(())
                }
            },
        );

        WaitSession {
            request_id: request.id,
            requester_id: self.requester_id,
            carrier_type,
            countdown: self.config.countdown_secs,
            ledger: self.ledger.clone(),
            state,
            online: online_rx,
            tasks: vec![driver, online_poller],
        }
    }
}

fn spawn_driver(
    request_id: Uuid,
    mut subscription: Subscription,
    ledger: Arc<dyn RequestLedger>,
    state: Arc<watch::Sender<WaitState>>,
    config: WaitConfig,
) -> SupervisedTask {
    SupervisedTask::spawn("wait-driver", move |cancel| async move {
        let mut ticker = interval_at(Instant::now() + config.tick, config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut ticks: u32 = 0;
        let mut feed_open = true;

        while !is_final(&state) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = subscription.next(), if feed_open => match event {
                    Some(event) => {
                        if let Some(request) = event.as_request() {
                            state.send_if_modified(|current| current.observe(request));
                        }
                    }
                    None => {
                        warn!(request_id = %request_id, "request feed closed; relying on reads");
                        feed_open = false;
                    }
                },
                _ = ticker.tick() => {
                    ticks = ticks.wrapping_add(1);
                    state.send_if_modified(WaitState::tick);

                    if config.reconcile_every_secs > 0 && ticks % config.reconcile_every_secs == 0 {
                        match ledger.get_request(request_id).await {
                            Ok(Some(request)) => {
                                state.send_if_modified(|current| current.observe(&request));
                            }
                            Ok(None) => warn!(request_id = %request_id, "request row missing"),
                            Err(err) => warn!(request_id = %request_id, error = %err, "request read failed"),
                        }
                    }
                }
            }
        }

        let last = *state.borrow();
        debug!(request_id = %request_id, state = ?last, "wait driver finished");
    })
}

fn is_final(state: &watch::Sender<WaitState>) -> bool {
    state.borrow().is_final()
}

pub struct WaitSession {
    request_id: Uuid,
    requester_id: Uuid,
    carrier_type: CarrierType,
    countdown: u32,
    ledger: Arc<dyn RequestLedger>,
    state: Arc<watch::Sender<WaitState>>,
    online: watch::Receiver<usize>,
    tasks: Vec<SupervisedTask>,
}

impl WaitSession {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn carrier_type(&self) -> CarrierType {
        self.carrier_type
    }

    pub fn state(&self) -> WaitState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<WaitState> {
        self.state.subscribe()
    }

    pub fn online_carriers(&self) -> usize {
        *self.online.borrow()
    }

    pub fn assigned_carrier(&self) -> Option<Uuid> {
        match self.state() {
            WaitState::Assigned { carrier_id } => Some(carrier_id),
            _ => None,
        }
    }

    pub async fn settled(&self) -> WaitState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(WaitState::is_settled).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Re-broadcasts after a timeout. Ignored unless timed out; an assignment
    /// that won the race is adopted rather than undone.
    pub async fn retry(&self) -> Result<bool, AppError> {
        if !self.state().can_retry() {
            debug!(request_id = %self.request_id, state = ?self.state(), "retry ignored");
            return Ok(false);
        }

        match self.ledger.reopen(self.request_id).await? {
            Some(_) => {
                let countdown = self.countdown;
                let restarted = self.state.send_if_modified(|current| {
                    if current.can_retry() {
                        *current = WaitState::start(countdown);
                        true
                    } else {
                        false
                    }
                });

                info!(request_id = %self.request_id, restarted, "request re-broadcast");
                Ok(restarted)
            }
            None => {
                if let Some(request) = self.ledger.get_request(self.request_id).await? {
                    self.state.send_if_modified(|current| current.observe(&request));
                }
                Ok(false)
            }
        }
    }

    pub async fn withdraw(&self) -> Result<bool, AppError> {
        let Some(row) = self
            .ledger
            .withdraw(self.request_id, self.requester_id)
            .await?
        else {
            if let Some(request) = self.ledger.get_request(self.request_id).await? {
                self.state.send_if_modified(|current| current.observe(&request));
            }
            return Ok(false);
        };

        self.state.send_if_modified(|current| current.observe(&row));
        for task in &self.tasks {
            task.cancel();
        }

        info!(request_id = %self.request_id, "request withdrawn");
        Ok(true)
    }

    pub async fn close(self) {
        for task in self.tasks {
            task.stop().await;
        }
    }
}
