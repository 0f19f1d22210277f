//! Carrier-side matching. The feed and the periodic read of open requests
//! feed one reducer; the read is authoritative.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::presence::{CarrierIdentity, PresenceState};
use crate::client::task::SupervisedTask;
use crate::config::MatchingConfig;
use crate::error::AppError;
use crate::feed::{ChangeFeed, FeedFilter};
use crate::models::carrier::CarrierType;
use crate::models::request::DeliveryRequest;
use crate::store::{ClaimOutcome, RequestLedger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Accepted(Uuid),
    NoLongerAvailable(Uuid),
    Withdrawn(Uuid),
    // A later read may offer the request again.
    ClaimFailed(Uuid),
}

impl Notice {
    pub fn request_id(&self) -> Uuid {
        match self {
            Notice::Accepted(id)
            | Notice::NoLongerAvailable(id)
            | Notice::Withdrawn(id)
            | Notice::ClaimFailed(id) => *id,
        }
    }

    fn closes_request(&self) -> bool {
        matches!(self, Notice::Accepted(_) | Notice::NoLongerAvailable(_))
    }
}

#[derive(Debug, Clone)]
pub enum Signal {
    Pushed(DeliveryRequest),
    Polled(Vec<DeliveryRequest>),
    Presence(bool),
    Declined(Uuid),
    Resolved {
        request_id: Uuid,
        notice: Notice,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct MatchingState {
    carrier_id: Uuid,
    carrier_type: CarrierType,
    online: bool,
    prompt: Option<DeliveryRequest>,
    notice: Option<Notice>,
    // Request id -> newest row version known to be closed to this carrier.
    closed: HashMap<Uuid, DateTime<Utc>>,
}

impl MatchingState {
    pub fn new(identity: &CarrierIdentity) -> Self {
        Self {
            carrier_id: identity.carrier_id,
            carrier_type: identity.carrier_type,
            online: false,
            prompt: None,
            notice: None,
            closed: HashMap::new(),
        }
    }

    pub fn online(&self) -> bool {
        self.online
    }

    pub fn prompt(&self) -> Option<&DeliveryRequest> {
        self.prompt.as_ref()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    fn presentable(&self, request: &DeliveryRequest) -> bool {
        request.carrier_type == self.carrier_type
            && request.is_open()
            && !self
                .closed
                .get(&request.id)
                .is_some_and(|closed_at| request.updated_at <= *closed_at)
    }

    fn close(&mut self, request_id: Uuid, version: DateTime<Utc>) {
        let closed_at = self.closed.entry(request_id).or_insert(version);
        if *closed_at < version {
            *closed_at = version;
        }
    }

    fn present(&mut self, request: DeliveryRequest) -> bool {
        if self.prompt.as_ref() == Some(&request) {
            return false;
        }
        let replaces_other = self
            .prompt
            .as_ref()
            .is_none_or(|current| current.id != request.id);
        let keeps_notice = self
            .notice
            .as_ref()
            .is_some_and(|notice| notice.closes_request() && notice.request_id() == request.id);
        if replaces_other && !keeps_notice {
            self.notice = None;
        }
        self.prompt = Some(request);
        true
    }

    pub fn apply(&mut self, signal: Signal) -> bool {
        match signal {
            Signal::Presence(online) => {
                if self.online == online {
                    return false;
                }
                self.online = online;
                if !online {
                    self.prompt = None;
                }
                true
            }
            Signal::Pushed(request) => {
                if request.carrier_type != self.carrier_type {
                    return false;
                }
                if !request.is_open() {
                    self.close(request.id, request.updated_at);
                }
                if !self.online {
                    return false;
                }

                let current = self.prompt.as_ref().map(|p| (p.id, p.created_at));
                if self.presentable(&request) {
                    match current {
                        None => self.present(request),
                        Some((id, _)) if id == request.id => self.present(request),
                        Some((_, created_at)) if request.created_at > created_at => {
                            self.present(request)
                        }
                        Some(_) => false,
                    }
                } else if current.is_some_and(|(id, _)| id == request.id) {
                    self.prompt = None;
                    if request.assigned_carrier_id != Some(self.carrier_id) {
                        self.notice = Some(Notice::Withdrawn(request.id));
                    }
                    true
                } else {
                    false
                }
            }
            Signal::Polled(open) => {
                if !self.online {
                    return false;
                }

                let newest = open
                    .into_iter()
                    .filter(|request| self.presentable(request))
                    .max_by_key(|request| request.created_at);

                match (newest, self.prompt.as_ref().map(|p| p.id)) {
                    (Some(request), _) => self.present(request),
                    (None, Some(stale)) => {
                        self.prompt = None;
                        self.notice = Some(Notice::Withdrawn(stale));
                        true
                    }
                    (None, None) => false,
                }
            }
            Signal::Declined(request_id) => match self.prompt.take() {
                Some(current) if current.id == request_id => {
                    self.close(current.id, current.updated_at);
                    self.notice = None;
                    true
                }
                other => {
                    self.prompt = other;
                    false
                }
            },
            Signal::Resolved {
                request_id,
                notice,
                at,
            } => {
                let shown = self
                    .prompt
                    .take_if(|p| p.id == request_id)
                    .map(|p| p.updated_at);
                if notice.closes_request() {
                    self.close(request_id, shown.map_or(at, |version| version.max(at)));
                }
                self.notice = Some(notice);
                true
            }
        }
    }
}

pub struct MatchingEngine {
    identity: CarrierIdentity,
    ledger: Arc<dyn RequestLedger>,
    feed: Arc<dyn ChangeFeed>,
    config: MatchingConfig,
    state: watch::Sender<MatchingState>,
    poll_lock: Mutex<()>,
}

impl MatchingEngine {
    pub fn new(
        identity: CarrierIdentity,
        ledger: Arc<dyn RequestLedger>,
        feed: Arc<dyn ChangeFeed>,
        config: MatchingConfig,
    ) -> Arc<Self> {
        let (state, _unused_rx) = watch::channel(MatchingState::new(&identity));

        Arc::new(Self {
            identity,
            ledger,
            feed,
            config,
            state,
            poll_lock: Mutex::new(()),
        })
    }

    pub fn view(&self) -> watch::Receiver<MatchingState> {
        self.state.subscribe()
    }

    pub fn prompt(&self) -> Option<DeliveryRequest> {
        self.state.borrow().prompt.clone()
    }

    pub fn notice(&self) -> Option<Notice> {
        self.state.borrow().notice.clone()
    }

    pub fn apply(&self, signal: Signal) -> bool {
        self.state.send_if_modified(|state| state.apply(signal))
    }

    pub async fn poll_once(&self) -> Result<(), AppError> {
        // Reads apply in the order they were taken.
        let _serial = self.poll_lock.lock().await;
        if !self.state.borrow().online {
            return Ok(());
        }

        let open = self.ledger.open_requests(self.identity.carrier_type).await?;
        debug!(
            carrier_id = %self.identity.carrier_id,
            open = open.len(),
            "open requests polled"
        );
        self.apply(Signal::Polled(open));
        Ok(())
    }

    /// Issues the conditioned claim. Losing the race is a normal outcome.
    pub async fn accept(&self, request_id: Uuid) -> Notice {
        let carrier_id = self.identity.carrier_id;

        let (notice, at) = match self.ledger.claim(request_id, carrier_id).await {
            Ok(ClaimOutcome::Won(row)) => {
                info!(request_id = %request_id, carrier_id = %carrier_id, "delivery accepted");
                (Notice::Accepted(request_id), row.updated_at.max(Utc::now()))
            }
            Ok(ClaimOutcome::Lost) => {
                info!(request_id = %request_id, carrier_id = %carrier_id, "request already taken");
                (Notice::NoLongerAvailable(request_id), Utc::now())
            }
            Err(err) => {
                warn!(request_id = %request_id, error = %err, "claim failed");
                (Notice::ClaimFailed(request_id), Utc::now())
            }
        };

        self.apply(Signal::Resolved {
            request_id,
            notice: notice.clone(),
            at,
        });
        notice
    }

    pub fn decline(&self, request_id: Uuid) {
        if self.apply(Signal::Declined(request_id)) {
            debug!(request_id = %request_id, carrier_id = %self.identity.carrier_id, "request declined");
        }
    }

    pub async fn start(
        self: &Arc<Self>,
        mut presence: watch::Receiver<PresenceState>,
    ) -> Result<MatchingHandle, AppError> {
        let initial_online = presence.borrow_and_update().online;
        self.apply(Signal::Presence(initial_online));

        let mut subscription = self
            .feed
            .subscribe(FeedFilter::CarrierType(self.identity.carrier_type))
            .await?;

        let engine = Arc::clone(self);
        let listener = SupervisedTask::spawn("matching-feed", move |cancel| async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = subscription.next() => match event {
                        Some(event) => {
                            if let Some(request) = event.as_request() {
                                engine.apply(Signal::Pushed(request.clone()));
                            }
                        }
                        None => {
                            warn!("request feed closed; relying on polling");
                            break;
                        }
                    },
                }
            }
        });

        let engine = Arc::clone(self);
        let presence_task = SupervisedTask::spawn("matching-presence", move |cancel| async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    changed = presence.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = presence.borrow_and_update().online;
                        engine.apply(Signal::Presence(online));
                        if online {
                            if let Err(err) = engine.poll_once().await {
                                warn!(error = %err, "poll after going online failed");
                            }
                        }
                    }
                }
            }
        });

        let engine = Arc::clone(self);
        let poller = SupervisedTask::periodic("matching-poll", self.config.poll_interval, true, move || {
            let engine = engine.clone();
            async move { engine.poll_once().await }
        });

        info!(
            carrier_id = %self.identity.carrier_id,
            carrier_type = %self.identity.carrier_type,
            "matching engine started"
        );

        Ok(MatchingHandle {
            tasks: vec![listener, presence_task, poller],
        })
    }
}

// Dropping the handle cancels the engine tasks.
pub struct MatchingHandle {
    tasks: Vec<SupervisedTask>,
}

impl MatchingHandle {
    pub async fn stop(self) {
        for task in self.tasks {
            task.stop().await;
        }
    }
}
