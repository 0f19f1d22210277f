use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::carrier::CarrierType;
use crate::models::event::{ChangeEvent, ChangedRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFilter {
    CarrierType(CarrierType),
    RequestId(Uuid),
    RequesterId(Uuid),
    CarrierId(Uuid),
}

impl FeedFilter {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match (self, &event.row) {
            (FeedFilter::CarrierType(carrier_type), ChangedRow::DeliveryRequest(request)) => {
                request.carrier_type == *carrier_type
            }
            (FeedFilter::RequestId(id), ChangedRow::DeliveryRequest(request)) => request.id == *id,
            (FeedFilter::RequesterId(id), ChangedRow::DeliveryRequest(request)) => {
                request.requester_id == *id
            }
            (FeedFilter::CarrierId(id), ChangedRow::CarrierProfile(profile)) => {
                profile.carrier_id == *id
            }
            _ => false,
        }
    }

    pub fn from_parts(
        carrier_type: Option<CarrierType>,
        request_id: Option<Uuid>,
        requester_id: Option<Uuid>,
        carrier_id: Option<Uuid>,
    ) -> Result<Self, AppError> {
        let mut filters = carrier_type
            .map(FeedFilter::CarrierType)
            .into_iter()
            .chain(request_id.map(FeedFilter::RequestId))
            .chain(requester_id.map(FeedFilter::RequesterId))
            .chain(carrier_id.map(FeedFilter::CarrierId));

        match (filters.next(), filters.next()) {
            (Some(filter), None) => Ok(filter),
            (None, _) => Err(AppError::BadRequest(
                "one of carrier_type, request_id, requester_id, carrier_id is required".to_string(),
            )),
            (Some(_), Some(_)) => Err(AppError::BadRequest(
                "only one feed filter may be given".to_string(),
            )),
        }
    }
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, filter: FeedFilter) -> Result<Subscription, AppError>;
}

pub struct Subscription {
    filter: FeedFilter,
    stream: Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>,
}

impl Subscription {
    pub fn new<S>(filter: FeedFilter, stream: S) -> Self
    where
        S: Stream<Item = ChangeEvent> + Send + 'static,
    {
        Self {
            filter,
            stream: Box::pin(stream),
        }
    }

    /// Filters a broadcast receiver. Lagged receivers skip what they missed.
    pub fn from_broadcast(filter: FeedFilter, rx: broadcast::Receiver<ChangeEvent>) -> Self {
        let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
            Ok(event) if filter.matches(&event) => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(?filter, skipped, "change feed subscriber lagged");
                None
            }
        });

        Self::new(filter, stream)
    }

    pub fn filter(&self) -> FeedFilter {
        self.filter
    }

    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.stream.next().await
    }

    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = ChangeEvent> + Send>> {
        self.stream
    }
}
