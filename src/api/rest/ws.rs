use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::feed::{ChangeFeed, FeedFilter, Subscription};
use crate::models::carrier::CarrierType;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct FeedQuery {
    pub carrier_type: Option<String>,
    pub request_id: Option<Uuid>,
    pub requester_id: Option<Uuid>,
    pub carrier_id: Option<Uuid>,
}

impl FeedQuery {
    fn into_filter(self) -> Result<FeedFilter, AppError> {
        let carrier_type = self
            .carrier_type
            .as_deref()
            .map(str::parse::<CarrierType>)
            .transpose()?;

        FeedFilter::from_parts(carrier_type, self.request_id, self.requester_id, self.carrier_id)
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.into_filter()?;
    let subscription = state.backend.subscribe(filter).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription)))
}

async fn handle_socket(socket: WebSocket, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    let filter = subscription.filter();

    info!(?filter, "websocket feed connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize change event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    // Either side ending tears down the other, releasing the subscription.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(?filter, "websocket feed disconnected");
}
