use crate::auth::validate_token;
use crate::db::SiteRepo;
use crate::realtime::ChannelHub;
use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use podium_core::notify::RealtimeMessage;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Auth token
    pub token: Option<String>,
}

/// Shared state for WebSocket handler
#[derive(Clone)]
pub struct WsState {
    pub repo: Arc<SiteRepo>,
    pub hub: Arc<ChannelHub>,
}

/// WebSocket upgrade handler for `/ws/websites/{website_id}`
pub async fn ws_handler(
    State(state): State<WsState>,
    Path(website_id): Path<i64>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let auth = match query.token.as_deref() {
        Some(t) => validate_token(&state.repo, t),
        None => None,
    };

    let auth = match auth {
        Some(a) => a,
        None => {
            warn!("WebSocket connection rejected: invalid or missing token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let website = match state.repo.get_website(website_id) {
        Ok(Some(website)) => website,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to load website {}: {}", website_id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match state.repo.is_member(website.team_id, &auth.user.id) {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                "WebSocket connection rejected: {} is not a member of website {}",
                auth.user.email, website_id
            );
            return StatusCode::FORBIDDEN.into_response();
        }
        Err(e) => {
            error!("Failed to check membership: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    info!(
        "WebSocket upgrade: user={}, website={}",
        auth.user.email, website_id
    );

    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub, website_id))
        .into_response()
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<ChannelHub>, website_id: i64) {
    // Subscribed before the acknowledgment so nothing published after it
    // is missed
    let mut subscriber = hub.subscribe(website_id);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let ack = RealtimeMessage::Subscribed { website_id };
    match ack.to_json() {
        Ok(text) => {
            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                error!("Failed to send subscription acknowledgment: {}", e);
                drop(subscriber);
                hub.remove_if_idle(website_id);
                return;
            }
        }
        Err(e) => error!("Failed to encode subscription acknowledgment: {}", e),
    }

    info!(
        "WebSocket connected: website={}, subscribers={}",
        website_id,
        hub.subscriber_count(website_id)
    );

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket closed by client: website={}", website_id);
                        break;
                    }
                    Some(Ok(_)) => {
                        // The channel is server-to-client only
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            outgoing = subscriber.recv() => {
                let Some(message) = outgoing else {
                    break;
                };
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode realtime message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    debug!("Failed to forward realtime message: {}", e);
                    break;
                }
            }
        }
    }

    drop(subscriber);
    hub.remove_if_idle(website_id);
    info!("WebSocket disconnected: website={}", website_id);
}
