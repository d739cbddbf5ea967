use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use chrono::Utc;
use serde::Serialize;
use tracing::instrument;

use crate::api::server::AppState;
use crate::constants::SOCKET_CONNECTED;
use crate::ranking::notify::{ChangeSubscription, LeaderboardEvent};

/// Message pushed to socket clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocketEvent {
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

impl SocketEvent {
    pub fn connected() -> Self {
        Self {
            event: SOCKET_CONNECTED,
            ts: Some(Utc::now().timestamp_millis()),
        }
    }
}

impl From<LeaderboardEvent> for SocketEvent {
    fn from(event: LeaderboardEvent) -> Self {
        Self {
            event: event.name(),
            ts: None,
        }
    }
}

/// Upgrades to a socket that relays leaderboard change signals.
///
/// The subscription is taken before the upgrade completes so no signal sent after the request
/// arrived is missed.
#[instrument(skip(ws, state))]
pub async fn socket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let changes = state.service.subscribe();
    ws.on_upgrade(move |socket| relay_changes(socket, changes))
}

async fn relay_changes(mut socket: WebSocket, mut changes: ChangeSubscription) {
    tracing::debug!("socket client connected");
    if send_event(&mut socket, &SocketEvent::connected()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            change = changes.changed() => {
                let Some(event) = change else {
                    break;
                };

                if send_event(&mut socket, &SocketEvent::from(event)).await.is_err() {
                    break;
                }
            }

            incoming = socket.recv() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                // clients have nothing to say; pings are answered by axum
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!("socket client disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &SocketEvent) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).map_err(axum::Error::new)?;
    socket.send(Message::text(payload)).await
}
