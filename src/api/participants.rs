//! Participant lifecycle endpoints and the stream receiving socket

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::{ApiError, ApiState};
use crate::daemon::ParticipantStatus;
use crate::session::SessionState;

/// Response to a successful join
#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub participant: String,
    pub session_id: Uuid,
    pub state: SessionState,
}

/// Response to a leave
#[derive(Debug, Serialize)]
pub struct LeaveResponse {
    pub participant: String,
    pub state: SessionState,
}

/// Build participants router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/{id}", get(status).post(join).delete(leave))
        .route("/{id}/stream", get(stream))
        .with_state(state)
}

async fn join(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JoinResponse>), ApiError> {
    let handle = state.daemon.join(&id).await?;
    Ok((
        StatusCode::CREATED,
        Json(JoinResponse {
            participant: handle.participant().to_string(),
            session_id: handle.session_id(),
            state: handle.state(),
        }),
    ))
}

async fn leave(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<LeaveResponse>, ApiError> {
    let session = state.daemon.leave(&id).await?;
    Ok(Json(LeaveResponse {
        participant: id,
        state: session,
    }))
}

async fn status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<ParticipantStatus>, ApiError> {
    state
        .daemon
        .status(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown participant: {id}")))
}

/// Forward this participant's stream packets over a WebSocket
async fn stream(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(packets) = state.packets.clone() else {
        return ApiError::Unavailable("stream packets are not served by this daemon".to_string())
            .into_response();
    };
    let rx = packets.subscribe();
    ws.on_upgrade(move |socket| forward_packets(socket, id, rx))
}

async fn forward_packets(
    socket: WebSocket,
    participant: String,
    mut rx: tokio::sync::broadcast::Receiver<crate::transport::RoutedPacket>,
) {
    let (mut sender, mut receiver) = socket.split();
    tracing::info!(participant = %participant, "stream receiver connected");

    loop {
        tokio::select! {
            routed = rx.recv() => match routed {
                Ok(routed) if routed.participant == participant => {
                    let text = match serde_json::to_string(&routed.packet) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to encode stream packet");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    // receivers discard streams with gaps
                    tracing::warn!(participant = %participant, skipped, "stream receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!(participant = %participant, "stream receiver disconnected");
}
