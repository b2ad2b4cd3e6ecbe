//! Frame ingest endpoint
//!
//! Accepts one encoded image per request under the multipart field `frame`
//! and hands it to the participant's pipeline. The gate decision is not
//! reported back; success is an empty 200.

use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::post,
};

use super::{ApiError, ApiState};

/// Multipart field carrying the image
pub const FRAME_FIELD: &str = "frame";

/// Upper bound on one uploaded frame
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Build frame ingest router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/{id}/frames", post(ingest))
        .layer(DefaultBodyLimit::max(MAX_FRAME_BYTES))
        .with_state(state)
}

async fn ingest(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<StatusCode, ApiError> {
    let mut payload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed form data: {e}")))?
    {
        if field.name() == Some(FRAME_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("failed to read frame: {e}")))?;
            payload = Some(bytes);
            break;
        }
    }

    let payload = payload
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No frame provided".to_string()))?;

    let decision = state.daemon.submit_frame(&id, payload.to_vec()).await?;
    tracing::debug!(participant = %id, transmit = decision.is_transmit(), "frame ingested");

    Ok(StatusCode::OK)
}
