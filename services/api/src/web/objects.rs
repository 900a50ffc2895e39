//! services/api/src/web/objects.rs
//!
//! Streams stored blobs (page images, audio, alignment JSON) to clients
//! with a Content-Type inferred from the key's extension.

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::Response,
};
use readalong_core::content;
use readalong_core::ports::PortError;
use std::sync::Arc;

use crate::error::ApiError;
use crate::web::state::AppState;

/// GET /objects/{key...} - stream one blob.
pub async fn stream_object_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    // Only keys under the known prefixes are reachable; anything else 404s
    // without touching the store.
    if content::key_from_uri(&key).is_none() {
        return Err(PortError::NotFound(format!("Object {} not found", key)).into());
    }

    let stream = state.store.open_stream(&key).await?;
    let response = Response::builder()
        .header(header::CONTENT_TYPE, content::content_type_for_key(&key))
        .header(header::CACHE_CONTROL, "public, max-age=3600")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(format!("Failed to build response: {}", e)))?;
    Ok(response)
}
