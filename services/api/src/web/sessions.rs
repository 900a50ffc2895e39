//! services/api/src/web/sessions.rs
//!
//! Capture session endpoints. These are authenticated by the unguessable
//! session token rather than the browser cookie, so a phone can upload
//! photos without the owner's credentials.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use rand::Rng;
use readalong_core::content;
use readalong_core::domain::{Progress, SessionStatus};
use readalong_core::ports::PortError;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::web::books::PageDto;
use crate::web::ingest_task;
use crate::web::state::AppState;

const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddPageResponse {
    pub page_number: i64,
    pub image_path: String,
}

/// Polling surface for the desktop while the phone captures pages and the
/// pipeline runs.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub status: String,
    pub page_count: usize,
    pub pages: Vec<PageDto>,
    #[schema(value_type = Object)]
    pub progress: Progress,
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => ".png",
        "image/webp" => ".webp",
        "image/heic" => ".heic",
        _ => ".jpg",
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Accept one photographed page from the phone uploader.
///
/// Valid only while the session is `active`. The image blob is written to
/// the artifact store first; the page row (with its serialized ordinal)
/// follows, so a crash between the two leaves only an orphaned blob.
pub async fn add_page_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.db.get_capture_session(&token).await?;
    if session.observed_status(Utc::now()) != SessionStatus::Active {
        return Err(PortError::Conflict(
            "Capture session is no longer accepting pages".to_string(),
        )
        .into());
    }

    let mut image: Option<(Vec<u8>, String)> = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::Port(PortError::Validation(format!(
            "Failed to read multipart data: {}",
            e
        )))
    })? {
        if field.name() != Some("image") {
            continue;
        }
        let mime = field.content_type().unwrap_or_default().to_string();
        if !mime.starts_with("image/") {
            return Err(PortError::Validation(format!(
                "Expected an image upload, got '{}'",
                mime
            ))
            .into());
        }
        let bytes = field.bytes().await.map_err(|e| {
            ApiError::Port(PortError::Validation(format!(
                "Failed to read image bytes: {}",
                e
            )))
        })?;
        image = Some((bytes.to_vec(), mime));
        break;
    }

    let (bytes, mime) =
        image.ok_or_else(|| PortError::Validation("Multipart field 'image' is required".into()))?;
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(PortError::Validation("Image exceeds the 10 MiB limit".into()).into());
    }

    let key = content::upload_key(
        Utc::now().timestamp_millis(),
        rand::thread_rng().gen_range(0..10_000_000),
        extension_for_mime(&mime),
    );
    let image_uri = state.store.put(&key, bytes, &mime).await?;
    let page = state.db.insert_page(session.book_id, &image_uri).await?;

    Ok((
        StatusCode::CREATED,
        Json(AddPageResponse {
            page_number: page.page_number,
            image_path: page.image_path,
        }),
    ))
}

/// Transition the session into processing and kick off ingestion.
///
/// Idempotent: repeat calls while processing or after completion succeed
/// without spawning a second worker; a failed run can be retried this way.
pub async fn complete_session_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.db.get_capture_session(&token).await?;
    if session.is_expired(Utc::now()) {
        return Err(PortError::Conflict("Capture session has expired".to_string()).into());
    }

    if state.db.begin_processing(&token).await? {
        info!("Starting ingestion for book {}", session.book_id);
        let worker_state = state.clone();
        let worker_token = token.clone();
        tokio::spawn(async move {
            ingest_task::ingestion_process(worker_state, worker_token).await;
        });
    }
    // Losers of the transition race observe processing/completed and treat
    // the call as success.

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": true })),
    ))
}

/// Report the session status, its pages, and ingestion progress.
#[utoipa::path(
    get,
    path = "/sessions/{token}/status",
    params(("token" = String, Path, description = "Capture session token")),
    responses(
        (status = 200, description = "Current session status", body = SessionStatusResponse),
        (status = 404, description = "Unknown session token")
    )
)]
pub async fn session_status_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.db.get_capture_session(&token).await?;
    let pages = state.db.pages_for_book(session.book_id).await?;

    Ok(Json(SessionStatusResponse {
        status: session.observed_status(Utc::now()).as_str().to_string(),
        page_count: pages.len(),
        pages: pages.iter().map(PageDto::from).collect(),
        progress: session.progress,
    }))
}
