//! services/api/src/web/blocks.rs
//!
//! Text block endpoints: listing a page's blocks, manual re-detection, and
//! the speak path with its content-identity audio cache.
//!
//! Speech artifacts are keyed by a hash of the trimmed text, so identical
//! passages share one MP3 and one pair of alignment files no matter how
//! many blocks or books contain them. The cache has two layers: the
//! block's own `audio_path` reference, and the derived key's existence in
//! the artifact store (which catches sibling blocks that spoke first).

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use readalong_core::content;
use readalong_core::domain::{CharTiming, TextBlock};
use readalong_core::ports::{PortError, PortResult, VoiceConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockDto {
    pub id: Uuid,
    pub page_id: Uuid,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub text: String,
    pub confidence: f64,
    pub status: String,
    pub audio_url: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectBlocksResponse {
    pub blocks: Vec<BlockDto>,
    pub total_blocks: usize,
}

/// The speak payload. Alignment fields are `null` when no character timing
/// is available; audio playback works either way.
#[derive(Serialize, ToSchema)]
pub struct SpeakResponse {
    pub audio_url: String,
    pub text: String,
    #[schema(value_type = Option<Vec<Object>>)]
    pub alignment: Option<Vec<CharTiming>>,
    #[schema(value_type = Option<Vec<Object>>)]
    pub normalized_alignment: Option<Vec<CharTiming>>,
}

#[derive(Deserialize, ToSchema)]
pub struct SpeakTextRequest {
    pub text: String,
}

impl From<&TextBlock> for BlockDto {
    fn from(block: &TextBlock) -> Self {
        Self {
            id: block.id,
            page_id: block.page_id,
            x: block.rect.x,
            y: block.rect.y,
            width: block.rect.width,
            height: block.rect.height,
            text: block.ocr_text.clone(),
            confidence: block.confidence,
            status: block.status.as_str().to_string(),
            audio_url: block.audio_path.clone(),
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /pages/{id}/blocks - all blocks for a page, in insertion order.
pub async fn list_blocks_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(page_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = state.db.owner_of_page(page_id).await?;
    if owner != user_id {
        return Err(PortError::PermissionDenied.into());
    }
    let blocks = state.db.blocks_for_page(page_id).await?;
    Ok(Json(blocks.iter().map(BlockDto::from).collect::<Vec<_>>()))
}

/// POST /pages/{id}/detect-blocks - re-run OCR for one page, replacing its
/// existing blocks in a single transaction.
pub async fn detect_blocks_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(page_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = state.db.owner_of_page(page_id).await?;
    if owner != user_id {
        return Err(PortError::PermissionDenied.into());
    }

    let page = state.db.get_page(page_id).await?;
    let key = content::key_from_uri(&page.image_path).ok_or_else(|| {
        ApiError::Port(PortError::Unexpected(
            "Page has an unresolvable image reference".to_string(),
        ))
    })?;
    let image = state.store.get_bytes(&key).await?;
    let detected = state.vision.extract_blocks(&image).await?;
    let stored = state.db.replace_blocks(page_id, &detected).await?;

    info!("Re-detected {} block(s) for page {}", stored.len(), page_id);
    Ok(Json(DetectBlocksResponse {
        total_blocks: stored.len(),
        blocks: stored.iter().map(BlockDto::from).collect(),
    }))
}

/// Speak one block, serving the cached artifact when the text has been
/// synthesized before.
#[utoipa::path(
    post,
    path = "/blocks/{id}/speak",
    params(("id" = Uuid, Path, description = "Block id")),
    responses(
        (status = 200, description = "Audio and optional character alignment", body = SpeakResponse),
        (status = 400, description = "Empty block text or missing TTS configuration"),
        (status = 403, description = "Caller does not own this block"),
        (status = 404, description = "Unknown block")
    )
)]
pub async fn speak_block_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(block_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = state.db.owner_of_block(block_id).await?;
    if owner != user_id {
        return Err(PortError::PermissionDenied.into());
    }

    let block = state.db.get_block(block_id).await?;
    let text = block.ocr_text.trim().to_string();
    if text.is_empty() {
        return Err(PortError::Validation("Block has no text to speak".to_string()).into());
    }

    let content_uuid = content::content_uuid(&text);

    // Layer 1: the block's own audio reference, when it still resolves to
    // a live object. Legacy filesystem paths and deleted blobs are cleared
    // and fall through to the miss path.
    if let Some(stored_path) = &block.audio_path {
        let live = match content::key_from_uri(stored_path) {
            Some(key) => state.store.exists(&key).await?,
            None => false,
        };
        if live {
            let (alignment, normalized_alignment) = load_alignments(&state, &content_uuid).await;
            return Ok(Json(SpeakResponse {
                audio_url: stored_path.clone(),
                text,
                alignment,
                normalized_alignment,
            }));
        }
        warn!("Block {} has a stale audio reference; re-resolving", block_id);
        state.db.set_block_audio(block_id, None).await?;
    }

    let voice = state.resolve_voice(user_id).await?;
    let spoken = speak_with_cache(&state, &text, &content_uuid, &voice).await?;
    state
        .db
        .set_block_audio(block_id, Some(&spoken.audio_url))
        .await?;
    Ok(Json(spoken))
}

/// POST /tts/direct - speak ad-hoc text (titles, UI strings) through the
/// same content-identity cache, with no block persistence.
pub async fn speak_text_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<SpeakTextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(PortError::Validation("No text to speak".to_string()).into());
    }
    let content_uuid = content::content_uuid(&text);
    let voice = state.resolve_voice(user_id).await?;
    let spoken = speak_with_cache(&state, &text, &content_uuid, &voice).await?;
    Ok(Json(spoken))
}

//=========================================================================================
// Cache plumbing
//=========================================================================================

/// Layer 2 of the cache: probe the derived audio key before synthesizing,
/// so a block whose text was already spoken (by any block, in any book)
/// adopts the shared artifact. Concurrent first-speakers may still both
/// synthesize; they overwrite the same key with identical-content bytes.
async fn speak_with_cache(
    state: &Arc<AppState>,
    text: &str,
    content_uuid: &str,
    voice: &VoiceConfig,
) -> PortResult<SpeakResponse> {
    let audio_key = content::audio_key(content_uuid);

    if state.store.exists(&audio_key).await? {
        let (alignment, normalized_alignment) = load_alignments(state, content_uuid).await;
        return Ok(SpeakResponse {
            audio_url: state.store.uri_for(&audio_key),
            text: text.to_string(),
            alignment,
            normalized_alignment,
        });
    }

    let result = state.speech.synthesize(text, voice).await?;
    let audio_url = state
        .store
        .put(&audio_key, result.audio, "audio/mpeg")
        .await?;

    // Alignment blobs are uploaded in parallel and best-effort: a missing
    // alignment only disables character highlighting for this artifact.
    let alignment_key = content::alignment_key(content_uuid);
    let normalized_alignment_key = content::normalized_alignment_key(content_uuid);
    let alignment_upload = store_alignment(
        state,
        &alignment_key,
        result.alignment.as_deref(),
    );
    let normalized_upload = store_alignment(
        state,
        &normalized_alignment_key,
        result.normalized_alignment.as_deref(),
    );
    tokio::join!(alignment_upload, normalized_upload);

    Ok(SpeakResponse {
        audio_url,
        text: text.to_string(),
        alignment: result.alignment,
        normalized_alignment: result.normalized_alignment,
    })
}

async fn store_alignment(state: &Arc<AppState>, key: &str, timings: Option<&[CharTiming]>) {
    let Some(timings) = timings else {
        return;
    };
    let payload = match serde_json::to_vec(timings) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to serialize alignment {}: {}", key, e);
            return;
        }
    };
    if let Err(e) = state.store.put(key, payload, "application/json").await {
        warn!("Failed to upload alignment {}: {}", key, e);
    }
}

/// Loads both alignment artifacts for a content id. Absence (or any load
/// failure) reads as "no character timing available".
async fn load_alignments(
    state: &Arc<AppState>,
    content_uuid: &str,
) -> (Option<Vec<CharTiming>>, Option<Vec<CharTiming>>) {
    let (alignment, normalized) = tokio::join!(
        load_alignment(state, content::alignment_key(content_uuid)),
        load_alignment(state, content::normalized_alignment_key(content_uuid)),
    );
    (alignment, normalized)
}

async fn load_alignment(state: &Arc<AppState>, key: String) -> Option<Vec<CharTiming>> {
    match state.store.get_bytes(&key).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(timings) => Some(timings),
            Err(e) => {
                warn!("Corrupt alignment artifact {}: {}", key, e);
                None
            }
        },
        Err(PortError::NotFound(_)) => None,
        Err(e) => {
            warn!("Failed to load alignment {}: {}", key, e);
            None
        }
    }
}
