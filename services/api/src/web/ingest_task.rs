//! services/api/src/web/ingest_task.rs
//!
//! This module contains the asynchronous "worker" function responsible for
//! ingesting a completed capture session: cover analysis, per-page OCR,
//! and final assembly of the book's aggregated text.
//!
//! Exactly one worker runs per session; the conditional status transition
//! in `complete` guarantees it. The worker never holds state the handlers
//! need: clients follow along by polling the session's progress record.

use readalong_core::content;
use readalong_core::domain::{Page, Progress, SessionStatus, TextBlock};
use readalong_core::ports::{PortError, PortResult};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::retry;
use crate::web::state::AppState;

/// The main asynchronous task for ingesting a captured book.
///
/// This runs in the background after `complete`; failures are recorded on
/// the book and session rather than surfaced to any caller.
pub async fn ingestion_process(state: Arc<AppState>, token: String) {
    info!("Ingestion started");
    match run_pipeline(&state, &token).await {
        Ok(Outcome::Finished) => info!("Ingestion finished"),
        Ok(Outcome::Aborted) => info!("Ingestion aborted: book was deleted mid-pipeline"),
        Err(e) => {
            error!("Ingestion failed: {}", e);
            record_failure(&state, &token, &e).await;
        }
    }
}

enum Outcome {
    Finished,
    /// The book disappeared underneath the worker; prior steps are kept
    /// and the cascade delete clears any orphans.
    Aborted,
}

async fn run_pipeline(state: &Arc<AppState>, token: &str) -> PortResult<Outcome> {
    let session = state.db.get_capture_session(token).await?;
    let book_id = session.book_id;

    // --- Step 1: Prepare ---
    let pages = state.db.pages_for_book(book_id).await?;
    let steps_total = pages.len() as i64 + 3;
    let mut progress = Progress {
        step_label: "Preparing book for processing".to_string(),
        steps_done: 0,
        steps_total,
        detail: None,
    };
    state.db.update_session_progress(token, &progress).await?;

    if pages.is_empty() {
        return Err(PortError::Validation(
            "No pages were captured in this session".to_string(),
        ));
    }

    // --- Step 2: Cover analysis ---
    if !book_exists(state, book_id).await? {
        return Ok(Outcome::Aborted);
    }
    progress.step_label = "Analyzing the book cover".to_string();
    state.db.update_session_progress(token, &progress).await?;

    let cover_page = &pages[0];
    let cover_bytes = fetch_page_image(state, cover_page).await?;
    let analysis = retry::with_backoff("cover analysis", || {
        state.cover.analyze_cover(&cover_bytes)
    })
    .await?;
    progress.steps_done = 1;

    // --- Step 3: Per-page OCR ---
    let mut page_texts: Vec<String> = Vec::new();
    for (idx, page) in pages.iter().enumerate() {
        if !book_exists(state, book_id).await? {
            return Ok(Outcome::Aborted);
        }
        progress.step_label = format!("Reading page {} of {}", page.page_number, pages.len());
        progress.steps_done = 1 + idx as i64;
        state.db.update_session_progress(token, &progress).await?;

        let image = fetch_page_image(state, page).await?;
        let blocks = retry::with_backoff("page OCR", || state.vision.extract_blocks(&image))
            .await?;
        // Replacing rather than appending keeps a retried ingestion from
        // duplicating a page's blocks.
        let stored = state.db.replace_blocks(page.id, &blocks).await?;

        if stored.is_empty() {
            warn!("Page {} produced no text blocks; skipping in aggregate", page.page_number);
        } else {
            page_texts.push(page_text(page.page_number, &stored));
        }
    }

    // --- Step 4: Finalize ---
    if !book_exists(state, book_id).await? {
        return Ok(Outcome::Aborted);
    }
    progress.step_label = "Finishing up".to_string();
    progress.steps_done = 1 + pages.len() as i64;
    state.db.update_session_progress(token, &progress).await?;

    let full_text = page_texts.join("\n\n");
    state
        .db
        .complete_book(book_id, &full_text, &analysis, Some(&cover_page.image_path))
        .await?;
    // Final progress lands before the status flip so a poller that sees
    // `completed` never reads a stale step count.
    progress.steps_done = steps_total;
    state.db.update_session_progress(token, &progress).await?;
    state
        .db
        .set_session_status(token, SessionStatus::Completed)
        .await?;

    Ok(Outcome::Finished)
}

/// One page's contribution to the aggregated text.
fn page_text(page_number: i64, blocks: &[TextBlock]) -> String {
    let body = blocks
        .iter()
        .map(|b| b.ocr_text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    format!("=== Page {} ===\n{}", page_number, body)
}

async fn fetch_page_image(state: &Arc<AppState>, page: &Page) -> PortResult<Vec<u8>> {
    let key = content::key_from_uri(&page.image_path).ok_or_else(|| {
        PortError::Unexpected(format!(
            "Page {} has an unresolvable image reference",
            page.page_number
        ))
    })?;
    retry::with_backoff("page image fetch", || state.store.get_bytes(&key)).await
}

async fn book_exists(state: &Arc<AppState>, book_id: Uuid) -> PortResult<bool> {
    match state.db.get_book(book_id).await {
        Ok(_) => Ok(true),
        Err(PortError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Marks the book and session failed, leaving the error in the progress
/// detail for the polling client. Already-persisted pages and blocks stay.
async fn record_failure(state: &Arc<AppState>, token: &str, err: &PortError) {
    let session = match state.db.get_capture_session(token).await {
        Ok(session) => session,
        // The session vanished with its book; nothing left to mark.
        Err(_) => return,
    };
    if let Err(e) = state.db.fail_book(session.book_id).await {
        error!("Failed to mark book {} failed: {}", session.book_id, e);
    }
    let mut progress = session.progress;
    progress.detail = Some(err.to_string());
    if let Err(e) = state.db.update_session_progress(token, &progress).await {
        error!("Failed to record ingestion error: {}", e);
    }
    if let Err(e) = state
        .db
        .set_session_status(token, SessionStatus::Failed)
        .await
    {
        error!("Failed to mark session failed: {}", e);
    }
}
