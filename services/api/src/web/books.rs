//! services/api/src/web/books.rs
//!
//! Book endpoints: creating an empty book with its phone capture session,
//! listing and fetching books, and deletion with best-effort blob cleanup.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use rand::RngCore;
use readalong_core::content;
use readalong_core::domain::{Book, Keyword, Page};
use readalong_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;

use base64::Engine;

/// First N whitespace-separated words of the aggregated text feed the
/// client-side search index.
const SEARCHABLE_WORD_LIMIT: usize = 500;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The response payload sent after successfully creating a book.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookResponse {
    pub book_id: Uuid,
    /// The capture session token the phone uploader authenticates with.
    pub session_id: String,
    /// PNG data URL encoding `mobile_url`.
    pub qr_code: String,
    pub mobile_url: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookSummary {
    pub id: Uuid,
    pub title: String,
    pub author: Option<String>,
    pub category: String,
    pub categories: Vec<String>,
    #[schema(value_type = Vec<Object>)]
    pub keywords: Vec<Keyword>,
    pub cover_image_path: Option<String>,
    pub status: String,
    pub searchable_text: String,
    pub keywords_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageDto {
    pub id: Uuid,
    pub page_number: i64,
    pub image_path: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookDetail {
    #[serde(flatten)]
    pub summary: BookSummary,
    pub full_text: Option<String>,
    pub pages: Vec<PageDto>,
}

#[derive(Deserialize)]
pub struct ListBooksQuery {
    /// Narrows the listing to one primary category.
    pub filter: Option<String>,
}

impl From<&Page> for PageDto {
    fn from(page: &Page) -> Self {
        Self {
            id: page.id,
            page_number: page.page_number,
            image_path: page.image_path.clone(),
        }
    }
}

fn summary_from_book(book: &Book) -> BookSummary {
    BookSummary {
        id: book.id,
        title: book.title.clone(),
        author: book.author.clone(),
        category: book.category.clone(),
        categories: book.categories.clone(),
        keywords: book.keywords.clone(),
        cover_image_path: book.cover_image_path.clone(),
        status: book.status.as_str().to_string(),
        searchable_text: searchable_text(book.full_text.as_deref().unwrap_or_default()),
        keywords_text: joined_keywords(&book.keywords),
        created_at: book.created_at,
    }
}

/// Lower-cased prefix of the aggregated block text, bounded by word count.
fn searchable_text(full_text: &str) -> String {
    full_text
        .split_whitespace()
        .take(SEARCHABLE_WORD_LIMIT)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn joined_keywords(keywords: &[Keyword]) -> String {
    keywords
        .iter()
        .map(|k| k.label.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders the pairing URL as a PNG data URL for the desktop to display.
fn qr_data_url(url: &str) -> Result<String, ApiError> {
    let code = QrCode::new(url.as_bytes())
        .map_err(|e| ApiError::Internal(format!("Failed to encode QR code: {}", e)))?;
    let image = code.render::<Luma<u8>>().min_dimensions(240, 240).build();
    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image)
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| ApiError::Internal(format!("Failed to render QR code: {}", e)))?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png.into_inner())
    ))
}

/// Capture session tokens are bearer credentials for phone uploads; 32
/// random bytes comfortably clears the 128-bit entropy floor.
fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Create an empty book and its active capture session.
///
/// The response carries everything the desktop needs to hand off to the
/// phone: the session token, the mobile URL, and a QR code encoding it.
#[utoipa::path(
    post,
    path = "/books",
    responses(
        (status = 201, description = "Book and capture session created", body = CreateBookResponse),
        (status = 401, description = "Missing or invalid identity"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_book_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let book = state.db.create_book(user_id).await?;

    let token = generate_session_token();
    let expires_at = Utc::now() + Duration::hours(state.config.session_ttl_hours);
    let session = state
        .db
        .create_capture_session(book.id, &token, expires_at)
        .await?;

    let mobile_url = format!(
        "{}/mobile?session={}",
        state.config.public_base_url, session.token
    );
    let qr_code = qr_data_url(&mobile_url)?;

    info!("Created book {} with capture session", book.id);
    Ok((
        StatusCode::CREATED,
        Json(CreateBookResponse {
            book_id: book.id,
            session_id: session.token,
            qr_code,
            mobile_url,
        }),
    ))
}

/// List the caller's books, optionally narrowed by primary category.
pub async fn list_books_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(query): Query<ListBooksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let books = state
        .db
        .list_books(user_id, query.filter.as_deref())
        .await?;
    let summaries: Vec<BookSummary> = books.iter().map(summary_from_book).collect();
    Ok(Json(summaries))
}

/// Fetch one book with its pages in reading order.
pub async fn get_book_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(book_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let book = state.db.get_book(book_id).await?;
    if book.owner_id != user_id {
        return Err(PortError::PermissionDenied.into());
    }
    let pages = state.db.pages_for_book(book.id).await?;
    Ok(Json(BookDetail {
        summary: summary_from_book(&book),
        full_text: book.full_text.clone(),
        pages: pages.iter().map(PageDto::from).collect(),
    }))
}

/// Delete a book, its pages, blocks, and capture session. Page image blobs
/// are deleted best-effort; audio artifacts are shared across books by
/// content and are never deleted here.
pub async fn delete_book_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(book_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let book = state.db.get_book(book_id).await?;
    if book.owner_id != user_id {
        return Err(PortError::PermissionDenied.into());
    }

    let pages = state.db.pages_for_book(book.id).await?;
    state.db.delete_book(book.id).await?;

    for page in &pages {
        if let Some(key) = content::key_from_uri(&page.image_path) {
            let _ = state.store.delete(&key).await;
        }
    }

    info!("Deleted book {} ({} page(s))", book.id, pages.len());
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Tests
//=========================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn searchable_text_lowercases_and_bounds_words() {
        let text = "The QUICK Brown Fox";
        assert_eq!(searchable_text(text), "the quick brown fox");

        let long: Vec<String> = (0..600).map(|i| format!("w{}", i)).collect();
        let derived = searchable_text(&long.join(" "));
        assert_eq!(derived.split_whitespace().count(), SEARCHABLE_WORD_LIMIT);
    }

    #[test]
    fn keywords_join_labels_only() {
        let keywords = vec![
            Keyword {
                label: "dragons".into(),
                emoji: Some("🐉".into()),
                group: Some("themes".into()),
            },
            Keyword {
                label: "castles".into(),
                emoji: None,
                group: None,
            },
        ];
        assert_eq!(joined_keywords(&keywords), "dragons, castles");
    }

    #[test]
    fn session_tokens_are_long_and_unique() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn qr_code_is_a_png_data_url() {
        let url = qr_data_url("http://localhost:3000/mobile?session=abc").unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        let payload = base64::engine::general_purpose::STANDARD
            .decode(url.trim_start_matches("data:image/png;base64,"))
            .unwrap();
        // PNG magic bytes.
        assert_eq!(&payload[..4], b"\x89PNG");
    }
}
