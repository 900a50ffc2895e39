//! crates/readalong_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of specific external implementations like blob
//! stores, databases, OCR providers, or speech synthesizers.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{
    Book, BookAnalysis, CaptureSession, Page, Progress, SessionStatus, SpeechResult, TextBlock,
    User, UserCredentials, UserPreferences, VisionBlock,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations, classified at the adapter
/// boundary so the web layer and the ingestion pipeline can map each kind
/// to the right HTTP status or retry policy.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Missing provider configuration: {0}")]
    ConfigMissing(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Conflicting state: {0}")]
    Conflict(String),
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// Transient failures are retried by the ingestion pipeline; everything
    /// else is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Transient(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Provider credentials for one synthesis call. Resolved per request from
/// the caller's preferences and passed by value; never cached process-wide.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub api_key: String,
    pub voice_id: String,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait MetadataStore: Send + Sync {
    // --- Auth ---
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Preferences ---
    async fn get_preferences(&self, user_id: Uuid) -> PortResult<UserPreferences>;

    async fn upsert_preferences(&self, prefs: &UserPreferences) -> PortResult<()>;

    // --- Books ---
    async fn create_book(&self, owner_id: Uuid) -> PortResult<Book>;

    async fn get_book(&self, book_id: Uuid) -> PortResult<Book>;

    async fn list_books(&self, owner_id: Uuid, category: Option<&str>) -> PortResult<Vec<Book>>;

    /// Writes the aggregated text, cover metadata, and the `completed`
    /// status in one transaction, atomically with respect to readers.
    async fn complete_book(
        &self,
        book_id: Uuid,
        full_text: &str,
        analysis: &BookAnalysis,
        cover_image_path: Option<&str>,
    ) -> PortResult<()>;

    async fn fail_book(&self, book_id: Uuid) -> PortResult<()>;

    /// Cascades to pages, blocks, and the capture session.
    async fn delete_book(&self, book_id: Uuid) -> PortResult<()>;

    // --- Pages ---
    /// Inserts the page under the next ordinal. The ordinal computation is
    /// serialized: concurrent uploads observe unique, dense page numbers.
    async fn insert_page(&self, book_id: Uuid, image_path: &str) -> PortResult<Page>;

    async fn get_page(&self, page_id: Uuid) -> PortResult<Page>;

    async fn pages_for_book(&self, book_id: Uuid) -> PortResult<Vec<Page>>;

    /// Owner of the book the page belongs to, for access control.
    async fn owner_of_page(&self, page_id: Uuid) -> PortResult<Uuid>;

    // --- Capture sessions ---
    async fn create_capture_session(
        &self,
        book_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<CaptureSession>;

    /// Token lookup is indexed; the caller applies expiry on read.
    async fn get_capture_session(&self, token: &str) -> PortResult<CaptureSession>;

    /// Conditional transition `active -> processing`. Returns whether this
    /// caller performed the transition; losers observe `false` and treat
    /// `complete` as idempotent.
    async fn begin_processing(&self, token: &str) -> PortResult<bool>;

    async fn set_session_status(&self, token: &str, status: SessionStatus) -> PortResult<()>;

    async fn update_session_progress(&self, token: &str, progress: &Progress) -> PortResult<()>;

    // --- Text blocks ---
    /// Persists blocks in the given order within one transaction.
    async fn insert_blocks(
        &self,
        page_id: Uuid,
        blocks: &[VisionBlock],
    ) -> PortResult<Vec<TextBlock>>;

    /// Replaces a page's blocks in one transaction (manual re-detection).
    async fn replace_blocks(
        &self,
        page_id: Uuid,
        blocks: &[VisionBlock],
    ) -> PortResult<Vec<TextBlock>>;

    async fn blocks_for_page(&self, page_id: Uuid) -> PortResult<Vec<TextBlock>>;

    async fn get_block(&self, block_id: Uuid) -> PortResult<TextBlock>;

    /// Owner of the book the block belongs to, for access control.
    async fn owner_of_block(&self, block_id: Uuid) -> PortResult<Uuid>;

    async fn set_block_audio(&self, block_id: Uuid, audio_path: Option<&str>) -> PortResult<()>;
}

/// A boxed stream of body chunks, as produced by blob downloads.
pub type ByteStream = Pin<Box<dyn Stream<Item = PortResult<Bytes>> + Send>>;

/// Durable, keyed blob storage with byte-stream download.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Idempotent overwrite. The returned URI must reverse to `key` via
    /// `content::key_from_uri`.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> PortResult<String>;

    /// The URI `put` would return for `key`, without writing anything.
    fn uri_for(&self, key: &str) -> String;

    async fn get_bytes(&self, key: &str) -> PortResult<Vec<u8>>;

    async fn exists(&self, key: &str) -> PortResult<bool>;

    /// Opens the blob as a byte stream for chunked download responses.
    async fn open_stream(&self, key: &str) -> PortResult<ByteStream>;

    /// Best-effort: adapters log failures instead of surfacing them.
    async fn delete(&self, key: &str) -> PortResult<()>;
}

/// Turns an image blob into ordered paragraph blocks with bounding boxes in
/// the image's displayed coordinate system. Pure with respect to its inputs;
/// never mutates storage, never returns rectangles outside the displayed
/// bounds.
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn extract_blocks(&self, image: &[u8]) -> PortResult<Vec<VisionBlock>>;
}

/// Turns a string into MP3 audio plus optional per-character alignments.
/// Content-only: knows nothing of caching or identity.
#[async_trait]
pub trait SpeechService: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> PortResult<SpeechResult>;
}

/// Extracts cover metadata (title, category, keywords) from a page image.
#[async_trait]
pub trait CoverAnalysisService: Send + Sync {
    async fn analyze_cover(&self, image: &[u8]) -> PortResult<BookAnalysis>;
}
