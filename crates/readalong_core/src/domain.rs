//! crates/readalong_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format,
//! except for the few wire-shaped types (progress, alignment, keywords)
//! that are persisted or returned verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::Rect;

/// Terminal and in-flight states of a book's ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    Processing,
    Completed,
    Failed,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Processing => "processing",
            BookStatus::Completed => "completed",
            BookStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(BookStatus::Processing),
            "completed" => Some(BookStatus::Completed),
            "failed" => Some(BookStatus::Failed),
            _ => None,
        }
    }
}

/// A keyword chip extracted from the cover analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub label: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

/// A scanned book assembled from photographed pages.
#[derive(Debug, Clone)]
pub struct Book {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub author: Option<String>,
    pub category: String,
    pub categories: Vec<String>,
    pub keywords: Vec<Keyword>,
    pub cover_image_path: Option<String>,
    pub status: BookStatus,
    /// Aggregated OCR text of every page; present iff `status == Completed`.
    pub full_text: Option<String>,
    pub agent_id: Option<String>,
    pub knowledge_base_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single photographed page. Ordinals are 1-based and gap-free per book.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: Uuid,
    pub book_id: Uuid,
    pub page_number: i64,
    pub image_path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Processing,
    Completed,
    Failed,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "processing" => Some(SessionStatus::Processing),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "expired" => Some(SessionStatus::Expired),
            _ => None,
        }
    }
}

/// Polling surface of an ingestion run, persisted with its session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub step_label: String,
    pub steps_done: i64,
    pub steps_total: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Pairing between a desktop initiator and a phone uploader, identified by
/// an unguessable token.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub token: String,
    pub book_id: Uuid,
    pub status: SessionStatus,
    pub progress: Progress,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CaptureSession {
    /// Expiry is evaluated on read; no sweeper is required for correctness.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// The status as observed at `now`, overlaying `Expired` on any
    /// non-terminal state once the deadline has passed.
    pub fn observed_status(&self, now: DateTime<Utc>) -> SessionStatus {
        match self.status {
            SessionStatus::Completed | SessionStatus::Failed => self.status,
            _ if self.is_expired(now) => SessionStatus::Expired,
            _ => self.status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Pending,
    Completed,
    Failed,
}

impl BlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStatus::Pending => "pending",
            BlockStatus::Completed => "completed",
            BlockStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BlockStatus::Pending),
            "completed" => Some(BlockStatus::Completed),
            "failed" => Some(BlockStatus::Failed),
            _ => None,
        }
    }
}

/// A rectangular text region on a page, in displayed-image pixels.
#[derive(Debug, Clone)]
pub struct TextBlock {
    pub id: Uuid,
    pub page_id: Uuid,
    pub rect: Rect,
    pub ocr_text: String,
    pub confidence: f64,
    pub status: BlockStatus,
    /// Reference to the cached audio artifact; written on first play.
    pub audio_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An OCR result before persistence: text plus its displayed-frame rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionBlock {
    pub text: String,
    pub rect: Rect,
    pub confidence: f64,
}

/// Cover metadata extracted from the first page.
#[derive(Debug, Clone)]
pub struct BookAnalysis {
    pub title: String,
    pub author: Option<String>,
    pub category: String,
    pub categories: Vec<String>,
    pub keywords: Vec<Keyword>,
}

impl Default for BookAnalysis {
    fn default() -> Self {
        Self {
            title: "Unknown Book".to_string(),
            author: None,
            category: "General".to_string(),
            categories: Vec::new(),
            keywords: Vec::new(),
        }
    }
}

/// Playback timing for one character of synthesized speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharTiming {
    pub character: char,
    pub start_time_s: f64,
    pub end_time_s: f64,
}

/// The output of one synthesis call: MP3 bytes plus optional alignments.
/// Either alignment may be absent independently; playback still works,
/// character highlighting is disabled.
#[derive(Debug, Clone)]
pub struct SpeechResult {
    pub audio: Vec<u8>,
    pub alignment: Option<Vec<CharTiming>>,
    pub normalized_alignment: Option<Vec<CharTiming>>,
}

// Represents a user - used throughout app
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub email: Option<String>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

/// Per-user reading settings; the voice override feeds the speak path.
#[derive(Debug, Clone)]
pub struct UserPreferences {
    pub user_id: Uuid,
    pub voice_id: Option<String>,
    pub reading_speed: f64,
}

impl UserPreferences {
    pub fn defaults(user_id: Uuid) -> Self {
        Self {
            user_id,
            voice_id: None,
            reading_speed: 1.0,
        }
    }
}
