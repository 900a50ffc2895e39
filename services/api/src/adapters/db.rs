//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `MetadataStore` port from the `core` crate. It handles all interactions
//! with the SQLite database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use readalong_core::domain::{
    Book, BookAnalysis, BookStatus, BlockStatus, CaptureSession, Page, Progress, SessionStatus,
    TextBlock, User, UserCredentials, UserPreferences, VisionBlock,
};
use readalong_core::geometry::Rect;
use readalong_core::ports::{MetadataStore, PortError, PortResult};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `MetadataStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: SqlitePool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn parse_uuid(raw: &str) -> PortResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| PortError::Unexpected(format!("Corrupt uuid column: {}", e)))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: String,
    email: Option<String>,
}

impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        Ok(User {
            user_id: parse_uuid(&self.user_id)?,
            email: self.email,
        })
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: String,
    email: String,
    hashed_password: String,
}

impl CredentialsRecord {
    fn to_domain(self) -> PortResult<UserCredentials> {
        Ok(UserCredentials {
            user_id: parse_uuid(&self.user_id)?,
            email: self.email,
            hashed_password: self.hashed_password,
        })
    }
}

#[derive(FromRow)]
struct PreferencesRecord {
    user_id: String,
    voice_id: Option<String>,
    reading_speed: f64,
}

impl PreferencesRecord {
    fn to_domain(self) -> PortResult<UserPreferences> {
        Ok(UserPreferences {
            user_id: parse_uuid(&self.user_id)?,
            voice_id: self.voice_id,
            reading_speed: self.reading_speed,
        })
    }
}

#[derive(FromRow)]
struct BookRecord {
    id: String,
    owner_id: String,
    title: String,
    author: Option<String>,
    category: String,
    categories: String,
    keywords: String,
    cover_image_path: Option<String>,
    status: String,
    full_text: Option<String>,
    agent_id: Option<String>,
    knowledge_base_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookRecord {
    fn to_domain(self) -> PortResult<Book> {
        let status = BookStatus::parse(&self.status)
            .ok_or_else(|| PortError::Unexpected(format!("Corrupt book status: {}", self.status)))?;
        Ok(Book {
            id: parse_uuid(&self.id)?,
            owner_id: parse_uuid(&self.owner_id)?,
            title: self.title,
            author: self.author,
            category: self.category,
            categories: serde_json::from_str(&self.categories).unwrap_or_default(),
            keywords: serde_json::from_str(&self.keywords).unwrap_or_default(),
            cover_image_path: self.cover_image_path,
            status,
            full_text: self.full_text,
            agent_id: self.agent_id,
            knowledge_base_id: self.knowledge_base_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct PageRecord {
    id: String,
    book_id: String,
    page_number: i64,
    image_path: String,
    created_at: DateTime<Utc>,
}

impl PageRecord {
    fn to_domain(self) -> PortResult<Page> {
        Ok(Page {
            id: parse_uuid(&self.id)?,
            book_id: parse_uuid(&self.book_id)?,
            page_number: self.page_number,
            image_path: self.image_path,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct SessionRecord {
    token: String,
    book_id: String,
    status: String,
    step_label: String,
    steps_done: i64,
    steps_total: i64,
    progress_detail: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRecord {
    fn to_domain(self) -> PortResult<CaptureSession> {
        let status = SessionStatus::parse(&self.status).ok_or_else(|| {
            PortError::Unexpected(format!("Corrupt session status: {}", self.status))
        })?;
        Ok(CaptureSession {
            token: self.token,
            book_id: parse_uuid(&self.book_id)?,
            status,
            progress: Progress {
                step_label: self.step_label,
                steps_done: self.steps_done,
                steps_total: self.steps_total,
                detail: self.progress_detail,
            },
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(FromRow)]
struct BlockRecord {
    id: String,
    page_id: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    ocr_text: String,
    confidence: f64,
    status: String,
    audio_path: Option<String>,
    created_at: DateTime<Utc>,
}

impl BlockRecord {
    fn to_domain(self) -> PortResult<TextBlock> {
        let status = BlockStatus::parse(&self.status).ok_or_else(|| {
            PortError::Unexpected(format!("Corrupt block status: {}", self.status))
        })?;
        Ok(TextBlock {
            id: parse_uuid(&self.id)?,
            page_id: parse_uuid(&self.page_id)?,
            rect: Rect::new(self.x, self.y, self.width, self.height),
            ocr_text: self.ocr_text,
            confidence: self.confidence,
            status,
            audio_path: self.audio_path,
            created_at: self.created_at,
        })
    }
}

const BLOCK_COLUMNS: &str =
    "id, page_id, x, y, width, height, ocr_text, confidence, status, audio_path, created_at";

//=========================================================================================
// `MetadataStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl MetadataStore for DbAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let user_id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (user_id, email, hashed_password) VALUES (?, ?, ?)")
            .bind(user_id.to_string())
            .bind(email)
            .bind(hashed_password)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    PortError::Conflict(format!("Email {} is already registered", email))
                }
                _ => unexpected(e),
            })?;
        Ok(User {
            user_id,
            email: Some(email.to_string()),
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, hashed_password FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", email)),
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(session_id)
            .bind(user_id.to_string())
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let user_id: String = sqlx::query_scalar(
            "SELECT user_id FROM auth_sessions WHERE id = ? AND expires_at > ?",
        )
        .bind(session_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound("Auth session not found".to_string()),
            _ => unexpected(e),
        })?;
        parse_uuid(&user_id)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn get_preferences(&self, user_id: Uuid) -> PortResult<UserPreferences> {
        let record = sqlx::query_as::<_, PreferencesRecord>(
            "SELECT user_id, voice_id, reading_speed FROM user_preferences WHERE user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        match record {
            Some(record) => record.to_domain(),
            None => Ok(UserPreferences::defaults(user_id)),
        }
    }

    async fn upsert_preferences(&self, prefs: &UserPreferences) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO user_preferences (user_id, voice_id, reading_speed) VALUES (?, ?, ?)
             ON CONFLICT (user_id) DO UPDATE SET voice_id = excluded.voice_id,
             reading_speed = excluded.reading_speed",
        )
        .bind(prefs.user_id.to_string())
        .bind(&prefs.voice_id)
        .bind(prefs.reading_speed)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn create_book(&self, owner_id: Uuid) -> PortResult<Book> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO books (id, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(owner_id.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        self.get_book(id).await
    }

    async fn get_book(&self, book_id: Uuid) -> PortResult<Book> {
        let record = sqlx::query_as::<_, BookRecord>("SELECT * FROM books WHERE id = ?")
            .bind(book_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => {
                    PortError::NotFound(format!("Book {} not found", book_id))
                }
                _ => unexpected(e),
            })?;
        record.to_domain()
    }

    async fn list_books(&self, owner_id: Uuid, category: Option<&str>) -> PortResult<Vec<Book>> {
        let records = match category {
            Some(category) => {
                sqlx::query_as::<_, BookRecord>(
                    "SELECT * FROM books WHERE owner_id = ? AND category = ?
                     ORDER BY created_at DESC",
                )
                .bind(owner_id.to_string())
                .bind(category)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, BookRecord>(
                    "SELECT * FROM books WHERE owner_id = ? ORDER BY created_at DESC",
                )
                .bind(owner_id.to_string())
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn complete_book(
        &self,
        book_id: Uuid,
        full_text: &str,
        analysis: &BookAnalysis,
        cover_image_path: Option<&str>,
    ) -> PortResult<()> {
        // A single UPDATE keeps the status flip and the text write atomic
        // with respect to readers.
        let result = sqlx::query(
            "UPDATE books SET title = ?, author = ?, category = ?, categories = ?,
             keywords = ?, cover_image_path = COALESCE(?, cover_image_path),
             status = 'completed', full_text = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&analysis.title)
        .bind(&analysis.author)
        .bind(&analysis.category)
        .bind(serde_json::to_string(&analysis.categories).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&analysis.keywords).unwrap_or_else(|_| "[]".into()))
        .bind(cover_image_path)
        .bind(full_text)
        .bind(Utc::now())
        .bind(book_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Book {} not found", book_id)));
        }
        Ok(())
    }

    async fn fail_book(&self, book_id: Uuid) -> PortResult<()> {
        sqlx::query("UPDATE books SET status = 'failed', updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(book_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn delete_book(&self, book_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM books WHERE id = ?")
            .bind(book_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Book {} not found", book_id)));
        }
        Ok(())
    }

    async fn insert_page(&self, book_id: Uuid, image_path: &str) -> PortResult<Page> {
        // The subselect computes the next ordinal inside the INSERT, so
        // concurrent uploads serialize on the database and observe unique,
        // dense page numbers.
        let record = sqlx::query_as::<_, PageRecord>(
            "INSERT INTO pages (id, book_id, page_number, image_path, created_at)
             VALUES (?, ?, (SELECT COALESCE(MAX(page_number), 0) + 1 FROM pages WHERE book_id = ?), ?, ?)
             RETURNING id, book_id, page_number, image_path, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(book_id.to_string())
        .bind(book_id.to_string())
        .bind(image_path)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_page(&self, page_id: Uuid) -> PortResult<Page> {
        let record = sqlx::query_as::<_, PageRecord>(
            "SELECT id, book_id, page_number, image_path, created_at FROM pages WHERE id = ?",
        )
        .bind(page_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Page {} not found", page_id)),
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn pages_for_book(&self, book_id: Uuid) -> PortResult<Vec<Page>> {
        let records = sqlx::query_as::<_, PageRecord>(
            "SELECT id, book_id, page_number, image_path, created_at FROM pages
             WHERE book_id = ? ORDER BY page_number ASC",
        )
        .bind(book_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn owner_of_page(&self, page_id: Uuid) -> PortResult<Uuid> {
        let owner: String = sqlx::query_scalar(
            "SELECT b.owner_id FROM books b JOIN pages p ON p.book_id = b.id WHERE p.id = ?",
        )
        .bind(page_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Page {} not found", page_id)),
            _ => unexpected(e),
        })?;
        parse_uuid(&owner)
    }

    async fn create_capture_session(
        &self,
        book_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<CaptureSession> {
        sqlx::query(
            "INSERT INTO scanning_sessions (token, book_id, created_at, expires_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(token)
        .bind(book_id.to_string())
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => PortError::Conflict(
                format!("Book {} already has an active capture session", book_id),
            ),
            _ => unexpected(e),
        })?;
        self.get_capture_session(token).await
    }

    async fn get_capture_session(&self, token: &str) -> PortResult<CaptureSession> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT * FROM scanning_sessions WHERE token = ?",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound("Capture session not found".to_string()),
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn begin_processing(&self, token: &str) -> PortResult<bool> {
        // `failed` is re-enterable so the client can retry ingestion by
        // calling complete again.
        let result = sqlx::query(
            "UPDATE scanning_sessions SET status = 'processing'
             WHERE token = ? AND status IN ('active', 'failed') AND expires_at > ?",
        )
        .bind(token)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_session_status(&self, token: &str, status: SessionStatus) -> PortResult<()> {
        sqlx::query("UPDATE scanning_sessions SET status = ? WHERE token = ?")
            .bind(status.as_str())
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn update_session_progress(&self, token: &str, progress: &Progress) -> PortResult<()> {
        sqlx::query(
            "UPDATE scanning_sessions SET step_label = ?, steps_done = ?, steps_total = ?,
             progress_detail = ? WHERE token = ?",
        )
        .bind(&progress.step_label)
        .bind(progress.steps_done)
        .bind(progress.steps_total)
        .bind(&progress.detail)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn insert_blocks(
        &self,
        page_id: Uuid,
        blocks: &[VisionBlock],
    ) -> PortResult<Vec<TextBlock>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let base_position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM text_blocks WHERE page_id = ?",
        )
        .bind(page_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;
        for (i, block) in blocks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO text_blocks (id, page_id, x, y, width, height, ocr_text,
                 confidence, status, position, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'completed', ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(page_id.to_string())
            .bind(block.rect.x)
            .bind(block.rect.y)
            .bind(block.rect.width)
            .bind(block.rect.height)
            .bind(&block.text)
            .bind(block.confidence)
            .bind(base_position + i as i64)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }
        tx.commit().await.map_err(unexpected)?;
        self.blocks_for_page(page_id).await
    }

    async fn replace_blocks(
        &self,
        page_id: Uuid,
        blocks: &[VisionBlock],
    ) -> PortResult<Vec<TextBlock>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        sqlx::query("DELETE FROM text_blocks WHERE page_id = ?")
            .bind(page_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        for (i, block) in blocks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO text_blocks (id, page_id, x, y, width, height, ocr_text,
                 confidence, status, position, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'completed', ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(page_id.to_string())
            .bind(block.rect.x)
            .bind(block.rect.y)
            .bind(block.rect.width)
            .bind(block.rect.height)
            .bind(&block.text)
            .bind(block.confidence)
            .bind(i as i64)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }
        tx.commit().await.map_err(unexpected)?;
        self.blocks_for_page(page_id).await
    }

    async fn blocks_for_page(&self, page_id: Uuid) -> PortResult<Vec<TextBlock>> {
        let records = sqlx::query_as::<_, BlockRecord>(&format!(
            "SELECT {} FROM text_blocks WHERE page_id = ? ORDER BY position ASC",
            BLOCK_COLUMNS
        ))
        .bind(page_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get_block(&self, block_id: Uuid) -> PortResult<TextBlock> {
        let record = sqlx::query_as::<_, BlockRecord>(&format!(
            "SELECT {} FROM text_blocks WHERE id = ?",
            BLOCK_COLUMNS
        ))
        .bind(block_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Block {} not found", block_id))
            }
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn owner_of_block(&self, block_id: Uuid) -> PortResult<Uuid> {
        let owner: String = sqlx::query_scalar(
            "SELECT b.owner_id FROM books b
             JOIN pages p ON p.book_id = b.id
             JOIN text_blocks t ON t.page_id = p.id
             WHERE t.id = ?",
        )
        .bind(block_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Block {} not found", block_id))
            }
            _ => unexpected(e),
        })?;
        parse_uuid(&owner)
    }

    async fn set_block_audio(&self, block_id: Uuid, audio_path: Option<&str>) -> PortResult<()> {
        let result = sqlx::query("UPDATE text_blocks SET audio_path = ? WHERE id = ?")
            .bind(audio_path)
            .bind(block_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Block {} not found", block_id)));
        }
        Ok(())
    }
}
