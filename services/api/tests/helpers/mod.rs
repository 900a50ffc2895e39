//! Test helpers: in-memory adapters and an app builder.
//!
//! Integration tests drive the full axum router against a `sqlite::memory:`
//! pool and mock provider adapters, so no network or external service is
//! involved.

use api_lib::adapters::DbAdapter;
use api_lib::config::{Config, StorageConfig};
use api_lib::web::{build_router, state::AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use readalong_core::domain::{BookAnalysis, CharTiming, SpeechResult, VisionBlock};
use readalong_core::geometry::Rect;
use readalong_core::ports::{
    ArtifactStore, ByteStream, CoverAnalysisService, PortError, PortResult, SpeechService,
    VisionService, VoiceConfig,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt;
use tracing::Level;

//=========================================================================================
// In-memory artifact store
//=========================================================================================

#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    fn uri_for(&self, key: &str) -> String {
        format!("/objects/{}", key)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> PortResult<String> {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(self.uri_for(key))
    }

    async fn get_bytes(&self, key: &str) -> PortResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Object {} not found", key)))
    }

    async fn exists(&self, key: &str) -> PortResult<bool> {
        Ok(self.contains(key))
    }

    async fn open_stream(&self, key: &str) -> PortResult<ByteStream> {
        let bytes = self.get_bytes(key).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(Bytes::from(bytes))
        })))
    }

    async fn delete(&self, key: &str) -> PortResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

//=========================================================================================
// Mock providers
//=========================================================================================

/// OCR mock: pops queued responses first, then serves the default blocks.
pub struct MockVision {
    pub calls: AtomicUsize,
    queue: Mutex<VecDeque<PortResult<Vec<VisionBlock>>>>,
    default_blocks: Mutex<Vec<VisionBlock>>,
}

pub fn vision_block(text: &str) -> VisionBlock {
    VisionBlock {
        text: text.to_string(),
        rect: Rect::new(10.0, 20.0, 300.0, 40.0),
        confidence: 0.95,
    }
}

impl MockVision {
    pub fn new(default_texts: &[&str]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            queue: Mutex::new(VecDeque::new()),
            default_blocks: Mutex::new(default_texts.iter().map(|t| vision_block(t)).collect()),
        }
    }

    pub fn push_response(&self, response: PortResult<Vec<VisionBlock>>) {
        self.queue.lock().unwrap().push_back(response);
    }

    pub fn set_default_blocks(&self, blocks: Vec<VisionBlock>) {
        *self.default_blocks.lock().unwrap() = blocks;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionService for MockVision {
    async fn extract_blocks(&self, _image: &[u8]) -> PortResult<Vec<VisionBlock>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(queued) = self.queue.lock().unwrap().pop_front() {
            return queued;
        }
        Ok(self.default_blocks.lock().unwrap().clone())
    }
}

/// Synthesis mock: deterministic audio bytes, full alignment coverage.
#[derive(Default)]
pub struct MockSpeech {
    pub calls: AtomicUsize,
}

impl MockSpeech {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechService for MockSpeech {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> PortResult<SpeechResult> {
        if voice.api_key.is_empty() {
            return Err(PortError::ConfigMissing("missing API key".to_string()));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let alignment: Vec<CharTiming> = text
            .chars()
            .enumerate()
            .map(|(i, character)| CharTiming {
                character,
                start_time_s: i as f64 * 0.1,
                end_time_s: (i + 1) as f64 * 0.1,
            })
            .collect();
        Ok(SpeechResult {
            audio: format!("mp3:{}", text).into_bytes(),
            alignment: Some(alignment.clone()),
            normalized_alignment: Some(alignment),
        })
    }
}

pub struct MockCover;

#[async_trait]
impl CoverAnalysisService for MockCover {
    async fn analyze_cover(&self, _image: &[u8]) -> PortResult<BookAnalysis> {
        Ok(BookAnalysis {
            title: "The Test Book".to_string(),
            author: Some("A. Tester".to_string()),
            category: "Fiction".to_string(),
            categories: vec!["Fiction".to_string()],
            keywords: Vec::new(),
        })
    }
}

//=========================================================================================
// App builder
//=========================================================================================

pub struct TestApp {
    pub router: Router,
    pub pool: SqlitePool,
    pub store: Arc<MemoryArtifactStore>,
    pub vision: Arc<MockVision>,
    pub speech: Arc<MockSpeech>,
}

fn test_config(with_tts_key: bool) -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: "sqlite::memory:".to_string(),
        log_level: Level::INFO,
        public_base_url: String::new(),
        cors_origin: "http://localhost:5173".to_string(),
        storage: StorageConfig {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "test".to_string(),
            region: None,
            access_key: "test".to_string(),
            secret_key: "test".to_string(),
        },
        google_vision_api_key: None,
        openai_api_key: None,
        elevenlabs_api_key: with_tts_key.then(|| "test-api-key".to_string()),
        default_voice_id: "test-voice".to_string(),
        vision_fallback_model: "gpt-4o".to_string(),
        cover_model: "gpt-4o-mini".to_string(),
        session_ttl_hours: 24,
    }
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(true).await
}

/// Builds the router over an in-memory database and mock adapters.
/// `with_tts_key = false` simulates a caller who never configured synthesis.
pub async fn create_test_app_with(with_tts_key: bool) -> TestApp {
    // One connection: every statement sees the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    let db = Arc::new(DbAdapter::new(pool.clone()));
    db.run_migrations().await.expect("Failed to run migrations");

    let store = Arc::new(MemoryArtifactStore::default());
    let vision = Arc::new(MockVision::new(&["The quick brown fox jumps over the lazy dog."]));
    let speech = Arc::new(MockSpeech::default());

    let state = Arc::new(AppState {
        db,
        store: store.clone(),
        vision: vision.clone(),
        speech: speech.clone(),
        cover: Arc::new(MockCover),
        config: Arc::new(test_config(with_tts_key)),
    });

    TestApp {
        router: build_router(state),
        pool,
        store,
        vision,
        speech,
    }
}

//=========================================================================================
// Request helpers
//=========================================================================================

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
    }
}

/// Signs up a fresh user and returns their session cookie.
pub async fn signup(app: &TestApp, email: &str) -> String {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/signup")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "email": email, "password": "hunter2hunter2" })
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("signup sets a session cookie")
        .to_str()
        .unwrap();
    cookie.split(';').next().unwrap().to_string()
}

pub async fn request(
    app: &TestApp,
    method: &str,
    path: &str,
    cookie: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, read_json(response).await)
}

/// Uploads one page image through the multipart endpoint.
pub async fn upload_page(
    app: &TestApp,
    token: &str,
    image_bytes: &[u8],
) -> (StatusCode, serde_json::Value) {
    let boundary = "test-boundary-7d81ab3f";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; \
             filename=\"page.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(image_bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/sessions/{}/pages", token))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, read_json(response).await)
}

/// Creates a book + capture session and returns (book_id, session_token).
pub async fn create_book(app: &TestApp, cookie: &str) -> (String, String) {
    let (status, body) = request(app, "POST", "/books", Some(cookie), None).await;
    assert_eq!(status, StatusCode::CREATED);
    (
        body["bookId"].as_str().unwrap().to_string(),
        body["sessionId"].as_str().unwrap().to_string(),
    )
}

/// Polls the session status until it reaches `expected` (or panics).
pub async fn wait_for_session_status(app: &TestApp, token: &str, expected: &str) -> serde_json::Value {
    for _ in 0..100 {
        let (status, body) =
            request(app, "GET", &format!("/sessions/{}/status", token), None, None).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == expected {
            return body;
        }
        if body["status"] == "failed" && expected != "failed" {
            panic!("Ingestion failed unexpectedly: {}", body);
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("Session never reached status '{}'", expected);
}

/// Runs a full capture: create book, upload `page_count` pages, complete,
/// wait for ingestion. Returns (book_id, token).
pub async fn ingest_book(app: &TestApp, cookie: &str, page_count: usize) -> (String, String) {
    let (book_id, token) = create_book(app, cookie).await;
    for i in 0..page_count {
        let (status, _) = upload_page(app, &token, format!("fake-image-{}", i).as_bytes()).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, _) = request(
        app,
        "POST",
        &format!("/sessions/{}/complete", token),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_session_status(app, &token, "completed").await;
    (book_id, token)
}
