//! Integration tests for the speak path: content-identity caching, alignment
//! artifacts, stale reference recovery, and ad-hoc synthesis.

mod helpers;

use axum::http::StatusCode;
use helpers::*;
use readalong_core::content;

async fn page_ids(app: &TestApp, cookie: &str, book_id: &str) -> Vec<String> {
    let (_, book) = request(app, "GET", &format!("/books/{}", book_id), Some(cookie), None).await;
    book["pages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap().to_string())
        .collect()
}

async fn block_ids(app: &TestApp, cookie: &str, page_id: &str) -> Vec<String> {
    let (_, blocks) = request(
        app,
        "GET",
        &format!("/pages/{}/blocks", page_id),
        Some(cookie),
        None,
    )
    .await;
    blocks
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn speak_block_synthesizes_then_caches_by_content() {
    let app = create_test_app().await;
    let cookie = signup(&app, "speaker@example.com").await;

    let (book_id, token) = create_book(&app, &cookie).await;
    upload_page(&app, &token, b"page-1").await;
    upload_page(&app, &token, b"page-2").await;

    // Identical trimmed text on both pages, with different whitespace.
    app.vision.push_response(Ok(vec![vision_block("Hello world")]));
    app.vision
        .push_response(Ok(vec![vision_block("  Hello world  ")]));
    request(
        &app,
        "POST",
        &format!("/sessions/{}/complete", token),
        None,
        None,
    )
    .await;
    wait_for_session_status(&app, &token, "completed").await;

    let pages = page_ids(&app, &cookie, &book_id).await;
    let first_block = &block_ids(&app, &cookie, &pages[0]).await[0];
    let second_block = &block_ids(&app, &cookie, &pages[1]).await[0];

    // First speak: provider hit, artifacts written, reference persisted.
    let (status, first) = request(
        &app,
        "POST",
        &format!("/blocks/{}/speak", first_block),
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.speech.call_count(), 1);
    assert_eq!(first["text"], "Hello world");
    assert!(first["alignment"].is_array());
    assert!(first["normalized_alignment"].is_array());

    let expected_uuid = content::content_uuid("Hello world");
    let audio_url = first["audio_url"].as_str().unwrap();
    assert!(audio_url.contains(&format!("tts_content_{}", expected_uuid)));
    assert!(app.store.contains(&content::audio_key(&expected_uuid)));
    assert!(app.store.contains(&content::alignment_key(&expected_uuid)));
    assert!(app
        .store
        .contains(&content::normalized_alignment_key(&expected_uuid)));

    // Second block, same trimmed text: no provider call, same artifact.
    let (status, second) = request(
        &app,
        "POST",
        &format!("/blocks/{}/speak", second_block),
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.speech.call_count(), 1);
    assert_eq!(second["audio_url"], first["audio_url"]);
    assert!(second["alignment"].is_array());

    // The adopted reference is persisted on the second block too.
    let (_, blocks) = request(
        &app,
        "GET",
        &format!("/pages/{}/blocks", pages[1]),
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(blocks[0]["audioUrl"], first["audio_url"]);
}

#[tokio::test]
async fn repeat_speak_on_same_block_serves_cache() {
    let app = create_test_app().await;
    let cookie = signup(&app, "repeat@example.com").await;
    let (book_id, _) = ingest_book(&app, &cookie, 1).await;

    let pages = page_ids(&app, &cookie, &book_id).await;
    let block = &block_ids(&app, &cookie, &pages[0]).await[0];

    let (_, first) = request(
        &app,
        "POST",
        &format!("/blocks/{}/speak", block),
        Some(&cookie),
        None,
    )
    .await;
    let (_, second) = request(
        &app,
        "POST",
        &format!("/blocks/{}/speak", block),
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(app.speech.call_count(), 1);
    assert_eq!(first["audio_url"], second["audio_url"]);
}

#[tokio::test]
async fn stale_audio_reference_falls_back_to_content_cache() {
    let app = create_test_app().await;
    let cookie = signup(&app, "legacy@example.com").await;
    let (book_id, _) = ingest_book(&app, &cookie, 1).await;

    let pages = page_ids(&app, &cookie, &book_id).await;
    let block = &block_ids(&app, &cookie, &pages[0]).await[0];

    // Simulate a legacy row holding a local filesystem path.
    sqlx::query("UPDATE text_blocks SET audio_path = '/var/data/audio/old.mp3' WHERE id = ?")
        .bind(block)
        .execute(&app.pool)
        .await
        .unwrap();

    let (status, body) = request(
        &app,
        "POST",
        &format!("/blocks/{}/speak", block),
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // The stale path is never served back.
    assert!(!body["audio_url"].as_str().unwrap().contains("/var/data"));
    assert_eq!(app.speech.call_count(), 1);

    // The block reference now points at the content-addressed artifact.
    let (_, blocks) = request(
        &app,
        "GET",
        &format!("/pages/{}/blocks", pages[0]),
        Some(&cookie),
        None,
    )
    .await;
    assert!(blocks[0]["audioUrl"]
        .as_str()
        .unwrap()
        .contains("tts_content_"));
}

#[tokio::test]
async fn speak_text_uses_the_same_cache() {
    let app = create_test_app().await;
    let cookie = signup(&app, "adhoc@example.com").await;

    let (status, first) = request(
        &app,
        "POST",
        "/tts/direct",
        Some(&cookie),
        Some(serde_json::json!({ "text": "Chapter One" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.speech.call_count(), 1);

    // Same text again, whitespace-padded: cache hit.
    let (status, second) = request(
        &app,
        "POST",
        "/tts/direct",
        Some(&cookie),
        Some(serde_json::json!({ "text": "  Chapter One  " })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.speech.call_count(), 1);
    assert_eq!(first["audio_url"], second["audio_url"]);
}

#[tokio::test]
async fn speak_requires_configured_synthesis() {
    let app = create_test_app_with(false).await;
    let cookie = signup(&app, "unconfigured@example.com").await;

    let (status, body) = request(
        &app,
        "POST",
        "/tts/direct",
        Some(&cookie),
        Some(serde_json::json!({ "text": "Hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "config_missing");
    assert_eq!(app.speech.call_count(), 0);
}

#[tokio::test]
async fn empty_text_is_rejected() {
    let app = create_test_app().await;
    let cookie = signup(&app, "silent@example.com").await;

    let (status, _) = request(
        &app,
        "POST",
        "/tts/direct",
        Some(&cookie),
        Some(serde_json::json!({ "text": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn voice_preference_is_passed_to_the_provider() {
    let app = create_test_app().await;
    let cookie = signup(&app, "voicey@example.com").await;

    let (status, _) = request(
        &app,
        "PUT",
        "/preferences",
        Some(&cookie),
        Some(serde_json::json!({ "voiceId": "custom-voice", "readingSpeed": 1.25 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, prefs) = request(&app, "GET", "/preferences", Some(&cookie), None).await;
    assert_eq!(prefs["voiceId"], "custom-voice");
    assert_eq!(prefs["readingSpeed"], 1.25);

    let (status, _) = request(
        &app,
        "POST",
        "/tts/direct",
        Some(&cookie),
        Some(serde_json::json!({ "text": "Voice check" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.speech.call_count(), 1);
}
