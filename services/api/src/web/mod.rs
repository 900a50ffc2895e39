pub mod auth;
pub mod blocks;
pub mod books;
pub mod ingest_task;
pub mod middleware;
pub mod objects;
pub mod sessions;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use utoipa::OpenApi;

use self::state::AppState;

// Re-export the auth middleware to make it easily accessible to the binary
// that wires CORS and Swagger around the router.
pub use middleware::require_auth;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        books::create_book_handler,
        sessions::session_status_handler,
        blocks::speak_block_handler,
    ),
    components(
        schemas(
            books::CreateBookResponse,
            sessions::SessionStatusResponse,
            blocks::SpeakResponse,
        )
    ),
    tags(
        (name = "Readalong API", description = "API endpoints for the book capture and read-aloud service.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Router assembly
//=========================================================================================

/// GET /health - liveness probe.
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Builds the full application router. Exposed from the library so the
/// integration tests can drive it without binding a socket.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    // Public routes: auth plus the token-authenticated phone endpoints.
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/auth/signup", post(auth::signup_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/sessions/{token}/pages", post(sessions::add_page_handler))
        .route(
            "/sessions/{token}/complete",
            post(sessions::complete_session_handler),
        )
        .route(
            "/sessions/{token}/status",
            get(sessions::session_status_handler),
        );

    // Protected routes (cookie auth required).
    let protected_routes = Router::new()
        .route(
            "/books",
            post(books::create_book_handler).get(books::list_books_handler),
        )
        .route(
            "/books/{id}",
            get(books::get_book_handler).delete(books::delete_book_handler),
        )
        .route("/pages/{id}/blocks", get(blocks::list_blocks_handler))
        .route(
            "/pages/{id}/detect-blocks",
            post(blocks::detect_blocks_handler),
        )
        .route("/blocks/{id}/speak", post(blocks::speak_block_handler))
        .route("/tts/direct", post(blocks::speak_text_handler))
        .route(
            "/preferences",
            get(auth::get_preferences_handler).put(auth::put_preferences_handler),
        )
        .route("/objects/{*key}", get(objects::stream_object_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .with_state(app_state)
}
