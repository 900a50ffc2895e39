//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, and logout, plus the
//! caller's reading preferences.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{Duration, Utc};
use readalong_core::domain::UserPreferences;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPayload {
    pub voice_id: Option<String>,
    pub reading_speed: Option<f64>,
}

fn session_cookie(auth_session_id: &str, max_age_seconds: i64) -> String {
    format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        auth_session_id, max_age_seconds
    )
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new user account
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Hash the password
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to hash password".to_string(),
            )
        })?
        .to_string();

    // 2. Create user in database
    let user = state
        .db
        .create_user_with_email(&req.email, &password_hash)
        .await
        .map_err(|e| {
            error!("Failed to create user: {:?}", e);
            (
                StatusCode::BAD_REQUEST,
                "Failed to create user".to_string(),
            )
        })?;

    // 3. Generate auth session ID
    let auth_session_id = Uuid::new_v4().to_string();

    // 4. Set expiration (30 days)
    let expires_at = Utc::now() + Duration::days(30);

    // 5. Create auth session in database
    state
        .db
        .create_auth_session(&auth_session_id, user.user_id, expires_at)
        .await
        .map_err(|e| {
            error!("Failed to create auth session: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create session".to_string(),
            )
        })?;

    // 6. Return response with session cookie
    let response = AuthResponse {
        user_id: user.user_id,
        email: user.email.unwrap_or_default(),
    };

    Ok((
        StatusCode::CREATED,
        [(
            header::SET_COOKIE,
            session_cookie(&auth_session_id, Duration::days(30).num_seconds()),
        )],
        Json(response),
    ))
}

/// POST /auth/login - Authenticate and start a browser session
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Look up the stored credentials
    let credentials = state.db.get_user_by_email(&req.email).await.map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            "Invalid email or password".to_string(),
        )
    })?;

    // 2. Verify the password against the stored hash
    let parsed_hash = PasswordHash::new(&credentials.hashed_password).map_err(|e| {
        error!("Corrupt password hash for {}: {:?}", req.email, e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to verify password".to_string(),
        )
    })?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| {
            (
                StatusCode::UNAUTHORIZED,
                "Invalid email or password".to_string(),
            )
        })?;

    // 3. Create a fresh auth session
    let auth_session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::days(30);
    state
        .db
        .create_auth_session(&auth_session_id, credentials.user_id, expires_at)
        .await
        .map_err(|e| {
            error!("Failed to create auth session: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create session".to_string(),
            )
        })?;

    let response = AuthResponse {
        user_id: credentials.user_id,
        email: credentials.email,
    };

    Ok((
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            session_cookie(&auth_session_id, Duration::days(30).num_seconds()),
        )],
        Json(response),
    ))
}

/// POST /auth/logout - Invalidate the current session cookie
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let Some(auth_session_id) = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .find_map(|c| c.trim().strip_prefix("session="))
        })
    {
        if let Err(e) = state.db.delete_auth_session(auth_session_id).await {
            error!("Failed to delete auth session: {:?}", e);
        }
    }

    // Expire the cookie regardless of whether a session row existed.
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie("", 0))],
        Json(serde_json::json!({ "loggedOut": true })),
    ))
}

/// GET /preferences - The caller's reading preferences
pub async fn get_preferences_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, crate::error::ApiError> {
    let prefs = state.db.get_preferences(user_id).await?;
    Ok(Json(PreferencesPayload {
        voice_id: prefs.voice_id,
        reading_speed: Some(prefs.reading_speed),
    }))
}

/// PUT /preferences - Update the caller's reading preferences
pub async fn put_preferences_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(payload): Json<PreferencesPayload>,
) -> Result<impl IntoResponse, crate::error::ApiError> {
    let current = state.db.get_preferences(user_id).await?;
    let prefs = UserPreferences {
        user_id,
        voice_id: payload.voice_id,
        reading_speed: payload.reading_speed.unwrap_or(current.reading_speed),
    };
    state.db.upsert_preferences(&prefs).await?;
    Ok(Json(PreferencesPayload {
        voice_id: prefs.voice_id,
        reading_speed: Some(prefs.reading_speed),
    }))
}
