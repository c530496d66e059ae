//! Account registration and login.
//!
//! Credential issuance is the smallest surface needed to exercise the core:
//! Argon2id password hashes, 24h HS256 access tokens. Anything richer
//! (refresh tokens, federation, SSO) belongs to an external account system.

use axum::{extract::State, http::StatusCode, Json};
use argon2::Argon2;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::jwt;
use crate::db::models::{UserResponse, UserRow};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub display_name: String,
    pub password: String,
    /// Optional inline avatar (data URL / base64)
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub access_token: String,
}

/// Hash a password with Argon2id into a fixed 32-byte digest.
fn hash_password(password: &str, salt: &[u8]) -> Result<[u8; 32], AppError> {
    let mut hash = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut hash)
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))?;
    Ok(hash)
}

/// Validate and normalize a username: 3-32 chars, alphanumeric/_/-, lowercased.
fn validate_username(username: &str) -> Result<String, AppError> {
    let trimmed = username.trim();

    if trimmed.len() < 3 || trimmed.len() > 32 {
        return Err(AppError::Validation(
            "username must be 3-32 characters".into(),
        ));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::Validation(
            "username must be alphanumeric, underscore, or hyphen".into(),
        ));
    }

    Ok(trimmed.to_lowercase())
}

/// POST /api/auth/register — create an account and return a session token.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let username = validate_username(&body.username)?;

    if body.password.len() < 6 {
        return Err(AppError::Validation(
            "password must be at least 6 characters".into(),
        ));
    }
    let display_name = body.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(AppError::Validation("display_name is required".into()));
    }

    let salt: [u8; 32] = rand::thread_rng().gen();
    let hash = hash_password(&body.password, &salt)?;

    let db = state.db.clone();
    let avatar = body.avatar.clone();
    let uname = username.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| AppError::Internal("db lock poisoned".into()))?;

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
                rusqlite::params![uname],
                |row| row.get(0),
            )
            .map_err(AppError::from)?;
        if exists {
            return Err(AppError::Conflict("username already taken"));
        }

        let now = Utc::now().to_rfc3339();
        let row = UserRow {
            id: Uuid::now_v7().to_string(),
            username: uname,
            display_name,
            avatar,
            password_hash: hash.to_vec(),
            password_salt: salt.to_vec(),
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO users (id, username, display_name, avatar, password_hash, password_salt, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                row.id,
                row.username,
                row.display_name,
                row.avatar,
                row.password_hash,
                row.password_salt,
                row.created_at,
                row.updated_at,
            ],
        )
        .map_err(AppError::from)?;

        Ok(row)
    })
    .await??;

    let access_token = jwt::issue_access_token(&state.jwt_secret, &user.id, &user.username)
        .map_err(|e| AppError::Internal(format!("token issue failed: {e}")))?;

    tracing::info!(user_id = %user.id, username = %user.username, "account registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.into(),
            access_token,
        }),
    ))
}

/// POST /api/auth/login — verify credentials and return a session token.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let username = validate_username(&body.username)?;

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| AppError::Internal("db lock poisoned".into()))?;

        conn.query_row(
            "SELECT id, username, display_name, avatar, password_hash, password_salt, created_at, updated_at
             FROM users WHERE username = ?1",
            rusqlite::params![username],
            |row| {
                Ok(UserRow {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    display_name: row.get(2)?,
                    avatar: row.get(3)?,
                    password_hash: row.get(4)?,
                    password_salt: row.get(5)?,
                    created_at: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            },
        )
        // Same error for unknown user and bad password — no account probing.
        .map_err(|_| AppError::Unauthenticated)
    })
    .await??;

    let computed = hash_password(&body.password, &user.password_salt)?;
    if computed.as_slice() != user.password_hash.as_slice() {
        return Err(AppError::Unauthenticated);
    }

    let access_token = jwt::issue_access_token(&state.jwt_secret, &user.id, &user.username)
        .map_err(|e| AppError::Internal(format!("token issue failed: {e}")))?;

    Ok(Json(AuthResponse {
        user: user.into(),
        access_token,
    }))
}
