//! User directory endpoints.

use axum::{extract::State, Json};

use crate::auth::middleware::Claims;
use crate::db::models::UserResponse;
use crate::error::AppError;
use crate::state::AppState;

/// GET /api/users — everyone except the caller, the direct-conversation
/// peer list the sidebar renders.
pub async fn list_peers(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    let db = state.db.clone();
    let caller_id = claims.sub;

    let users = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| AppError::Internal("db lock poisoned".into()))?;

        let mut stmt = conn.prepare(
            "SELECT id, username, display_name, avatar FROM users
             WHERE id != ?1 ORDER BY display_name ASC",
        )?;
        let users = stmt
            .query_map(rusqlite::params![caller_id], |row| {
                Ok(UserResponse {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    display_name: row.get(2)?,
                    avatar: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok::<_, AppError>(users)
    })
    .await??;

    Ok(Json(users))
}

/// Blocking helper shared by the message handlers: does a user id resolve?
pub(crate) fn user_exists(
    conn: &rusqlite::Connection,
    user_id: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        rusqlite::params![user_id],
        |row| row.get(0),
    )
}
