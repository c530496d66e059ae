//! Direct (one-to-one) message endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::chat::store::{Conversation, NewMessage};
use crate::db::models::MessageRow;
use crate::error::AppError;
use crate::fanout::FanoutJob;
use crate::state::AppState;
use crate::users::user_exists;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: Option<String>,
    /// Inline base64-encoded image payload (optionally a data URL)
    pub image: Option<String>,
}

/// A message must carry text, an image, or both; an inline image has to be
/// decodable base64 so a bad payload is rejected before it hits the log.
pub(crate) fn validate_content(body: &SendMessageRequest) -> Result<(), AppError> {
    let has_text = body.text.as_deref().is_some_and(|t| !t.trim().is_empty());
    let has_image = body.image.is_some();

    if !has_text && !has_image {
        return Err(AppError::Validation(
            "message needs text or an image".into(),
        ));
    }

    if let Some(image) = &body.image {
        // Accept either raw base64 or a data URL prefix
        let encoded = image.rsplit(',').next().unwrap_or(image);
        if STANDARD.decode(encoded).is_err() {
            return Err(AppError::Validation("image is not valid base64".into()));
        }
    }

    Ok(())
}

/// GET /api/messages/{peer_id} — full direct history with one peer,
/// ascending. The caller is always a participant of the pair it names.
pub async fn get_direct_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(peer_id): Path<String>,
) -> Result<Json<Vec<MessageRow>>, AppError> {
    ensure_peer(&state, &claims.sub, &peer_id).await?;

    let conversation = Conversation::direct(&claims.sub, &peer_id);
    let messages = state.store.list_by_conversation(&conversation).await?;
    Ok(Json(messages))
}

/// POST /api/messages/{peer_id} — persist a direct message, then hand it to
/// the fanout dispatcher. The response is the sender's confirmation; only
/// the recipient's live connections get a push.
pub async fn send_direct_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(peer_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageRow>), AppError> {
    ensure_peer(&state, &claims.sub, &peer_id).await?;
    validate_content(&body)?;

    let message = state
        .store
        .append(NewMessage {
            sender_id: claims.sub.clone(),
            conversation: Conversation::direct(&claims.sub, &peer_id),
            text: body.text,
            image: body.image,
        })
        .await?;

    state.fanout.dispatch(FanoutJob::Direct {
        message: message.clone(),
    });

    Ok((StatusCode::CREATED, Json(message)))
}

/// DELETE /api/messages/{id} — remove one message from the log (sender only).
pub async fn delete_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.delete_message(&message_id, &claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The named peer must be a real, distinct user.
async fn ensure_peer(state: &AppState, caller_id: &str, peer_id: &str) -> Result<(), AppError> {
    if caller_id == peer_id {
        return Err(AppError::Validation(
            "cannot open a direct conversation with yourself".into(),
        ));
    }

    let db = state.db.clone();
    let peer_id = peer_id.to_string();
    let exists = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| AppError::Internal("db lock poisoned".into()))?;
        user_exists(&conn, &peer_id).map_err(AppError::from)
    })
    .await??;

    if !exists {
        return Err(AppError::NotFound("user"));
    }
    Ok(())
}
