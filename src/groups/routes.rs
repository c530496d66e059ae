//! Group HTTP surface: lifecycle, membership, and group messaging.
//! Authorization decisions live in the registry; handlers translate between
//! HTTP and registry/store calls and hand persisted messages to the fanout.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::middleware::Claims;
use crate::chat::direct::{validate_content, SendMessageRequest};
use crate::chat::store::{Conversation, NewMessage};
use crate::db::models::{GroupResponse, MessageRow};
use crate::error::AppError;
use crate::fanout::FanoutJob;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: String,
}

/// POST /api/groups — create a group; the caller becomes admin.
pub async fn create_group(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupResponse>), AppError> {
    let group = state
        .groups
        .create_group(&claims.sub, &body.name, body.description, body.member_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// GET /api/groups — groups the caller belongs to.
pub async fn list_my_groups(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<GroupResponse>>, AppError> {
    let groups = state.groups.groups_for(&claims.sub).await?;
    Ok(Json(groups))
}

/// GET /api/groups/{id}/messages — group history, current members only.
/// Membership is checked at call time: a removed member keeps whatever
/// history their client already fetched, but cannot fetch again.
pub async fn get_group_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
) -> Result<Json<Vec<MessageRow>>, AppError> {
    require_member(&state, &group_id, &claims.sub).await?;

    let conversation = Conversation::group(&group_id);
    let messages = state.store.list_by_conversation(&conversation).await?;
    Ok(Json(messages))
}

/// POST /api/groups/{id}/messages — persist a group message and enqueue
/// fanout to the online members (minus the sender, who gets this response).
pub async fn send_group_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageRow>), AppError> {
    require_member(&state, &group_id, &claims.sub).await?;
    validate_content(&body)?;

    let message = state
        .store
        .append(NewMessage {
            sender_id: claims.sub.clone(),
            conversation: Conversation::group(&group_id),
            text: body.text,
            image: body.image,
        })
        .await?;

    state.fanout.dispatch(FanoutJob::Group {
        message: message.clone(),
    });

    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /api/groups/{id}/members — admin adds a member.
pub async fn add_member(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
    Json(body): Json<AddMemberRequest>,
) -> Result<Json<GroupResponse>, AppError> {
    let group = state
        .groups
        .add_member(&group_id, &claims.sub, &body.user_id)
        .await?;
    Ok(Json(group))
}

/// DELETE /api/groups/{id}/members/{user_id} — admin removes a member.
pub async fn remove_member(
    State(state): State<AppState>,
    claims: Claims,
    Path((group_id, user_id)): Path<(String, String)>,
) -> Result<Json<GroupResponse>, AppError> {
    let group = state
        .groups
        .remove_member(&group_id, &claims.sub, &user_id)
        .await?;
    Ok(Json(group))
}

/// POST /api/groups/{id}/leave — leave a group (admin cannot).
pub async fn leave_group(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.groups.leave(&group_id, &claims.sub).await?;
    Ok(Json(json!({ "message": "left group" })))
}

/// DELETE /api/groups/{id} — admin deletes the group; its messages cascade.
pub async fn delete_group(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.groups.delete_group(&group_id, &claims.sub).await?;
    Ok(Json(json!({ "message": "group deleted" })))
}

/// Current-membership gate for group reads and writes.
async fn require_member(state: &AppState, group_id: &str, user_id: &str) -> Result<(), AppError> {
    if !state.groups.is_member(group_id, user_id).await? {
        return Err(AppError::Forbidden("not a member of this group"));
    }
    Ok(())
}
