//! Database row types and their API-facing projections.
//! Row structs correspond 1:1 to the SQLite schema in migrations.rs.

use serde::Serialize;

/// User record in the users table
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub password_hash: Vec<u8>,
    pub password_salt: Vec<u8>,
    pub created_at: String,
    pub updated_at: String,
}

/// Public projection of a user (never carries credential material).
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar: Option<String>,
}

impl From<UserRow> for UserResponse {
    fn from(row: UserRow) -> Self {
        UserResponse {
            id: row.id,
            username: row.username,
            display_name: row.display_name,
            avatar: row.avatar,
        }
    }
}

/// Group record in the groups table
#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub admin_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Group with its resolved admin and member profiles, as returned
/// by every group endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GroupResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub admin: UserResponse,
    pub members: Vec<UserResponse>,
    pub created_at: String,
    pub updated_at: String,
}

/// Message record in the messages table.
/// Immutable once created; delete removes the row, never mutates it.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub group_id: Option<String>,
    pub is_group: bool,
    pub text: Option<String>,
    pub image: Option<String>,
    pub created_at_ms: i64,
    pub seq: i64,
}
