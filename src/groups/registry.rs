//! Group membership and admin-role state machine.
//!
//! Invariants, enforced after every operation:
//! - the admin is always in the member set
//! - the member set has no duplicates (composite primary key)
//! - a deleted group takes its entire message log with it, atomically
//!
//! Mutations on one group are serialized by a per-group async mutex held
//! across the whole read-check-write; mutations on different groups proceed
//! independently. Reads (`is_member`, `member_ids`) see the latest committed
//! state — the shared connection admits no stale snapshots.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rusqlite::Connection;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::models::{GroupResponse, GroupRow, UserResponse};
use crate::db::DbPool;
use crate::error::AppError;

pub struct GroupRegistry {
    db: DbPool,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GroupRegistry {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            locks: DashMap::new(),
        }
    }

    /// Per-group mutation lock. Created on first use, dropped with the group.
    fn lock_for(&self, group_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(group_id.to_string())
            .or_default()
            .clone()
    }

    /// Create a group. Every proposed member id must resolve to an existing
    /// user; the creator becomes admin and is always part of the member set.
    pub async fn create_group(
        &self,
        creator_id: &str,
        name: &str,
        description: Option<String>,
        member_ids: Vec<String>,
    ) -> Result<GroupResponse, AppError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("group name is required".into()));
        }

        let db = self.db.clone();
        let creator_id = creator_id.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|_| AppError::Internal("db lock poisoned".into()))?;
            let tx = conn.transaction().map_err(AppError::from)?;

            // Proposed members ∪ {creator}, duplicate-free
            let mut members: HashSet<String> = member_ids.into_iter().collect();
            members.insert(creator_id.clone());

            for user_id in &members {
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                    rusqlite::params![user_id],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(AppError::Validation(format!("unknown member: {user_id}")));
                }
            }

            let group_id = Uuid::now_v7().to_string();
            let now = Utc::now().to_rfc3339();

            tx.execute(
                "INSERT INTO groups (id, name, description, admin_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![group_id, name, description, creator_id, now],
            )?;
            for user_id in &members {
                tx.execute(
                    "INSERT INTO group_members (group_id, user_id, added_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![group_id, user_id, now],
                )?;
            }

            let response = load_group_response(&tx, &group_id)?;
            tx.commit().map_err(AppError::from)?;

            tracing::info!(group_id = %group_id, admin = %creator_id, "group created");
            Ok(response)
        })
        .await?
    }

    /// Add a member. Admin-only; duplicate adds fail `Conflict` and never
    /// grow the set.
    pub async fn add_member(
        &self,
        group_id: &str,
        requester_id: &str,
        user_id: &str,
    ) -> Result<GroupResponse, AppError> {
        let lock = self.lock_for(group_id);
        let _guard = lock.lock().await;

        let db = self.db.clone();
        let group_id = group_id.to_string();
        let requester_id = requester_id.to_string();
        let user_id = user_id.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|_| AppError::Internal("db lock poisoned".into()))?;
            let tx = conn.transaction().map_err(AppError::from)?;

            let group = load_group(&tx, &group_id)?.ok_or(AppError::NotFound("group"))?;
            if group.admin_id != requester_id {
                return Err(AppError::Forbidden("only the admin can add members"));
            }

            let user_exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                rusqlite::params![user_id],
                |row| row.get(0),
            )?;
            if !user_exists {
                return Err(AppError::NotFound("user"));
            }

            if is_member_tx(&tx, &group_id, &user_id)? {
                return Err(AppError::Conflict("user is already a member"));
            }

            let now = Utc::now().to_rfc3339();
            tx.execute(
                "INSERT INTO group_members (group_id, user_id, added_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![group_id, user_id, now],
            )?;
            tx.execute(
                "UPDATE groups SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, group_id],
            )?;

            let response = load_group_response(&tx, &group_id)?;
            tx.commit().map_err(AppError::from)?;
            Ok(response)
        })
        .await?
    }

    /// Remove a member. Admin-only; the admin themselves cannot be removed.
    pub async fn remove_member(
        &self,
        group_id: &str,
        requester_id: &str,
        user_id: &str,
    ) -> Result<GroupResponse, AppError> {
        let lock = self.lock_for(group_id);
        let _guard = lock.lock().await;

        let db = self.db.clone();
        let group_id = group_id.to_string();
        let requester_id = requester_id.to_string();
        let user_id = user_id.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|_| AppError::Internal("db lock poisoned".into()))?;
            let tx = conn.transaction().map_err(AppError::from)?;

            let group = load_group(&tx, &group_id)?.ok_or(AppError::NotFound("group"))?;
            if group.admin_id != requester_id {
                return Err(AppError::Forbidden("only the admin can remove members"));
            }
            if group.admin_id == user_id {
                return Err(AppError::InvalidOperation(
                    "cannot remove the admin from the group",
                ));
            }

            let removed = tx.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                rusqlite::params![group_id, user_id],
            )?;
            if removed == 0 {
                return Err(AppError::NotFound("member"));
            }
            tx.execute(
                "UPDATE groups SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![Utc::now().to_rfc3339(), group_id],
            )?;

            let response = load_group_response(&tx, &group_id)?;
            tx.commit().map_err(AppError::from)?;
            Ok(response)
        })
        .await?
    }

    /// Leave a group. The admin cannot leave — they must delete the group
    /// (or, in a future revision, transfer the role first).
    pub async fn leave(&self, group_id: &str, user_id: &str) -> Result<(), AppError> {
        let lock = self.lock_for(group_id);
        let _guard = lock.lock().await;

        let db = self.db.clone();
        let group_id = group_id.to_string();
        let user_id = user_id.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|_| AppError::Internal("db lock poisoned".into()))?;
            let tx = conn.transaction().map_err(AppError::from)?;

            let group = load_group(&tx, &group_id)?.ok_or(AppError::NotFound("group"))?;
            if group.admin_id == user_id {
                return Err(AppError::InvalidOperation(
                    "admin cannot leave the group; transfer the role or delete the group",
                ));
            }

            let removed = tx.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                rusqlite::params![group_id, user_id],
            )?;
            if removed == 0 {
                return Err(AppError::InvalidOperation("not a member of this group"));
            }
            tx.execute(
                "UPDATE groups SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![Utc::now().to_rfc3339(), group_id],
            )?;

            tx.commit().map_err(AppError::from)?;
            Ok(())
        })
        .await?
    }

    /// Delete a group. Admin-only. The group's entire message log, its member
    /// rows, and the group itself go in one transaction — either the cascade
    /// commits completely or nothing changes.
    pub async fn delete_group(&self, group_id: &str, requester_id: &str) -> Result<(), AppError> {
        let lock = self.lock_for(group_id);
        let _guard = lock.lock().await;

        let db = self.db.clone();
        let gid = group_id.to_string();
        let requester_id = requester_id.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|_| AppError::Internal("db lock poisoned".into()))?;
            let tx = conn.transaction().map_err(AppError::from)?;

            let group = load_group(&tx, &gid)?.ok_or(AppError::NotFound("group"))?;
            if group.admin_id != requester_id {
                return Err(AppError::Forbidden("only the admin can delete the group"));
            }

            tx.execute(
                "DELETE FROM messages WHERE group_id = ?1",
                rusqlite::params![gid],
            )?;
            tx.execute(
                "DELETE FROM group_members WHERE group_id = ?1",
                rusqlite::params![gid],
            )?;
            tx.execute("DELETE FROM groups WHERE id = ?1", rusqlite::params![gid])?;

            tx.commit().map_err(AppError::from)?;
            tracing::info!(group_id = %gid, "group deleted, messages cascaded");
            Ok(())
        })
        .await??;

        // The group is terminal; its mutation lock has no further use.
        self.locks.remove(group_id);
        Ok(())
    }

    /// Latest committed membership check. `NotFound` if the group is gone.
    pub async fn is_member(&self, group_id: &str, user_id: &str) -> Result<bool, AppError> {
        let db = self.db.clone();
        let group_id = group_id.to_string();
        let user_id = user_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| AppError::Internal("db lock poisoned".into()))?;

            let group_exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?1)",
                rusqlite::params![group_id],
                |row| row.get(0),
            )?;
            if !group_exists {
                return Err(AppError::NotFound("group"));
            }

            Ok(is_member_tx(&conn, &group_id, &user_id)?)
        })
        .await?
    }

    /// Current member ids — the live audience snapshot used at dispatch time.
    pub async fn member_ids(&self, group_id: &str) -> Result<Vec<String>, AppError> {
        let db = self.db.clone();
        let group_id = group_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| AppError::Internal("db lock poisoned".into()))?;

            let group_exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?1)",
                rusqlite::params![group_id],
                |row| row.get(0),
            )?;
            if !group_exists {
                return Err(AppError::NotFound("group"));
            }

            let mut stmt =
                conn.prepare("SELECT user_id FROM group_members WHERE group_id = ?1")?;
            let ids = stmt
                .query_map(rusqlite::params![group_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
        .await?
    }

    /// All groups the user belongs to, most recently updated first.
    pub async fn groups_for(&self, user_id: &str) -> Result<Vec<GroupResponse>, AppError> {
        let db = self.db.clone();
        let user_id = user_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| AppError::Internal("db lock poisoned".into()))?;

            let mut stmt = conn.prepare(
                "SELECT g.id FROM groups g
                 JOIN group_members gm ON gm.group_id = g.id
                 WHERE gm.user_id = ?1
                 ORDER BY g.updated_at DESC",
            )?;
            let group_ids = stmt
                .query_map(rusqlite::params![user_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;

            group_ids
                .iter()
                .map(|id| load_group_response(&conn, id))
                .collect()
        })
        .await?
    }
}

// --- Blocking helpers (caller holds the connection lock) ---

fn load_group(conn: &Connection, group_id: &str) -> Result<Option<GroupRow>, AppError> {
    let result = conn.query_row(
        "SELECT id, name, description, admin_id, created_at, updated_at FROM groups WHERE id = ?1",
        rusqlite::params![group_id],
        |row| {
            Ok(GroupRow {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                admin_id: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        },
    );
    match result {
        Ok(row) => Ok(Some(row)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn is_member_tx(conn: &Connection, group_id: &str, user_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2)",
        rusqlite::params![group_id, user_id],
        |row| row.get(0),
    )
}

/// Group with admin and member profiles resolved, as every endpoint returns it.
fn load_group_response(conn: &Connection, group_id: &str) -> Result<GroupResponse, AppError> {
    let group = load_group(conn, group_id)?.ok_or(AppError::NotFound("group"))?;

    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, u.display_name, u.avatar
         FROM group_members gm
         JOIN users u ON u.id = gm.user_id
         WHERE gm.group_id = ?1
         ORDER BY gm.added_at ASC, u.id ASC",
    )?;
    let members = stmt
        .query_map(rusqlite::params![group_id], |row| {
            Ok(UserResponse {
                id: row.get(0)?,
                username: row.get(1)?,
                display_name: row.get(2)?,
                avatar: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let admin = members
        .iter()
        .find(|m| m.id == group.admin_id)
        .cloned()
        // admin ∈ members is a hard invariant; absence means corrupted state
        .ok_or_else(|| AppError::Internal(format!("group {group_id} admin not in member set")))?;

    Ok(GroupResponse {
        id: group.id,
        name: group.name,
        description: group.description,
        admin,
        members,
        created_at: group.created_at,
        updated_at: group.updated_at,
    })
}
