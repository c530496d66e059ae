//! Fanout dispatcher: pushes persisted messages and presence transitions to
//! the live connections of their audience.
//!
//! Dispatch runs on its own task behind an unbounded channel so that a slow
//! or dead connection can never stall the writer — the HTTP handler persists,
//! enqueues, and returns. Delivery is at-most-once per connection per event;
//! a failed push is logged and dropped, because the durable log is the source
//! of truth and the client's next history fetch is the recovery path.
//!
//! Group audiences are resolved from the Group Registry at dispatch time, not
//! at message-creation time: a member removed between persistence and
//! dispatch does not receive the push.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::db::models::MessageRow;
use crate::groups::registry::GroupRegistry;
use crate::presence::PresenceTracker;
use crate::ws::events::WsEvent;

#[derive(Debug)]
pub enum FanoutJob {
    /// Deliver a persisted direct message to the recipient's connections.
    /// The sender already has the synchronous write response — no echo.
    Direct { message: MessageRow },
    /// Deliver a persisted group message to every currently-online member
    /// except the sender's own connections.
    Group { message: MessageRow },
    /// Best-effort broadcast of an online/offline transition.
    Presence { user_id: String, online: bool },
}

/// Cloneable handle for enqueueing fanout work. Never blocks.
#[derive(Clone)]
pub struct FanoutHandle {
    tx: mpsc::UnboundedSender<FanoutJob>,
}

impl FanoutHandle {
    pub fn dispatch(&self, job: FanoutJob) {
        if self.tx.send(job).is_err() {
            tracing::warn!("fanout dispatcher task is gone; event dropped");
        }
    }
}

/// Spawn the dispatcher task and return its handle.
pub fn spawn_dispatcher(
    groups: Arc<GroupRegistry>,
    presence: Arc<PresenceTracker>,
) -> FanoutHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<FanoutJob>();

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            handle_job(&groups, &presence, job).await;
        }
        tracing::debug!("fanout dispatcher stopped");
    });

    FanoutHandle { tx }
}

async fn handle_job(groups: &GroupRegistry, presence: &PresenceTracker, job: FanoutJob) {
    match job {
        FanoutJob::Direct { message } => {
            let Some(recipient_id) = message.recipient_id.clone() else {
                tracing::error!(message_id = %message.id, "direct fanout job without recipient");
                return;
            };
            let event = WsEvent::NewMessage(message);
            push_to_user(presence, &recipient_id, &event);
        }

        FanoutJob::Group { message } => {
            let Some(group_id) = message.group_id.clone() else {
                tracing::error!(message_id = %message.id, "group fanout job without group id");
                return;
            };

            // Live membership snapshot at dispatch time
            let member_ids = match groups.member_ids(&group_id).await {
                Ok(ids) => ids,
                Err(e) => {
                    // Group deleted between persist and dispatch — nothing to deliver
                    tracing::debug!(group_id = %group_id, error = %e, "group fanout skipped");
                    return;
                }
            };

            let sender_id = message.sender_id.clone();
            let event = WsEvent::NewGroupMessage(message);
            for member_id in member_ids {
                if member_id == sender_id {
                    continue;
                }
                push_to_user(presence, &member_id, &event);
            }
        }

        FanoutJob::Presence { user_id, online } => {
            let event = WsEvent::PresenceChanged { user_id, online };
            let Some(msg) = event.to_ws_message() else { return };
            for conn in presence.all_connections() {
                let _ = conn.sender.send(msg.clone());
            }
        }
    }
}

/// Push an event to every live connection of one user.
/// Offline users are skipped entirely — never queued.
fn push_to_user(presence: &PresenceTracker, user_id: &str, event: &WsEvent) {
    let connections = presence.connections_for(user_id);
    if connections.is_empty() {
        return;
    }
    let Some(msg) = event.to_ws_message() else { return };
    for conn in connections {
        if conn.sender.send(msg.clone()).is_err() {
            tracing::debug!(
                user_id = %user_id,
                connection = conn.id,
                "push to closed connection dropped"
            );
        }
    }
}
