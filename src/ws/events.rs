//! JSON events pushed over live WebSocket connections.
//!
//! Wire shape: `{"event": "newMessage", "data": {...}}`. Event names match
//! what the web client subscribes to.

use serde::Serialize;

use crate::db::models::MessageRow;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum WsEvent {
    /// A direct message was persisted; pushed to the recipient only.
    NewMessage(MessageRow),
    /// A group message was persisted; pushed to online members except the sender.
    NewGroupMessage(MessageRow),
    /// Best-effort online/offline transition broadcast.
    PresenceChanged { user_id: String, online: bool },
    /// Snapshot of online users, sent to a connection right after it registers.
    OnlineUsers { user_ids: Vec<String> },
}

impl WsEvent {
    pub fn to_ws_message(&self) -> Option<axum::extract::ws::Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(axum::extract::ws::Message::Text(json.into())),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize WS event");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_client_facing_names() {
        let event = WsEvent::PresenceChanged {
            user_id: "u-1".into(),
            online: true,
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["event"], "presenceChanged");
        assert_eq!(json["data"]["user_id"], "u-1");
        assert_eq!(json["data"]["online"], true);

        let event = WsEvent::NewGroupMessage(MessageRow {
            id: "m-1".into(),
            sender_id: "u-1".into(),
            recipient_id: None,
            group_id: Some("g-1".into()),
            is_group: true,
            text: Some("hi".into()),
            image: None,
            created_at_ms: 1,
            seq: 1,
        });
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["event"], "newGroupMessage");
        assert_eq!(json["data"]["group_id"], "g-1");
    }
}
