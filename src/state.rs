use std::sync::Arc;

use crate::chat::store::ConversationStore;
use crate::db::DbPool;
use crate::fanout::FanoutHandle;
use crate::groups::registry::GroupRegistry;
use crate::presence::PresenceTracker;

/// Shared application state passed to all handlers via the axum State
/// extractor. Each shared resource has one owning component: the registry
/// owns membership, the store owns the message log, the tracker owns
/// connection sets — nothing here is mutated from arbitrary call sites.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Group membership state machine
    pub groups: Arc<GroupRegistry>,
    /// Durable per-conversation message log
    pub store: Arc<ConversationStore>,
    /// Live connection sets per user
    pub presence: Arc<PresenceTracker>,
    /// Queued delivery of messages and presence transitions
    pub fanout: FanoutHandle,
}
