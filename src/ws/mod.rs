pub mod actor;
pub mod events;
pub mod handler;

use tokio::sync::mpsc;

/// Sender half of a WebSocket connection's outbound channel.
/// Other parts of the system clone this to push events to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
