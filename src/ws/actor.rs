use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::fanout::FanoutJob;
use crate::state::AppState;
use crate::ws::events::WsEvent;

/// Ping interval: server sends a WebSocket ping every 30 seconds.
/// Prevents connection leaks from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if no pong within 10 seconds after a ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the socket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: handles keepalive and client-initiated close
///
/// The mpsc sender is registered with the presence tracker, so the fanout
/// dispatcher can push events to this client from anywhere in the system.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register with the presence tracker; a first connection is an
    // online transition that interested clients get notified about.
    let (connection_id, came_online) = state.presence.register(&user_id, tx.clone());
    if came_online {
        state.fanout.dispatch(FanoutJob::Presence {
            user_id: user_id.clone(),
            online: true,
        });
    }

    // Catch-up snapshot of who is online right now, for this client only
    let snapshot = WsEvent::OnlineUsers {
        user_ids: state.presence.online_user_ids(),
    };
    if let Some(msg) = snapshot.to_ws_message() {
        let _ = tx.send(msg);
    }

    tracing::info!(
        user_id = %user_id,
        connection = connection_id,
        "WebSocket actor started"
    );

    // Writer task: forwards mpsc messages to the WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Ping task: periodic pings, close if a pong doesn't come back in time
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop. The live channel is push-only — clients write through the
    // HTTP API — so inbound traffic is keepalive and close handling.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
                Message::Text(text) => {
                    tracing::debug!(
                        user_id = %user_id,
                        "Ignoring inbound text frame (writes go through the HTTP API): {}",
                        text.chars().take(100).collect::<String>()
                    );
                }
                Message::Binary(_) => {
                    tracing::debug!(user_id = %user_id, "Ignoring inbound binary frame");
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    // Unregistration is unconditional and immediate — it never waits on the
    // dispatcher. The offline notification is best-effort, after the fact.
    let went_offline = state.presence.unregister(&user_id, connection_id);
    if went_offline {
        state.fanout.dispatch(FanoutJob::Presence {
            user_id: user_id.clone(),
            online: false,
        });
    }

    tracing::info!(
        user_id = %user_id,
        connection = connection_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from the mpsc channel and forwards them
/// to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
