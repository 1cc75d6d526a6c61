//! WebSocket transport
//!
//! Accepts connections and runs one reader task plus one send-loop task per
//! client. Responsibilities:
//! - complete the handshake and register the connection with the broadcaster
//! - decode each inbound frame into a `ClientMessage` and apply it to that
//!   connection's state (subscription, authentication, liveness)
//! - answer protocol and authorization faults with explicit rejection
//!   envelopes instead of closing the connection
//! - guarantee cleanup runs exactly once no matter which path ends the
//!   connection (reader loop end, send failure, liveness reaping)
//!
//! The reader task is the only writer of its connection's subscription and
//! liveness state; the broadcaster's registry lock is taken per operation and
//! never across socket I/O.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::broadcast::{Envelope, SharedBroadcaster, SubscriptionUpdate, Topic};
use crate::transport::auth::TokenValidator;
use crate::transport::command::{self, CommandExecutor};
use crate::transport::message::ClientMessage;

/// External collaborators consulted by the connection handler.
pub struct Collaborators {
    pub validator: Arc<dyn TokenValidator>,
    pub executor: Arc<dyn CommandExecutor>,
}

pub async fn start_websocket_server(
    addr: String,
    broadcaster: SharedBroadcaster,
    collaborators: Arc<Collaborators>,
) {
    let listener = TcpListener::bind(addr.clone()).await.expect("Can't bind");

    info!("WebSocket server listening on ws://{addr}");

    while let Ok((stream, _)) = listener.accept().await {
        let broadcaster = broadcaster.clone();
        let collaborators = collaborators.clone();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake error: {e}");
                    return;
                }
            };
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            let (tx, mut rx) = {
                let broadcaster = broadcaster.lock().unwrap();
                mpsc::channel::<WsMessage>(broadcaster.send_queue_capacity())
            };
            let connection_id = {
                let mut broadcaster = broadcaster.lock().unwrap();
                broadcaster.register(tx)
            };

            let cleanup_called = Arc::new(AtomicBool::new(false));

            let do_cleanup = {
                let broadcaster = broadcaster.clone();
                let connection_id = connection_id.clone();
                let cleanup_called = cleanup_called.clone();

                move || {
                    if !cleanup_called.swap(true, Ordering::SeqCst) {
                        let mut broadcaster = broadcaster.lock().unwrap();
                        broadcaster.unregister(&connection_id);
                    }
                }
            };

            {
                let connection_id = connection_id.clone();
                let do_cleanup = do_cleanup.clone();

                spawn(async move {
                    while let Some(msg) = rx.recv().await {
                        if let Err(e) = ws_sender.send(msg).await {
                            debug!("failed to send to {connection_id}: {e}");
                            break;
                        }
                    }

                    // Channel closed means the registry dropped this
                    // connection (disconnect or liveness reaping); close the
                    // socket so the peer finds out.
                    let _ = ws_sender.close().await;
                    do_cleanup();
                    debug!("send loop closed for {connection_id}");
                });
            }

            while let Some(Ok(msg)) = ws_receiver.next().await {
                if msg.is_text() {
                    match msg.to_text() {
                        Ok(text) => {
                            handle_frame(&broadcaster, &collaborators, &connection_id, text)
                        }
                        Err(e) => error!("non-UTF8 text frame from {connection_id}: {e}"),
                    }
                }
            }

            info!("{connection_id} disconnected");
            do_cleanup();
        });
    }
}

/// Applies one inbound frame to the connection's state.
///
/// Synchronous on purpose: every arm is registry mutation plus a non-blocking
/// queue write, so tests can drive the protocol without sockets.
pub fn handle_frame(
    broadcaster: &SharedBroadcaster,
    collaborators: &Collaborators,
    connection_id: &str,
    text: &str,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { topics, node_ids }) => {
            let mut broadcaster = broadcaster.lock().unwrap();
            broadcaster.update_subscription(
                connection_id,
                &topics,
                &node_ids.unwrap_or_default(),
                SubscriptionUpdate::Add,
            );
            debug!("{connection_id} subscribed to {topics:?}");
        }

        Ok(ClientMessage::Unsubscribe { topics }) => {
            let mut broadcaster = broadcaster.lock().unwrap();
            broadcaster.update_subscription(
                connection_id,
                &topics,
                &[],
                SubscriptionUpdate::Remove,
            );
            debug!("{connection_id} unsubscribed from {topics:?}");
        }

        Ok(ClientMessage::Authenticate { token }) => {
            match collaborators.validator.validate(&token) {
                Ok(principal) => {
                    let mut broadcaster = broadcaster.lock().unwrap();
                    broadcaster.mark_authenticated(connection_id, &principal);
                    let ack = Envelope::new(
                        Topic::Connection,
                        serde_json::json!({ "status": "authenticated", "user": principal }),
                    );
                    broadcaster.send_to(connection_id, &ack);
                }
                // Not fatal: the connection keeps whatever access it had.
                Err(e) => {
                    warn!("{connection_id} authentication failed: {e}");
                    reject(broadcaster, connection_id, "authentication failed");
                }
            }
        }

        Ok(ClientMessage::Ping) => {
            let mut broadcaster = broadcaster.lock().unwrap();
            broadcaster.touch(connection_id);
            let pong = Envelope::new(Topic::Pong, serde_json::json!({}));
            broadcaster.send_to(connection_id, &pong);
        }

        Ok(ClientMessage::Command { action, params }) => {
            if !command::is_allowed(&action) {
                warn!("{connection_id} requested unknown action {action}");
                reject(broadcaster, connection_id, "unknown action");
                return;
            }
            let authenticated = {
                let broadcaster = broadcaster.lock().unwrap();
                broadcaster.is_authenticated(connection_id)
            };
            if !authenticated {
                warn!("{connection_id} sent command {action} before authenticating");
                reject(broadcaster, connection_id, "authentication required");
                return;
            }
            // Executor runs outside the registry lock; it may be slow.
            match collaborators.executor.execute(&action, &params) {
                Ok(result) => {
                    let reply = Envelope::new(
                        Topic::Connection,
                        serde_json::json!({
                            "status": "command_result",
                            "action": action,
                            "result": result,
                        }),
                    );
                    let mut broadcaster = broadcaster.lock().unwrap();
                    broadcaster.send_to(connection_id, &reply);
                }
                Err(e) => {
                    warn!("{connection_id} command {action} failed: {e}");
                    reject(broadcaster, connection_id, &e.0);
                }
            }
        }

        Ok(ClientMessage::Unknown) => {
            debug!("{connection_id} sent unsupported message type");
            reject(broadcaster, connection_id, "unsupported message type");
        }

        // Malformed frames are tolerated: the client may be probing or a
        // protocol version ahead. Answer and keep the connection.
        Err(err) => {
            debug!(
                "invalid frame from {connection_id}: {err} | {}",
                &text.chars().take(100).collect::<String>()
            );
            reject(broadcaster, connection_id, "malformed message");
        }
    }
}

fn reject(broadcaster: &SharedBroadcaster, connection_id: &str, reason: &str) {
    let envelope = Envelope::new(
        Topic::Connection,
        serde_json::json!({ "status": "error", "error": reason }),
    );
    let mut broadcaster = broadcaster.lock().unwrap();
    broadcaster.send_to(connection_id, &envelope);
}
