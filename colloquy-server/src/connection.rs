//! Per-observer connection handler.
//!
//! Each WebSocket owns at most one live session. Notifications from the
//! session flow through an outbox channel to a writer task; inbound frames
//! are parsed and routed to the registry. When the socket closes the
//! session is cleaned up.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use colloquy_agents::Decision;
use colloquy_agents::notify::Outbox;
use futures::{SinkExt, StreamExt};

use crate::protocol::ClientMessage;
use crate::server::SharedState;

/// Inbound frames larger than this are rejected.
const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Connection-local state.
struct Connection {
    id: u64,
    outbox: Outbox,
    session: Option<String>,
}

pub async fn handle(socket: WebSocket, state: Arc<SharedState>) -> Result<()> {
    let id = state.next_connection.fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut rx) = Outbox::channel();

    // Writer task: serialize notifications onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            let text = match serde_json::to_string(&notification) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(conn = id, "Failed to encode notification: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    tracing::info!(conn = id, "Observer connected");
    let mut conn = Connection {
        id,
        outbox,
        session: None,
    };

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(conn = id, "WebSocket read error: {e}");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                if text.as_str().len() > MAX_FRAME_BYTES {
                    tracing::warn!(conn = id, len = text.as_str().len(), "Oversized frame dropped");
                    conn.outbox.error("message too large");
                    continue;
                }
                conn.dispatch(&state, text.as_str());
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(session) = conn.session.take() {
        state.registry.cleanup(&session);
    }
    tracing::info!(conn = id, "Observer disconnected");
    drop(conn);
    writer.abort();
    Ok(())
}

impl Connection {
    fn dispatch(&mut self, state: &SharedState, text: &str) {
        let msg = match ClientMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(conn = self.id, "Malformed frame: {e}");
                self.outbox.error(&format!("malformed message: {e}"));
                return;
            }
        };

        match msg {
            ClientMessage::StartTask { task, agents } => self.start_task(state, &task, &agents),
            ClientMessage::Decision {
                request_id,
                decision,
                feedback,
            } => self.decide(state, &request_id, &decision, feedback.as_deref()),
            ClientMessage::Reset => {
                if let Some(session) = self.session.take() {
                    state.registry.reset(&session);
                    self.outbox.system("Session reset.");
                }
            }
        }
    }

    fn start_task(&mut self, state: &SharedState, task: &str, agents: &[String]) {
        let previous = self.session.as_deref();
        match state.registry.replace(previous, task, agents, self.outbox.clone()) {
            Ok(session) => {
                tracing::info!(conn = self.id, session = %session, replaced = ?previous, "Task started");
                self.session = Some(session);
            }
            Err(e) => {
                tracing::warn!(conn = self.id, "Rejected task: {e}");
                self.outbox.error(&e.to_string());
            }
        }
    }

    fn decide(&self, state: &SharedState, request_id: &str, tag: &str, feedback: Option<&str>) {
        let Some(session) = &self.session else {
            tracing::warn!(conn = self.id, request = %request_id, "Decision without a session");
            return;
        };
        let decision = match Decision::parse(tag, feedback) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(conn = self.id, request = %request_id, "Bad decision: {e}");
                self.outbox.error(&e.to_string());
                return;
            }
        };
        state.registry.submit_decision(session, request_id, decision);
    }
}
