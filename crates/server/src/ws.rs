//! WebSocket handler for the realtime relay.
//!
//! Each connection starts unauthenticated. After a successful `auth` frame it
//! may subscribe to shared channels and to its own `user:` channel, and publish
//! into shared channels.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::Utc;
use contested_shared::{channel_owner, OutboundMessage, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::state::AppState;

pub const BAD_FRAME: &str = "BAD_FRAME";
pub const NOT_AUTHENTICATED: &str = "NOT_AUTHENTICATED";
pub const FORBIDDEN: &str = "FORBIDDEN";

/// WebSocket upgrade handler
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Arc<str>>();
    let mut conn = Connection::new(outbound);
    tracing::info!(conn_id = %conn.id, "websocket connected");

    // Task to forward frames to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => conn.handle_text(&state, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(conn_id = %conn.id, error = %e, "websocket read failed");
                break;
            }
            _ => {}
        }
    }

    let conn_id = conn.id;
    let user_id = conn.user_id.clone();
    conn.close(&state).await;
    send_task.abort();
    tracing::info!(%conn_id, user_id = user_id.as_deref().unwrap_or("-"), "websocket closed");
}

struct Connection {
    id: Uuid,
    user_id: Option<String>,
    subscriptions: HashMap<String, JoinHandle<()>>,
    outbound: mpsc::UnboundedSender<Arc<str>>,
}

impl Connection {
    fn new(outbound: mpsc::UnboundedSender<Arc<str>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            subscriptions: HashMap::new(),
            outbound,
        }
    }

    fn reply(&self, frame: &ServerFrame) {
        match frame.encode() {
            Ok(text) => {
                let _ = self.outbound.send(text.into());
            }
            Err(e) => tracing::error!(conn_id = %self.id, error = %e, "failed to encode frame"),
        }
    }

    fn reject(&self, code: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(conn_id = %self.id, code, %message, "frame rejected");
        self.reply(&ServerFrame::error(code, message));
    }

    async fn handle_text(&mut self, state: &AppState, text: &str) {
        let frame = match OutboundMessage::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.reject(BAD_FRAME, e.to_string());
                return;
            }
        };

        match frame {
            OutboundMessage::Auth { token } => self.authenticate(state, &token).await,
            OutboundMessage::Ping => self.reply(&ServerFrame::Pong),
            OutboundMessage::Subscribe { channel } => {
                if self.authorize(&channel) {
                    self.subscribe(state, &channel).await;
                }
            }
            OutboundMessage::Unsubscribe { channel } => {
                if self.user_id.is_some() {
                    self.unsubscribe(state, &channel).await;
                } else {
                    self.reject(NOT_AUTHENTICATED, "authenticate first");
                }
            }
            OutboundMessage::Message { channel, content } => {
                self.publish(state, channel, content).await;
            }
        }
    }

    async fn authenticate(&mut self, state: &AppState, token: &str) {
        let Some(user_id) = state.verifier.verify(token).await else {
            tracing::warn!(conn_id = %self.id, "authentication failed");
            self.reply(&ServerFrame::AuthAck {
                success: false,
                error: Some("invalid token".to_string()),
                user_id: None,
            });
            return;
        };

        if self.user_id.as_ref().is_some_and(|current| *current != user_id) {
            self.drop_subscriptions(state).await;
        }
        tracing::info!(conn_id = %self.id, %user_id, "authenticated");
        self.reply(&ServerFrame::AuthAck {
            success: true,
            error: None,
            user_id: Some(user_id.clone()),
        });
        self.user_id = Some(user_id);
    }

    /// Whether the connection may use `channel`; rejects the frame otherwise.
    fn authorize(&self, channel: &str) -> bool {
        let Some(user_id) = self.user_id.as_deref() else {
            self.reject(NOT_AUTHENTICATED, "authenticate first");
            return false;
        };
        match channel_owner(channel) {
            Some(owner) if owner != user_id => {
                self.reject(FORBIDDEN, format!("{channel} belongs to another user"));
                false
            }
            _ => true,
        }
    }

    async fn subscribe(&mut self, state: &AppState, channel: &str) {
        if self.subscriptions.contains_key(channel) {
            return;
        }

        let mut rx = state.channels.subscribe(channel).await;
        let outbound = self.outbound.clone();
        let name = channel.to_string();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        if outbound.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %name, skipped, "subscriber lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        tracing::debug!(conn_id = %self.id, channel, "subscribed");
        self.subscriptions.insert(channel.to_string(), handle);
    }

    async fn unsubscribe(&mut self, state: &AppState, channel: &str) {
        if let Some(handle) = self.subscriptions.remove(channel) {
            handle.abort();
            let _ = handle.await;
            state.channels.release(channel).await;
            tracing::debug!(conn_id = %self.id, channel, "unsubscribed");
        }
    }

    async fn publish(&self, state: &AppState, channel: String, content: Value) {
        let Some(sender) = self.user_id.clone() else {
            self.reject(NOT_AUTHENTICATED, "authenticate first");
            return;
        };
        if channel_owner(&channel).is_some() {
            self.reject(FORBIDDEN, "user channels only carry server notifications");
            return;
        }

        let frame = ServerFrame::Message {
            channel: channel.clone(),
            content,
            sender,
            ts: Utc::now(),
        };
        match frame.encode() {
            Ok(text) => {
                let delivered = state.channels.publish(&channel, text).await;
                tracing::debug!(conn_id = %self.id, %channel, delivered, "message relayed");
            }
            Err(e) => self.reject(BAD_FRAME, e.to_string()),
        }
    }

    async fn drop_subscriptions(&mut self, state: &AppState) {
        let channels: Vec<String> = self.subscriptions.keys().cloned().collect();
        for channel in channels {
            self.unsubscribe(state, &channel).await;
        }
    }

    async fn close(mut self, state: &AppState) {
        self.drop_subscriptions(state).await;
    }
}
