//! Realtime wire protocol.
//!
//! Every frame is a JSON object carrying a `type` discriminator. Frames sent by
//! clients are modelled as a closed enum ([`OutboundMessage`]); frames received by
//! clients are kept open ([`InboundMessage`]) so new server-side types never break
//! older clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Prefix of the per-user notification channel.
pub const USER_CHANNEL_PREFIX: &str = "user:";

/// Name of the notification channel for `user_id`.
pub fn user_channel(user_id: &str) -> String {
    format!("{USER_CHANNEL_PREFIX}{user_id}")
}

/// Owner of a per-user channel, or `None` for shared channels.
pub fn channel_owner(channel: &str) -> Option<&str> {
    channel
        .strip_prefix(USER_CHANNEL_PREFIX)
        .filter(|owner| !owner.is_empty())
}

/// Frames a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Auth { token: String },
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Message { channel: String, content: Value },
    Ping,
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Wire name of this frame's `type`.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Auth { .. } => "auth",
            OutboundMessage::Subscribe { .. } => "subscribe",
            OutboundMessage::Unsubscribe { .. } => "unsubscribe",
            OutboundMessage::Message { .. } => "message",
            OutboundMessage::Ping => "ping",
        }
    }
}

/// Recognized inbound frame types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    AuthAck,
    Notification,
    Message,
    Pong,
    Error,
    Other(String),
}

impl InboundKind {
    pub fn from_type(message_type: &str) -> Self {
        match message_type {
            "auth_ack" => InboundKind::AuthAck,
            "notification" => InboundKind::Notification,
            "message" => InboundKind::Message,
            "pong" => InboundKind::Pong,
            "error" => InboundKind::Error,
            other => InboundKind::Other(other.to_string()),
        }
    }
}

/// A frame received from the server: the `type` tag plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl InboundMessage {
    pub fn new(message_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn kind(&self) -> InboundKind {
        InboundKind::from_type(&self.message_type)
    }

    /// The `channel` field, if the frame is scoped to one.
    pub fn channel(&self) -> Option<&str> {
        self.payload.get("channel").and_then(Value::as_str)
    }

    /// Outcome carried by an `auth_ack` frame; `None` for every other type.
    ///
    /// A missing `success` field counts as an acknowledgment.
    pub fn auth_result(&self) -> Option<Result<(), String>> {
        if self.kind() != InboundKind::AuthAck {
            return None;
        }
        let success = self
            .payload
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if success {
            Some(Ok(()))
        } else {
            let reason = self
                .payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("authentication rejected")
                .to_string();
            Some(Err(reason))
        }
    }
}

/// Frames emitted by the relay server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthAck {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    Notification {
        channel: String,
        payload: Value,
        ts: DateTime<Utc>,
    },
    Message {
        channel: String,
        content: Value,
        sender: String,
        ts: DateTime<Utc>,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
}

impl ServerFrame {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(r#"{"type":"auth_ack","success":true}"#, InboundKind::AuthAck)]
    #[case(r#"{"type":"notification","channel":"user:42"}"#, InboundKind::Notification)]
    #[case(r#"{"type":"message","channel":"room","content":"hi"}"#, InboundKind::Message)]
    #[case(r#"{"type":"pong"}"#, InboundKind::Pong)]
    #[case(r#"{"type":"presence","user":"7"}"#, InboundKind::Other("presence".into()))]
    fn inbound_kind_follows_type(#[case] text: &str, #[case] expected: InboundKind) {
        let msg = InboundMessage::decode(text).unwrap();
        assert_eq!(msg.kind(), expected);
    }

    #[test]
    fn unknown_inbound_type_keeps_payload() {
        let msg = InboundMessage::decode(r#"{"type":"presence","user":"7","online":true}"#)
            .unwrap();
        assert_eq!(msg.message_type, "presence");
        assert_eq!(msg.payload.get("online"), Some(&json!(true)));
    }

    #[rstest]
    #[case(r#"{"channel":"x"}"#)]
    #[case(r#"{"type":5}"#)]
    #[case("not json")]
    fn inbound_without_string_type_is_malformed(#[case] text: &str) {
        assert!(matches!(
            InboundMessage::decode(text),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[rstest]
    #[case(r#"{"type":"auth_ack","success":true}"#, Some(Ok(())))]
    #[case(r#"{"type":"auth_ack"}"#, Some(Ok(())))]
    #[case(
        r#"{"type":"auth_ack","success":false,"error":"expired"}"#,
        Some(Err("expired".to_string()))
    )]
    #[case(
        r#"{"type":"auth_ack","success":false}"#,
        Some(Err("authentication rejected".to_string()))
    )]
    #[case(r#"{"type":"pong"}"#, None)]
    fn auth_result_reads_success_flag(
        #[case] text: &str,
        #[case] expected: Option<Result<(), String>>,
    ) {
        let msg = InboundMessage::decode(text).unwrap();
        assert_eq!(msg.auth_result(), expected);
    }

    #[test]
    fn outbound_frames_have_expected_shape() {
        let auth = OutboundMessage::Auth {
            token: "tok123".into(),
        };
        assert_eq!(
            serde_json::to_value(&auth).unwrap(),
            json!({"type": "auth", "token": "tok123"})
        );

        let sub = OutboundMessage::Subscribe {
            channel: "user:42".into(),
        };
        assert_eq!(
            serde_json::to_value(&sub).unwrap(),
            json!({"type": "subscribe", "channel": "user:42"})
        );

        let msg = OutboundMessage::Message {
            channel: "room".into(),
            content: json!({"text": "hi"}),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "message", "channel": "room", "content": {"text": "hi"}})
        );

        assert_eq!(
            OutboundMessage::Ping.encode().unwrap(),
            r#"{"type":"ping"}"#
        );
    }

    #[test]
    fn server_frames_decode_as_inbound() {
        let frame = ServerFrame::Notification {
            channel: user_channel("42"),
            payload: json!({"title": "New offer"}),
            ts: Utc::now(),
        };
        let inbound = InboundMessage::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(inbound.kind(), InboundKind::Notification);
        assert_eq!(inbound.channel(), Some("user:42"));

        let nack = ServerFrame::AuthAck {
            success: false,
            error: Some("invalid token".into()),
            user_id: None,
        };
        let inbound = InboundMessage::decode(&nack.encode().unwrap()).unwrap();
        assert_eq!(inbound.auth_result(), Some(Err("invalid token".into())));
    }

    #[rstest]
    #[case("user:42", Some("42"))]
    #[case("user:", None)]
    #[case("campaign:9", None)]
    fn channel_owner_strips_user_prefix(#[case] channel: &str, #[case] owner: Option<&str>) {
        assert_eq!(channel_owner(channel), owner);
    }
}
