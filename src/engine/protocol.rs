//! Chat negotiation protocol messages

use serde::{Deserialize, Serialize};

use crate::error::P2PError;

/// Reserved payload announcing that the sender closed the session
pub const CHAT_CLOSED: &str = r#"{"type":"chat-closed"}"#;

/// Negotiation messages exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChatMessage {
    ChatInvitation,
    ChatAccepted,
    ChatDenied,
    ChatClosed,
    ChatData { data: String },
    StreamPublished { id: String, label: String },
    StreamUnpublished { id: String },
}

impl ChatMessage {
    pub fn parse(message: &str) -> Result<Self, P2PError> {
        serde_json::from_str(message).map_err(|e| P2PError::InvalidMessage(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, P2PError> {
        serde_json::to_string(self).map_err(|e| P2PError::InvalidMessage(e.to_string()))
    }
}

/// True when `message` is the reserved chat-closed payload
pub fn is_chat_closed(message: &str) -> bool {
    if message == CHAT_CLOSED {
        return true;
    }
    serde_json::from_str::<serde_json::Value>(message)
        .ok()
        .and_then(|value| {
            value
                .get("type")
                .and_then(|t| t.as_str())
                .map(|t| t == "chat-closed")
        })
        .unwrap_or(false)
}
