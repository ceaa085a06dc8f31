//! Signaling wire types and errors

use serde::{Deserialize, Serialize};

/// Connection status for the signaling transport
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

/// Frame sent to the signaling server for delivery to one remote
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundEnvelope {
    pub to: String,
    pub data: String,
}

impl OutboundEnvelope {
    pub fn new(to: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            data: data.into(),
        }
    }
}

/// Frame relayed by the signaling server from one remote
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundEnvelope {
    pub from: String,
    pub data: String,
}

/// Greeting sent by the signaling server after the socket opens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Welcome {
    pub id: String,
}

/// Kinds of frames the signaling server sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFrameKind {
    Welcome,
    Message,
}

/// A decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Welcome(Welcome),
    Message(InboundEnvelope),
}

/// Errors raised by signaling transports
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("Signaling connection error: {0}")]
    ConnectionError(String),
    #[error("Signaling message error: {0}")]
    MessageError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Unknown remote: {0}")]
    UnknownRemote(String),
    #[error("Not connected to signaling server")]
    NotConnected,
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
