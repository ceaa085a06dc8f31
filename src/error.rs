//! Error types surfaced by the session layer

use crate::signaling::types::SignalingError;

/// Result alias used by every session operation
pub type P2PResult<T> = std::result::Result<T, P2PError>;

/// Errors reported to callers of the session manager
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum P2PError {
    #[error("Remote {0} is not allowed")]
    RemoteNotAllowed(String),
    #[error("Remote {0} was never allowed")]
    RemoteNotExisted(String),
    #[error("Session with {0} is no longer active")]
    SessionInactive(String),
    #[error("Session with {0} is closed")]
    SessionClosed(String),
    #[error("Signaling error: {0}")]
    Signaling(String),
    #[error("Negotiation error: {0}")]
    Negotiation(String),
    #[error("Invalid signaling message: {0}")]
    InvalidMessage(String),
    #[error("Not connected to signaling server")]
    NotConnected,
}

/// Flat error classification for callers that only need to branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RemoteNotAllowed,
    RemoteNotExisted,
    SessionInactive,
    SessionClosed,
    Signaling,
    Negotiation,
    InvalidMessage,
    NotConnected,
}

impl P2PError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            P2PError::RemoteNotAllowed(_) => ErrorKind::RemoteNotAllowed,
            P2PError::RemoteNotExisted(_) => ErrorKind::RemoteNotExisted,
            P2PError::SessionInactive(_) => ErrorKind::SessionInactive,
            P2PError::SessionClosed(_) => ErrorKind::SessionClosed,
            P2PError::Signaling(_) => ErrorKind::Signaling,
            P2PError::Negotiation(_) => ErrorKind::Negotiation,
            P2PError::InvalidMessage(_) => ErrorKind::InvalidMessage,
            P2PError::NotConnected => ErrorKind::NotConnected,
        }
    }
}

impl From<SignalingError> for P2PError {
    fn from(err: SignalingError) -> Self {
        match err {
            SignalingError::NotConnected => P2PError::NotConnected,
            other => P2PError::Signaling(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            P2PError::RemoteNotAllowed("bob".into()).kind(),
            ErrorKind::RemoteNotAllowed
        );
        assert_eq!(
            P2PError::SessionClosed("bob".into()).kind(),
            ErrorKind::SessionClosed
        );
    }

    #[test]
    fn test_signaling_error_conversion() {
        let err: P2PError = SignalingError::NotConnected.into();
        assert_eq!(err, P2PError::NotConnected);

        let err: P2PError = SignalingError::ConnectionError("refused".into()).into();
        assert_eq!(err.kind(), ErrorKind::Signaling);
        assert!(err.to_string().contains("refused"));
    }
}
