//! Negotiation engine integration module
//!
//! A negotiation engine drives one peer session: it exchanges negotiation
//! messages through a [`SignalingSender`], attaches streams, carries data and
//! reports lifecycle changes to an [`EngineObserver`]. The session layer only
//! talks to engines through these traits.

pub mod chat;
pub mod mock;
pub mod protocol;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CandidateNetworkPolicy, IceServer};
use crate::error::P2PResult;
use crate::stream::{LocalStream, RemoteStream};

pub use chat::{ChatEngine, ChatEngineFactory};
pub use mock::{MockBehavior, MockEngine, MockEngineFactory};

/// Lifecycle notifications raised by an engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started,
    Stopped,
    Denied,
    Data(String),
    StreamAdded(RemoteStream),
    StreamRemoved(RemoteStream),
}

/// Receives engine lifecycle notifications
pub trait EngineObserver: Send + Sync {
    fn on_engine_event(&self, event: EngineEvent);
}

/// Outbound path for negotiation messages
#[async_trait]
pub trait SignalingSender: Send + Sync {
    async fn send_signaling_message(&self, message: &str, remote_id: &str) -> P2PResult<()>;
}

/// Settings handed to an engine when its channel is created
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub local_id: String,
    pub remote_id: String,
    pub ice_servers: Vec<IceServer>,
    pub candidate_network_policy: CandidateNetworkPolicy,
}

/// Statistics snapshot for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub remote_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub published_streams: usize,
    pub remote_streams: usize,
}

impl ConnectionStats {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            started_at: None,
            messages_sent: 0,
            messages_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            published_streams: 0,
            remote_streams: 0,
        }
    }

    /// Average outbound plus inbound messages per second since start
    pub fn messages_per_second(&self) -> f64 {
        let Some(started_at) = self.started_at else {
            return 0.0;
        };
        let elapsed = (Utc::now() - started_at).num_milliseconds();
        if elapsed <= 0 {
            return 0.0;
        }
        (self.messages_sent + self.messages_received) as f64 / (elapsed as f64 / 1000.0)
    }
}

/// One engine instance per peer session
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn publish(&self, stream: &LocalStream) -> P2PResult<()>;

    async fn unpublish(&self, stream: &LocalStream) -> P2PResult<()>;

    async fn send(&self, message: &str) -> P2PResult<()>;

    /// Close the session and release resources; idempotent
    async fn stop(&self) -> P2PResult<()>;

    async fn connection_stats(&self) -> P2PResult<ConnectionStats>;

    /// Feed one inbound negotiation payload. Must not block.
    fn on_signaling_message(&self, message: &str) -> P2PResult<()>;
}

/// Builds engines for newly created channels
pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        config: ChannelConfig,
        sender: Arc<dyn SignalingSender>,
        observer: Arc<dyn EngineObserver>,
    ) -> Arc<dyn NegotiationEngine>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_message_rate_needs_a_start_time() {
        let mut stats = ConnectionStats::new("bob");
        stats.messages_sent = 10;
        assert_eq!(stats.messages_per_second(), 0.0);

        stats.started_at = Some(Utc::now() - Duration::seconds(10));
        stats.messages_received = 10;
        let rate = stats.messages_per_second();
        assert!(rate > 1.5 && rate <= 2.0, "unexpected rate {}", rate);
    }
}
