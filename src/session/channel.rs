//! Per-remote session channel
//!
//! Wraps one negotiation engine and owns the session state machine:
//!
//! ```text
//! Idle -> Negotiating -> Active -> Closed
//!              \
//!               -> Denied
//! ```
//!
//! `Closed` and `Denied` are terminal. Operations still pending when the
//! channel reaches a terminal state fail with [`P2PError::SessionClosed`].

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::{ConnectionStats, EngineEvent, EngineObserver, NegotiationEngine};
use crate::error::{P2PError, P2PResult};
use crate::stream::LocalStream;

/// Session state as seen by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Negotiating,
    Active,
    Closed,
    Denied,
}

impl ChannelState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Denied)
    }
}

/// Receives engine events after the channel has applied them
pub(crate) trait ChannelEventRelay: Send + Sync {
    fn relay_channel_event(&self, channel: &Arc<SessionChannel>, event: EngineEvent);
}

/// One session with one remote endpoint
pub struct SessionChannel {
    target: String,
    state_tx: watch::Sender<ChannelState>,
    engine: Arc<dyn NegotiationEngine>,
    published: Mutex<HashSet<String>>,
}

impl SessionChannel {
    pub fn new(target: impl Into<String>, engine: Arc<dyn NegotiationEngine>) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Idle);

        Self {
            target: target.into(),
            state_tx,
            engine,
            published: Mutex::new(HashSet::new()),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> ChannelState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state transitions
    pub fn state_watch(&self) -> watch::Receiver<ChannelState> {
        self.state_tx.subscribe()
    }

    pub fn is_published(&self, stream: &LocalStream) -> bool {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(stream.id())
    }

    fn closed_error(&self) -> P2PError {
        P2PError::SessionClosed(self.target.clone())
    }

    fn ensure_open(&self) -> P2PResult<()> {
        if self.state().is_terminal() {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    /// Move from `Idle` to `Negotiating`
    fn begin_negotiation(&self) {
        let started = self.state_tx.send_if_modified(|state| {
            if *state == ChannelState::Idle {
                *state = ChannelState::Negotiating;
                true
            } else {
                false
            }
        });
        if started {
            debug!("Channel {} negotiating", self.target);
        }
    }

    fn transition(&self, allowed: impl Fn(ChannelState) -> bool, next: ChannelState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if allowed(*state) {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Run an engine operation, failing it if the channel closes first
    async fn guarded<T>(&self, operation: impl Future<Output = P2PResult<T>>) -> P2PResult<T> {
        let mut state_rx = self.state_tx.subscribe();
        tokio::select! {
            result = operation => result,
            _ = state_rx.wait_for(|state| state.is_terminal()) => {
                debug!("Channel {} closed with an operation pending", self.target);
                Err(self.closed_error())
            }
        }
    }

    /// Update local bookkeeping for an engine event
    pub(crate) fn apply_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Started => {
                if self.transition(
                    |s| matches!(s, ChannelState::Idle | ChannelState::Negotiating),
                    ChannelState::Active,
                ) {
                    info!("Channel {} active", self.target);
                }
            }
            EngineEvent::Denied => {
                if self.transition(
                    |s| matches!(s, ChannelState::Idle | ChannelState::Negotiating),
                    ChannelState::Denied,
                ) {
                    info!("Channel {} denied by remote", self.target);
                }
            }
            EngineEvent::Stopped => {
                if self.transition(|s| !s.is_terminal(), ChannelState::Closed) {
                    info!("Channel {} closed by remote", self.target);
                }
            }
            EngineEvent::Data(_) | EngineEvent::StreamAdded(_) | EngineEvent::StreamRemoved(_) => {}
        }
    }

    /// Attach an outbound stream, negotiating first if needed
    pub async fn publish(&self, stream: &LocalStream) -> P2PResult<()> {
        self.ensure_open()?;
        self.begin_negotiation();
        self.guarded(self.engine.publish(stream)).await?;
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(stream.id().to_string());
        Ok(())
    }

    /// Detach a stream; succeeds without doing anything if it was never attached
    pub async fn unpublish(&self, stream: &LocalStream) -> P2PResult<()> {
        if !self.is_published(stream) {
            debug!(
                "Stream {} not published on channel {}",
                stream.id(),
                self.target
            );
            return Ok(());
        }
        self.ensure_open()?;
        self.guarded(self.engine.unpublish(stream)).await?;
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(stream.id());
        Ok(())
    }

    pub async fn send(&self, message: &str) -> P2PResult<()> {
        self.ensure_open()?;
        self.begin_negotiation();
        self.guarded(self.engine.send(message)).await
    }

    /// Feed an inbound negotiation payload to the engine
    pub fn on_incoming_signaling_message(&self, message: &str) -> P2PResult<()> {
        if self.state().is_terminal() {
            debug!(
                "Ignoring signaling message for finished channel {}",
                self.target
            );
            return Ok(());
        }
        self.engine.on_signaling_message(message)?;
        self.begin_negotiation();
        Ok(())
    }

    /// Close the session; repeated calls succeed without effect
    pub async fn stop(&self) -> P2PResult<()> {
        if self.state() == ChannelState::Closed {
            debug!("Channel {} already closed", self.target);
            return Ok(());
        }

        self.transition(|s| !s.is_terminal(), ChannelState::Closed);
        let result = self.engine.stop().await;
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        if let Err(e) = &result {
            warn!("Engine failed to stop channel {}: {}", self.target, e);
        } else {
            info!("Channel {} stopped", self.target);
        }
        result
    }

    pub async fn connection_stats(&self) -> P2PResult<ConnectionStats> {
        if self.state() != ChannelState::Active {
            return Err(P2PError::SessionInactive(self.target.clone()));
        }
        self.engine.connection_stats().await
    }
}

/// Engine observer installed on each channel's engine.
///
/// Holds only weak references, so a lingering engine callback after the
/// channel or its manager is gone is dropped instead of touching freed state.
pub(crate) struct ChannelEventSink {
    target: String,
    channel: Weak<SessionChannel>,
    relay: Weak<dyn ChannelEventRelay>,
}

impl ChannelEventSink {
    pub(crate) fn new(
        target: impl Into<String>,
        channel: Weak<SessionChannel>,
        relay: Weak<dyn ChannelEventRelay>,
    ) -> Self {
        Self {
            target: target.into(),
            channel,
            relay,
        }
    }
}

impl EngineObserver for ChannelEventSink {
    fn on_engine_event(&self, event: EngineEvent) {
        let Some(channel) = self.channel.upgrade() else {
            debug!(
                "Dropping {:?} for released channel {}",
                event, self.target
            );
            return;
        };

        channel.apply_event(&event);

        match self.relay.upgrade() {
            Some(relay) => relay.relay_channel_event(&channel, event),
            None => debug!(
                "Dropping {:?} for {}: session manager is gone",
                event, self.target
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        ChannelConfig, EngineFactory, MockBehavior, MockEngine, MockEngineFactory,
        SignalingSender,
    };
    use crate::config::CandidateNetworkPolicy;
    use async_trait::async_trait;

    struct NullSender;

    #[async_trait]
    impl SignalingSender for NullSender {
        async fn send_signaling_message(&self, _message: &str, _remote_id: &str) -> P2PResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Relayed {
        events: Mutex<Vec<EngineEvent>>,
    }

    impl ChannelEventRelay for Relayed {
        fn relay_channel_event(&self, _channel: &Arc<SessionChannel>, event: EngineEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn channel(
        behavior: MockBehavior,
    ) -> (Arc<SessionChannel>, Arc<MockEngine>, Arc<Relayed>) {
        let factory = MockEngineFactory::new(behavior);
        let relayed = Arc::new(Relayed::default());
        let relay: Arc<dyn ChannelEventRelay> = relayed.clone();
        let relay = Arc::downgrade(&relay);
        let channel = Arc::new_cyclic(|weak| {
            let sink = ChannelEventSink::new("bob", weak.clone(), relay);
            let engine = factory.create(
                ChannelConfig {
                    local_id: "alice".to_string(),
                    remote_id: "bob".to_string(),
                    ice_servers: Vec::new(),
                    candidate_network_policy: CandidateNetworkPolicy::All,
                },
                Arc::new(NullSender),
                Arc::new(sink),
            );
            SessionChannel::new("bob", engine)
        });
        let engine = factory.engine_for("bob").unwrap();
        (channel, engine, relayed)
    }

    #[tokio::test]
    async fn test_publish_moves_to_active() {
        let (channel, engine, relayed) = channel(MockBehavior::Succeed);
        assert_eq!(channel.state(), ChannelState::Idle);

        let stream = LocalStream::new("camera");
        channel.publish(&stream).await.unwrap();

        assert_eq!(channel.state(), ChannelState::Active);
        assert!(channel.is_published(&stream));
        assert_eq!(engine.published_streams(), vec![stream.id().to_string()]);
        assert_eq!(*relayed.events.lock().unwrap(), vec![EngineEvent::Started]);
    }

    #[tokio::test]
    async fn test_publish_after_stop_fails_closed() {
        let (channel, _engine, _relayed) = channel(MockBehavior::Succeed);
        channel.stop().await.unwrap();

        let result = channel.publish(&LocalStream::new("camera")).await;
        assert!(matches!(result, Err(P2PError::SessionClosed(_))));
        let result = channel.send("hi").await;
        assert!(matches!(result, Err(P2PError::SessionClosed(_))));
    }

    #[tokio::test]
    async fn test_unpublish_unknown_stream_succeeds() {
        let (channel, engine, _relayed) = channel(MockBehavior::Succeed);
        channel.unpublish(&LocalStream::new("camera")).await.unwrap();
        assert!(engine.published_streams().is_empty());
    }

    #[tokio::test]
    async fn test_stop_fails_pending_operation() {
        let (channel, _engine, _relayed) = channel(MockBehavior::Hang);

        let pending = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.send("hello").await })
        };
        channel
            .state_watch()
            .wait_for(|state| *state == ChannelState::Negotiating)
            .await
            .unwrap();

        channel.stop().await.unwrap();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(P2PError::SessionClosed(_))));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (channel, engine, relayed) = channel(MockBehavior::Succeed);
        channel.send("hello").await.unwrap();

        channel.stop().await.unwrap();
        channel.stop().await.unwrap();

        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(engine.stop_calls(), 1);
        let stopped = relayed
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == EngineEvent::Stopped)
            .count();
        assert_eq!(stopped, 1);
    }

    #[tokio::test]
    async fn test_denied_is_terminal() {
        let (channel, engine, _relayed) = channel(MockBehavior::Hang);
        channel
            .on_incoming_signaling_message(r#"{"type":"chat-invitation"}"#)
            .unwrap();
        assert_eq!(channel.state(), ChannelState::Negotiating);

        engine.emit(EngineEvent::Denied);
        assert_eq!(channel.state(), ChannelState::Denied);

        engine.emit(EngineEvent::Started);
        assert_eq!(channel.state(), ChannelState::Denied);
        assert!(matches!(
            channel.send("hi").await,
            Err(P2PError::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_require_active() {
        let (channel, _engine, _relayed) = channel(MockBehavior::Succeed);
        assert!(matches!(
            channel.connection_stats().await,
            Err(P2PError::SessionInactive(_))
        ));

        channel.send("hello").await.unwrap();
        let stats = channel.connection_stats().await.unwrap();
        assert_eq!(stats.remote_id, "bob");
        assert_eq!(stats.messages_sent, 1);
    }

    #[tokio::test]
    async fn test_malformed_message_surfaces_error() {
        let (channel, _engine, _relayed) = channel(MockBehavior::Succeed);
        let result = channel.on_incoming_signaling_message("not json");
        assert!(matches!(result, Err(P2PError::InvalidMessage(_))));
        assert_eq!(channel.state(), ChannelState::Idle);
    }
}
