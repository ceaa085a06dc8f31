//! Session Manager: the peer-to-peer client façade
//!
//! Owns the allow-list, the channel table and the event dispatcher, and sits
//! between the signaling transport and the per-remote negotiation engines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::engine::{ChannelConfig, ConnectionStats, EngineEvent, EngineFactory, SignalingSender};
use crate::error::{P2PError, P2PResult};
use crate::signaling::{SignalingObserver, SignalingTransport};
use crate::stream::LocalStream;

use super::authorization::AuthorizationRegistry;
use super::channel::{ChannelEventRelay, ChannelEventSink, ChannelState, SessionChannel};
use super::channel_table::ChannelTable;
use super::event_dispatcher::EventDispatcher;
use super::observer::{ClientEvent, ObserverList, P2PClientObserver};
use super::publication::Publication;
use super::signaling_router::SignalingRouter;

/// Forwards an engine's outbound negotiation messages to the transport
struct ManagerSignalingSender {
    transport: Arc<dyn SignalingTransport>,
}

#[async_trait]
impl SignalingSender for ManagerSignalingSender {
    async fn send_signaling_message(&self, message: &str, remote_id: &str) -> P2PResult<()> {
        self.transport
            .send_message(message, remote_id)
            .await
            .map_err(|e| {
                warn!("Failed to send signaling message to {}: {}", remote_id, e);
                P2PError::from(e)
            })
    }
}

/// Shared state behind a [`SessionManager`].
///
/// Transports, engine observers and publications only hold weak references
/// to it.
pub(crate) struct ClientCore {
    client_config: ClientConfig,
    transport: Arc<dyn SignalingTransport>,
    engine_factory: Arc<dyn EngineFactory>,
    pub(crate) authorization: AuthorizationRegistry,
    pub(crate) channels: ChannelTable<SessionChannel>,
    dispatcher: EventDispatcher,
    observers: Arc<ObserverList>,
    local_id: Mutex<Option<String>>,
    weak_self: Weak<ClientCore>,
    shut_down: AtomicBool,
}

impl ClientCore {
    fn local_id(&self) -> Option<String> {
        self.local_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn ensure_allowed(&self, target: &str) -> P2PResult<()> {
        if self.authorization.is_allowed(target) {
            Ok(())
        } else {
            warn!("Remote {} is not allowed", target);
            Err(P2PError::RemoteNotAllowed(target.to_string()))
        }
    }

    /// Build a channel for `target`. Called with the channel table locked.
    fn create_channel(&self, target: &str) -> Arc<SessionChannel> {
        let config = ChannelConfig {
            local_id: self.local_id().unwrap_or_default(),
            remote_id: target.to_string(),
            ice_servers: self.client_config.ice_servers.clone(),
            candidate_network_policy: self.client_config.candidate_network_policy,
        };
        let sender: Arc<dyn SignalingSender> = Arc::new(ManagerSignalingSender {
            transport: self.transport.clone(),
        });
        let relay: Weak<dyn ChannelEventRelay> = self.weak_self.clone();

        Arc::new_cyclic(|channel| {
            let sink = Arc::new(ChannelEventSink::new(target, channel.clone(), relay));
            let engine = self.engine_factory.create(config, sender, sink);
            SessionChannel::new(target, engine)
        })
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self, target: &str) -> P2PResult<()> {
        if self.is_shut_down() {
            debug!("Session manager is shut down, refusing {}", target);
            Err(P2PError::SessionInactive(target.to_string()))
        } else {
            Ok(())
        }
    }

    /// Channel for an authorized `target`, created on first use
    fn authorized_channel(&self, target: &str) -> P2PResult<Arc<SessionChannel>> {
        self.ensure_running(target)?;
        self.ensure_allowed(target)?;
        let channel = self
            .channels
            .get_or_create(target, || self.create_channel(target));

        // a concurrent stop or shutdown may have landed in between
        if self.is_shut_down() {
            self.channels.remove_if_same(target, &channel);
            return Err(P2PError::SessionInactive(target.to_string()));
        }
        if !self.authorization.is_allowed(target) {
            self.channels.remove_if_same(target, &channel);
            return Err(P2PError::RemoteNotAllowed(target.to_string()));
        }
        Ok(channel)
    }

    fn existing_channel(&self, target: &str) -> P2PResult<Arc<SessionChannel>> {
        self.ensure_running(target)?;
        self.channels
            .get(target)
            .ok_or_else(|| P2PError::SessionInactive(target.to_string()))
    }

    /// Queue `event` for every observer registered when it is delivered
    fn post_event(&self, event: ClientEvent) {
        let observers = self.observers.clone();
        let posted = self.dispatcher.post(move || {
            for observer in observers.snapshot() {
                event.deliver(observer.as_ref());
            }
        });
        if !posted {
            debug!("Event dispatcher closed, notification dropped");
        }
    }

    pub(crate) fn is_current_channel(&self, target: &str, channel: &Arc<SessionChannel>) -> bool {
        self.channels
            .get(target)
            .is_some_and(|current| Arc::ptr_eq(&current, channel))
    }

    async fn stop(&self, target: &str) -> P2PResult<()> {
        let channel = self.channels.remove(target);
        self.authorization.disallow(target);

        match channel {
            Some(channel) => channel.stop().await,
            None => {
                debug!("No session with {} to stop", target);
                Ok(())
            }
        }
    }
}

impl SignalingObserver for ClientCore {
    fn on_message(&self, message: &str, sender_id: &str) {
        if self.is_shut_down() {
            debug!("Session manager is shut down, dropping message from {}", sender_id);
            return;
        }
        if !self.authorization.is_allowed(sender_id) {
            warn!(
                "Chat cannot be set up since remote {} is not allowed",
                sender_id
            );
            metrics::increment_counter!("peerchat_signaling_unauthorized");
            return;
        }

        SignalingRouter::route(
            &self.channels,
            message,
            sender_id,
            || self.create_channel(sender_id),
            || !self.is_shut_down() && self.authorization.is_allowed(sender_id),
        );
    }

    fn on_server_disconnected(&self) {
        warn!("Signaling server disconnected");
        self.post_event(ClientEvent::ServerDisconnected);
    }
}

impl ChannelEventRelay for ClientCore {
    fn relay_channel_event(&self, channel: &Arc<SessionChannel>, event: EngineEvent) {
        let remote_id = channel.target().to_string();

        if matches!(event, EngineEvent::Stopped | EngineEvent::Denied)
            && self.channels.remove_if_same(&remote_id, channel)
        {
            info!("Session with {} ended, channel released", remote_id);
        }

        let event = match event {
            EngineEvent::Started => ClientEvent::ChatStarted { remote_id },
            EngineEvent::Stopped => ClientEvent::ChatStopped { remote_id },
            EngineEvent::Denied => ClientEvent::Denied { remote_id },
            EngineEvent::Data(message) => ClientEvent::DataReceived { remote_id, message },
            EngineEvent::StreamAdded(stream) => ClientEvent::StreamAdded(stream),
            EngineEvent::StreamRemoved(stream) => ClientEvent::StreamRemoved(stream),
        };
        self.post_event(event);
    }
}

impl Drop for ClientCore {
    fn drop(&mut self) {
        if !self.is_shut_down() && !self.channels.is_empty() {
            warn!(
                "Session manager dropped with {} live channels; call shutdown() first",
                self.channels.len()
            );
        }
    }
}

/// Peer-to-peer client.
///
/// Cloning is cheap and every clone drives the same sessions. Must be
/// created inside a Tokio runtime.
#[derive(Clone)]
pub struct SessionManager {
    core: Arc<ClientCore>,
}

impl SessionManager {
    pub fn new(
        client_config: ClientConfig,
        transport: Arc<dyn SignalingTransport>,
        engine_factory: Arc<dyn EngineFactory>,
    ) -> Self {
        let core = Arc::new_cyclic(|weak_self| ClientCore {
            client_config,
            transport: transport.clone(),
            engine_factory,
            authorization: AuthorizationRegistry::new(),
            channels: ChannelTable::new(),
            dispatcher: EventDispatcher::new(),
            observers: Arc::new(ObserverList::default()),
            local_id: Mutex::new(None),
            weak_self: weak_self.clone(),
            shut_down: AtomicBool::new(false),
        });

        let weak_core: Weak<ClientCore> = Arc::downgrade(&core);
        let observer: Weak<dyn SignalingObserver> = weak_core;
        transport.add_observer(observer);
        info!("Session manager created");

        Self { core }
    }

    /// Connect to the signaling server, returning the assigned local id
    pub async fn connect(&self, host: &str, token: &str) -> P2PResult<String> {
        let local_id = self.core.transport.connect(host, token).await?;
        info!("Connected to {} as {}", host, local_id);
        *self
            .core
            .local_id
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(local_id.clone());
        Ok(local_id)
    }

    pub async fn disconnect(&self) -> P2PResult<()> {
        self.core.transport.disconnect().await?;
        info!("Disconnected from signaling server");
        Ok(())
    }

    /// Authorize a remote; adding one twice is ignored
    pub fn add_allowed_remote_id(&self, target: &str) {
        self.core.authorization.allow(target);
    }

    /// Stop any session with `target` and deauthorize it
    pub async fn remove_allowed_remote_id(&self, target: &str) -> P2PResult<()> {
        if !self.core.authorization.is_allowed(target) {
            return Err(P2PError::RemoteNotExisted(target.to_string()));
        }
        self.core.stop(target).await
    }

    pub async fn publish(&self, target: &str, stream: &LocalStream) -> P2PResult<Publication> {
        let channel = self.core.authorized_channel(target)?;
        channel.publish(stream).await?;
        info!("Published stream {} to {}", stream.id(), target);

        Ok(Publication::new(
            Arc::downgrade(&self.core),
            Arc::downgrade(&channel),
            target,
            stream.clone(),
        ))
    }

    pub async fn unpublish(&self, target: &str, stream: &LocalStream) -> P2PResult<()> {
        let channel = self.core.existing_channel(target)?;
        channel.unpublish(stream).await
    }

    pub async fn send(&self, target: &str, message: &str) -> P2PResult<()> {
        let channel = self.core.authorized_channel(target)?;
        channel.send(message).await
    }

    /// End the session with `target`.
    ///
    /// The remote is always deauthorized; talking to it again needs a new
    /// [`add_allowed_remote_id`](Self::add_allowed_remote_id).
    pub async fn stop(&self, target: &str) -> P2PResult<()> {
        self.core.stop(target).await
    }

    pub async fn get_connection_stats(&self, target: &str) -> P2PResult<ConnectionStats> {
        let channel = self.core.existing_channel(target)?;
        channel.connection_stats().await
    }

    pub fn add_observer(&self, observer: Arc<dyn P2PClientObserver>) {
        self.core.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn P2PClientObserver>) {
        if !self.core.observers.remove(observer) {
            debug!("Removing an observer that was not registered");
        }
    }

    /// Queue ordered work behind every pending notification
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.core.dispatcher
    }

    /// Wait until every notification posted so far has been delivered
    pub async fn flush_events(&self) {
        self.core.dispatcher.flush().await;
    }

    pub fn is_allowed(&self, target: &str) -> bool {
        self.core.authorization.is_allowed(target)
    }

    pub fn allowed_remote_ids(&self) -> Vec<String> {
        self.core.authorization.allowed_ids()
    }

    pub fn has_channel(&self, target: &str) -> bool {
        self.core.channels.contains(target)
    }

    pub fn channel_state(&self, target: &str) -> Option<ChannelState> {
        self.core.channels.get(target).map(|channel| channel.state())
    }

    /// Remotes that currently have a channel
    pub fn active_remote_ids(&self) -> Vec<String> {
        self.core.channels.targets()
    }

    pub fn local_id(&self) -> Option<String> {
        self.core.local_id()
    }

    /// Stop every session and close the event dispatcher after it drains.
    ///
    /// Afterwards every operation that needs a channel fails with
    /// `SessionInactive` and inbound signaling is ignored.
    pub async fn shutdown(&self) {
        if self.core.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down session manager");

        for (target, channel) in self.core.channels.drain() {
            if let Err(e) = channel.stop().await {
                warn!("Failed to stop session with {}: {}", target, e);
            }
        }

        self.core.dispatcher.shutdown().await;
        info!("Session manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        EngineObserver, MockBehavior, MockEngineFactory, NegotiationEngine,
    };
    use crate::engine::protocol::CHAT_CLOSED;
    use crate::session::observer::EventForwarder;
    use crate::signaling::LoopbackHub;

    const INVITATION: &str = r#"{"type":"chat-invitation"}"#;

    /// Deauthorizes each remote while its engine is being built
    struct RevokingFactory {
        inner: MockEngineFactory,
        core: Mutex<Weak<ClientCore>>,
    }

    impl EngineFactory for RevokingFactory {
        fn create(
            &self,
            config: ChannelConfig,
            sender: Arc<dyn SignalingSender>,
            observer: Arc<dyn EngineObserver>,
        ) -> Arc<dyn NegotiationEngine> {
            if let Some(core) = self.core.lock().unwrap().upgrade() {
                core.authorization.disallow(&config.remote_id);
            }
            self.inner.create(config, sender, observer)
        }
    }

    struct Fixture {
        manager: SessionManager,
        factory: Arc<MockEngineFactory>,
        hub: LoopbackHub,
    }

    async fn fixture(behavior: MockBehavior) -> Fixture {
        let hub = LoopbackHub::new();
        let factory = Arc::new(MockEngineFactory::new(behavior));
        let manager = SessionManager::new(
            ClientConfig::default(),
            Arc::new(hub.endpoint("alice")),
            factory.clone(),
        );
        manager.connect("loopback", "").await.unwrap();
        Fixture {
            manager,
            factory,
            hub,
        }
    }

    #[tokio::test]
    async fn test_connect_records_local_id() {
        let f = fixture(MockBehavior::Succeed).await;
        assert_eq!(f.manager.local_id(), Some("alice".to_string()));
        assert_eq!(f.hub.connected_ids(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_unauthorized_publish_and_send() {
        let f = fixture(MockBehavior::Succeed).await;
        let stream = LocalStream::new("camera");

        let result = f.manager.publish("bob", &stream).await;
        assert!(matches!(result, Err(P2PError::RemoteNotAllowed(ref id)) if id == "bob"));
        let result = f.manager.send("bob", "hi").await;
        assert!(matches!(result, Err(P2PError::RemoteNotAllowed(_))));

        assert!(!f.manager.has_channel("bob"));
        assert_eq!(f.factory.created_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_unknown_remote_fails() {
        let f = fixture(MockBehavior::Succeed).await;
        f.manager.add_allowed_remote_id("carol");

        let result = f.manager.remove_allowed_remote_id("bob").await;
        assert!(matches!(result, Err(P2PError::RemoteNotExisted(_))));
        assert_eq!(f.manager.allowed_remote_ids(), vec!["carol".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_allowed_remote_stops_session() {
        let f = fixture(MockBehavior::Succeed).await;
        f.manager.add_allowed_remote_id("bob");
        f.manager.send("bob", "hello").await.unwrap();

        f.manager.remove_allowed_remote_id("bob").await.unwrap();
        assert!(!f.manager.is_allowed("bob"));
        assert!(!f.manager.has_channel("bob"));
        assert_eq!(f.factory.engine_for("bob").unwrap().stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_without_channel_deauthorizes() {
        let f = fixture(MockBehavior::Succeed).await;
        f.manager.add_allowed_remote_id("bob");
        f.manager.stop("bob").await.unwrap();
        assert!(!f.manager.is_allowed("bob"));
        assert_eq!(f.factory.created_count(), 0);
    }

    #[tokio::test]
    async fn test_unpublish_and_stats_need_channel() {
        let f = fixture(MockBehavior::Succeed).await;
        f.manager.add_allowed_remote_id("bob");
        let stream = LocalStream::new("camera");

        assert!(matches!(
            f.manager.unpublish("bob", &stream).await,
            Err(P2PError::SessionInactive(_))
        ));
        assert!(matches!(
            f.manager.get_connection_stats("bob").await,
            Err(P2PError::SessionInactive(_))
        ));

        f.manager.publish("bob", &stream).await.unwrap();
        let stats = f.manager.get_connection_stats("bob").await.unwrap();
        assert_eq!(stats.published_streams, 1);
        f.manager.unpublish("bob", &stream).await.unwrap();
    }

    #[tokio::test]
    async fn test_inbound_message_from_unauthorized_sender_dropped() {
        let f = fixture(MockBehavior::Succeed).await;
        f.manager.core.on_message(INVITATION, "mallory");
        assert!(!f.manager.has_channel("mallory"));
        assert_eq!(f.factory.created_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_close_recycles_channel() {
        let f = fixture(MockBehavior::Succeed).await;
        let (forwarder, mut events) = EventForwarder::new();
        f.manager.add_observer(forwarder);
        f.manager.add_allowed_remote_id("bob");

        f.manager.send("bob", "hello").await.unwrap();
        f.manager.core.on_message(CHAT_CLOSED, "bob");

        assert!(!f.manager.has_channel("bob"));
        assert!(f.manager.is_allowed("bob"));

        f.manager.flush_events().await;
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::ChatStarted {
                remote_id: "bob".to_string()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::ChatStopped {
                remote_id: "bob".to_string()
            }
        );

        f.manager.send("bob", "again").await.unwrap();
        assert_eq!(f.factory.created_for("bob"), 2);
    }

    #[tokio::test]
    async fn test_server_disconnect_is_relayed() {
        let f = fixture(MockBehavior::Succeed).await;
        let (forwarder, mut events) = EventForwarder::new();
        f.manager.add_observer(forwarder);

        f.hub.drop_endpoint("alice");
        let event = tokio::time::timeout(std::time::Duration::from_secs(1), events.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(ClientEvent::ServerDisconnected));
    }

    #[tokio::test]
    async fn test_removed_observer_not_notified() {
        let f = fixture(MockBehavior::Succeed).await;
        let (forwarder, mut events) = EventForwarder::new();
        let observer: Arc<dyn P2PClientObserver> = forwarder;
        f.manager.add_observer(observer.clone());
        f.manager.remove_observer(&observer);
        f.manager.remove_observer(&observer);

        f.manager.add_allowed_remote_id("bob");
        f.manager.send("bob", "hello").await.unwrap();
        f.manager.flush_events().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_sessions() {
        let f = fixture(MockBehavior::Succeed).await;
        let (forwarder, mut events) = EventForwarder::new();
        f.manager.add_observer(forwarder);
        for remote in ["bob", "carol"] {
            f.manager.add_allowed_remote_id(remote);
            f.manager.send(remote, "hello").await.unwrap();
        }

        f.manager.shutdown().await;
        assert!(f.manager.active_remote_ids().is_empty());
        assert!(f.manager.dispatcher().is_closed());

        let mut stopped = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ClientEvent::ChatStopped { remote_id } = event {
                stopped.push(remote_id);
            }
        }
        stopped.sort();
        assert_eq!(stopped, vec!["bob".to_string(), "carol".to_string()]);
    }

    #[tokio::test]
    async fn test_deauthorization_during_channel_creation_wins() {
        let hub = LoopbackHub::new();
        let factory = Arc::new(RevokingFactory {
            inner: MockEngineFactory::default(),
            core: Mutex::new(Weak::new()),
        });
        let manager = SessionManager::new(
            ClientConfig::default(),
            Arc::new(hub.endpoint("alice")),
            factory.clone(),
        );
        *factory.core.lock().unwrap() = Arc::downgrade(&manager.core);

        manager.add_allowed_remote_id("bob");
        manager.core.on_message(INVITATION, "bob");
        assert!(!manager.has_channel("bob"));
        let engine = factory.inner.engine_for("bob").unwrap();
        assert!(engine.received_messages().is_empty());

        manager.add_allowed_remote_id("bob");
        let result = manager.send("bob", "hello").await;
        assert!(matches!(result, Err(P2PError::RemoteNotAllowed(_))));
        assert!(!manager.has_channel("bob"));
        assert_eq!(factory.inner.created_count(), 2);
    }

    #[tokio::test]
    async fn test_operations_after_shutdown_are_refused() {
        let f = fixture(MockBehavior::Succeed).await;
        f.manager.shutdown().await;
        f.manager.add_allowed_remote_id("bob");
        let stream = LocalStream::new("camera");

        assert!(matches!(
            f.manager.send("bob", "hello").await,
            Err(P2PError::SessionInactive(_))
        ));
        assert!(matches!(
            f.manager.publish("bob", &stream).await,
            Err(P2PError::SessionInactive(_))
        ));
        assert!(matches!(
            f.manager.get_connection_stats("bob").await,
            Err(P2PError::SessionInactive(_))
        ));

        f.manager.core.on_message(INVITATION, "bob");
        assert!(!f.manager.has_channel("bob"));
        assert_eq!(f.factory.created_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_first_contact_leaves_channel_idle() {
        let f = fixture(MockBehavior::Succeed).await;
        f.manager.add_allowed_remote_id("bob");

        f.manager.core.on_message("garbage", "bob");
        assert_eq!(f.manager.channel_state("bob"), Some(ChannelState::Idle));

        f.manager.core.on_message(INVITATION, "bob");
        assert_eq!(f.manager.channel_state("bob"), Some(ChannelState::Negotiating));
    }
}
