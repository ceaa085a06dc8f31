//! Signaling-only chat engine
//!
//! Negotiates a session with a three-message handshake
//! (`chat-invitation` / `chat-accepted` or `chat-denied`) and then carries
//! application data and stream announcements as signaling payloads. Incoming
//! invitations are accepted automatically; authorization happens before a
//! payload ever reaches an engine.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::protocol::ChatMessage;
use super::{
    ChannelConfig, ConnectionStats, EngineEvent, EngineFactory, EngineObserver, NegotiationEngine,
    SignalingSender,
};
use crate::error::{P2PError, P2PResult};
use crate::stream::{LocalStream, RemoteStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatPhase {
    Idle,
    Inviting,
    Connected,
    Closed,
    Denied,
}

#[derive(Debug, Default)]
struct Counters {
    messages_sent: u64,
    messages_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
}

/// Engine for one remote endpoint
pub struct ChatEngine {
    config: ChannelConfig,
    sender: Arc<dyn SignalingSender>,
    observer: Arc<dyn EngineObserver>,
    phase_tx: watch::Sender<ChatPhase>,
    published: Mutex<HashSet<String>>,
    remote_streams: Mutex<HashMap<String, RemoteStream>>,
    counters: Mutex<Counters>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl ChatEngine {
    pub fn new(
        config: ChannelConfig,
        sender: Arc<dyn SignalingSender>,
        observer: Arc<dyn EngineObserver>,
    ) -> Self {
        let (phase_tx, _) = watch::channel(ChatPhase::Idle);

        Self {
            config,
            sender,
            observer,
            phase_tx,
            published: Mutex::new(HashSet::new()),
            remote_streams: Mutex::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
            started_at: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == ChatPhase::Connected
    }

    fn phase(&self) -> ChatPhase {
        *self.phase_tx.borrow()
    }

    fn closed_error(&self) -> P2PError {
        P2PError::SessionClosed(self.config.remote_id.clone())
    }

    async fn transmit(&self, message: &ChatMessage) -> P2PResult<()> {
        let payload = message.encode()?;
        self.sender
            .send_signaling_message(&payload, &self.config.remote_id)
            .await
    }

    /// Send without blocking the inbound path
    fn spawn_transmit(&self, message: ChatMessage) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode chat message: {}", e);
                return;
            }
        };
        let sender = self.sender.clone();
        let remote_id = self.config.remote_id.clone();
        tokio::spawn(async move {
            if let Err(e) = sender.send_signaling_message(&payload, &remote_id).await {
                warn!("Failed to send chat message to {}: {}", remote_id, e);
            }
        });
    }

    fn mark_started(&self) {
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        info!("Chat with {} started", self.config.remote_id);
        self.observer.on_engine_event(EngineEvent::Started);
    }

    fn clear_remote_streams(&self) {
        let streams: Vec<RemoteStream> = self
            .remote_streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, stream)| stream)
            .collect();
        for stream in streams {
            self.observer.on_engine_event(EngineEvent::StreamRemoved(stream));
        }
    }

    /// Invite the remote if nobody has yet, then wait for the outcome
    async fn ensure_connected(&self) -> P2PResult<()> {
        let invite = self.phase_tx.send_if_modified(|phase| {
            if *phase == ChatPhase::Idle {
                *phase = ChatPhase::Inviting;
                true
            } else {
                false
            }
        });

        if invite {
            debug!("Inviting {} to chat", self.config.remote_id);
            if let Err(e) = self.transmit(&ChatMessage::ChatInvitation).await {
                self.phase_tx.send_if_modified(|phase| {
                    if *phase == ChatPhase::Inviting {
                        *phase = ChatPhase::Idle;
                        true
                    } else {
                        false
                    }
                });
                return Err(e);
            }
        }

        let mut phase_rx = self.phase_tx.subscribe();
        let phase = match phase_rx
            .wait_for(|phase| *phase != ChatPhase::Inviting)
            .await
        {
            Ok(phase) => *phase,
            Err(_) => return Err(self.closed_error()),
        };

        match phase {
            ChatPhase::Connected => Ok(()),
            ChatPhase::Idle => Err(P2PError::Negotiation(format!(
                "Invitation to {} was withdrawn",
                self.config.remote_id
            ))),
            ChatPhase::Closed | ChatPhase::Denied | ChatPhase::Inviting => Err(self.closed_error()),
        }
    }

    fn require_connected(&self, what: &str) -> P2PResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(P2PError::Negotiation(format!(
                "{} from {} before chat started",
                what, self.config.remote_id
            )))
        }
    }
}

#[async_trait]
impl NegotiationEngine for ChatEngine {
    async fn publish(&self, stream: &LocalStream) -> P2PResult<()> {
        self.ensure_connected().await?;

        if self
            .published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(stream.id())
        {
            debug!("Stream {} already published to {}", stream.id(), self.config.remote_id);
            return Ok(());
        }

        self.transmit(&ChatMessage::StreamPublished {
            id: stream.id().to_string(),
            label: stream.label().to_string(),
        })
        .await?;

        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(stream.id().to_string());
        info!("Published stream {} to {}", stream.id(), self.config.remote_id);
        Ok(())
    }

    async fn unpublish(&self, stream: &LocalStream) -> P2PResult<()> {
        if !self
            .published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(stream.id())
        {
            debug!("Stream {} was not published to {}", stream.id(), self.config.remote_id);
            return Ok(());
        }

        self.transmit(&ChatMessage::StreamUnpublished {
            id: stream.id().to_string(),
        })
        .await?;

        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(stream.id());
        info!("Unpublished stream {} from {}", stream.id(), self.config.remote_id);
        Ok(())
    }

    async fn send(&self, message: &str) -> P2PResult<()> {
        self.ensure_connected().await?;

        self.transmit(&ChatMessage::ChatData {
            data: message.to_string(),
        })
        .await?;

        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.messages_sent += 1;
        counters.bytes_sent += message.len() as u64;
        Ok(())
    }

    async fn stop(&self) -> P2PResult<()> {
        let previous = self.phase_tx.send_replace(ChatPhase::Closed);

        match previous {
            ChatPhase::Inviting | ChatPhase::Connected => {
                if let Err(e) = self.transmit(&ChatMessage::ChatClosed).await {
                    warn!(
                        "Failed to notify {} that the chat closed: {}",
                        self.config.remote_id, e
                    );
                }
                self.clear_remote_streams();
                info!("Chat with {} stopped", self.config.remote_id);
                self.observer.on_engine_event(EngineEvent::Stopped);
            }
            ChatPhase::Idle => {
                debug!("Stopping idle chat with {}", self.config.remote_id);
            }
            ChatPhase::Closed | ChatPhase::Denied => {
                debug!("Chat with {} already finished", self.config.remote_id);
            }
        }

        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    async fn connection_stats(&self) -> P2PResult<ConnectionStats> {
        if !self.is_connected() {
            return Err(P2PError::SessionInactive(self.config.remote_id.clone()));
        }

        let mut stats = ConnectionStats::new(self.config.remote_id.clone());
        stats.started_at = *self.started_at.lock().unwrap_or_else(|e| e.into_inner());
        {
            let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            stats.messages_sent = counters.messages_sent;
            stats.messages_received = counters.messages_received;
            stats.bytes_sent = counters.bytes_sent;
            stats.bytes_received = counters.bytes_received;
        }
        stats.published_streams = self
            .published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        stats.remote_streams = self
            .remote_streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        Ok(stats)
    }

    fn on_signaling_message(&self, message: &str) -> P2PResult<()> {
        let message = ChatMessage::parse(message)?;
        debug!("Chat message from {}: {:?}", self.config.remote_id, message);

        match message {
            ChatMessage::ChatInvitation => {
                let mut previous = ChatPhase::Idle;
                let accepted = self.phase_tx.send_if_modified(|phase| {
                    previous = *phase;
                    if matches!(*phase, ChatPhase::Idle | ChatPhase::Inviting) {
                        *phase = ChatPhase::Connected;
                        true
                    } else {
                        false
                    }
                });
                if matches!(previous, ChatPhase::Closed | ChatPhase::Denied) {
                    return Err(self.closed_error());
                }
                self.spawn_transmit(ChatMessage::ChatAccepted);
                if accepted {
                    self.mark_started();
                }
            }
            ChatMessage::ChatAccepted => {
                let started = self.phase_tx.send_if_modified(|phase| {
                    if *phase == ChatPhase::Inviting {
                        *phase = ChatPhase::Connected;
                        true
                    } else {
                        false
                    }
                });
                if started {
                    self.mark_started();
                } else {
                    debug!("Ignoring acceptance from {}", self.config.remote_id);
                }
            }
            ChatMessage::ChatDenied => {
                let denied = self.phase_tx.send_if_modified(|phase| {
                    if *phase == ChatPhase::Inviting {
                        *phase = ChatPhase::Denied;
                        true
                    } else {
                        false
                    }
                });
                if denied {
                    info!("Chat invitation denied by {}", self.config.remote_id);
                    self.observer.on_engine_event(EngineEvent::Denied);
                }
            }
            ChatMessage::ChatClosed => {
                let closed = self.phase_tx.send_if_modified(|phase| {
                    if matches!(*phase, ChatPhase::Inviting | ChatPhase::Connected) {
                        *phase = ChatPhase::Closed;
                        true
                    } else {
                        false
                    }
                });
                if closed {
                    self.clear_remote_streams();
                    info!("Chat closed by {}", self.config.remote_id);
                    self.observer.on_engine_event(EngineEvent::Stopped);
                }
            }
            ChatMessage::ChatData { data } => {
                self.require_connected("Data")?;
                {
                    let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
                    counters.messages_received += 1;
                    counters.bytes_received += data.len() as u64;
                }
                self.observer.on_engine_event(EngineEvent::Data(data));
            }
            ChatMessage::StreamPublished { id, label } => {
                self.require_connected("Stream")?;
                let stream = RemoteStream::new(id.clone(), self.config.remote_id.clone(), label);
                let added = self
                    .remote_streams
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(id, stream.clone())
                    .is_none();
                if added {
                    self.observer.on_engine_event(EngineEvent::StreamAdded(stream));
                }
            }
            ChatMessage::StreamUnpublished { id } => {
                let removed = self
                    .remote_streams
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                if let Some(stream) = removed {
                    self.observer.on_engine_event(EngineEvent::StreamRemoved(stream));
                }
            }
        }

        Ok(())
    }
}

/// Creates a [`ChatEngine`] per channel
#[derive(Debug, Default, Clone)]
pub struct ChatEngineFactory;

impl EngineFactory for ChatEngineFactory {
    fn create(
        &self,
        config: ChannelConfig,
        sender: Arc<dyn SignalingSender>,
        observer: Arc<dyn EngineObserver>,
    ) -> Arc<dyn NegotiationEngine> {
        debug!(
            "Creating chat engine {} -> {} ({} ICE servers, {:?} candidates)",
            config.local_id,
            config.remote_id,
            config.ice_servers.len(),
            config.candidate_network_policy
        );
        Arc::new(ChatEngine::new(config, sender, observer))
    }
}
