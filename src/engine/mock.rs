//! Mock negotiation engine
//! Used for testing the session layer without a real remote peer

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::protocol::is_chat_closed;
use super::{
    ChannelConfig, ConnectionStats, EngineEvent, EngineFactory, EngineObserver, NegotiationEngine,
    SignalingSender,
};
use crate::error::{P2PError, P2PResult};
use crate::stream::LocalStream;

/// How mock operations complete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MockBehavior {
    /// Complete after yielding once; the first success reports `Started`
    #[default]
    Succeed,
    /// Fail with a negotiation error
    Fail,
    /// Never complete
    Hang,
}

/// Scriptable engine that records what the session layer asked of it
pub struct MockEngine {
    remote_id: String,
    behavior: Mutex<MockBehavior>,
    observer: Arc<dyn EngineObserver>,
    started: AtomicBool,
    stopped: AtomicBool,
    stop_calls: AtomicUsize,
    received: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
    published: Mutex<Vec<String>>,
}

impl MockEngine {
    fn new(remote_id: String, behavior: MockBehavior, observer: Arc<dyn EngineObserver>) -> Self {
        Self {
            remote_id,
            behavior: Mutex::new(behavior),
            observer,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
    }

    /// Raise a lifecycle event as if the remote caused it
    pub fn emit(&self, event: EngineEvent) {
        if event == EngineEvent::Started {
            self.started.store(true, Ordering::SeqCst);
        }
        self.observer.on_engine_event(event);
    }

    /// Signaling payloads fed into this engine, in arrival order
    pub fn received_messages(&self) -> Vec<String> {
        self.received.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn published_streams(&self) -> Vec<String> {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    async fn complete(&self) -> P2PResult<()> {
        tokio::task::yield_now().await;
        let behavior = *self.behavior.lock().unwrap_or_else(|e| e.into_inner());
        match behavior {
            MockBehavior::Succeed => {
                if !self.started.swap(true, Ordering::SeqCst) {
                    self.observer.on_engine_event(EngineEvent::Started);
                }
                Ok(())
            }
            MockBehavior::Fail => Err(P2PError::Negotiation("mock engine failure".to_string())),
            MockBehavior::Hang => std::future::pending().await,
        }
    }

    fn finish(&self) {
        if self.started.load(Ordering::SeqCst) && !self.stopped.swap(true, Ordering::SeqCst) {
            self.observer.on_engine_event(EngineEvent::Stopped);
        }
    }
}

#[async_trait]
impl NegotiationEngine for MockEngine {
    async fn publish(&self, stream: &LocalStream) -> P2PResult<()> {
        self.complete().await?;
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(stream.id().to_string());
        Ok(())
    }

    async fn unpublish(&self, stream: &LocalStream) -> P2PResult<()> {
        tokio::task::yield_now().await;
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|id| id != stream.id());
        Ok(())
    }

    async fn send(&self, message: &str) -> P2PResult<()> {
        self.complete().await?;
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
        Ok(())
    }

    async fn stop(&self) -> P2PResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.finish();
        Ok(())
    }

    async fn connection_stats(&self) -> P2PResult<ConnectionStats> {
        let mut stats = ConnectionStats::new(self.remote_id.clone());
        stats.messages_sent = self.sent_messages().len() as u64;
        stats.messages_received = self.received_messages().len() as u64;
        stats.published_streams = self.published_streams().len();
        Ok(stats)
    }

    fn on_signaling_message(&self, message: &str) -> P2PResult<()> {
        serde_json::from_str::<serde_json::Value>(message)
            .map_err(|e| P2PError::InvalidMessage(e.to_string()))?;
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
        if is_chat_closed(message) {
            self.finish();
        }
        Ok(())
    }
}

/// Factory that keeps every engine it creates for later inspection
#[derive(Default)]
pub struct MockEngineFactory {
    behavior: MockBehavior,
    created: AtomicUsize,
    engines: Mutex<Vec<Arc<MockEngine>>>,
}

impl MockEngineFactory {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    /// Number of engines created so far
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of engines created for one remote
    pub fn created_for(&self, remote_id: &str) -> usize {
        self.engines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|engine| engine.remote_id == remote_id)
            .count()
    }

    /// Most recently created engine for `remote_id`
    pub fn engine_for(&self, remote_id: &str) -> Option<Arc<MockEngine>> {
        self.engines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|engine| engine.remote_id == remote_id)
            .cloned()
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(
        &self,
        config: ChannelConfig,
        _sender: Arc<dyn SignalingSender>,
        observer: Arc<dyn EngineObserver>,
    ) -> Arc<dyn NegotiationEngine> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let engine = Arc::new(MockEngine::new(config.remote_id, self.behavior, observer));
        self.engines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(engine.clone());
        engine
    }
}
