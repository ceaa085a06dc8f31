//! Application-facing observer interface

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use crate::stream::RemoteStream;

/// Notifications delivered to the application.
///
/// All callbacks run on the client's event dispatcher, one at a time and in
/// the order the underlying events were posted.
pub trait P2PClientObserver: Send + Sync {
    fn on_server_disconnected(&self) {}

    fn on_chat_started(&self, _remote_id: &str) {}

    fn on_chat_stopped(&self, _remote_id: &str) {}

    fn on_denied(&self, _remote_id: &str) {}

    fn on_data_received(&self, _remote_id: &str, _message: &str) {}

    fn on_stream_added(&self, _stream: &RemoteStream) {}

    fn on_stream_removed(&self, _stream: &RemoteStream) {}
}

/// One notification, detached from any observer
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ServerDisconnected,
    ChatStarted { remote_id: String },
    ChatStopped { remote_id: String },
    Denied { remote_id: String },
    DataReceived { remote_id: String, message: String },
    StreamAdded(RemoteStream),
    StreamRemoved(RemoteStream),
}

impl ClientEvent {
    /// Invoke the matching callback on `observer`
    pub fn deliver(&self, observer: &dyn P2PClientObserver) {
        match self {
            ClientEvent::ServerDisconnected => observer.on_server_disconnected(),
            ClientEvent::ChatStarted { remote_id } => observer.on_chat_started(remote_id),
            ClientEvent::ChatStopped { remote_id } => observer.on_chat_stopped(remote_id),
            ClientEvent::Denied { remote_id } => observer.on_denied(remote_id),
            ClientEvent::DataReceived { remote_id, message } => {
                observer.on_data_received(remote_id, message)
            }
            ClientEvent::StreamAdded(stream) => observer.on_stream_added(stream),
            ClientEvent::StreamRemoved(stream) => observer.on_stream_removed(stream),
        }
    }

    pub fn remote_id(&self) -> Option<&str> {
        match self {
            ClientEvent::ServerDisconnected => None,
            ClientEvent::ChatStarted { remote_id }
            | ClientEvent::ChatStopped { remote_id }
            | ClientEvent::Denied { remote_id }
            | ClientEvent::DataReceived { remote_id, .. } => Some(remote_id),
            ClientEvent::StreamAdded(stream) | ClientEvent::StreamRemoved(stream) => {
                Some(&stream.origin)
            }
        }
    }
}

/// Registered observers, compared by identity
#[derive(Default)]
pub(crate) struct ObserverList {
    observers: Mutex<Vec<Arc<dyn P2PClientObserver>>>,
}

fn same_observer(a: &Arc<dyn P2PClientObserver>, b: &Arc<dyn P2PClientObserver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl ObserverList {
    /// Register `observer`; adding the same instance twice is ignored
    pub(crate) fn add(&self, observer: Arc<dyn P2PClientObserver>) {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        if observers.iter().any(|o| same_observer(o, &observer)) {
            debug!("Observer already registered");
            return;
        }
        observers.push(observer);
    }

    /// Unregister `observer`; unknown observers are ignored
    pub(crate) fn remove(&self, observer: &Arc<dyn P2PClientObserver>) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        let before = observers.len();
        observers.retain(|o| !same_observer(o, observer));
        before != observers.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn P2PClientObserver>> {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Observer that forwards every notification into a channel
pub struct EventForwarder {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventForwarder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn forward(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

impl P2PClientObserver for EventForwarder {
    fn on_server_disconnected(&self) {
        self.forward(ClientEvent::ServerDisconnected);
    }

    fn on_chat_started(&self, remote_id: &str) {
        self.forward(ClientEvent::ChatStarted {
            remote_id: remote_id.to_string(),
        });
    }

    fn on_chat_stopped(&self, remote_id: &str) {
        self.forward(ClientEvent::ChatStopped {
            remote_id: remote_id.to_string(),
        });
    }

    fn on_denied(&self, remote_id: &str) {
        self.forward(ClientEvent::Denied {
            remote_id: remote_id.to_string(),
        });
    }

    fn on_data_received(&self, remote_id: &str, message: &str) {
        self.forward(ClientEvent::DataReceived {
            remote_id: remote_id.to_string(),
            message: message.to_string(),
        });
    }

    fn on_stream_added(&self, stream: &RemoteStream) {
        self.forward(ClientEvent::StreamAdded(stream.clone()));
    }

    fn on_stream_removed(&self, stream: &RemoteStream) {
        self.forward(ClientEvent::StreamRemoved(stream.clone()));
    }
}
