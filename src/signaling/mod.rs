//! Signaling transport integration module
//!
//! The session layer only needs a bidirectional message channel keyed by remote
//! id. Concrete transports live here: a WebSocket client for real servers and an
//! in-process loopback hub for tests and demos.

pub mod loopback;
pub mod types;
pub mod websocket;

use std::sync::{Mutex, Weak};

use async_trait::async_trait;

pub use loopback::{LoopbackHub, LoopbackSignaling};
pub use types::{ConnectionStatus, SignalingError};
pub use websocket::WebSocketSignaling;

/// Receives inbound traffic from a signaling transport.
///
/// Transports call these from their own tasks, never from inside a caller's
/// `connect`/`send_message` future.
pub trait SignalingObserver: Send + Sync {
    fn on_message(&self, message: &str, sender_id: &str);
    fn on_server_disconnected(&self);
}

/// Bidirectional message channel to the signaling server
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Connect and return the local id assigned by the server
    async fn connect(&self, host: &str, token: &str) -> Result<String, SignalingError>;

    async fn disconnect(&self) -> Result<(), SignalingError>;

    async fn send_message(&self, message: &str, target_id: &str) -> Result<(), SignalingError>;

    /// Register a non-owning observer for inbound messages
    fn add_observer(&self, observer: Weak<dyn SignalingObserver>);
}

/// Observer registry shared by the concrete transports
#[derive(Default)]
pub(crate) struct ObserverSet {
    observers: Mutex<Vec<Weak<dyn SignalingObserver>>>,
}

impl ObserverSet {
    pub(crate) fn add(&self, observer: Weak<dyn SignalingObserver>) {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        observers.retain(|o| o.strong_count() > 0);
        observers.push(observer);
    }

    fn live(&self) -> Vec<std::sync::Arc<dyn SignalingObserver>> {
        let observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        observers.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn message(&self, message: &str, sender_id: &str) {
        for observer in self.live() {
            observer.on_message(message, sender_id);
        }
    }

    pub(crate) fn server_disconnected(&self) {
        for observer in self.live() {
            observer.on_server_disconnected();
        }
    }
}
