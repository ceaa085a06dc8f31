//! In-process signaling transport
//! Used for tests and the demo command where no relay server is available

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::types::SignalingError;
use super::{ObserverSet, SignalingObserver, SignalingTransport};

enum HubFrame {
    Message { from: String, data: String },
    ServerDisconnected,
}

/// Routes signaling payloads between endpoints registered in the same process
#[derive(Clone, Default)]
pub struct LoopbackHub {
    endpoints: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<HubFrame>>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that will connect under `id`
    pub fn endpoint(&self, id: impl Into<String>) -> LoopbackSignaling {
        LoopbackSignaling {
            hub: self.clone(),
            id: id.into(),
            observers: Arc::new(ObserverSet::default()),
            connected: Arc::new(AtomicBool::new(false)),
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Ids of currently connected endpoints
    pub fn connected_ids(&self) -> Vec<String> {
        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = endpoints.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Kick an endpoint off the hub as if the server went away
    pub fn drop_endpoint(&self, id: &str) -> bool {
        let removed = self
            .endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        match removed {
            Some(tx) => {
                let _ = tx.send(HubFrame::ServerDisconnected);
                info!("Loopback hub dropped endpoint {}", id);
                true
            }
            None => false,
        }
    }

    fn register(&self, id: &str, tx: mpsc::UnboundedSender<HubFrame>) -> Result<(), SignalingError> {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        if endpoints.contains_key(id) {
            return Err(SignalingError::ConnectionError(format!(
                "Endpoint {} already connected",
                id
            )));
        }
        endpoints.insert(id.to_string(), tx);
        Ok(())
    }

    fn unregister(&self, id: &str) {
        self.endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    fn deliver(&self, from: &str, to: &str, data: &str) -> Result<(), SignalingError> {
        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        let tx = endpoints
            .get(to)
            .ok_or_else(|| SignalingError::UnknownRemote(to.to_string()))?;
        tx.send(HubFrame::Message {
            from: from.to_string(),
            data: data.to_string(),
        })
        .map_err(|_| SignalingError::UnknownRemote(to.to_string()))
    }
}

/// One endpoint attached to a [`LoopbackHub`]
pub struct LoopbackSignaling {
    hub: LoopbackHub,
    id: String,
    observers: Arc<ObserverSet>,
    connected: Arc<AtomicBool>,
    messages_sent: AtomicU64,
}

impl LoopbackSignaling {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingTransport for LoopbackSignaling {
    async fn connect(&self, _host: &str, _token: &str) -> Result<String, SignalingError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.hub.register(&self.id, tx)?;
        self.connected.store(true, Ordering::SeqCst);

        let observers = self.observers.clone();
        let connected = self.connected.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                match frame {
                    HubFrame::Message { from, data } => {
                        debug!("Loopback delivering message from {} to {}", from, id);
                        observers.message(&data, &from);
                    }
                    HubFrame::ServerDisconnected => {
                        connected.store(false, Ordering::SeqCst);
                        observers.server_disconnected();
                        break;
                    }
                }
            }
            debug!("Loopback delivery loop for {} finished", id);
        });

        info!("Loopback endpoint {} connected", self.id);
        Ok(self.id.clone())
    }

    async fn disconnect(&self) -> Result<(), SignalingError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            warn!("Loopback endpoint {} was not connected", self.id);
            return Ok(());
        }
        self.hub.unregister(&self.id);
        info!("Loopback endpoint {} disconnected", self.id);
        Ok(())
    }

    async fn send_message(&self, message: &str, target_id: &str) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }
        self.hub.deliver(&self.id, target_id, message)?;
        self.messages_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn add_observer(&self, observer: Weak<dyn SignalingObserver>) {
        self.observers.add(observer);
    }
}
