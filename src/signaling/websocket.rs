//! WebSocket signaling client implementation

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use futures_util::sink::SinkExt;
use futures_util::stream::{SplitSink, SplitStream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, error, info, warn};

use super::types::{
    ConnectionStatus, InboundEnvelope, OutboundEnvelope, ServerFrame, ServerFrameKind,
    SignalingError, Welcome,
};
use super::{ObserverSet, SignalingObserver, SignalingTransport};
use crate::config::SignalingConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Signaling transport backed by a WebSocket relay server
pub struct WebSocketSignaling {
    settings: SignalingConfig,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    status_rx: watch::Receiver<ConnectionStatus>,
    sink: Arc<Mutex<Option<WsSink>>>,
    shutdown_tx: std::sync::Mutex<Option<mpsc::Sender<()>>>,
    observers: Arc<ObserverSet>,
}

impl WebSocketSignaling {
    /// Create a new, disconnected client
    pub fn new(settings: SignalingConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        Self {
            settings,
            status_tx: Arc::new(status_tx),
            status_rx,
            sink: Arc::new(Mutex::new(None)),
            shutdown_tx: std::sync::Mutex::new(None),
            observers: Arc::new(ObserverSet::default()),
        }
    }

    /// Get current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Check if currently connected
    pub fn is_connected(&self) -> bool {
        matches!(self.status(), ConnectionStatus::Connected)
    }

    fn build_url(host: &str, token: &str) -> String {
        if token.is_empty() {
            return host.to_string();
        }
        let separator = if host.contains('?') { '&' } else { '?' };
        format!("{}{}token={}", host, separator, token)
    }

    /// Open the socket, retrying with exponential backoff
    async fn open_with_backoff(&self, url: &str) -> Result<WsStream, SignalingError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(
                self.settings.reconnect_interval_ms.max(1),
            ))
            .with_max_elapsed_time(None)
            .build();
        let max_attempts = self.settings.max_connect_attempts.max(1);
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        backoff::future::retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match connect_async(url).await {
                Ok((ws_stream, _)) => Ok(ws_stream),
                Err(e) => {
                    let err = SignalingError::ConnectionError(format!(
                        "Failed to connect to {}: {}",
                        url, e
                    ));
                    if attempt >= max_attempts {
                        error!("Giving up after {} connection attempts: {}", attempt, err);
                        Err(backoff::Error::permanent(err))
                    } else {
                        warn!(
                            "Connection attempt {}/{} failed: {}",
                            attempt, max_attempts, err
                        );
                        Err(backoff::Error::transient(err))
                    }
                }
            }
        })
        .await
    }

    /// Wait for the server greeting that carries our id
    async fn await_welcome(stream: &mut SplitStream<WsStream>) -> Result<String, SignalingError> {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match Self::parse_frame(&text)? {
                    ServerFrame::Welcome(welcome) => return Ok(welcome.id),
                    ServerFrame::Message(envelope) => {
                        warn!(
                            "Dropping message from {} received before welcome",
                            envelope.from
                        );
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(SignalingError::ConnectionError(
                        "Connection closed before welcome".to_string(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(SignalingError::ConnectionError(e.to_string())),
            }
        }
    }

    /// Classify frame based on its fields
    fn classify_frame(value: &serde_json::Value) -> Option<ServerFrameKind> {
        if value.get("type").and_then(|v| v.as_str()) == Some("welcome") {
            return Some(ServerFrameKind::Welcome);
        }
        if value.get("from").is_some() && value.get("data").is_some() {
            return Some(ServerFrameKind::Message);
        }
        None
    }

    /// Decode a text frame from the server
    fn parse_frame(text: &str) -> Result<ServerFrame, SignalingError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SignalingError::ParseError(format!("Failed to parse JSON: {}", e)))?;

        match Self::classify_frame(&value) {
            Some(ServerFrameKind::Welcome) => {
                let welcome: Welcome = serde_json::from_value(value)?;
                Ok(ServerFrame::Welcome(welcome))
            }
            Some(ServerFrameKind::Message) => {
                let envelope: InboundEnvelope = serde_json::from_value(value)?;
                Ok(ServerFrame::Message(envelope))
            }
            None => Err(SignalingError::ParseError(format!(
                "Unrecognized frame: {}",
                text
            ))),
        }
    }

    fn spawn_reader(&self, mut stream: SplitStream<WsStream>, mut shutdown_rx: mpsc::Receiver<()>) {
        let observers = self.observers.clone();
        let status_tx = self.status_tx.clone();
        let sink = self.sink.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = stream.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => match Self::parse_frame(&text) {
                                Ok(ServerFrame::Message(envelope)) => {
                                    debug!("Signaling message from {}", envelope.from);
                                    observers.message(&envelope.data, &envelope.from);
                                }
                                Ok(ServerFrame::Welcome(_)) => {
                                    debug!("Ignoring repeated welcome frame");
                                }
                                Err(e) => {
                                    warn!("Dropping signaling frame: {}", e);
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Signaling connection closed by server");
                                sink.lock().await.take();
                                status_tx.send_replace(ConnectionStatus::Disconnected);
                                observers.server_disconnected();
                                break;
                            }
                            Some(Ok(_)) => {
                                debug!("Ignoring non-text signaling frame");
                            }
                            Some(Err(e)) => {
                                let error_msg = format!("Signaling socket error: {}", e);
                                error!("{}", error_msg);
                                sink.lock().await.take();
                                status_tx.send_replace(ConnectionStatus::Error(error_msg));
                                observers.server_disconnected();
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Signaling reader received shutdown signal");
                        break;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl SignalingTransport for WebSocketSignaling {
    async fn connect(&self, host: &str, token: &str) -> Result<String, SignalingError> {
        if self.is_connected() {
            return Err(SignalingError::ConnectionError(
                "Already connected".to_string(),
            ));
        }

        let url = Self::build_url(host, token);
        self.status_tx.send_replace(ConnectionStatus::Connecting);

        let ws_stream = match self.open_with_backoff(&url).await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                self.status_tx
                    .send_replace(ConnectionStatus::Error(e.to_string()));
                return Err(e);
            }
        };

        let (sink, mut stream) = ws_stream.split();
        let welcome_timeout = Duration::from_secs(self.settings.connect_timeout_secs.max(1));
        let local_id =
            match tokio::time::timeout(welcome_timeout, Self::await_welcome(&mut stream)).await {
                Ok(Ok(local_id)) => local_id,
                Ok(Err(e)) => {
                    self.status_tx
                        .send_replace(ConnectionStatus::Error(e.to_string()));
                    return Err(e);
                }
                Err(_) => {
                    let e = SignalingError::ConnectionError(
                        "Timed out waiting for welcome".to_string(),
                    );
                    self.status_tx
                        .send_replace(ConnectionStatus::Error(e.to_string()));
                    return Err(e);
                }
            };

        *self.sink.lock().await = Some(sink);

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        *self.shutdown_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(shutdown_tx);

        self.status_tx.send_replace(ConnectionStatus::Connected);
        self.spawn_reader(stream, shutdown_rx);

        info!("Connected to signaling server at {} as {}", host, local_id);
        Ok(local_id)
    }

    async fn disconnect(&self) -> Result<(), SignalingError> {
        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(shutdown_tx) = shutdown_tx {
            if let Err(e) = shutdown_tx.try_send(()) {
                warn!("Failed to send shutdown signal: {}", e);
            }
        }

        if let Some(mut ws) = self.sink.lock().await.take() {
            if let Err(e) = ws.close().await {
                warn!("Error closing signaling connection: {}", e);
            }
        }

        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        info!("Disconnected from signaling server");
        Ok(())
    }

    async fn send_message(&self, message: &str, target_id: &str) -> Result<(), SignalingError> {
        let frame = serde_json::to_string(&OutboundEnvelope::new(target_id, message))?;

        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(ws) => ws
                .send(Message::Text(frame))
                .await
                .map_err(|e| SignalingError::MessageError(e.to_string())),
            None => Err(SignalingError::NotConnected),
        }
    }

    fn add_observer(&self, observer: Weak<dyn SignalingObserver>) {
        self.observers.add(observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SignalingConfig {
        SignalingConfig {
            max_connect_attempts: 1,
            reconnect_interval_ms: 10,
            ..SignalingConfig::default()
        }
    }

    #[test]
    fn test_websocket_creation() {
        let ws = WebSocketSignaling::new(settings());
        assert_eq!(ws.status(), ConnectionStatus::Disconnected);
        assert!(!ws.is_connected());
    }

    #[test]
    fn test_build_url() {
        assert_eq!(
            WebSocketSignaling::build_url("ws://host/ws", ""),
            "ws://host/ws"
        );
        assert_eq!(
            WebSocketSignaling::build_url("ws://host/ws", "abc"),
            "ws://host/ws?token=abc"
        );
        assert_eq!(
            WebSocketSignaling::build_url("ws://host/ws?v=1", "abc"),
            "ws://host/ws?v=1&token=abc"
        );
    }

    #[test]
    fn test_parse_welcome_frame() {
        let frame = WebSocketSignaling::parse_frame(r#"{"type":"welcome","id":"alice"}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Welcome(Welcome {
                id: "alice".to_string()
            })
        );
    }

    #[test]
    fn test_parse_message_frame() {
        let frame =
            WebSocketSignaling::parse_frame(r#"{"from":"bob","data":"{\"type\":\"chat-closed\"}"}"#)
                .unwrap();
        match frame {
            ServerFrame::Message(envelope) => {
                assert_eq!(envelope.from, "bob");
                assert_eq!(envelope.data, r#"{"type":"chat-closed"}"#);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_classify_unknown_frame() {
        let value = serde_json::json!({ "method": "PING" });
        assert_eq!(WebSocketSignaling::classify_frame(&value), None);
        assert!(WebSocketSignaling::parse_frame("not json").is_err());
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let ws = WebSocketSignaling::new(settings());
        let result = ws.send_message("hello", "bob").await;
        assert!(matches!(result, Err(SignalingError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_status() {
        let ws = WebSocketSignaling::new(settings());
        let result = ws.connect("ws://127.0.0.1:1", "token").await;
        assert!(result.is_err());
        assert!(matches!(ws.status(), ConnectionStatus::Error(_)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let ws = WebSocketSignaling::new(settings());
        ws.disconnect().await.unwrap();
        ws.disconnect().await.unwrap();
        assert_eq!(ws.status(), ConnectionStatus::Disconnected);
    }
}
