//! Handle for one published stream

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, info};

use super::channel::SessionChannel;
use super::session_manager::ClientCore;
use crate::engine::ConnectionStats;
use crate::error::{P2PError, P2PResult};
use crate::stream::LocalStream;

/// A stream published to one remote.
///
/// Holds no ownership of the session. Once the session is stopped, replaced
/// or the manager is gone, every operation fails with
/// [`P2PError::SessionInactive`] and the handle stays inert.
pub struct Publication {
    manager: Weak<ClientCore>,
    channel: Weak<SessionChannel>,
    target: String,
    stream: LocalStream,
    active: AtomicBool,
}

impl Publication {
    pub(crate) fn new(
        manager: Weak<ClientCore>,
        channel: Weak<SessionChannel>,
        target: impl Into<String>,
        stream: LocalStream,
    ) -> Self {
        Self {
            manager,
            channel,
            target: target.into(),
            stream,
            active: AtomicBool::new(true),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn stream(&self) -> &LocalStream {
        &self.stream
    }

    pub fn is_active(&self) -> bool {
        self.live_channel().is_ok()
    }

    fn inactive(&self) -> P2PError {
        self.active.store(false, Ordering::SeqCst);
        P2PError::SessionInactive(self.target.clone())
    }

    /// The session this publication belongs to, if it is still current
    fn live_channel(&self) -> P2PResult<Arc<SessionChannel>> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(P2PError::SessionInactive(self.target.clone()));
        }
        let Some(manager) = self.manager.upgrade() else {
            debug!("Publication to {}: manager is gone", self.target);
            return Err(self.inactive());
        };
        let Some(channel) = self.channel.upgrade() else {
            return Err(self.inactive());
        };
        if channel.state().is_terminal() || !manager.is_current_channel(&self.target, &channel) {
            return Err(self.inactive());
        }
        Ok(channel)
    }

    /// Unpublish the stream; the handle is inert afterwards
    pub async fn stop(&self) -> P2PResult<()> {
        let channel = self.live_channel()?;
        channel.unpublish(&self.stream).await?;
        self.active.store(false, Ordering::SeqCst);
        info!("Unpublished stream {} from {}", self.stream.id(), self.target);
        Ok(())
    }

    pub async fn connection_stats(&self) -> P2PResult<ConnectionStats> {
        let channel = self.live_channel()?;
        channel.connection_stats().await
    }
}

impl std::fmt::Debug for Publication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publication")
            .field("target", &self.target)
            .field("stream", &self.stream)
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::engine::{MockBehavior, MockEngineFactory};
    use crate::session::SessionManager;
    use crate::signaling::LoopbackHub;

    async fn manager() -> SessionManager {
        let hub = LoopbackHub::new();
        let manager = SessionManager::new(
            ClientConfig::default(),
            Arc::new(hub.endpoint("alice")),
            Arc::new(MockEngineFactory::new(MockBehavior::Succeed)),
        );
        manager.connect("loopback", "").await.unwrap();
        manager.add_allowed_remote_id("bob");
        manager
    }

    #[tokio::test]
    async fn test_publication_is_bound_to_target_and_stream() {
        let manager = manager().await;
        let stream = LocalStream::new("camera");

        let publication = manager.publish("bob", &stream).await.unwrap();
        assert_eq!(publication.target(), "bob");
        assert_eq!(publication.stream(), &stream);
        assert!(publication.is_active());

        let stats = publication.connection_stats().await.unwrap();
        assert_eq!(stats.published_streams, 1);
    }

    #[tokio::test]
    async fn test_publication_inert_after_session_stop() {
        let manager = manager().await;
        let publication = manager
            .publish("bob", &LocalStream::new("camera"))
            .await
            .unwrap();

        manager.stop("bob").await.unwrap();
        assert!(!publication.is_active());
        assert!(matches!(
            publication.stop().await,
            Err(P2PError::SessionInactive(_))
        ));
        assert!(matches!(
            publication.connection_stats().await,
            Err(P2PError::SessionInactive(_))
        ));
    }

    #[tokio::test]
    async fn test_publication_inert_after_manager_dropped() {
        let manager = manager().await;
        let publication = manager
            .publish("bob", &LocalStream::new("camera"))
            .await
            .unwrap();

        manager.shutdown().await;
        drop(manager);
        assert!(matches!(
            publication.stop().await,
            Err(P2PError::SessionInactive(_))
        ));
    }

    #[tokio::test]
    async fn test_publication_stop_unpublishes_once() {
        let manager = manager().await;
        let publication = manager
            .publish("bob", &LocalStream::new("camera"))
            .await
            .unwrap();

        publication.stop().await.unwrap();
        assert!(!publication.is_active());
        assert!(publication.stop().await.is_err());
        assert!(manager.has_channel("bob"));
    }
}
