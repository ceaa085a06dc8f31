//! Routes inbound signaling payloads to session channels

use std::sync::Arc;

use tracing::{debug, warn};

use super::channel::SessionChannel;
use super::channel_table::ChannelTable;
use crate::engine::protocol::is_chat_closed;

/// What happened to one inbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the channel for the sender
    Delivered,
    /// Close notice for a session that does not exist
    DroppedStaleClose,
    /// The sender lost its admission while its channel was being looked up
    Revoked,
    /// The channel rejected the payload
    Rejected(String),
}

/// Dispatches authorized inbound payloads.
///
/// A close notice for a remote with no channel is dropped rather than
/// opening a session just to close it. Anything else reaches the sender's
/// channel, which is created on first contact. `admitted` is consulted once
/// the channel is in hand; if it fails the channel is detached again and the
/// payload goes nowhere.
pub struct SignalingRouter;

impl SignalingRouter {
    pub fn route<F, A>(
        channels: &ChannelTable<SessionChannel>,
        message: &str,
        sender_id: &str,
        create: F,
        admitted: A,
    ) -> RouteOutcome
    where
        F: FnOnce() -> Arc<SessionChannel>,
        A: FnOnce() -> bool,
    {
        let create_allowed = !is_chat_closed(message);
        let Some(channel) = channels.get_or_create_if(sender_id, create_allowed, create) else {
            debug!("Dropping close notice from {} without a session", sender_id);
            metrics::increment_counter!("peerchat_signaling_dropped");
            return RouteOutcome::DroppedStaleClose;
        };

        if !admitted() {
            channels.remove_if_same(sender_id, &channel);
            warn!("Remote {} was deauthorized, dropping its message", sender_id);
            metrics::increment_counter!("peerchat_signaling_unauthorized");
            return RouteOutcome::Revoked;
        }

        metrics::increment_counter!("peerchat_signaling_received");
        match channel.on_incoming_signaling_message(message) {
            Ok(()) => RouteOutcome::Delivered,
            Err(e) => {
                warn!("Signaling message from {} rejected: {}", sender_id, e);
                RouteOutcome::Rejected(e.to_string())
            }
        }
    }
}
