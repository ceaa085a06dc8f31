//! Peer session management module
//!
//! This module provides the client façade and its building blocks: the remote
//! allow-list, the per-remote channel table, signaling routing, and the ordered
//! event dispatcher that delivers observer notifications.

pub mod authorization;
pub mod channel;
pub mod channel_table;
pub mod event_dispatcher;
pub mod observer;
pub mod publication;
pub mod session_manager;
pub mod signaling_router;

pub use authorization::AuthorizationRegistry;
pub use channel::{ChannelState, SessionChannel};
pub use channel_table::ChannelTable;
pub use event_dispatcher::EventDispatcher;
pub use observer::{ClientEvent, EventForwarder, P2PClientObserver};
pub use publication::Publication;
pub use session_manager::SessionManager;
pub use signaling_router::{RouteOutcome, SignalingRouter};
