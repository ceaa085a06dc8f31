//! Remote id to session channel bookkeeping

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::channel::SessionChannel;

/// Maps each remote id to at most one channel.
///
/// Lookup, construction and insertion happen under one lock, so concurrent
/// callers for the same remote always observe the same instance. The lock is
/// never held while a channel operation runs.
pub struct ChannelTable<C = SessionChannel> {
    channels: Mutex<HashMap<String, Arc<C>>>,
}

impl<C> Default for ChannelTable<C> {
    fn default() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }
}

impl<C> ChannelTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the channel for `target`, building it with `factory` if absent.
    ///
    /// `factory` runs with the table locked and must not call back into it.
    pub fn get_or_create<F>(&self, target: &str, factory: F) -> Arc<C>
    where
        F: FnOnce() -> Arc<C>,
    {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(channel) = channels.get(target) {
            return channel.clone();
        }

        let channel = factory();
        channels.insert(target.to_string(), channel.clone());
        debug!("Created channel for {}", target);
        metrics::increment_counter!("peerchat_channels_created");
        channel
    }

    /// Like [`get_or_create`](Self::get_or_create), but returns `None` instead
    /// of building a channel when `create` is false. Lookup and insertion share
    /// one lock acquisition.
    pub fn get_or_create_if<F>(&self, target: &str, create: bool, factory: F) -> Option<Arc<C>>
    where
        F: FnOnce() -> Arc<C>,
    {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(channel) = channels.get(target) {
            return Some(channel.clone());
        }
        if !create {
            return None;
        }

        let channel = factory();
        channels.insert(target.to_string(), channel.clone());
        debug!("Created channel for {}", target);
        metrics::increment_counter!("peerchat_channels_created");
        Some(channel)
    }

    pub fn get(&self, target: &str) -> Option<Arc<C>> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(target)
            .cloned()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(target)
    }

    /// Detach the channel for `target` so the caller can shut it down
    pub fn remove(&self, target: &str) -> Option<Arc<C>> {
        let removed = self
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(target);
        if removed.is_some() {
            debug!("Removed channel for {}", target);
        }
        removed
    }

    /// Detach `channel` only if it is still the one registered for `target`
    pub fn remove_if_same(&self, target: &str, channel: &Arc<C>) -> bool {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        match channels.get(target) {
            Some(current) if Arc::ptr_eq(current, channel) => {
                channels.remove(target);
                debug!("Released finished channel for {}", target);
                true
            }
            _ => false,
        }
    }

    /// Detach every channel
    pub fn drain(&self) -> Vec<(String, Arc<C>)> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect()
    }

    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        targets.sort();
        targets
    }

    pub fn len(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
