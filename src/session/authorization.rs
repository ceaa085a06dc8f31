//! Allow-list of remote endpoints

use std::collections::BTreeSet;
use std::sync::Mutex;

use tracing::{debug, info};

/// Tracks which remote ids may exchange data and streams with us.
///
/// A remote is authorized exactly when it is present in the set.
#[derive(Debug, Default)]
pub struct AuthorizationRegistry {
    allowed: Mutex<BTreeSet<String>>,
}

impl AuthorizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorize `target`. Returns false if it was already present.
    pub fn allow(&self, target: &str) -> bool {
        let added = self
            .allowed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(target.to_string());
        if added {
            debug!("Allowed remote id {}", target);
        } else {
            info!("Adding duplicated remote id {}", target);
        }
        added
    }

    pub fn is_allowed(&self, target: &str) -> bool {
        self.allowed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(target)
    }

    /// Deauthorize `target`. Returns false if it was absent.
    pub fn disallow(&self, target: &str) -> bool {
        let removed = self
            .allowed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(target);
        if removed {
            debug!("Disallowed remote id {}", target);
        }
        removed
    }

    /// Sorted snapshot of the allow-list
    pub fn allowed_ids(&self) -> Vec<String> {
        self.allowed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.allowed.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_allow_is_idempotent() {
        let registry = AuthorizationRegistry::new();
        assert!(registry.allow("bob"));
        assert!(!registry.allow("bob"));
        assert_eq!(registry.allowed_ids(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_disallow_absent_is_noop() {
        let registry = AuthorizationRegistry::new();
        assert!(!registry.disallow("bob"));
        registry.allow("bob");
        assert!(registry.disallow("bob"));
        assert!(!registry.is_allowed("bob"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_allow_adds_once() {
        let registry = Arc::new(AuthorizationRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.allow("carol"))
            })
            .collect();

        let added = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|added| *added)
            .count();
        assert_eq!(added, 1);
        assert_eq!(registry.len(), 1);
    }
}
