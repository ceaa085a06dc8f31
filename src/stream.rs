//! Stream handles exchanged between local and remote endpoints

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An outbound stream owned by the local endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalStream {
    id: String,
    label: String,
}

impl LocalStream {
    /// Create a stream with a freshly generated id
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// A stream announced by a remote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteStream {
    pub id: String,
    pub origin: String,
    pub label: String,
}

impl RemoteStream {
    pub fn new(id: impl Into<String>, origin: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            origin: origin.into(),
            label: label.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_stream_ids_are_unique() {
        let a = LocalStream::new("camera");
        let b = LocalStream::new("camera");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.label(), "camera");
    }
}
