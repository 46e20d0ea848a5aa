//! Peer nodes reachable through the transport.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A node in the data-sharing network.
///
/// Identity is the node id alone: two values with the same id compare equal
/// and hash alike even when their display name or proximity differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerNode {
    pub id: String,
    pub display_name: String,
    /// Directly connected rather than reachable through a relay.
    pub is_nearby: bool,
}

impl PeerNode {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_nearby: true,
        }
    }

    pub fn with_nearby(mut self, is_nearby: bool) -> Self {
        self.is_nearby = is_nearby;
        self
    }
}

impl PartialEq for PeerNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerNode {}

impl Hash for PeerNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
