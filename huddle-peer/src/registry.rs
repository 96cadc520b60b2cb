//! Connection registry: the source of truth for who is reachable.
//!
//! Maps each remote participant id to its live channel handle. Room
//! membership has no other record — the key set *is* the membership view.
//! Entries appear only after a channel's open handshake completes and
//! disappear immediately on close or error; a keyed insert overwrites
//! rather than duplicates.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::channel::PeerChannel;
use crate::identity::ParticipantId;

/// Live channels keyed by remote participant id.
pub struct ConnectionRegistry {
    channels: RwLock<HashMap<ParticipantId, PeerChannel>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a channel, returning any displaced entry for the same
    /// remote.
    pub async fn insert(&self, channel: PeerChannel) -> Option<PeerChannel> {
        let mut channels = self.channels.write().await;
        channels.insert(channel.remote().clone(), channel)
    }

    /// Remove the entry for `remote`, if present. Idempotent.
    pub async fn remove(&self, remote: &ParticipantId) -> Option<PeerChannel> {
        let mut channels = self.channels.write().await;
        channels.remove(remote)
    }

    /// Whether `remote` currently has a registered channel.
    pub async fn contains(&self, remote: &ParticipantId) -> bool {
        self.channels.read().await.contains_key(remote)
    }

    /// All currently registered remote ids.
    pub async fn peers(&self) -> Vec<ParticipantId> {
        self.channels.read().await.keys().cloned().collect()
    }

    /// Handles for every channel still reporting itself open.
    pub async fn open_channels(&self) -> Vec<PeerChannel> {
        self.channels
            .read()
            .await
            .values()
            .filter(|c| c.is_open())
            .cloned()
            .collect()
    }

    /// Number of registered channels.
    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Drain every entry, returning the handles so the caller can close
    /// them. Used by session teardown.
    pub async fn clear(&self) -> Vec<PeerChannel> {
        let mut channels = self.channels.write().await;
        channels.drain().map(|(_, c)| c).collect()
    }
}
