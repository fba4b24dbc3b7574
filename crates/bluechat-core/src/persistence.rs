//! Chat persistence
//!
//! The coordinator records messages and known peers through [`ChatStore`].
//! Real storage belongs to the host application; [`MemoryChatStore`] backs
//! tests and ephemeral sessions.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::types::{ChatMessage, KnownPeer, MessageId, NewMessage, PeerIdentity};
use crate::Result;

/// Persistent store for chat history and known peers
#[async_trait]
pub trait ChatStore: Send + Sync + 'static {
    /// Insert a message and return it with its assigned id
    async fn insert_message(&self, message: NewMessage) -> Result<ChatMessage>;

    /// All messages exchanged with `peer`, oldest first
    async fn query_messages(&self, peer: PeerIdentity) -> Result<Vec<ChatMessage>>;

    /// Insert or merge a known peer; timestamps never move backwards
    async fn upsert_known_peer(&self, peer: KnownPeer) -> Result<()>;

    async fn get_known_peer(&self, identity: PeerIdentity) -> Result<Option<KnownPeer>>;

    /// Known peers, most recently messaged first, never-messaged last
    async fn query_known_peers(&self) -> Result<Vec<KnownPeer>>;

    /// Returns whether the peer existed
    async fn delete_known_peer(&self, identity: PeerIdentity) -> Result<bool>;

    /// Returns how many messages were removed
    async fn delete_all_messages(&self) -> Result<usize>;
}

/// Sort known peers for listing
pub fn order_known_peers(peers: &mut [KnownPeer]) {
    peers.sort_by(|a, b| {
        b.last_message_at
            .is_some()
            .cmp(&a.last_message_at.is_some())
            .then_with(|| b.last_message_at.cmp(&a.last_message_at))
            .then_with(|| b.last_connected_at.cmp(&a.last_connected_at))
            .then_with(|| a.identity.cmp(&b.identity))
    });
}

// ----------------------------------------------------------------------------
// In-memory Store
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: MessageId,
    messages: Vec<ChatMessage>,
    peers: BTreeMap<PeerIdentity, KnownPeer>,
}

/// Chat store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryChatStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn insert_message(&self, message: NewMessage) -> Result<ChatMessage> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let stored = message.with_id(inner.next_id);
        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn query_messages(&self, peer: PeerIdentity) -> Result<Vec<ChatMessage>> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.peer_identity == peer)
            .cloned()
            .collect())
    }

    async fn upsert_known_peer(&self, peer: KnownPeer) -> Result<()> {
        let mut inner = self.lock();
        match inner.peers.get_mut(&peer.identity) {
            Some(existing) => existing.merge(peer),
            None => {
                inner.peers.insert(peer.identity, peer);
            }
        }
        Ok(())
    }

    async fn get_known_peer(&self, identity: PeerIdentity) -> Result<Option<KnownPeer>> {
        Ok(self.lock().peers.get(&identity).cloned())
    }

    async fn query_known_peers(&self) -> Result<Vec<KnownPeer>> {
        let mut peers: Vec<KnownPeer> = self.lock().peers.values().cloned().collect();
        order_known_peers(&mut peers);
        Ok(peers)
    }

    async fn delete_known_peer(&self, identity: PeerIdentity) -> Result<bool> {
        Ok(self.lock().peers.remove(&identity).is_some())
    }

    async fn delete_all_messages(&self) -> Result<usize> {
        let mut inner = self.lock();
        let removed = inner.messages.len();
        inner.messages.clear();
        Ok(removed)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
