//! Chat history persisted as a JSON file

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use bluechat_core::persistence::{order_known_peers, ChatStore};
use bluechat_core::{ChatMessage, KnownPeer, MessageId, NewMessage, PeerIdentity};

use crate::error::{CliError, Result};

/// On-disk layout of the history file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryFile {
    next_id: MessageId,
    messages: Vec<ChatMessage>,
    peers: Vec<KnownPeer>,
}

/// [`ChatStore`] that rewrites a JSON file after every change
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<HistoryFile>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty when the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                CliError::Storage(format!("Failed to read {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&contents).map_err(|e| {
                CliError::Storage(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            HistoryFile::default()
        };
        debug!(
            "Opened chat history {} ({} messages)",
            path.display(),
            state.messages.len()
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` and write the result; memory is left untouched on failure
    fn update<T>(&self, change: impl FnOnce(&mut HistoryFile) -> T) -> Result<T> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = state.clone();
        let result = change(&mut next);
        self.save(&next)?;
        *state = next;
        Ok(result)
    }

    fn read<T>(&self, query: impl FnOnce(&HistoryFile) -> T) -> T {
        query(&self.state.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn save(&self, state: &HistoryFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(state)?;
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, contents)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl ChatStore for JsonFileStore {
    async fn insert_message(&self, message: NewMessage) -> bluechat_core::Result<ChatMessage> {
        Ok(self.update(|state| {
            state.next_id += 1;
            let stored = message.with_id(state.next_id);
            state.messages.push(stored.clone());
            stored
        })?)
    }

    async fn query_messages(&self, peer: PeerIdentity) -> bluechat_core::Result<Vec<ChatMessage>> {
        Ok(self.read(|state| {
            state
                .messages
                .iter()
                .filter(|m| m.peer_identity == peer)
                .cloned()
                .collect()
        }))
    }

    async fn upsert_known_peer(&self, peer: KnownPeer) -> bluechat_core::Result<()> {
        Ok(self.update(|state| {
            match state.peers.iter_mut().find(|p| p.identity == peer.identity) {
                Some(existing) => existing.merge(peer),
                None => state.peers.push(peer),
            }
        })?)
    }

    async fn get_known_peer(&self, identity: PeerIdentity) -> bluechat_core::Result<Option<KnownPeer>> {
        Ok(self.read(|state| state.peers.iter().find(|p| p.identity == identity).cloned()))
    }

    async fn query_known_peers(&self) -> bluechat_core::Result<Vec<KnownPeer>> {
        let mut peers = self.read(|state| state.peers.clone());
        order_known_peers(&mut peers);
        Ok(peers)
    }

    async fn delete_known_peer(&self, identity: PeerIdentity) -> bluechat_core::Result<bool> {
        if self.get_known_peer(identity).await?.is_none() {
            return Ok(false);
        }
        Ok(self.update(|state| {
            state.peers.retain(|p| p.identity != identity);
            true
        })?)
    }

    async fn delete_all_messages(&self) -> bluechat_core::Result<usize> {
        Ok(self.update(|state| {
            let removed = state.messages.len();
            state.messages.clear();
            removed
        })?)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
