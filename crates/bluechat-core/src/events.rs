//! Events delivered to the application layer

use crate::session::ConnectionState;
use crate::types::{ChatMessage, MessageId, PeerIdentity};

/// Events emitted by the session coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// A peer was seen for the first time in the current scan
    PeerDiscovered {
        identity: PeerIdentity,
        display_name: Option<String>,
    },
    ConnectionStateChanged {
        identity: PeerIdentity,
        state: ConnectionState,
    },
    /// An inbound message, already persisted
    MessageReceived(ChatMessage),
    /// Outcome of the write carrying a previously persisted message
    MessageSendResult { message_id: MessageId, success: bool },
}

impl CoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::PeerDiscovered { .. } => "PeerDiscovered",
            CoreEvent::ConnectionStateChanged { .. } => "ConnectionStateChanged",
            CoreEvent::MessageReceived(_) => "MessageReceived",
            CoreEvent::MessageSendResult { .. } => "MessageSendResult",
        }
    }
}
