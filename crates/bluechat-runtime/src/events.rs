//! Internal events flowing from the roles to the coordinator's event pump

use bluechat_core::{ConnectionState, LinkAddress, MessageId, PeerIdentity, ScanSighting};

/// Activity reported by the scanner, the server role and client sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleEvent {
    /// First sighting of a peer in the current scan
    Discovered(ScanSighting),
    /// A remote client wrote a message to our server
    Inbound {
        identity: PeerIdentity,
        address: LinkAddress,
        content: String,
    },
    /// A message read or notified on an outbound session
    ClientMessage {
        identity: PeerIdentity,
        content: String,
    },
    /// The remote peer exposed the chat service
    Handshake {
        identity: PeerIdentity,
        display_name: Option<String>,
    },
    StateChanged {
        identity: PeerIdentity,
        state: ConnectionState,
    },
    SendResult {
        message_id: MessageId,
        success: bool,
    },
}
