//! Core types for the BlueChat protocol
//!
//! This module defines the fundamental types used throughout the protocol,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::ops::{Add, Sub};
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::protocol;
use crate::BluechatError;

// ----------------------------------------------------------------------------
// Peer Identity
// ----------------------------------------------------------------------------

/// Stable identity of an installation, independent of the link-layer address
///
/// Holds the random 32-bit component of the advertised identifier. The full
/// 128-bit form is that component followed by the protocol suffix, see
/// [`PeerIdentity::to_uuid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PeerIdentity(u32);

impl PeerIdentity {
    /// Identity used for inbound messages whose sender could not be correlated
    pub const UNATTRIBUTED: Self = Self(0);

    /// Create an identity from its random component
    pub const fn new(random: u32) -> Self {
        Self(random)
    }

    /// The random component
    pub fn random_part(&self) -> u32 {
        self.0
    }

    /// Whether this is the placeholder for an uncorrelated sender
    pub fn is_unattributed(&self) -> bool {
        *self == Self::UNATTRIBUTED
    }

    /// Full 128-bit form: random component in the top 32 bits, protocol suffix below
    pub fn to_uuid(&self) -> uuid::Uuid {
        uuid::Uuid::from_u128(((self.0 as u128) << 96) | protocol::PROTOCOL_SUFFIX_BITS)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl FromStr for PeerIdentity {
    type Err = BluechatError;

    /// Accepts either the bare 8-hex random component or a full advertised identifier
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() > 8 {
            return protocol::extract_peer_identity(s).ok_or_else(|| {
                BluechatError::configuration(format!("not a BlueChat identifier: {}", s))
            });
        }
        if s.len() != 8 {
            return Err(BluechatError::configuration(format!(
                "peer identity must be 8 hex characters, got {:?}",
                s
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|_| BluechatError::configuration(format!("invalid hex in peer identity: {}", s)))?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes);
        Ok(Self(u32::from_be_bytes(raw)))
    }
}

impl From<PeerIdentity> for String {
    fn from(identity: PeerIdentity) -> Self {
        identity.to_string()
    }
}

impl TryFrom<String> for PeerIdentity {
    type Error = BluechatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ----------------------------------------------------------------------------
// Link Address
// ----------------------------------------------------------------------------

/// Transient link-layer address of a remote radio (rotates over time)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkAddress(String);

impl LinkAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0 + other)
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Milliseconds since the epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

/// Store-assigned message identifier
pub type MessageId = u64;

/// Whether a message was written by this installation or received from a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

/// A persisted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub content: String,
    pub sender_identity: String,
    pub receiver_identity: String,
    pub peer_identity: PeerIdentity,
    pub timestamp: Timestamp,
    pub direction: Direction,
}

/// A message that has not been assigned an id yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub sender_identity: String,
    pub receiver_identity: String,
    pub peer_identity: PeerIdentity,
    pub timestamp: Timestamp,
    pub direction: Direction,
}

impl NewMessage {
    /// A message this installation sent to `peer`
    pub fn sent(local: PeerIdentity, peer: PeerIdentity, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender_identity: local.to_string(),
            receiver_identity: peer.to_string(),
            peer_identity: peer,
            timestamp: Timestamp::now(),
            direction: Direction::Sent,
        }
    }

    /// A message received from `peer`; `sender` is whatever best describes the
    /// sender (identity, or link address when uncorrelated)
    pub fn received(
        local: PeerIdentity,
        peer: PeerIdentity,
        sender: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            sender_identity: sender.into(),
            receiver_identity: local.to_string(),
            peer_identity: peer,
            timestamp: Timestamp::now(),
            direction: Direction::Received,
        }
    }

    /// Attach the store-assigned id
    pub fn with_id(self, id: MessageId) -> ChatMessage {
        ChatMessage {
            id,
            content: self.content,
            sender_identity: self.sender_identity,
            receiver_identity: self.receiver_identity,
            peer_identity: self.peer_identity,
            timestamp: self.timestamp,
            direction: self.direction,
        }
    }
}

// ----------------------------------------------------------------------------
// Known Peers
// ----------------------------------------------------------------------------

/// A peer this installation has completed a handshake with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownPeer {
    pub identity: PeerIdentity,
    pub display_name: Option<String>,
    pub last_connected_at: Option<Timestamp>,
    pub last_message_at: Option<Timestamp>,
}

impl KnownPeer {
    pub fn new(identity: PeerIdentity) -> Self {
        Self {
            identity,
            display_name: None,
            last_connected_at: None,
            last_message_at: None,
        }
    }

    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }

    pub fn connected_at(mut self, at: Timestamp) -> Self {
        self.last_connected_at = Some(at);
        self
    }

    pub fn messaged_at(mut self, at: Timestamp) -> Self {
        self.last_message_at = Some(at);
        self
    }

    /// Fold `newer` into `self`, keeping the latest timestamps and any known name
    pub fn merge(&mut self, newer: KnownPeer) {
        if newer.display_name.is_some() {
            self.display_name = newer.display_name;
        }
        self.last_connected_at = self.last_connected_at.max(newer.last_connected_at);
        self.last_message_at = self.last_message_at.max(newer.last_message_at);
    }
}

// ----------------------------------------------------------------------------
// Scan Sightings
// ----------------------------------------------------------------------------

/// One observation of a protocol advertisement; never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSighting {
    pub peer_identity: PeerIdentity,
    pub address: LinkAddress,
    pub display_name: Option<String>,
    pub rssi: Option<i16>,
    pub observed_at: Instant,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display_and_parse() {
        let identity = PeerIdentity::new(0x1a2b3c4d);
        assert_eq!(identity.to_string(), "1a2b3c4d");
        assert_eq!("1a2b3c4d".parse::<PeerIdentity>().unwrap(), identity);
        assert_eq!(
            "1a2b3c4d-0000-1000-8000-00805f9b34fb"
                .parse::<PeerIdentity>()
                .unwrap(),
            identity
        );
        assert!("xyz".parse::<PeerIdentity>().is_err());
        assert!("1a2b3c4d5".parse::<PeerIdentity>().is_err());
    }

    #[test]
    fn test_identity_uuid_form() {
        let identity = PeerIdentity::new(0xdeadbeef);
        assert_eq!(
            identity.to_uuid().to_string(),
            "deadbeef-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_known_peer_merge_keeps_latest() {
        let mut peer = KnownPeer::new(PeerIdentity::new(1)).messaged_at(Timestamp::new(200));
        peer.merge(
            KnownPeer::new(PeerIdentity::new(1))
                .messaged_at(Timestamp::new(100))
                .connected_at(Timestamp::new(150)),
        );
        assert_eq!(peer.last_message_at, Some(Timestamp::new(200)));
        assert_eq!(peer.last_connected_at, Some(Timestamp::new(150)));
    }

    #[test]
    fn test_identity_string_conversion_keeps_leading_zeros() {
        let identity = PeerIdentity::new(0x0000beef);
        let as_string = String::from(identity);
        assert_eq!(as_string, "0000beef");
        assert_eq!(PeerIdentity::try_from(as_string).unwrap(), identity);
    }
}
