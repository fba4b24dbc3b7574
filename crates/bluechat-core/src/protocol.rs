//! BLE protocol constants and identifier utilities for BlueChat

use core::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::PeerIdentity;

// ----------------------------------------------------------------------------
// BLE Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// BlueChat GATT service UUID
pub const BLUECHAT_SERVICE_UUID: Uuid = Uuid::from_u128(0x00002222_0000_1000_8000_00805F9B34FB);

/// The single chat characteristic (read + write)
pub const BLUECHAT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00001111_0000_1000_8000_00805F9B34FB);

/// Marker service UUID carried in advertisements next to the identity
pub const BLUECHAT_BROADCAST_UUID: Uuid = Uuid::from_u128(0x00003333_0000_1000_8000_00805F9B34FB);

/// Fixed suffix shared by every BlueChat identifier
pub const PROTOCOL_SUFFIX: &str = "0000-1000-8000-00805f9b34fb";

/// Lower 96 bits of every BlueChat identifier
pub const PROTOCOL_SUFFIX_BITS: u128 = 0x0000_1000_8000_0080_5F9B_34FB;

/// Random components taken by the protocol's own UUIDs
const RESERVED_PREFIXES: [u32; 4] = [0x0000_0000, 0x0000_1111, 0x0000_2222, 0x0000_3333];

// ----------------------------------------------------------------------------
// Payload Sizing
// ----------------------------------------------------------------------------

/// ATT header bytes consumed from every MTU
pub const ATT_OVERHEAD: usize = 3;

/// MTU every BLE link starts with
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Largest MTU the ATT protocol allows
pub const MAX_ATT_MTU: u16 = 517;

/// Usable payload when MTU negotiation is unsupported
pub const MIN_PAYLOAD: usize = DEFAULT_ATT_MTU as usize - ATT_OVERHEAD;

/// Usable attribute payload for a negotiated MTU
pub fn usable_payload(mtu: u16) -> usize {
    (mtu as usize).saturating_sub(ATT_OVERHEAD).max(MIN_PAYLOAD)
}

// ----------------------------------------------------------------------------
// GATT Status
// ----------------------------------------------------------------------------

/// Status code attached to every transport callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattStatus(pub u16);

impl GattStatus {
    pub const SUCCESS: Self = Self(0x0000);
    pub const INVALID_OFFSET: Self = Self(0x0007);
    pub const REQUEST_NOT_SUPPORTED: Self = Self(0x0006);
    pub const FAILURE: Self = Self(0x0101);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Identifier Composition
// ----------------------------------------------------------------------------

/// Public identifier broadcast in advertisements: random part + protocol suffix
pub fn build_advertised_identifier(identity: &PeerIdentity) -> String {
    format!("{:08x}-{}", identity.random_part(), PROTOCOL_SUFFIX)
}

/// Whether `candidate` carries the BlueChat suffix
pub fn is_our_protocol(candidate: &str) -> bool {
    let candidate = candidate.trim();
    candidate
        .len()
        .checked_sub(PROTOCOL_SUFFIX.len())
        .and_then(|start| candidate.get(start..))
        .is_some_and(|tail| tail.eq_ignore_ascii_case(PROTOCOL_SUFFIX))
}

/// Recover the peer identity from an advertised identifier
///
/// Returns `None` for foreign identifiers and for the protocol's own service
/// UUIDs, which share the suffix but are not peers.
pub fn extract_peer_identity(candidate: &str) -> Option<PeerIdentity> {
    if !is_our_protocol(candidate) {
        return None;
    }
    let prefix = candidate.trim().split('-').next()?;
    if prefix.len() != 8 {
        return None;
    }
    let random = u32::from_str_radix(prefix, 16).ok()?;
    if is_reserved(random) {
        return None;
    }
    Some(PeerIdentity::new(random))
}

/// Whether a random component collides with a protocol UUID
pub fn is_reserved(random: u32) -> bool {
    RESERVED_PREFIXES.contains(&random)
}

/// Advertised local name for a peer, e.g. `BlueChat-1a2b3c4d`
pub fn generate_device_name(identity: &PeerIdentity, prefix: &str) -> String {
    format!("{}-{}", prefix, identity)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
