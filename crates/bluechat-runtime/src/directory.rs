//! Peer directory
//!
//! Maps transient link addresses to stable identities using the most recent
//! scan sightings. The server role uses it to attribute inbound writes, the
//! coordinator to find the address to connect to.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use bluechat_core::{LinkAddress, PeerIdentity, ScanSighting};

#[derive(Debug, Clone)]
struct AddressEntry {
    identity: PeerIdentity,
    seen_at: Instant,
}

#[derive(Debug, Clone)]
struct PeerEntry {
    address: LinkAddress,
    display_name: Option<String>,
    seen_at: Instant,
}

/// Address to identity mapping fed by scan sightings
#[derive(Debug, Default)]
pub struct PeerDirectory {
    by_address: DashMap<LinkAddress, AddressEntry>,
    by_identity: DashMap<PeerIdentity, PeerEntry>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting, superseding older entries for the same address or identity
    pub fn record(&self, sighting: &ScanSighting) {
        let newer = |seen_at: Instant| sighting.observed_at >= seen_at;

        let mut address_entry = self
            .by_address
            .entry(sighting.address.clone())
            .or_insert_with(|| AddressEntry {
                identity: sighting.peer_identity,
                seen_at: sighting.observed_at,
            });
        if newer(address_entry.seen_at) {
            address_entry.identity = sighting.peer_identity;
            address_entry.seen_at = sighting.observed_at;
        }
        drop(address_entry);

        let mut peer_entry = self
            .by_identity
            .entry(sighting.peer_identity)
            .or_insert_with(|| PeerEntry {
                address: sighting.address.clone(),
                display_name: sighting.display_name.clone(),
                seen_at: sighting.observed_at,
            });
        if newer(peer_entry.seen_at) {
            peer_entry.address = sighting.address.clone();
            peer_entry.seen_at = sighting.observed_at;
            if sighting.display_name.is_some() {
                peer_entry.display_name = sighting.display_name.clone();
            }
        }
    }

    /// Identity most recently seen at `address`
    pub fn identity_for(&self, address: &LinkAddress) -> Option<PeerIdentity> {
        self.by_address.get(address).map(|entry| entry.identity)
    }

    /// Address `identity` was most recently seen at
    pub fn address_for(&self, identity: PeerIdentity) -> Option<LinkAddress> {
        self.by_identity
            .get(&identity)
            .map(|entry| entry.address.clone())
    }

    pub fn display_name_for(&self, identity: PeerIdentity) -> Option<String> {
        self.by_identity
            .get(&identity)
            .and_then(|entry| entry.display_name.clone())
    }

    /// Drop every mapping for `identity`
    pub fn forget(&self, identity: PeerIdentity) {
        self.by_identity.remove(&identity);
        self.by_address.retain(|_, entry| entry.identity != identity);
    }

    /// Drop mappings not refreshed within `max_age`; returns how many peers were removed
    pub fn prune(&self, max_age: Duration) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(max_age) else {
            return 0;
        };
        self.by_address.retain(|_, entry| entry.seen_at >= cutoff);
        let before = self.by_identity.len();
        self.by_identity.retain(|_, entry| entry.seen_at >= cutoff);
        before - self.by_identity.len()
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
