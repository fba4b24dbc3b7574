//! Presence Tracker
//!
//! A peer is online while its most recent sighting is younger than the
//! presence window. Nothing is pushed when a peer goes offline; callers ask.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{PeerIdentity, ScanSighting};

/// Tracks the last time each peer was seen
#[derive(Debug)]
pub struct PresenceTracker {
    window: Duration,
    last_seen: Mutex<HashMap<PeerIdentity, Instant>>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl PresenceTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Refresh the peer's last-seen time from a sighting
    pub fn record(&self, sighting: &ScanSighting) {
        self.touch(sighting.peer_identity, sighting.observed_at);
    }

    /// Refresh the peer's last-seen time, never moving it backwards
    pub fn touch(&self, identity: PeerIdentity, at: Instant) {
        let mut last_seen = self.lock();
        let entry = last_seen.entry(identity).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }

    /// Whether `identity` was seen within the window; unknown peers are offline
    pub fn is_online(&self, identity: PeerIdentity) -> bool {
        let now = Instant::now();
        self.lock()
            .get(&identity)
            .is_some_and(|seen| now.saturating_duration_since(*seen) < self.window)
    }

    /// All peers currently online
    pub fn online_peers(&self) -> Vec<PeerIdentity> {
        let now = Instant::now();
        let mut peers: Vec<PeerIdentity> = self
            .lock()
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) < self.window)
            .map(|(identity, _)| *identity)
            .collect();
        peers.sort();
        peers
    }

    /// Drop entries that fell out of the window; returns how many were removed
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut last_seen = self.lock();
        let before = last_seen.len();
        last_seen.retain(|_, seen| now.saturating_duration_since(*seen) < self.window);
        before - last_seen.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PeerIdentity, Instant>> {
        self.last_seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
