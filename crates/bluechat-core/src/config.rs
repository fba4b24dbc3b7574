//! Core Configuration
//!
//! Tunables shared by the session state machine, the scanner, the presence
//! tracker and the coordinator. Transport- and application-level settings
//! live in their own crates and embed this struct.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{DEFAULT_ATT_MTU, MAX_ATT_MTU};

/// Configuration for a BlueChat node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluechatConfig {
    /// ATT MTU requested after service discovery
    pub requested_mtu: u16,
    /// Ceiling on connect through service discovery and MTU negotiation
    pub connect_timeout: Duration,
    /// How long a sighting keeps a peer online
    pub presence_window: Duration,
    /// How long a discovery scan runs before stopping itself
    pub scan_timeout: Duration,
    /// Buffer size for event and command channels
    pub event_buffer: usize,
}

impl Default for BluechatConfig {
    fn default() -> Self {
        Self {
            requested_mtu: MAX_ATT_MTU,
            connect_timeout: Duration::from_secs(10),
            presence_window: Duration::from_secs(10),
            scan_timeout: Duration::from_secs(30),
            event_buffer: 64,
        }
    }
}

impl BluechatConfig {
    /// Configuration for tests: short timeouts, generous buffers
    pub fn testing() -> Self {
        Self {
            requested_mtu: MAX_ATT_MTU,
            connect_timeout: Duration::from_secs(2),
            presence_window: Duration::from_secs(10),
            scan_timeout: Duration::from_secs(5),
            event_buffer: 256,
        }
    }

    pub fn with_requested_mtu(mut self, mtu: u16) -> Self {
        self.requested_mtu = mtu;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_presence_window(mut self, window: Duration) -> Self {
        self.presence_window = window;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(DEFAULT_ATT_MTU..=MAX_ATT_MTU).contains(&self.requested_mtu) {
            return Err(format!(
                "Requested MTU must be between {} and {}, got {}",
                DEFAULT_ATT_MTU, MAX_ATT_MTU, self.requested_mtu
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout cannot be zero".into());
        }
        if self.presence_window.is_zero() {
            return Err("Presence window cannot be zero".into());
        }
        if self.scan_timeout.is_zero() {
            return Err("Scan timeout cannot be zero".into());
        }
        if self.event_buffer == 0 {
            return Err("Event buffer size cannot be zero".into());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
