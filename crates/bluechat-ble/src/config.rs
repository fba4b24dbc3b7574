//! BLE transport configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the BLE transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleTransportConfig {
    /// Which local adapter to use, in the order the OS reports them
    pub adapter_index: usize,
    /// Prefix of the advertised local name (`<prefix><identity>`)
    pub local_name_prefix: String,
    /// How long a GATT server callback waits for the runtime to respond
    pub request_timeout: Duration,
}

impl Default for BleTransportConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            local_name_prefix: "BlueChat-".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl BleTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    pub fn with_local_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.local_name_prefix = prefix.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout.is_zero() {
            return Err("BLE request timeout must be greater than zero".to_string());
        }
        if self.local_name_prefix.len() > 20 {
            return Err("BLE local name prefix must be at most 20 bytes".to_string());
        }
        Ok(())
    }
}
