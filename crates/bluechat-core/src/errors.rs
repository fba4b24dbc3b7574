//! Error types for the BlueChat protocol
//!
//! A single error type covers the whole core. Radio, session and codec
//! failures each have their own variant so callers can tell "no peers nearby"
//! from "cannot scan" and a rejected send from a broken link.

use crate::protocol::GattStatus;

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for BlueChat
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BluechatError {
    /// Radio missing or switched off; recoverable once re-enabled
    #[error("Bluetooth radio is unavailable")]
    RadioUnavailable,

    #[error("Bluetooth permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// The peer connected but does not expose the chat service
    #[error("Peer {peer} does not implement the BlueChat service")]
    PeerNotProtocolCompliant { peer: String },

    #[error("Transport failure during {operation} (status {status})")]
    TransportFailure {
        operation: &'static str,
        status: GattStatus,
    },

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Failed to decode payload: {reason}")]
    DecodeFailure { reason: String },

    #[error("Session is not ready (current state: {state})")]
    NotReady { state: String },

    #[error("Peer not found: {peer}")]
    PeerNotFound { peer: String },

    #[error("Invalid transition from {from_state} on {event}")]
    InvalidTransition { from_state: String, event: String },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl BluechatError {
    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn decode_failure(reason: impl Into<String>) -> Self {
        Self::DecodeFailure {
            reason: reason.into(),
        }
    }

    pub fn transport(operation: &'static str, status: GattStatus) -> Self {
        Self::TransportFailure { operation, status }
    }

    pub fn channel_closed(what: impl Into<String>) -> Self {
        Self::ChannelClosed(what.into())
    }

    /// Whether re-issuing `connect` may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure { .. } | Self::Timeout { .. } | Self::RadioUnavailable
        )
    }
}

/// Result type used throughout BlueChat
pub type Result<T> = core::result::Result<T, BluechatError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
