//! Error types for the BLE transport

use bluechat_core::protocol::GattStatus;
use bluechat_core::BluechatError;
use thiserror::Error;

pub type BleResult<T> = Result<T, BleTransportError>;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the BLE transport
#[derive(Error, Debug)]
pub enum BleTransportError {
    #[error("BLE adapter not available: {0}")]
    AdapterNotAvailable(String),

    #[error("Bluetooth access denied: {0}")]
    PermissionDenied(String),

    #[error("Peer at {address} has not been seen by a scan")]
    UnknownAddress { address: String },

    #[error("{link} is not open")]
    LinkClosed { link: String },

    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: String },

    #[error("BLE peripheral role is not supported on this platform")]
    PeripheralUnsupported,

    #[error("Unknown or expired server request {0}")]
    UnknownRequest(String),

    #[error("BLE {operation} failed: {reason}")]
    OperationFailed {
        operation: &'static str,
        reason: String,
    },
}

impl BleTransportError {
    pub fn failed(operation: &'static str, reason: impl ToString) -> Self {
        Self::OperationFailed {
            operation,
            reason: reason.to_string(),
        }
    }
}

impl From<btleplug::Error> for BleTransportError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => {
                Self::PermissionDenied("denied by the Bluetooth stack".to_string())
            }
            btleplug::Error::DeviceNotFound => Self::UnknownAddress {
                address: "unknown".to_string(),
            },
            other => Self::failed("central", other),
        }
    }
}

impl From<BleTransportError> for BluechatError {
    fn from(err: BleTransportError) -> Self {
        let message = err.to_string();
        match err {
            BleTransportError::AdapterNotAvailable(_) => BluechatError::RadioUnavailable,
            BleTransportError::PermissionDenied(reason) => {
                BluechatError::PermissionDenied { reason }
            }
            BleTransportError::UnknownAddress { address } => {
                BluechatError::PeerNotFound { peer: address }
            }
            BleTransportError::LinkClosed { link } => BluechatError::channel_closed(link),
            BleTransportError::PeripheralUnsupported => BluechatError::configuration(message),
            BleTransportError::OperationFailed { operation, .. } => {
                BluechatError::transport(operation, GattStatus::FAILURE)
            }
            BleTransportError::CharacteristicNotFound { .. }
            | BleTransportError::UnknownRequest(_) => {
                BluechatError::transport("request", GattStatus::REQUEST_NOT_SUPPORTED)
            }
        }
    }
}
