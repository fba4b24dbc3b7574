//! Peripheral role for platforms without a supported GATT server stack

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use bluechat_core::protocol::GattStatus;
use bluechat_core::transport::{AdvertisementPayload, RequestId, ServerEvent, ServiceDescriptor};

use super::PeripheralRole;
use crate::config::BleTransportConfig;
use crate::error::{BleResult, BleTransportError};

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Central-only operation: hosting is refused, stopping always succeeds
pub struct FallbackPeripheral {
    config: BleTransportConfig,
}

impl FallbackPeripheral {
    pub fn new(config: BleTransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeripheralRole for FallbackPeripheral {
    async fn advertise(&self, payload: AdvertisementPayload) -> BleResult<()> {
        warn!(
            "BLE advertising not supported on this platform. '{}{}' will not be discoverable. \
            Use Linux with BlueZ to host.",
            self.config.local_name_prefix, payload.advertised_identifier
        );
        Err(BleTransportError::PeripheralUnsupported)
    }

    async fn stop_advertising(&self) -> BleResult<()> {
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        false
    }

    async fn open_server(
        &self,
        service: ServiceDescriptor,
    ) -> BleResult<mpsc::Receiver<ServerEvent>> {
        warn!(
            "GATT server not supported on this platform; service {} not registered",
            service.service_uuid
        );
        Err(BleTransportError::PeripheralUnsupported)
    }

    async fn close_server(&self) -> BleResult<()> {
        Ok(())
    }

    async fn respond(
        &self,
        request_id: RequestId,
        _status: GattStatus,
        _value: Vec<u8>,
    ) -> BleResult<()> {
        Err(BleTransportError::UnknownRequest(request_id.to_string()))
    }
}
