//! BLE implementation of the radio transport

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use bluechat_core::protocol::GattStatus;
use bluechat_core::transport::{
    Advertisement, AdvertisementPayload, LinkEvent, LinkHandle, RadioTransport, RequestId,
    ScanFilter, ServerEvent, ServiceDescriptor,
};
use bluechat_core::{LinkAddress, Result as BluechatResult};

use crate::central::BleCentral;
use crate::config::BleTransportConfig;
use crate::peripheral::{platform_peripheral, PeripheralRole};

// ----------------------------------------------------------------------------
// BLE Transport
// ----------------------------------------------------------------------------

/// Radio transport over the local Bluetooth adapter
///
/// Scanning and client links use btleplug; hosting uses the platform
/// peripheral role.
pub struct BleTransport {
    config: BleTransportConfig,
    central: BleCentral,
    peripheral: Box<dyn PeripheralRole>,
}

impl BleTransport {
    pub fn new() -> Self {
        Self::with_config(BleTransportConfig::default())
    }

    pub fn with_config(config: BleTransportConfig) -> Self {
        Self {
            central: BleCentral::new(config.clone()),
            peripheral: platform_peripheral(&config),
            config,
        }
    }

    pub fn config(&self) -> &BleTransportConfig {
        &self.config
    }

    pub fn is_advertising(&self) -> bool {
        self.peripheral.is_advertising()
    }
}

impl Default for BleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadioTransport for BleTransport {
    async fn is_radio_available(&self) -> bool {
        self.central.is_available().await
    }

    async fn advertise(&self, payload: AdvertisementPayload) -> BluechatResult<()> {
        Ok(self.peripheral.advertise(payload).await?)
    }

    async fn stop_advertising(&self) -> BluechatResult<()> {
        Ok(self.peripheral.stop_advertising().await?)
    }

    async fn start_scan(&self, filter: ScanFilter) -> BluechatResult<mpsc::Receiver<Advertisement>> {
        Ok(self.central.start_scan(filter).await?)
    }

    async fn stop_scan(&self) -> BluechatResult<()> {
        Ok(self.central.stop_scan().await?)
    }

    async fn open_server(
        &self,
        service: ServiceDescriptor,
    ) -> BluechatResult<mpsc::Receiver<ServerEvent>> {
        Ok(self.peripheral.open_server(service).await?)
    }

    async fn close_server(&self) -> BluechatResult<()> {
        Ok(self.peripheral.close_server().await?)
    }

    async fn respond(
        &self,
        request_id: RequestId,
        status: GattStatus,
        offset: u16,
        value: Vec<u8>,
    ) -> BluechatResult<()> {
        // BlueZ expects the value already sliced from the request offset
        debug!("Answering {} at offset {} with {}", request_id, offset, status);
        Ok(self.peripheral.respond(request_id, status, value).await?)
    }

    async fn connect(
        &self,
        address: &LinkAddress,
    ) -> BluechatResult<(LinkHandle, mpsc::Receiver<LinkEvent>)> {
        Ok(self.central.connect(address).await?)
    }

    async fn discover_attributes(&self, link: LinkHandle) -> BluechatResult<()> {
        Ok(self.central.discover_attributes(link).await?)
    }

    async fn negotiate_max_payload(&self, link: LinkHandle, requested_mtu: u16) -> BluechatResult<()> {
        debug!("Requesting MTU {} on {}", requested_mtu, link);
        Ok(self.central.negotiate_mtu(link).await?)
    }

    async fn read_attribute(
        &self,
        link: LinkHandle,
        attribute: Uuid,
        offset: u16,
    ) -> BluechatResult<()> {
        Ok(self.central.read(link, attribute, offset).await?)
    }

    async fn write_attribute(
        &self,
        link: LinkHandle,
        attribute: Uuid,
        value: Vec<u8>,
    ) -> BluechatResult<()> {
        Ok(self.central.write(link, attribute, value).await?)
    }

    async fn close(&self, link: LinkHandle) -> BluechatResult<()> {
        Ok(self.central.close(link).await?)
    }
}
