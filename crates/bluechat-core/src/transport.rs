//! Radio transport abstraction
//!
//! BlueChat consumes a generic attribute-based radio: advertise, scan, run a
//! GATT server, connect as a client and read/write one characteristic. Every
//! client operation is a request whose outcome arrives later as a
//! [`LinkEvent`] on the per-connection receiver returned by
//! [`RadioTransport::connect`]; inbound server traffic arrives as
//! [`ServerEvent`]s on the receiver returned by [`RadioTransport::open_server`].
//! Implementations must deliver the events of one link in the order the radio
//! stack produced them.

use core::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{
    GattStatus, BLUECHAT_BROADCAST_UUID, BLUECHAT_CHARACTERISTIC_UUID, BLUECHAT_SERVICE_UUID,
};
use crate::types::LinkAddress;
use crate::Result;

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

/// Opaque handle to one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkHandle(pub u64);

impl fmt::Display for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Identifies an inbound server request awaiting a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Advertising and Scanning
// ----------------------------------------------------------------------------

/// What this installation broadcasts while hosting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementPayload {
    pub service_uuid: Uuid,
    /// Advertised identifier, see [`crate::protocol::build_advertised_identifier`]
    pub advertised_identifier: String,
    pub local_name: Option<String>,
}

impl AdvertisementPayload {
    /// Service UUIDs to place in the advertisement
    pub fn service_uuids(&self) -> Vec<Uuid> {
        let mut uuids = vec![self.service_uuid, BLUECHAT_BROADCAST_UUID];
        if let Ok(identity) = Uuid::parse_str(&self.advertised_identifier) {
            uuids.push(identity);
        }
        uuids
    }
}

/// Which advertisements a scan should report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Only report advertisements carrying one of these services (empty = all)
    pub service_uuids: Vec<Uuid>,
}

/// One received advertisement packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: LinkAddress,
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub rssi: Option<i16>,
}

// ----------------------------------------------------------------------------
// Server Side
// ----------------------------------------------------------------------------

/// The GATT service a server exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub readable: bool,
    pub writable: bool,
}

impl ServiceDescriptor {
    /// The BlueChat chat service: one characteristic supporting read and write
    pub fn bluechat() -> Self {
        Self {
            service_uuid: BLUECHAT_SERVICE_UUID,
            characteristic_uuid: BLUECHAT_CHARACTERISTIC_UUID,
            readable: true,
            writable: true,
        }
    }
}

/// Inbound activity on an open server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected {
        address: LinkAddress,
    },
    ClientDisconnected {
        address: LinkAddress,
    },
    WriteRequest {
        request_id: RequestId,
        address: LinkAddress,
        attribute: Uuid,
        offset: u16,
        value: Vec<u8>,
        response_needed: bool,
    },
    ReadRequest {
        request_id: RequestId,
        address: LinkAddress,
        attribute: Uuid,
        offset: u16,
    },
    MtuChanged {
        address: LinkAddress,
        mtu: u16,
    },
}

// ----------------------------------------------------------------------------
// Client Side
// ----------------------------------------------------------------------------

/// Callback from the radio stack for one client connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected { status: GattStatus },
    Disconnected { status: GattStatus },
    ServicesDiscovered { status: GattStatus, services: Vec<Uuid> },
    MtuNegotiated { status: GattStatus, mtu: u16 },
    /// The stack cannot negotiate an MTU; the default applies
    MtuUnsupported,
    ReadComplete { status: GattStatus, value: Vec<u8> },
    Notification { value: Vec<u8> },
    WriteComplete { status: GattStatus },
}

impl LinkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LinkEvent::Connected { .. } => "Connected",
            LinkEvent::Disconnected { .. } => "Disconnected",
            LinkEvent::ServicesDiscovered { .. } => "ServicesDiscovered",
            LinkEvent::MtuNegotiated { .. } => "MtuNegotiated",
            LinkEvent::MtuUnsupported => "MtuUnsupported",
            LinkEvent::ReadComplete { .. } => "ReadComplete",
            LinkEvent::Notification { .. } => "Notification",
            LinkEvent::WriteComplete { .. } => "WriteComplete",
        }
    }
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Attribute-based radio transport consumed by the runtime
#[async_trait]
pub trait RadioTransport: Send + Sync + 'static {
    /// Whether the radio is present and switched on
    async fn is_radio_available(&self) -> bool;

    async fn advertise(&self, payload: AdvertisementPayload) -> Result<()>;

    async fn stop_advertising(&self) -> Result<()>;

    /// Start scanning; advertisements arrive on the returned receiver until
    /// [`RadioTransport::stop_scan`] is called
    async fn start_scan(&self, filter: ScanFilter) -> Result<mpsc::Receiver<Advertisement>>;

    async fn stop_scan(&self) -> Result<()>;

    /// Open the GATT server and register `service`
    async fn open_server(&self, service: ServiceDescriptor) -> Result<mpsc::Receiver<ServerEvent>>;

    /// Unregister the service and release the server
    async fn close_server(&self) -> Result<()>;

    /// Answer an inbound read or write request
    async fn respond(
        &self,
        request_id: RequestId,
        status: GattStatus,
        offset: u16,
        value: Vec<u8>,
    ) -> Result<()>;

    /// Begin connecting to `address`; `LinkEvent::Connected` reports the outcome
    async fn connect(&self, address: &LinkAddress)
        -> Result<(LinkHandle, mpsc::Receiver<LinkEvent>)>;

    async fn discover_attributes(&self, link: LinkHandle) -> Result<()>;

    async fn negotiate_max_payload(&self, link: LinkHandle, requested_mtu: u16) -> Result<()>;

    async fn read_attribute(&self, link: LinkHandle, attribute: Uuid, offset: u16) -> Result<()>;

    async fn write_attribute(&self, link: LinkHandle, attribute: Uuid, value: Vec<u8>)
        -> Result<()>;

    /// Release the connection; must tolerate being called for a closed link
    async fn close(&self, link: LinkHandle) -> Result<()>;
}
