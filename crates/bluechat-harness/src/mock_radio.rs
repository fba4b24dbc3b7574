//! Mock Radio for Testing
//!
//! A deterministic [`RadioTransport`] with no hardware behind it. Every call
//! is recorded, and tests drive the other side of the air by injecting
//! advertisements, server requests and link events. With `auto_respond`
//! enabled the mock also plays a well-behaved remote peer, answering connect,
//! discovery, MTU, read and write requests on its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bluechat_core::protocol::{GattStatus, BLUECHAT_SERVICE_UUID};
use bluechat_core::transport::{
    Advertisement, AdvertisementPayload, LinkEvent, LinkHandle, RadioTransport, RequestId,
    ScanFilter, ServerEvent, ServiceDescriptor,
};
use bluechat_core::{BluechatError, LinkAddress, PeerIdentity, Result};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

// ----------------------------------------------------------------------------
// Mock Radio Configuration
// ----------------------------------------------------------------------------

/// How the simulated remote peer behaves
#[derive(Debug, Clone)]
pub struct MockRadioConfig {
    pub radio_available: bool,
    /// Answer client requests automatically
    pub auto_respond: bool,
    pub connect_status: GattStatus,
    /// Services reported by discovery
    pub peer_services: Vec<Uuid>,
    /// MTU granted on negotiation; `None` reports negotiation as unsupported
    pub negotiated_mtu: Option<u16>,
    pub write_status: GattStatus,
    /// Characteristic value returned by reads
    pub read_value: Vec<u8>,
    /// `stop_advertising` reports the radio as unavailable
    pub stop_advertising_fails: bool,
}

impl Default for MockRadioConfig {
    fn default() -> Self {
        Self::ideal()
    }
}

impl MockRadioConfig {
    /// A compliant peer that accepts everything
    pub fn ideal() -> Self {
        Self {
            radio_available: true,
            auto_respond: true,
            connect_status: GattStatus::SUCCESS,
            peer_services: vec![BLUECHAT_SERVICE_UUID],
            negotiated_mtu: Some(185),
            write_status: GattStatus::SUCCESS,
            read_value: Vec::new(),
            stop_advertising_fails: false,
        }
    }

    /// No automatic answers; the test injects every link event
    pub fn manual() -> Self {
        Self {
            auto_respond: false,
            ..Self::ideal()
        }
    }

    /// A peer that connects but does not expose the chat service
    pub fn non_compliant() -> Self {
        Self {
            peer_services: vec![Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb)],
            ..Self::ideal()
        }
    }

    pub fn with_mtu(mut self, mtu: Option<u16>) -> Self {
        self.negotiated_mtu = mtu;
        self
    }

    pub fn with_write_status(mut self, status: GattStatus) -> Self {
        self.write_status = status;
        self
    }

    pub fn with_read_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.read_value = value.into();
        self
    }
}

/// A recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Advertise(AdvertisementPayload),
    StopAdvertising,
    StartScan(Vec<Uuid>),
    StopScan,
    OpenServer(ServiceDescriptor),
    CloseServer,
    Respond {
        request_id: RequestId,
        status: GattStatus,
        offset: u16,
        value: Vec<u8>,
    },
    Connect(LinkAddress),
    DiscoverAttributes(LinkHandle),
    NegotiateMtu(LinkHandle, u16),
    Read(LinkHandle, u16),
    Write(LinkHandle, Vec<u8>),
    Close(LinkHandle),
}

/// Counters for assertions
#[derive(Debug, Default)]
pub struct MockRadioStats {
    pub advertisements_delivered: AtomicU64,
    pub links_opened: AtomicU64,
    pub links_closed: AtomicU64,
    pub writes: AtomicU64,
}

struct LinkSlot {
    address: LinkAddress,
    events: mpsc::Sender<LinkEvent>,
}

// ----------------------------------------------------------------------------
// Mock Radio
// ----------------------------------------------------------------------------

/// In-memory radio transport
pub struct MockRadio {
    config: Mutex<MockRadioConfig>,
    calls: Mutex<Vec<RadioCall>>,
    scan: Mutex<Option<mpsc::Sender<Advertisement>>>,
    server: Mutex<Option<mpsc::Sender<ServerEvent>>>,
    links: Mutex<HashMap<LinkHandle, LinkSlot>>,
    next_link: AtomicU64,
    next_request: AtomicU64,
    advertising: AtomicBool,
    stats: MockRadioStats,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new(MockRadioConfig::ideal())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockRadio {
    pub fn new(config: MockRadioConfig) -> Self {
        Self {
            config: Mutex::new(config),
            calls: Mutex::new(Vec::new()),
            scan: Mutex::new(None),
            server: Mutex::new(None),
            links: Mutex::new(HashMap::new()),
            next_link: AtomicU64::new(1),
            next_request: AtomicU64::new(1),
            advertising: AtomicBool::new(false),
            stats: MockRadioStats::default(),
        }
    }

    /// Mock radio with a compliant auto-responding peer
    pub fn ideal() -> Self {
        Self::new(MockRadioConfig::ideal())
    }

    /// Mock radio where every link event is injected by the test
    pub fn manual() -> Self {
        Self::new(MockRadioConfig::manual())
    }

    pub fn set_radio_available(&self, available: bool) {
        lock(&self.config).radio_available = available;
    }

    /// Change the simulated peer's behaviour
    pub fn update_config(&self, update: impl FnOnce(&mut MockRadioConfig)) {
        update(&mut lock(&self.config));
    }

    pub fn stats(&self) -> &MockRadioStats {
        &self.stats
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<RadioCall> {
        lock(&self.calls).clone()
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.scan).is_some()
    }

    pub fn is_server_open(&self) -> bool {
        lock(&self.server).is_some()
    }

    /// Responses sent for inbound server requests
    pub fn responses(&self) -> Vec<(RequestId, GattStatus, Vec<u8>)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                RadioCall::Respond {
                    request_id,
                    status,
                    value,
                    ..
                } => Some((*request_id, *status, value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Values written on `link`
    pub fn writes(&self, link: LinkHandle) -> Vec<Vec<u8>> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                RadioCall::Write(handle, value) if *handle == link => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// How many times `link` was closed
    pub fn close_count(&self, link: LinkHandle) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, RadioCall::Close(handle) if *handle == link))
            .count()
    }

    /// The most recently opened link
    pub fn last_link(&self) -> Option<LinkHandle> {
        let next = self.next_link.load(Ordering::SeqCst);
        (next > 1).then(|| LinkHandle(next - 1))
    }

    pub fn open_links(&self) -> Vec<LinkHandle> {
        let mut links: Vec<LinkHandle> = lock(&self.links).keys().copied().collect();
        links.sort_by_key(|handle| handle.0);
        links
    }

    // ------------------------------------------------------------------------
    // Injection
    // ------------------------------------------------------------------------

    /// Advertisement as a BlueChat peer with `identity` would broadcast it
    pub fn advertisement_for(
        identity: PeerIdentity,
        address: &str,
        local_name: Option<&str>,
    ) -> Advertisement {
        Advertisement {
            address: LinkAddress::new(address),
            local_name: local_name.map(str::to_string),
            service_uuids: vec![BLUECHAT_SERVICE_UUID, identity.to_uuid()],
            rssi: Some(-55),
        }
    }

    /// Deliver an advertisement to the active scan; false when not scanning
    pub async fn inject_advertisement(&self, advertisement: Advertisement) -> bool {
        let sender = lock(&self.scan).clone();
        match sender {
            Some(sender) => {
                let delivered = sender.send(advertisement).await.is_ok();
                if delivered {
                    self.stats
                        .advertisements_delivered
                        .fetch_add(1, Ordering::Relaxed);
                }
                delivered
            }
            None => false,
        }
    }

    /// Deliver a raw server event; false when no server is open
    pub async fn inject_server_event(&self, event: ServerEvent) -> bool {
        let sender = lock(&self.server).clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// A remote client writes `value` to our characteristic
    pub async fn client_write(
        &self,
        address: &str,
        value: impl Into<Vec<u8>>,
        response_needed: bool,
    ) -> Option<RequestId> {
        let request_id = self.next_request_id();
        let event = ServerEvent::WriteRequest {
            request_id,
            address: LinkAddress::new(address),
            attribute: bluechat_core::protocol::BLUECHAT_CHARACTERISTIC_UUID,
            offset: 0,
            value: value.into(),
            response_needed,
        };
        self.inject_server_event(event).await.then_some(request_id)
    }

    /// A remote client reads our characteristic from `offset`
    pub async fn client_read(&self, address: &str, offset: u16) -> Option<RequestId> {
        let request_id = self.next_request_id();
        let event = ServerEvent::ReadRequest {
            request_id,
            address: LinkAddress::new(address),
            attribute: bluechat_core::protocol::BLUECHAT_CHARACTERISTIC_UUID,
            offset,
        };
        self.inject_server_event(event).await.then_some(request_id)
    }

    /// Deliver a link event on `link`; false when the link is closed
    pub async fn inject_link_event(&self, link: LinkHandle, event: LinkEvent) -> bool {
        let sender = lock(&self.links).get(&link).map(|slot| slot.events.clone());
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// The remote peer drops the connection
    pub async fn simulate_disconnect(&self, link: LinkHandle) -> bool {
        self.inject_link_event(
            link,
            LinkEvent::Disconnected {
                status: GattStatus::SUCCESS,
            },
        )
        .await
    }

    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::SeqCst))
    }

    fn record(&self, call: RadioCall) {
        lock(&self.calls).push(call);
    }

    fn ensure_available(&self) -> Result<()> {
        if lock(&self.config).radio_available {
            Ok(())
        } else {
            Err(BluechatError::RadioUnavailable)
        }
    }

    /// Queue an automatic answer on `link` when auto-respond is on
    fn auto_reply(&self, link: LinkHandle, reply: impl FnOnce(&MockRadioConfig) -> LinkEvent) {
        let config = lock(&self.config).clone();
        if !config.auto_respond {
            return;
        }
        let event = reply(&config);
        if let Some(slot) = lock(&self.links).get(&link) {
            debug!("Mock radio: {} auto-replies {}", link, event.name());
            let _ = slot.events.try_send(event);
        }
    }

    fn link_exists(&self, link: LinkHandle) -> Result<()> {
        if lock(&self.links).contains_key(&link) {
            Ok(())
        } else {
            Err(BluechatError::channel_closed(format!("{} is closed", link)))
        }
    }
}

#[async_trait]
impl RadioTransport for MockRadio {
    async fn is_radio_available(&self) -> bool {
        lock(&self.config).radio_available
    }

    async fn advertise(&self, payload: AdvertisementPayload) -> Result<()> {
        self.ensure_available()?;
        self.record(RadioCall::Advertise(payload));
        self.advertising.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.record(RadioCall::StopAdvertising);
        if lock(&self.config).stop_advertising_fails {
            return Err(BluechatError::RadioUnavailable);
        }
        self.advertising.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn start_scan(&self, filter: ScanFilter) -> Result<mpsc::Receiver<Advertisement>> {
        self.ensure_available()?;
        self.record(RadioCall::StartScan(filter.service_uuids));
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        *lock(&self.scan) = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(RadioCall::StopScan);
        lock(&self.scan).take();
        Ok(())
    }

    async fn open_server(&self, service: ServiceDescriptor) -> Result<mpsc::Receiver<ServerEvent>> {
        self.ensure_available()?;
        self.record(RadioCall::OpenServer(service));
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        *lock(&self.server) = Some(tx);
        Ok(rx)
    }

    async fn close_server(&self) -> Result<()> {
        self.record(RadioCall::CloseServer);
        lock(&self.server).take();
        Ok(())
    }

    async fn respond(
        &self,
        request_id: RequestId,
        status: GattStatus,
        offset: u16,
        value: Vec<u8>,
    ) -> Result<()> {
        self.record(RadioCall::Respond {
            request_id,
            status,
            offset,
            value,
        });
        Ok(())
    }

    async fn connect(&self, address: &LinkAddress) -> Result<(LinkHandle, mpsc::Receiver<LinkEvent>)> {
        self.ensure_available()?;
        self.record(RadioCall::Connect(address.clone()));

        let link = LinkHandle(self.next_link.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        lock(&self.links).insert(
            link,
            LinkSlot {
                address: address.clone(),
                events: tx,
            },
        );
        self.stats.links_opened.fetch_add(1, Ordering::Relaxed);
        debug!("Mock radio: opened {} to {}", link, address);

        self.auto_reply(link, |config| LinkEvent::Connected {
            status: config.connect_status,
        });
        Ok((link, rx))
    }

    async fn discover_attributes(&self, link: LinkHandle) -> Result<()> {
        self.link_exists(link)?;
        self.record(RadioCall::DiscoverAttributes(link));
        self.auto_reply(link, |config| LinkEvent::ServicesDiscovered {
            status: GattStatus::SUCCESS,
            services: config.peer_services.clone(),
        });
        Ok(())
    }

    async fn negotiate_max_payload(&self, link: LinkHandle, requested_mtu: u16) -> Result<()> {
        self.link_exists(link)?;
        self.record(RadioCall::NegotiateMtu(link, requested_mtu));
        self.auto_reply(link, |config| match config.negotiated_mtu {
            Some(mtu) => LinkEvent::MtuNegotiated {
                status: GattStatus::SUCCESS,
                mtu: mtu.min(requested_mtu),
            },
            None => LinkEvent::MtuUnsupported,
        });
        Ok(())
    }

    async fn read_attribute(&self, link: LinkHandle, _attribute: Uuid, offset: u16) -> Result<()> {
        self.link_exists(link)?;
        self.record(RadioCall::Read(link, offset));
        self.auto_reply(link, |config| LinkEvent::ReadComplete {
            status: GattStatus::SUCCESS,
            value: config
                .read_value
                .get(offset as usize..)
                .unwrap_or_default()
                .to_vec(),
        });
        Ok(())
    }

    async fn write_attribute(&self, link: LinkHandle, _attribute: Uuid, value: Vec<u8>) -> Result<()> {
        self.link_exists(link)?;
        self.record(RadioCall::Write(link, value));
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        self.auto_reply(link, |config| LinkEvent::WriteComplete {
            status: config.write_status,
        });
        Ok(())
    }

    async fn close(&self, link: LinkHandle) -> Result<()> {
        self.record(RadioCall::Close(link));
        if let Some(slot) = lock(&self.links).remove(&link) {
            self.stats.links_closed.fetch_add(1, Ordering::Relaxed);
            debug!("Mock radio: closed {} to {}", link, slot.address);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
