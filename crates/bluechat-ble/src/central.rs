//! BLE central role: scanning and client links through btleplug
//!
//! Each link gets a worker task that runs the requests for that link one at a
//! time and reports every outcome as a [`LinkEvent`], so the events of a link
//! arrive in the order the requests were made. btleplug has no MTU request;
//! negotiation always reports [`LinkEvent::MtuUnsupported`].

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter as BtScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use dashmap::DashMap;
use futures::stream::{Stream, StreamExt};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use bluechat_core::protocol::{GattStatus, BLUECHAT_CHARACTERISTIC_UUID};
use bluechat_core::transport::{Advertisement, LinkEvent, LinkHandle, ScanFilter};
use bluechat_core::LinkAddress;

use crate::config::BleTransportConfig;
use crate::error::{BleResult, BleTransportError};

const CHANNEL_CAPACITY: usize = 64;

type EventStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

// ----------------------------------------------------------------------------
// Central
// ----------------------------------------------------------------------------

enum LinkRequest {
    Discover,
    NegotiateMtu,
    Read { attribute: Uuid, offset: u16 },
    Write { attribute: Uuid, value: Vec<u8> },
}

struct LinkSlot {
    address: LinkAddress,
    peripheral: Peripheral,
    requests: mpsc::Sender<LinkRequest>,
    worker: JoinHandle<()>,
}

/// Scanner and client side of the BLE transport
pub struct BleCentral {
    config: BleTransportConfig,
    adapter: OnceCell<Adapter>,
    /// Peripherals seen by a scan, by the address reported to the runtime
    peripherals: Arc<DashMap<LinkAddress, Peripheral>>,
    links: DashMap<LinkHandle, LinkSlot>,
    next_link: AtomicU64,
    scan: Mutex<Option<JoinHandle<()>>>,
}

impl BleCentral {
    pub fn new(config: BleTransportConfig) -> Self {
        Self {
            config,
            adapter: OnceCell::new(),
            peripherals: Arc::new(DashMap::new()),
            links: DashMap::new(),
            next_link: AtomicU64::new(1),
            scan: Mutex::new(None),
        }
    }

    /// The configured adapter, initialized on first use
    pub async fn adapter(&self) -> BleResult<&Adapter> {
        self.adapter
            .get_or_try_init(|| async {
                let manager = Manager::new()
                    .await
                    .map_err(|e| BleTransportError::AdapterNotAvailable(e.to_string()))?;
                let adapters = manager
                    .adapters()
                    .await
                    .map_err(|e| BleTransportError::AdapterNotAvailable(e.to_string()))?;

                let index = self.config.adapter_index;
                let adapter = adapters.into_iter().nth(index).ok_or_else(|| {
                    BleTransportError::AdapterNotAvailable(format!("no adapter at index {}", index))
                })?;
                match adapter.adapter_info().await {
                    Ok(info) => info!("BLE adapter initialized: {}", info),
                    Err(_) => info!("BLE adapter initialized"),
                }
                Ok(adapter)
            })
            .await
    }

    pub async fn is_available(&self) -> bool {
        self.adapter().await.is_ok()
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    pub async fn start_scan(&self, filter: ScanFilter) -> BleResult<mpsc::Receiver<Advertisement>> {
        let adapter = self.adapter().await?.clone();
        if let Some(previous) = lock(&self.scan).take() {
            previous.abort();
        }

        let mut events = adapter.events().await?;
        adapter
            .start_scan(BtScanFilter {
                services: filter.service_uuids,
            })
            .await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let peripherals = Arc::clone(&self.peripherals);
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ServicesAdvertisement { id, .. } => id,
                    _ => continue,
                };
                let Some(advertisement) = read_advertisement(&adapter, &peripherals, &id).await
                else {
                    continue;
                };
                if tx.send(advertisement).await.is_err() {
                    break;
                }
            }
            debug!("BLE scan event stream ended");
        });
        *lock(&self.scan) = Some(task);

        info!("Started BLE scanning");
        Ok(rx)
    }

    pub async fn stop_scan(&self) -> BleResult<()> {
        let task = lock(&self.scan).take();
        if let Some(task) = task {
            task.abort();
            if let Some(adapter) = self.adapter.get() {
                adapter.stop_scan().await?;
            }
            info!("Stopped BLE scanning");
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------------

    /// Open a link to a peripheral seen by an earlier scan
    pub async fn connect(
        &self,
        address: &LinkAddress,
    ) -> BleResult<(LinkHandle, mpsc::Receiver<LinkEvent>)> {
        let adapter = self.adapter().await?;
        let peripheral = self
            .peripherals
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BleTransportError::UnknownAddress {
                address: address.to_string(),
            })?;
        let central_events = adapter.events().await?;

        let link = LinkHandle(self.next_link.fetch_add(1, Ordering::SeqCst));
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let worker = LinkWorker {
            link,
            peripheral: peripheral.clone(),
            events: event_tx,
            notifications: None,
        };
        let worker = tokio::spawn(worker.run(request_rx, central_events));

        self.links.insert(
            link,
            LinkSlot {
                address: address.clone(),
                peripheral,
                requests: request_tx,
                worker,
            },
        );
        debug!("Opening {} to {}", link, address);
        Ok((link, event_rx))
    }

    pub async fn discover_attributes(&self, link: LinkHandle) -> BleResult<()> {
        self.request(link, LinkRequest::Discover).await
    }

    pub async fn negotiate_mtu(&self, link: LinkHandle) -> BleResult<()> {
        self.request(link, LinkRequest::NegotiateMtu).await
    }

    pub async fn read(&self, link: LinkHandle, attribute: Uuid, offset: u16) -> BleResult<()> {
        self.request(link, LinkRequest::Read { attribute, offset }).await
    }

    pub async fn write(&self, link: LinkHandle, attribute: Uuid, value: Vec<u8>) -> BleResult<()> {
        self.request(link, LinkRequest::Write { attribute, value }).await
    }

    /// Disconnect and forget the link; closing an unknown link is a no-op
    pub async fn close(&self, link: LinkHandle) -> BleResult<()> {
        let Some((_, slot)) = self.links.remove(&link) else {
            return Ok(());
        };
        slot.worker.abort();
        if let Err(e) = slot.peripheral.disconnect().await {
            warn!("Disconnecting {} from {} failed: {}", link, slot.address, e);
        }
        info!("Closed {} to {}", link, slot.address);
        Ok(())
    }

    async fn request(&self, link: LinkHandle, request: LinkRequest) -> BleResult<()> {
        let closed = || BleTransportError::LinkClosed {
            link: link.to_string(),
        };
        let requests = self
            .links
            .get(&link)
            .map(|slot| slot.requests.clone())
            .ok_or_else(closed)?;
        requests.send(request).await.map_err(|_| closed())
    }
}

impl Drop for BleCentral {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.scan).take() {
            task.abort();
        }
        for slot in self.links.iter() {
            slot.worker.abort();
        }
    }
}

async fn read_advertisement(
    adapter: &Adapter,
    peripherals: &DashMap<LinkAddress, Peripheral>,
    id: &PeripheralId,
) -> Option<Advertisement> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;

    let address = LinkAddress::new(properties.address.to_string());
    peripherals.insert(address.clone(), peripheral);
    Some(Advertisement {
        address,
        local_name: properties.local_name,
        service_uuids: properties.services,
        rssi: properties.rssi,
    })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ----------------------------------------------------------------------------
// Link Worker
// ----------------------------------------------------------------------------

enum Step {
    Request(Option<LinkRequest>),
    Central(Option<CentralEvent>),
    Notification(Option<ValueNotification>),
}

struct LinkWorker {
    link: LinkHandle,
    peripheral: Peripheral,
    events: mpsc::Sender<LinkEvent>,
    notifications: Option<EventStream<ValueNotification>>,
}

impl LinkWorker {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<LinkRequest>,
        central_events: EventStream<CentralEvent>,
    ) {
        let status = match self.peripheral.connect().await {
            Ok(()) => GattStatus::SUCCESS,
            Err(e) => {
                error!("Connecting {} failed: {}", self.link, e);
                GattStatus::FAILURE
            }
        };
        if !self.emit(LinkEvent::Connected { status }).await || !status.is_success() {
            return;
        }

        let peripheral_id = self.peripheral.id();
        let mut central_events = Some(central_events);
        loop {
            let step = tokio::select! {
                request = requests.recv() => Step::Request(request),
                event = next_item(&mut central_events) => Step::Central(event),
                notification = next_item(&mut self.notifications) => Step::Notification(notification),
            };

            match step {
                Step::Request(Some(request)) => {
                    let event = self.execute(request).await;
                    if !self.emit(event).await {
                        break;
                    }
                }
                Step::Request(None) => break,
                Step::Central(Some(CentralEvent::DeviceDisconnected(id))) if id == peripheral_id => {
                    info!("{} disconnected by the remote peer", self.link);
                    self.emit(LinkEvent::Disconnected {
                        status: GattStatus::SUCCESS,
                    })
                    .await;
                    break;
                }
                Step::Central(Some(_)) => {}
                Step::Central(None) => central_events = None,
                Step::Notification(Some(notification)) => {
                    if notification.uuid != BLUECHAT_CHARACTERISTIC_UUID {
                        continue;
                    }
                    let event = LinkEvent::Notification {
                        value: notification.value,
                    };
                    if !self.emit(event).await {
                        break;
                    }
                }
                Step::Notification(None) => self.notifications = None,
            }
        }
        debug!("Worker for {} stopped", self.link);
    }

    async fn execute(&mut self, request: LinkRequest) -> LinkEvent {
        match request {
            LinkRequest::Discover => match self.peripheral.discover_services().await {
                Ok(()) => {
                    let services = self.peripheral.services().iter().map(|s| s.uuid).collect();
                    self.subscribe().await;
                    LinkEvent::ServicesDiscovered {
                        status: GattStatus::SUCCESS,
                        services,
                    }
                }
                Err(e) => {
                    error!("Service discovery on {} failed: {}", self.link, e);
                    LinkEvent::ServicesDiscovered {
                        status: GattStatus::FAILURE,
                        services: Vec::new(),
                    }
                }
            },
            LinkRequest::NegotiateMtu => LinkEvent::MtuUnsupported,
            LinkRequest::Read { attribute, offset } => {
                let Some(characteristic) = self.characteristic(attribute) else {
                    return LinkEvent::ReadComplete {
                        status: GattStatus::REQUEST_NOT_SUPPORTED,
                        value: Vec::new(),
                    };
                };
                match self.peripheral.read(&characteristic).await {
                    Ok(value) => LinkEvent::ReadComplete {
                        status: GattStatus::SUCCESS,
                        value: value.get(offset as usize..).unwrap_or_default().to_vec(),
                    },
                    Err(e) => {
                        error!("Read on {} failed: {}", self.link, e);
                        LinkEvent::ReadComplete {
                            status: GattStatus::FAILURE,
                            value: Vec::new(),
                        }
                    }
                }
            }
            LinkRequest::Write { attribute, value } => {
                let Some(characteristic) = self.characteristic(attribute) else {
                    return LinkEvent::WriteComplete {
                        status: GattStatus::REQUEST_NOT_SUPPORTED,
                    };
                };
                let status = match self
                    .peripheral
                    .write(&characteristic, &value, WriteType::WithResponse)
                    .await
                {
                    Ok(()) => GattStatus::SUCCESS,
                    Err(e) => {
                        error!("Write on {} failed: {}", self.link, e);
                        GattStatus::FAILURE
                    }
                };
                LinkEvent::WriteComplete { status }
            }
        }
    }

    /// Subscribe to chat characteristic notifications when the peer offers them
    async fn subscribe(&mut self) {
        let Some(characteristic) = self.characteristic(BLUECHAT_CHARACTERISTIC_UUID) else {
            return;
        };
        if !characteristic.properties.contains(CharPropFlags::NOTIFY) {
            return;
        }
        if let Err(e) = self.peripheral.subscribe(&characteristic).await {
            warn!("Subscribing on {} failed: {}", self.link, e);
            return;
        }
        match self.peripheral.notifications().await {
            Ok(stream) => self.notifications = Some(stream),
            Err(e) => warn!("No notification stream on {}: {}", self.link, e),
        }
    }

    fn characteristic(&self, attribute: Uuid) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == attribute)
    }

    /// Deliver `event`; false once the session stopped listening
    async fn emit(&self, event: LinkEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

async fn next_item<T>(stream: &mut Option<EventStream<T>>) -> Option<T> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_next_item_drains_stream() {
        let mut stream: Option<EventStream<u8>> = Some(Box::pin(futures::stream::iter([1, 2])));
        assert_eq!(next_item(&mut stream).await, Some(1));
        assert_eq!(next_item(&mut stream).await, Some(2));
        assert_eq!(next_item(&mut stream).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_item_without_stream_never_yields() {
        let mut stream: Option<EventStream<u8>> = None;
        let result = tokio::time::timeout(Duration::from_secs(1), next_item(&mut stream)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_requests_to_unknown_link_fail() {
        let central = BleCentral::new(BleTransportConfig::default());
        let err = central.write(LinkHandle(9), BLUECHAT_CHARACTERISTIC_UUID, vec![1]).await;
        assert!(matches!(err, Err(BleTransportError::LinkClosed { .. })));
        assert!(central.stop_scan().await.is_ok());
    }
}
