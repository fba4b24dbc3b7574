//! Linux peripheral role using bluer (BlueZ)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicRead, CharacteristicReadFun,
    CharacteristicReadRequest, CharacteristicWrite, CharacteristicWriteFun,
    CharacteristicWriteMethod, CharacteristicWriteRequest, ReqError, ReqResult, Service,
};
use bluer::gatt::WriteOp;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use bluechat_core::protocol::GattStatus;
use bluechat_core::transport::{AdvertisementPayload, RequestId, ServerEvent, ServiceDescriptor};
use bluechat_core::LinkAddress;

use super::{PendingRequests, PeripheralRole, Response};
use crate::config::BleTransportConfig;
use crate::error::{BleResult, BleTransportError};

const CHANNEL_CAPACITY: usize = 64;

// ----------------------------------------------------------------------------
// BlueZ Peripheral
// ----------------------------------------------------------------------------

#[derive(Default)]
struct BluezState {
    session: Option<bluer::Session>,
    adapter: Option<bluer::Adapter>,
    /// Dropping the handle unregisters the GATT application
    application: Option<ApplicationHandle>,
    /// Dropping the handle stops advertising
    advertisement: Option<AdvertisementHandle>,
}

pub struct BluezPeripheral {
    config: BleTransportConfig,
    pending: Arc<PendingRequests>,
    state: Mutex<BluezState>,
    advertising: AtomicBool,
}

impl BluezPeripheral {
    pub fn new(config: BleTransportConfig) -> Self {
        Self {
            config,
            pending: Arc::new(PendingRequests::new()),
            state: Mutex::new(BluezState::default()),
            advertising: AtomicBool::new(false),
        }
    }

    /// The powered adapter, connecting to BlueZ on first use
    async fn adapter(&self, state: &mut BluezState) -> BleResult<bluer::Adapter> {
        if let Some(adapter) = &state.adapter {
            return Ok(adapter.clone());
        }

        let unavailable = |e: bluer::Error| BleTransportError::AdapterNotAvailable(e.to_string());
        let session = bluer::Session::new().await.map_err(unavailable)?;
        let names = session.adapter_names().await.map_err(unavailable)?;
        let name = names.get(self.config.adapter_index).ok_or_else(|| {
            BleTransportError::AdapterNotAvailable(format!(
                "no adapter at index {}",
                self.config.adapter_index
            ))
        })?;
        let adapter = session.adapter(name).map_err(unavailable)?;

        if !adapter.is_powered().await.unwrap_or(false) {
            adapter
                .set_powered(true)
                .await
                .map_err(|e| BleTransportError::failed("power on adapter", e))?;
        }

        info!("BlueZ adapter {} initialized for the peripheral role", name);
        state.session = Some(session);
        state.adapter = Some(adapter.clone());
        Ok(adapter)
    }
}

#[async_trait]
impl PeripheralRole for BluezPeripheral {
    async fn advertise(&self, payload: AdvertisementPayload) -> BleResult<()> {
        let mut state = self.state.lock().await;
        let adapter = self.adapter(&mut state).await?;

        let advertisement = Advertisement {
            advertisement_type: AdvertisementType::Peripheral,
            service_uuids: payload.service_uuids().into_iter().collect(),
            local_name: payload.local_name.clone(),
            discoverable: Some(true),
            ..Default::default()
        };
        let handle = adapter
            .advertise(advertisement)
            .await
            .map_err(|e| BleTransportError::failed("advertise", e))?;

        // Replacing the previous handle stops the old advertisement
        state.advertisement = Some(handle);
        self.advertising.store(true, Ordering::SeqCst);
        info!("Advertising {}", payload.advertised_identifier);
        Ok(())
    }

    async fn stop_advertising(&self) -> BleResult<()> {
        if self.state.lock().await.advertisement.take().is_some() {
            info!("Stopped BLE advertising");
        }
        self.advertising.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    async fn open_server(
        &self,
        service: ServiceDescriptor,
    ) -> BleResult<mpsc::Receiver<ServerEvent>> {
        let mut state = self.state.lock().await;
        let adapter = self.adapter(&mut state).await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let bridge = Bridge {
            events: tx,
            pending: Arc::clone(&self.pending),
            timeout: self.config.request_timeout,
        };
        let attribute = service.characteristic_uuid;

        let characteristic = Characteristic {
            uuid: attribute,
            read: service.readable.then(|| CharacteristicRead {
                read: true,
                fun: read_handler(attribute, bridge.clone()),
                ..Default::default()
            }),
            write: service.writable.then(|| CharacteristicWrite {
                write: true,
                write_without_response: true,
                method: CharacteristicWriteMethod::Fun(write_handler(attribute, bridge.clone())),
                ..Default::default()
            }),
            ..Default::default()
        };
        let application = Application {
            services: vec![Service {
                uuid: service.service_uuid,
                primary: true,
                characteristics: vec![characteristic],
                ..Default::default()
            }],
            ..Default::default()
        };

        let handle = adapter
            .serve_gatt_application(application)
            .await
            .map_err(|e| BleTransportError::failed("register GATT service", e))?;
        state.application = Some(handle);
        info!("Registered GATT service {}", service.service_uuid);
        Ok(rx)
    }

    async fn close_server(&self) -> BleResult<()> {
        if self.state.lock().await.application.take().is_some() {
            info!("Unregistered GATT service");
        }
        self.pending.cancel_all();
        Ok(())
    }

    async fn respond(
        &self,
        request_id: RequestId,
        status: GattStatus,
        value: Vec<u8>,
    ) -> BleResult<()> {
        if self.pending.resolve(request_id, status, value) {
            Ok(())
        } else {
            Err(BleTransportError::UnknownRequest(request_id.to_string()))
        }
    }
}

// ----------------------------------------------------------------------------
// Callback Bridge
// ----------------------------------------------------------------------------

#[derive(Clone)]
struct Bridge {
    events: mpsc::Sender<ServerEvent>,
    pending: Arc<PendingRequests>,
    timeout: Duration,
}

impl Bridge {
    /// Forward `event` and wait for the runtime's response to `request_id`
    async fn forward(
        &self,
        request_id: RequestId,
        event: ServerEvent,
        response: oneshot::Receiver<Response>,
    ) -> ReqResult<Response> {
        if self.events.send(event).await.is_err() {
            self.pending.cancel(request_id);
            return Err(ReqError::Failed);
        }

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(response)) => status_result(response.status).map(|()| response),
            Ok(Err(_)) => Err(ReqError::Failed),
            Err(_) => {
                warn!("No response to {} within {:?}", request_id, self.timeout);
                self.pending.cancel(request_id);
                Err(ReqError::Failed)
            }
        }
    }
}

fn read_handler(attribute: Uuid, bridge: Bridge) -> CharacteristicReadFun {
    Box::new(move |request: CharacteristicReadRequest| {
        let bridge = bridge.clone();
        Box::pin(async move {
            let (request_id, response) = bridge.pending.register();
            let event = ServerEvent::ReadRequest {
                request_id,
                address: LinkAddress::new(request.device_address.to_string()),
                attribute,
                offset: request.offset,
            };
            bridge
                .forward(request_id, event, response)
                .await
                .map(|response| response.value)
        })
    })
}

fn write_handler(attribute: Uuid, bridge: Bridge) -> CharacteristicWriteFun {
    Box::new(move |value: Vec<u8>, request: CharacteristicWriteRequest| {
        let bridge = bridge.clone();
        Box::pin(async move {
            let address = LinkAddress::new(request.device_address.to_string());
            let response_needed = !matches!(request.op_type, WriteOp::Command);
            debug!("{} writes {} bytes (mtu {})", address, value.len(), request.mtu);

            if !response_needed {
                let event = ServerEvent::WriteRequest {
                    request_id: bridge.pending.next_id(),
                    address,
                    attribute,
                    offset: request.offset,
                    value,
                    response_needed,
                };
                return bridge.events.send(event).await.map_err(|_| ReqError::Failed);
            }

            let (request_id, response) = bridge.pending.register();
            let event = ServerEvent::WriteRequest {
                request_id,
                address,
                attribute,
                offset: request.offset,
                value,
                response_needed,
            };
            bridge.forward(request_id, event, response).await.map(|_| ())
        })
    })
}

/// BlueZ result for a runtime status
fn status_result(status: GattStatus) -> ReqResult<()> {
    match status {
        GattStatus::SUCCESS => Ok(()),
        GattStatus::INVALID_OFFSET => Err(ReqError::InvalidOffset),
        GattStatus::REQUEST_NOT_SUPPORTED => Err(ReqError::NotSupported),
        _ => Err(ReqError::Failed),
    }
}
