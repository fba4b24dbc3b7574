//! Server Role
//!
//! Exposes the chat characteristic to remote clients and advertises the local
//! identity. A single serving task handles every inbound request in arrival
//! order; it is also the only writer of the last received payload.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use bluechat_core::codec::decode_payload;
use bluechat_core::protocol::{GattStatus, BLUECHAT_CHARACTERISTIC_UUID};
use bluechat_core::transport::{
    AdvertisementPayload, RadioTransport, RequestId, ServerEvent, ServiceDescriptor,
};
use bluechat_core::{BluechatError, LinkAddress, PeerIdentity, Result};

use crate::directory::PeerDirectory;
use crate::events::RoleEvent;

#[derive(Default)]
struct ServerState {
    task: Option<JoinHandle<()>>,
    advertising: bool,
}

/// GATT server hosting the chat characteristic
pub struct GattServer {
    transport: Arc<dyn RadioTransport>,
    directory: Arc<PeerDirectory>,
    events: mpsc::Sender<RoleEvent>,
    last_payload: Arc<watch::Sender<Vec<u8>>>,
    state: Mutex<ServerState>,
}

impl GattServer {
    pub fn new(
        transport: Arc<dyn RadioTransport>,
        directory: Arc<PeerDirectory>,
        events: mpsc::Sender<RoleEvent>,
    ) -> Self {
        let (last_payload, _) = watch::channel(Vec::new());
        Self {
            transport,
            directory,
            events,
            last_payload: Arc::new(last_payload),
            state: Mutex::new(ServerState::default()),
        }
    }

    /// Open the server and start serving requests; no-op when already running
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if !self.transport.is_radio_available().await {
            return Err(BluechatError::RadioUnavailable);
        }

        let requests = self.transport.open_server(ServiceDescriptor::bluechat()).await?;
        let task = tokio::spawn(serve(
            Arc::clone(&self.transport),
            Arc::clone(&self.directory),
            self.events.clone(),
            Arc::clone(&self.last_payload),
            requests,
        ));
        self.lock().task = Some(task);
        info!("GATT server started");
        Ok(())
    }

    pub async fn start_advertising(&self, payload: AdvertisementPayload) -> Result<()> {
        let identifier = payload.advertised_identifier.clone();
        self.transport.advertise(payload).await?;
        self.lock().advertising = true;
        info!("Advertising as {}", identifier);
        Ok(())
    }

    pub async fn stop_advertising(&self) -> Result<()> {
        let was_advertising = std::mem::take(&mut self.lock().advertising);
        if was_advertising {
            self.transport.stop_advertising().await?;
            info!("Advertising stopped");
        }
        Ok(())
    }

    /// Stop advertising and close the server; safe to call repeatedly
    ///
    /// The listener is closed even when advertising fails to stop; the first
    /// error is returned.
    pub async fn stop(&self) -> Result<()> {
        let advertising = self.stop_advertising().await;
        if let Err(e) = &advertising {
            warn!("Failed to stop advertising: {}", e);
        }

        let task = self.lock().task.take();
        let closing = match task {
            Some(task) => {
                task.abort();
                let closed = self.transport.close_server().await;
                info!("GATT server stopped");
                closed
            }
            None => Ok(()),
        };
        advertising.and(closing)
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn is_advertising(&self) -> bool {
        self.lock().advertising
    }

    /// The most recent successfully decoded payload written by a client
    pub fn last_payload(&self) -> Vec<u8> {
        self.last_payload.borrow().clone()
    }

    pub fn subscribe_payload(&self) -> watch::Receiver<Vec<u8>> {
        self.last_payload.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for GattServer {
    fn drop(&mut self) {
        let ServerState { task, advertising } = std::mem::take(&mut *self.lock());
        let Some(task) = task else {
            return;
        };
        task.abort();

        // Best effort: release the radio if a runtime is still around
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let transport = Arc::clone(&self.transport);
            handle.spawn(async move {
                if advertising {
                    let _ = transport.stop_advertising().await;
                }
                let _ = transport.close_server().await;
            });
        }
    }
}

// ----------------------------------------------------------------------------
// Serving Task
// ----------------------------------------------------------------------------

async fn serve(
    transport: Arc<dyn RadioTransport>,
    directory: Arc<PeerDirectory>,
    events: mpsc::Sender<RoleEvent>,
    last_payload: Arc<watch::Sender<Vec<u8>>>,
    mut requests: mpsc::Receiver<ServerEvent>,
) {
    while let Some(request) = requests.recv().await {
        match request {
            ServerEvent::ClientConnected { address } => {
                info!("Client {} connected", address);
            }
            ServerEvent::ClientDisconnected { address } => {
                info!("Client {} disconnected", address);
            }
            ServerEvent::MtuChanged { address, mtu } => {
                debug!("Client {} negotiated MTU {}", address, mtu);
            }
            ServerEvent::WriteRequest {
                request_id,
                address,
                attribute,
                offset,
                value,
                response_needed,
            } => {
                if attribute != BLUECHAT_CHARACTERISTIC_UUID {
                    if response_needed {
                        respond(
                            &*transport,
                            request_id,
                            GattStatus::REQUEST_NOT_SUPPORTED,
                            offset,
                            Vec::new(),
                        )
                        .await;
                    }
                    continue;
                }

                let inbound = match decode_payload(&value) {
                    Ok(content) => {
                        last_payload.send_replace(value);
                        Some(content)
                    }
                    Err(e) => {
                        warn!("Dropping write from {}: {}", address, e);
                        None
                    }
                };

                if response_needed {
                    respond(&*transport, request_id, GattStatus::SUCCESS, offset, Vec::new())
                        .await;
                }

                if let Some(content) = inbound {
                    let identity = directory
                        .identity_for(&address)
                        .unwrap_or(PeerIdentity::UNATTRIBUTED);
                    debug!("Received {} bytes from {} ({})", content.len(), address, identity);
                    let event = RoleEvent::Inbound {
                        identity,
                        address,
                        content,
                    };
                    if events.send(event).await.is_err() {
                        debug!("Event pump closed, stopping server task");
                        break;
                    }
                }
            }
            ServerEvent::ReadRequest {
                request_id,
                address,
                attribute,
                offset,
            } => {
                if attribute != BLUECHAT_CHARACTERISTIC_UUID {
                    respond(
                        &*transport,
                        request_id,
                        GattStatus::REQUEST_NOT_SUPPORTED,
                        offset,
                        Vec::new(),
                    )
                    .await;
                    continue;
                }
                let value = read_slice(&last_payload.borrow(), offset, &address);
                respond(&*transport, request_id, GattStatus::SUCCESS, offset, value).await;
            }
        }
    }
    debug!("Server request stream ended");
}

/// Last payload from `offset`; empty when the offset is past the end
fn read_slice(payload: &[u8], offset: u16, address: &LinkAddress) -> Vec<u8> {
    let value = payload.get(offset as usize..).unwrap_or_default().to_vec();
    debug!("Client {} read {} bytes at offset {}", address, value.len(), offset);
    value
}

async fn respond(
    transport: &dyn RadioTransport,
    request_id: RequestId,
    status: GattStatus,
    offset: u16,
    value: Vec<u8>,
) {
    if let Err(e) = transport.respond(request_id, status, offset, value).await {
        error!("Failed to answer {}: {}", request_id, e);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
