//! BLE peripheral role: GATT server and advertising
//!
//! The radio stack answers GATT requests through callbacks, while the runtime
//! answers through [`RadioTransport::respond`](bluechat_core::RadioTransport).
//! [`PendingRequests`] bridges the two: a callback registers a request id,
//! forwards a [`ServerEvent`] and waits for the matching response.

#[cfg(not(target_os = "linux"))]
mod fallback;
#[cfg(target_os = "linux")]
mod linux;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use bluechat_core::protocol::GattStatus;
use bluechat_core::transport::{AdvertisementPayload, RequestId, ServerEvent, ServiceDescriptor};

use crate::config::BleTransportConfig;
use crate::error::BleResult;

// ----------------------------------------------------------------------------
// Peripheral Role Trait
// ----------------------------------------------------------------------------

/// Server side of the BLE transport on one platform
#[async_trait]
pub trait PeripheralRole: Send + Sync {
    async fn advertise(&self, payload: AdvertisementPayload) -> BleResult<()>;

    async fn stop_advertising(&self) -> BleResult<()>;

    fn is_advertising(&self) -> bool;

    async fn open_server(&self, service: ServiceDescriptor)
        -> BleResult<mpsc::Receiver<ServerEvent>>;

    async fn close_server(&self) -> BleResult<()>;

    async fn respond(&self, request_id: RequestId, status: GattStatus, value: Vec<u8>)
        -> BleResult<()>;
}

/// The peripheral implementation for the current platform
pub fn platform_peripheral(config: &BleTransportConfig) -> Box<dyn PeripheralRole> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::BluezPeripheral::new(config.clone()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(fallback::FallbackPeripheral::new(config.clone()))
    }
}

// ----------------------------------------------------------------------------
// Pending Requests
// ----------------------------------------------------------------------------

/// The runtime's answer to one server request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: GattStatus,
    pub value: Vec<u8>,
}

/// Server requests waiting for the runtime to respond
#[derive(Debug, Default)]
pub struct PendingRequests {
    next: AtomicU64,
    waiting: DashMap<RequestId, oneshot::Sender<Response>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh id for a request that expects no response
    pub fn next_id(&self) -> RequestId {
        RequestId(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Register a request and get the receiver for its response
    pub fn register(&self) -> (RequestId, oneshot::Receiver<Response>) {
        let request_id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.waiting.insert(request_id, tx);
        (request_id, rx)
    }

    /// Deliver the response for `request_id`; false if nobody is waiting
    pub fn resolve(&self, request_id: RequestId, status: GattStatus, value: Vec<u8>) -> bool {
        match self.waiting.remove(&request_id) {
            Some((_, tx)) => tx.send(Response { status, value }).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, request_id: RequestId) {
        self.waiting.remove(&request_id);
    }

    /// Drop every waiting request; their callbacks see the sender vanish
    pub fn cancel_all(&self) {
        self.waiting.clear();
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_delivers_response() {
        let pending = PendingRequests::new();
        let (request_id, response) = pending.register();
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve(request_id, GattStatus::SUCCESS, b"hi".to_vec()));
        assert_eq!(
            response.await.unwrap(),
            Response {
                status: GattStatus::SUCCESS,
                value: b"hi".to_vec()
            }
        );
        assert!(pending.is_empty());
        assert!(!pending.resolve(request_id, GattStatus::SUCCESS, Vec::new()));
    }

    #[tokio::test]
    async fn test_cancel_drops_waiter() {
        let pending = PendingRequests::new();
        let (first, first_response) = pending.register();
        let (_second, second_response) = pending.register();
        assert_ne!(first, pending.next_id());

        pending.cancel(first);
        assert!(first_response.await.is_err());
        assert_eq!(pending.len(), 1);

        pending.cancel_all();
        assert!(second_response.await.is_err());
        assert!(pending.is_empty());
    }
}
