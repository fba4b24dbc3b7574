//! Bluetooth Low Energy radio transport for BlueChat
//!
//! This crate implements the `RadioTransport` trait from `bluechat-core` on
//! top of the host Bluetooth stack, so the BlueChat runtime can scan, host and
//! connect over real hardware.
//!
//! ## Architecture
//!
//! - [`config`] - Adapter selection and request timeouts
//! - [`error`] - Error types specific to the BLE transport
//! - [`central`] - Scanning and client links through btleplug
//! - [`peripheral`] - GATT server and advertising per platform
//! - [`transport`] - The `RadioTransport` implementation tying both roles together
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bluechat_ble::{BleTransport, BleTransportConfig};
//! use bluechat_core::RadioTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BleTransportConfig::new().with_adapter_index(0);
//! let transport: Arc<dyn RadioTransport> = Arc::new(BleTransport::with_config(config));
//!
//! if !transport.is_radio_available().await {
//!     eprintln!("Bluetooth is off");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: Central and peripheral roles; hosting uses BlueZ via `bluer`
//! - **Other platforms**: Central role only; hosting reports
//!   [`BleTransportError::PeripheralUnsupported`]
//!
//! btleplug exposes no MTU exchange, so every link reports `MtuUnsupported`
//! and sessions use the default 20-byte payload.

pub mod central;
pub mod config;
pub mod error;
pub mod peripheral;
pub mod transport;

pub use central::BleCentral;
pub use config::BleTransportConfig;
pub use error::{BleResult, BleTransportError};
pub use peripheral::{platform_peripheral, PendingRequests, PeripheralRole};
pub use transport::BleTransport;
