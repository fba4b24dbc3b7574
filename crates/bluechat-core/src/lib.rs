//! BlueChat Core Protocol Implementation
//!
//! This crate provides the foundational types, identity handling, payload
//! codec and connection state machine for BlueChat, a two-party chat over
//! Bluetooth Low Energy. It performs no radio I/O itself: the radio is reached
//! through [`transport::RadioTransport`] and the async orchestration lives in
//! `bluechat-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod codec;
pub mod config;
pub mod errors;
pub mod events;
pub mod identity;
pub mod persistence;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use codec::MessageCodec;
pub use config::BluechatConfig;
pub use errors::{BluechatError, Result};
pub use events::CoreEvent;
pub use identity::{FileStorage, IdentityStorage, IdentityStore, MemoryStorage};
pub use persistence::{ChatStore, MemoryChatStore};
pub use presence::PresenceTracker;
pub use protocol::GattStatus;
pub use session::{
    ConnectionState, FailureReason, LinkOperation, PeerTarget, SessionEffect, SessionInput,
    SessionState, StateTransition,
};
pub use transport::{
    Advertisement, AdvertisementPayload, LinkEvent, LinkHandle, RadioTransport, RequestId,
    ScanFilter, ServerEvent, ServiceDescriptor,
};
pub use types::{
    ChatMessage, Direction, KnownPeer, LinkAddress, MessageId, NewMessage, PeerIdentity,
    ScanSighting, Timestamp,
};
