//! BlueChat Runtime Engine
//!
//! This crate contains the async side of BlueChat, built on the pure types and
//! state machine in `bluechat-core`:
//! - `Scanner`: discovery of nearby peers with per-scan deduplication
//! - `GattServer`: the server role answering inbound reads and writes
//! - `ClientSession`: one actor per outbound connection
//! - `SessionCoordinator`: wires the roles together and persists history
//!
//! Everything talks to the radio through `bluechat_core::RadioTransport`, so
//! the same runtime drives real hardware and the in-memory test harness.

pub mod client;
pub mod coordinator;
pub mod directory;
pub mod events;
pub mod link;
pub mod scanner;
pub mod server;

pub use client::{ClientSession, SessionView};
pub use coordinator::{CoordinatorBuilder, SessionCoordinator};
pub use directory::PeerDirectory;
pub use events::RoleEvent;
pub use link::LinkGuard;
pub use scanner::{ScanStream, Scanner};
pub use server::GattServer;

// Re-export core types for convenience
pub use bluechat_core::{
    BluechatConfig, BluechatError, ChatMessage, ConnectionState, CoreEvent, KnownPeer,
    PeerIdentity, Result,
};
