//! BlueChat CLI library
//!
//! Configuration, on-disk chat history and the command handlers behind the
//! `bluechat` binary. Handlers take any `RadioTransport`, so they run against
//! the BLE backend in the binary and against the mock radio in tests.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod store;

pub use app::BluechatApp;
pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{CliAppConfig, CliOverrides, ConfigError};
pub use error::{CliError, Result};
pub use store::JsonFileStore;
