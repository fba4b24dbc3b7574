//! BlueChat node owned by the CLI

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use bluechat_core::{CoreEvent, FileStorage, IdentityStore, PeerIdentity, RadioTransport};
use bluechat_runtime::SessionCoordinator;

use crate::config::CliAppConfig;
use crate::error::Result;
use crate::store::JsonFileStore;

/// A coordinator wired to on-disk identity and history
pub struct BluechatApp {
    config: CliAppConfig,
    coordinator: SessionCoordinator,
    events: mpsc::Receiver<CoreEvent>,
}

impl BluechatApp {
    /// Open the node's state under the configured data directory
    pub fn open(config: CliAppConfig, transport: Arc<dyn RadioTransport>) -> Result<Self> {
        let identity_store = IdentityStore::new(FileStorage::new(config.identity_path()?));
        let store = Arc::new(JsonFileStore::open(config.history_path()?)?);

        let mut builder = SessionCoordinator::builder(transport)
            .with_config(config.core.clone())
            .with_store(store)
            .with_identity_store(&identity_store)
            .with_local_name_prefix(config.ble.local_name_prefix.clone());
        if let Some(filter) = &config.cli.name_filter {
            builder = builder.with_name_filter(filter.clone());
        }
        let (coordinator, events) = builder.build()?;

        info!(
            "Opened BlueChat node {} in {}",
            coordinator.local_identity(),
            config.data_dir()?.display()
        );
        Ok(Self {
            config,
            coordinator,
            events,
        })
    }

    pub fn config(&self) -> &CliAppConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub fn local_identity(&self) -> PeerIdentity {
        self.coordinator.local_identity()
    }

    /// Next application event; `None` once the coordinator is gone
    pub async fn next_event(&mut self) -> Option<CoreEvent> {
        self.events.recv().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.coordinator.shutdown().await?;
        Ok(())
    }
}
