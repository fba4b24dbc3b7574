//! Session Coordinator
//!
//! Owns the roles of one BlueChat node: the GATT server for hosting, the
//! discovery scanner and at most one outbound client session. A single event
//! pump consumes everything the roles report, persists messages and known
//! peers, and forwards [`CoreEvent`]s to the application.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use bluechat_core::identity::{IdentityStorage, IdentityStore, MemoryStorage};
use bluechat_core::protocol::{self, BLUECHAT_SERVICE_UUID};
use bluechat_core::session::PeerTarget;
use bluechat_core::transport::{AdvertisementPayload, RadioTransport};
use bluechat_core::{
    BluechatConfig, BluechatError, ChatMessage, ChatStore, CoreEvent, KnownPeer, MemoryChatStore,
    MessageCodec, NewMessage, PeerIdentity, PresenceTracker, Result, Timestamp,
};

use crate::client::{self, ClientSession, SessionView};
use crate::directory::PeerDirectory;
use crate::events::RoleEvent;
use crate::scanner::Scanner;
use crate::server::GattServer;

// ----------------------------------------------------------------------------
// Coordinator Builder
// ----------------------------------------------------------------------------

/// Builder wiring a [`SessionCoordinator`] to its collaborators
pub struct CoordinatorBuilder {
    transport: Arc<dyn RadioTransport>,
    store: Option<Arc<dyn ChatStore>>,
    local_identity: Option<PeerIdentity>,
    config: BluechatConfig,
    local_name_prefix: Option<String>,
    name_filter: Option<String>,
}

impl CoordinatorBuilder {
    pub fn new(transport: Arc<dyn RadioTransport>) -> Self {
        Self {
            transport,
            store: None,
            local_identity: None,
            config: BluechatConfig::default(),
            local_name_prefix: None,
            name_filter: None,
        }
    }

    pub fn with_config(mut self, config: BluechatConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist messages and known peers in `store` (in memory by default)
    pub fn with_store(mut self, store: Arc<dyn ChatStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Resolve the local identity from `identity_store`
    pub fn with_identity_store<S: IdentityStorage>(
        mut self,
        identity_store: &IdentityStore<S>,
    ) -> Self {
        self.local_identity = Some(identity_store.get_or_create_identity());
        self
    }

    pub fn with_identity(mut self, identity: PeerIdentity) -> Self {
        self.local_identity = Some(identity);
        self
    }

    /// Advertise a local name of `<prefix><identity>`
    pub fn with_local_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.local_name_prefix = Some(prefix.into());
        self
    }

    /// Only report discovered peers whose advertised name starts with `prefix`
    pub fn with_name_filter(mut self, prefix: impl Into<String>) -> Self {
        self.name_filter = Some(prefix.into());
        self
    }

    /// Build the coordinator and the receiver for its application events
    pub fn build(self) -> Result<(SessionCoordinator, mpsc::Receiver<CoreEvent>)> {
        self.config.validate().map_err(BluechatError::configuration)?;

        let local_identity = match self.local_identity {
            Some(identity) => identity,
            None => IdentityStore::new(MemoryStorage::new()).get_or_create_identity(),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryChatStore::new()));

        let buffer = self.config.event_buffer;
        let (role_tx, role_rx) = mpsc::channel(buffer);
        let (core_tx, core_rx) = mpsc::channel(buffer);

        let presence = Arc::new(PresenceTracker::new(self.config.presence_window));
        let directory = Arc::new(PeerDirectory::new());
        let scanner = Scanner::new(
            Arc::clone(&self.transport),
            Arc::clone(&presence),
            Arc::clone(&directory),
            buffer,
        );
        let server = GattServer::new(
            Arc::clone(&self.transport),
            Arc::clone(&directory),
            role_tx.clone(),
        );

        let pump = tokio::spawn(run_event_pump(
            role_rx,
            Arc::clone(&store),
            core_tx,
            local_identity,
        ));

        info!("BlueChat node {} ready", local_identity);
        let coordinator = SessionCoordinator {
            transport: self.transport,
            store,
            config: self.config,
            local_identity,
            local_name_prefix: self.local_name_prefix,
            name_filter: self.name_filter,
            presence,
            directory,
            scanner,
            server,
            session: tokio::sync::Mutex::new(None),
            discovery: Mutex::new(None),
            role_tx,
            pump,
        };
        Ok((coordinator, core_rx))
    }
}

// ----------------------------------------------------------------------------
// Session Coordinator
// ----------------------------------------------------------------------------

/// Entry point for hosting, discovering, connecting and chatting
pub struct SessionCoordinator {
    transport: Arc<dyn RadioTransport>,
    store: Arc<dyn ChatStore>,
    config: BluechatConfig,
    local_identity: PeerIdentity,
    local_name_prefix: Option<String>,
    name_filter: Option<String>,
    presence: Arc<PresenceTracker>,
    directory: Arc<PeerDirectory>,
    scanner: Scanner,
    server: GattServer,
    session: tokio::sync::Mutex<Option<ClientSession>>,
    discovery: Mutex<Option<JoinHandle<()>>>,
    role_tx: mpsc::Sender<RoleEvent>,
    pump: JoinHandle<()>,
}

impl SessionCoordinator {
    pub fn builder(transport: Arc<dyn RadioTransport>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(transport)
    }

    pub fn local_identity(&self) -> PeerIdentity {
        self.local_identity
    }

    pub fn config(&self) -> &BluechatConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Hosting
    // ------------------------------------------------------------------------

    /// What this node advertises while hosting
    pub fn advertisement(&self) -> AdvertisementPayload {
        AdvertisementPayload {
            service_uuid: BLUECHAT_SERVICE_UUID,
            advertised_identifier: protocol::build_advertised_identifier(&self.local_identity),
            local_name: self
                .local_name_prefix
                .as_deref()
                .map(|prefix| protocol::generate_device_name(&self.local_identity, prefix)),
        }
    }

    /// Open the server and advertise the local identity
    pub async fn host(&self) -> Result<()> {
        self.server.start().await?;
        if let Err(e) = self.server.start_advertising(self.advertisement()).await {
            error!("Failed to start advertising: {}", e);
            self.server.stop().await?;
            return Err(e);
        }
        Ok(())
    }

    pub async fn stop_hosting(&self) -> Result<()> {
        self.server.stop().await
    }

    pub fn is_hosting(&self) -> bool {
        self.server.is_running()
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Scan for peers, reporting each as [`CoreEvent::PeerDiscovered`] once
    pub async fn start_discovery(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(self.config.scan_timeout);
        let mut stream = self
            .scanner
            .start_scan(self.name_filter.clone(), timeout)
            .await?;

        let role_tx = self.role_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(sighting) = stream.recv().await {
                if role_tx.send(RoleEvent::Discovered(sighting)).await.is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = self.lock_discovery().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    pub async fn stop_discovery(&self) -> Result<()> {
        if let Some(task) = self.lock_discovery().take() {
            task.abort();
        }
        self.scanner.stop_scan().await
    }

    pub fn is_discovering(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Whether `identity` has been sighted within the presence window
    pub fn is_online(&self, identity: PeerIdentity) -> bool {
        self.presence.is_online(identity)
    }

    pub fn online_peers(&self) -> Vec<PeerIdentity> {
        self.presence.online_peers()
    }

    // ------------------------------------------------------------------------
    // Client Session
    // ------------------------------------------------------------------------

    /// Connect to a discovered peer, replacing a session with a different peer
    pub async fn connect(&self, identity: PeerIdentity) -> Result<()> {
        if !self.transport.is_radio_available().await {
            return Err(BluechatError::RadioUnavailable);
        }
        let address = self
            .directory
            .address_for(identity)
            .ok_or_else(|| BluechatError::PeerNotFound {
                peer: identity.to_string(),
            })?;

        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_ref() {
            if existing.identity() == identity && existing.view().state.is_active() {
                debug!("Already connected or connecting to {}", identity);
                return Ok(());
            }
        }
        if let Some(previous) = session.take() {
            previous.disconnect().await;
        }

        let target = PeerTarget::new(identity, address)
            .with_display_name(self.directory.display_name_for(identity));
        *session = Some(ClientSession::spawn(
            Arc::clone(&self.transport),
            target,
            &self.config,
            self.role_tx.clone(),
        ));
        Ok(())
    }

    /// Wait until the current session is ready to send
    pub async fn wait_ready(&self) -> Result<()> {
        let view = {
            let session = self.session.lock().await;
            match session.as_ref() {
                Some(session) => session.subscribe(),
                None => return Err(not_connected()),
            }
        };
        client::wait_ready(view, self.config.connect_timeout).await
    }

    /// Persist and send `text` to the connected peer
    ///
    /// Fails without persisting anything when no session is ready or the text
    /// does not fit the negotiated payload size. The delivery outcome arrives
    /// later as [`CoreEvent::MessageSendResult`].
    pub async fn send(&self, text: impl Into<String>) -> Result<ChatMessage> {
        let text = text.into();
        let session = self.session.lock().await;
        let session = session.as_ref().ok_or_else(not_connected)?;

        let view = session.view();
        let max_payload = match (view.is_ready(), view.max_payload) {
            (true, Some(max)) => max,
            _ => {
                return Err(BluechatError::NotReady {
                    state: view.state.name().to_string(),
                })
            }
        };
        MessageCodec::new(max_payload).encode(&text)?;

        let message = self
            .store
            .insert_message(NewMessage::sent(self.local_identity, view.identity, text.clone()))
            .await?;
        if let Err(e) = self
            .store
            .upsert_known_peer(KnownPeer::new(view.identity).messaged_at(message.timestamp))
            .await
        {
            warn!("Failed to update known peer {}: {}", view.identity, e);
        }

        if let Err(e) = session.send(text, message.id).await {
            warn!("Message {} was not sent: {}", message.id, e);
            let report = RoleEvent::SendResult {
                message_id: message.id,
                success: false,
            };
            if self.role_tx.send(report).await.is_err() {
                debug!("Event pump gone, dropping send result for {}", message.id);
            }
            return Err(e);
        }
        Ok(message)
    }

    /// Ask the connected peer for its characteristic value
    pub async fn read(&self) -> Result<()> {
        let session = self.session.lock().await;
        session.as_ref().ok_or_else(not_connected)?.read().await
    }

    /// Disconnect the current session, if any
    pub async fn disconnect(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            info!("Disconnecting from {}", session.identity());
            session.disconnect().await;
        }
        Ok(())
    }

    pub async fn session_view(&self) -> Option<SessionView> {
        self.session.lock().await.as_ref().map(ClientSession::view)
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    pub async fn known_peers(&self) -> Result<Vec<KnownPeer>> {
        self.store.query_known_peers().await
    }

    pub async fn history(&self, identity: PeerIdentity) -> Result<Vec<ChatMessage>> {
        self.store.query_messages(identity).await
    }

    /// Remove a known peer and its address mappings; returns whether it was known
    pub async fn forget_peer(&self, identity: PeerIdentity) -> Result<bool> {
        self.directory.forget(identity);
        self.store.delete_known_peer(identity).await
    }

    pub async fn clear_history(&self) -> Result<usize> {
        self.store.delete_all_messages().await
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Stop scanning, disconnect and stop hosting
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down BlueChat node {}", self.local_identity);
        let scan = self.stop_discovery().await;
        self.disconnect().await?;
        let hosting = self.server.stop().await;
        scan.and(hosting)
    }

    fn lock_discovery(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.discovery.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self.lock_discovery().take() {
            task.abort();
        }
        self.pump.abort();
    }
}

fn not_connected() -> BluechatError {
    BluechatError::NotReady {
        state: "Idle".to_string(),
    }
}

// ----------------------------------------------------------------------------
// Event Pump
// ----------------------------------------------------------------------------

async fn run_event_pump(
    mut role_events: mpsc::Receiver<RoleEvent>,
    store: Arc<dyn ChatStore>,
    core_events: mpsc::Sender<CoreEvent>,
    local_identity: PeerIdentity,
) {
    while let Some(event) = role_events.recv().await {
        let forwarded = match event {
            RoleEvent::Discovered(sighting) => Some(CoreEvent::PeerDiscovered {
                identity: sighting.peer_identity,
                display_name: sighting.display_name,
            }),
            RoleEvent::Inbound {
                identity,
                address,
                content,
            } => {
                let sender = if identity.is_unattributed() {
                    address.to_string()
                } else {
                    identity.to_string()
                };
                let message = NewMessage::received(local_identity, identity, sender, content);
                Some(record_inbound(&*store, message).await)
            }
            RoleEvent::ClientMessage { identity, content } => {
                let message =
                    NewMessage::received(local_identity, identity, identity.to_string(), content);
                Some(record_inbound(&*store, message).await)
            }
            RoleEvent::Handshake {
                identity,
                display_name,
            } => {
                let peer = KnownPeer::new(identity)
                    .with_display_name(display_name)
                    .connected_at(Timestamp::now());
                if let Err(e) = store.upsert_known_peer(peer).await {
                    warn!("Failed to record known peer {}: {}", identity, e);
                }
                None
            }
            RoleEvent::StateChanged { identity, state } => {
                Some(CoreEvent::ConnectionStateChanged { identity, state })
            }
            RoleEvent::SendResult {
                message_id,
                success,
            } => Some(CoreEvent::MessageSendResult {
                message_id,
                success,
            }),
        };

        if let Some(event) = forwarded {
            debug!("Forwarding {}", event.name());
            if core_events.send(event).await.is_err() {
                debug!("Application event receiver dropped");
            }
        }
    }
    debug!("Event pump stopped");
}

/// Persist an inbound message; on storage failure it is still delivered, unsaved (id 0)
async fn record_inbound(store: &dyn ChatStore, message: NewMessage) -> CoreEvent {
    let identity = message.peer_identity;
    let message = match store.insert_message(message.clone()).await {
        Ok(stored) => stored,
        Err(e) => {
            error!("Failed to persist message from {}: {}", identity, e);
            message.with_id(0)
        }
    };

    if !identity.is_unattributed() {
        let peer = KnownPeer::new(identity).messaged_at(message.timestamp);
        if let Err(e) = store.upsert_known_peer(peer).await {
            warn!("Failed to update known peer {}: {}", identity, e);
        }
    }
    CoreEvent::MessageReceived(message)
}
