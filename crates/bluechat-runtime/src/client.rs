//! Client Session Actor
//!
//! One task per outbound connection. The actor owns the [`SessionState`] and
//! the link, feeds commands and link events through the reducer strictly one
//! at a time, and executes the resulting effects against the transport. Other
//! tasks only see the [`SessionView`] it publishes after every input.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use bluechat_core::protocol::{GattStatus, BLUECHAT_CHARACTERISTIC_UUID};
use bluechat_core::session::{
    ConnectionState, FailureReason, PeerTarget, SessionEffect, SessionInput, SessionState,
};
use bluechat_core::transport::{LinkEvent, LinkHandle, RadioTransport};
use bluechat_core::{BluechatConfig, BluechatError, MessageId, PeerIdentity, Result};

use crate::events::RoleEvent;
use crate::link::LinkGuard;

// ----------------------------------------------------------------------------
// Session View
// ----------------------------------------------------------------------------

/// Read-only snapshot of a client session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub identity: PeerIdentity,
    pub display_name: Option<String>,
    pub state: ConnectionState,
    pub max_payload: Option<usize>,
    pub last_message_received: Option<String>,
    pub last_write_status: Option<GattStatus>,
}

impl SessionView {
    fn new(target: &PeerTarget, session: &SessionState) -> Self {
        Self {
            identity: target.identity,
            display_name: target.display_name.clone(),
            state: session.state,
            max_payload: session.max_payload,
            last_message_received: session.last_message_received.clone(),
            last_write_status: session.last_write_status,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }
}

enum SessionCommand {
    Send {
        text: String,
        message_id: MessageId,
        reply: oneshot::Sender<Result<()>>,
    },
    Read {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

// ----------------------------------------------------------------------------
// Session Handle
// ----------------------------------------------------------------------------

/// Handle to a running client session actor
pub struct ClientSession {
    identity: PeerIdentity,
    connect_timeout: Duration,
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<SessionView>,
    task: JoinHandle<()>,
}

impl ClientSession {
    /// Spawn the actor and start connecting to `target`
    pub fn spawn(
        transport: Arc<dyn RadioTransport>,
        target: PeerTarget,
        config: &BluechatConfig,
        events: mpsc::Sender<RoleEvent>,
    ) -> Self {
        let state = SessionState::new(config.requested_mtu);
        let (view_tx, view_rx) = watch::channel(SessionView::new(&target, &state));
        let (command_tx, command_rx) = mpsc::channel(config.event_buffer.max(1));

        let identity = target.identity;
        let actor = SessionActor {
            transport,
            target,
            state,
            guard: None,
            link_events: None,
            events,
            view: view_tx,
            pending_writes: VecDeque::new(),
            queued: VecDeque::new(),
        };
        let task = tokio::spawn(actor.run(command_rx, config.connect_timeout));

        Self {
            identity,
            connect_timeout: config.connect_timeout,
            commands: command_tx,
            view: view_rx,
            task,
        }
    }

    pub fn identity(&self) -> PeerIdentity {
        self.identity
    }

    /// Latest published snapshot
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Whether the actor has exited (disconnected or failed)
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Write `text` for the already persisted message `message_id`
    pub async fn send(&self, text: String, message_id: MessageId) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.request(SessionCommand::Send {
            text,
            message_id,
            reply,
        })
        .await?;
        response.await.map_err(|_| self.not_ready())?
    }

    /// Request a read of the remote characteristic
    pub async fn read(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.request(SessionCommand::Read { reply }).await?;
        response.await.map_err(|_| self.not_ready())?
    }

    /// Disconnect and wait for the link to be released; no-op once finished
    pub async fn disconnect(&self) {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::Disconnect { reply })
            .await
            .is_ok()
        {
            let _ = response.await;
        }
    }

    /// Wait until the session is ready, or report why it never will be
    pub async fn wait_ready(&self) -> Result<()> {
        wait_ready(self.subscribe(), self.connect_timeout).await
    }

    async fn request(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.not_ready())
    }

    fn not_ready(&self) -> BluechatError {
        BluechatError::NotReady {
            state: self.view.borrow().state.name().to_string(),
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        // The actor's link guard closes the link when the task is dropped
        self.task.abort();
    }
}

/// Error describing why a session failed
pub fn failure_error(
    reason: FailureReason,
    identity: PeerIdentity,
    connect_timeout: Duration,
) -> BluechatError {
    match reason {
        FailureReason::PeerNotProtocolCompliant => BluechatError::PeerNotProtocolCompliant {
            peer: identity.to_string(),
        },
        FailureReason::TransportFailure { operation, status } => {
            BluechatError::transport(operation.as_str(), status)
        }
        FailureReason::Timeout => BluechatError::Timeout {
            duration_ms: connect_timeout.as_millis() as u64,
        },
    }
}

/// Wait on a session view until it is ready or has ended
pub async fn wait_ready(
    mut view: watch::Receiver<SessionView>,
    connect_timeout: Duration,
) -> Result<()> {
    loop {
        let current = view.borrow_and_update().clone();
        match current.state {
            ConnectionState::Ready => return Ok(()),
            ConnectionState::Failed(reason) => {
                return Err(failure_error(reason, current.identity, connect_timeout))
            }
            ConnectionState::Disconnected => {
                return Err(BluechatError::NotReady {
                    state: current.state.name().to_string(),
                })
            }
            _ => {}
        }
        if view.changed().await.is_err() {
            return Err(BluechatError::channel_closed("session"));
        }
    }
}

// ----------------------------------------------------------------------------
// Session Actor
// ----------------------------------------------------------------------------

enum Step {
    Command(Option<SessionCommand>),
    Link(Option<LinkEvent>),
    Timeout,
}

struct SessionActor {
    transport: Arc<dyn RadioTransport>,
    target: PeerTarget,
    state: SessionState,
    guard: Option<LinkGuard>,
    link_events: Option<mpsc::Receiver<LinkEvent>>,
    events: mpsc::Sender<RoleEvent>,
    view: watch::Sender<SessionView>,
    /// Messages whose write completion has not arrived yet, oldest first
    pending_writes: VecDeque<MessageId>,
    /// Inputs synthesized while executing effects
    queued: VecDeque<SessionInput>,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>, connect_timeout: Duration) {
        let deadline = Instant::now() + connect_timeout;
        info!("Connecting to {} at {}", self.target.identity, self.target.address);

        if let Err(e) = self.handle(SessionInput::Connect(self.target.clone())).await {
            error!("Session for {} could not start: {}", self.target.identity, e);
        }

        while self.state.state.is_active() {
            let awaiting_ready = !self.state.state.is_ready();
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                event = next_link_event(&mut self.link_events) => Step::Link(event),
                _ = tokio::time::sleep_until(deadline), if awaiting_ready => Step::Timeout,
            };

            match step {
                Step::Command(Some(command)) => self.on_command(command).await,
                Step::Command(None) => {
                    debug!("Session handle dropped, disconnecting");
                    let _ = self.handle(SessionInput::Disconnect).await;
                }
                Step::Link(Some(event)) => self.on_link_event(event).await,
                Step::Link(None) => {
                    self.link_events = None;
                    self.on_link_event(LinkEvent::Disconnected {
                        status: GattStatus::SUCCESS,
                    })
                    .await;
                }
                Step::Timeout => {
                    warn!(
                        "Connection to {} timed out after {:?}",
                        self.target.identity, connect_timeout
                    );
                    let _ = self.handle(SessionInput::Timeout).await;
                }
            }
        }

        self.finish().await;
    }

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Send {
                text,
                message_id,
                reply,
            } => {
                self.pending_writes.push_back(message_id);
                let result = self.handle(SessionInput::Send { text }).await;
                if result.is_err() {
                    self.pending_writes.retain(|id| *id != message_id);
                }
                let _ = reply.send(result);
            }
            SessionCommand::Read { reply } => {
                let _ = reply.send(self.handle(SessionInput::Read).await);
            }
            SessionCommand::Disconnect { reply } => {
                let _ = self.handle(SessionInput::Disconnect).await;
                let _ = reply.send(());
            }
        }
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        let name = event.name();
        if let Err(e) = self.handle(SessionInput::Link(event)).await {
            debug!("Ignoring {} for {}: {}", name, self.target.identity, e);
        }
    }

    /// Run `input` and any inputs its effects synthesize; returns the result
    /// of `input` itself
    async fn handle(&mut self, input: SessionInput) -> Result<()> {
        let result = self.apply(input).await;
        while let Some(next) = self.queued.pop_front() {
            if let Err(e) = self.apply(next).await {
                debug!("Synthesized input rejected: {}", e);
            }
        }
        result
    }

    async fn apply(&mut self, input: SessionInput) -> Result<()> {
        if let SessionInput::Link(LinkEvent::WriteComplete { status }) = &input {
            self.complete_write(status.is_success()).await;
        }

        let transition = self.state.transition(input)?;
        let changed = transition.state_changed();
        let audit = transition.audit_entry;
        self.state = transition.new_state;
        self.view.send_replace(SessionView::new(&self.target, &self.state));

        if changed {
            info!(
                "Session {}: {} -> {} on {}",
                self.target.identity, audit.from_state, audit.to_state, audit.event
            );
            self.emit(RoleEvent::StateChanged {
                identity: self.target.identity,
                state: self.state.state,
            })
            .await;
        }

        for effect in transition.effects {
            self.execute(effect).await;
        }
        Ok(())
    }

    async fn execute(&mut self, effect: SessionEffect) {
        match effect {
            SessionEffect::OpenLink { address } => {
                match self.transport.connect(&address).await {
                    Ok((link, events)) => {
                        debug!("Opened {} to {}", link, address);
                        self.guard = Some(LinkGuard::new(Arc::clone(&self.transport), link));
                        self.link_events = Some(events);
                    }
                    Err(e) => {
                        error!("Connect to {} failed: {}", address, e);
                        self.queued.push_back(SessionInput::Link(LinkEvent::Connected {
                            status: status_of(&e),
                        }));
                    }
                }
            }
            SessionEffect::DiscoverAttributes => {
                let result = match self.link() {
                    Some(link) => self.transport.discover_attributes(link).await,
                    None => Err(BluechatError::channel_closed("link")),
                };
                if let Err(e) = result {
                    error!("Service discovery failed: {}", e);
                    self.queued
                        .push_back(SessionInput::Link(LinkEvent::ServicesDiscovered {
                            status: status_of(&e),
                            services: Vec::new(),
                        }));
                }
            }
            SessionEffect::NegotiateMtu { requested } => {
                let result = match self.link() {
                    Some(link) => self.transport.negotiate_max_payload(link, requested).await,
                    None => Err(BluechatError::channel_closed("link")),
                };
                if let Err(e) = result {
                    warn!("MTU negotiation unavailable, using default: {}", e);
                    self.queued
                        .push_back(SessionInput::Link(LinkEvent::MtuUnsupported));
                }
            }
            SessionEffect::WriteAttribute { value } => {
                let len = value.len();
                let result = match self.link() {
                    Some(link) => {
                        self.transport
                            .write_attribute(link, BLUECHAT_CHARACTERISTIC_UUID, value)
                            .await
                    }
                    None => Err(BluechatError::channel_closed("link")),
                };
                match result {
                    Ok(()) => debug!("Wrote {} bytes to {}", len, self.target.identity),
                    Err(e) => {
                        error!("Write to {} failed: {}", self.target.identity, e);
                        self.queued
                            .push_back(SessionInput::Link(LinkEvent::WriteComplete {
                                status: status_of(&e),
                            }));
                    }
                }
            }
            SessionEffect::ReadAttribute { offset } => {
                let result = match self.link() {
                    Some(link) => {
                        self.transport
                            .read_attribute(link, BLUECHAT_CHARACTERISTIC_UUID, offset)
                            .await
                    }
                    None => Err(BluechatError::channel_closed("link")),
                };
                if let Err(e) = result {
                    error!("Read from {} failed: {}", self.target.identity, e);
                    self.queued
                        .push_back(SessionInput::Link(LinkEvent::ReadComplete {
                            status: status_of(&e),
                            value: Vec::new(),
                        }));
                }
            }
            SessionEffect::ReleaseLink => {
                if let Some(guard) = self.guard.as_mut() {
                    guard.release().await;
                }
                self.link_events = None;
            }
            SessionEffect::EmitMessage { content } => {
                self.emit(RoleEvent::ClientMessage {
                    identity: self.target.identity,
                    content,
                })
                .await;
            }
            SessionEffect::Handshake => {
                info!("Peer {} exposes the chat service", self.target.identity);
                self.emit(RoleEvent::Handshake {
                    identity: self.target.identity,
                    display_name: self.target.display_name.clone(),
                })
                .await;
            }
        }
    }

    async fn complete_write(&mut self, success: bool) {
        if let Some(message_id) = self.pending_writes.pop_front() {
            self.emit(RoleEvent::SendResult {
                message_id,
                success,
            })
            .await;
        }
    }

    async fn finish(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.release().await;
        }
        while !self.pending_writes.is_empty() {
            self.complete_write(false).await;
        }
        debug!(
            "Session actor for {} finished in {}",
            self.target.identity, self.state.state
        );
    }

    fn link(&self) -> Option<LinkHandle> {
        self.guard.as_ref().and_then(LinkGuard::handle)
    }

    async fn emit(&self, event: RoleEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event pump closed, dropping session event");
        }
    }
}

async fn next_link_event(events: &mut Option<mpsc::Receiver<LinkEvent>>) -> Option<LinkEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

/// Status to report for a failed transport request
fn status_of(error: &BluechatError) -> GattStatus {
    match error {
        BluechatError::TransportFailure { status, .. } => *status,
        _ => GattStatus::FAILURE,
    }
}
