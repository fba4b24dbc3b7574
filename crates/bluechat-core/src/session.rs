//! Client Session State Machine
//!
//! The lifecycle of one outbound connection, as a plain value transitioned by
//! a reducer. [`SessionState::transition`] never performs I/O: it returns the
//! next state plus the effects the owner must execute (open the link, discover
//! attributes, write, release, ...). The runtime's session actor feeds it one
//! input at a time, which is what keeps callback processing sequential.
//!
//! ```text
//! Idle -> Connecting -> Connected -> ServicesDiscovered -> Ready
//!   any active state --disconnect--> Disconnected
//!   any active state --error/timeout--> Failed
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::codec::{decode_payload, MessageCodec};
use crate::protocol::{self, GattStatus, BLUECHAT_SERVICE_UUID, MAX_ATT_MTU, MIN_PAYLOAD};
use crate::transport::LinkEvent;
use crate::types::{LinkAddress, PeerIdentity, Timestamp};
use crate::{BluechatError, Result};

// ----------------------------------------------------------------------------
// Connection State Types
// ----------------------------------------------------------------------------

/// The remote peer a session targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTarget {
    pub identity: PeerIdentity,
    pub address: LinkAddress,
    pub display_name: Option<String>,
}

impl PeerTarget {
    pub fn new(identity: PeerIdentity, address: LinkAddress) -> Self {
        Self {
            identity,
            address,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }
}

/// Transport operation a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkOperation {
    Connect,
    DiscoverServices,
    NegotiateMtu,
    Read,
    Write,
}

impl LinkOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkOperation::Connect => "connect",
            LinkOperation::DiscoverServices => "service discovery",
            LinkOperation::NegotiateMtu => "MTU negotiation",
            LinkOperation::Read => "read",
            LinkOperation::Write => "write",
        }
    }
}

/// Why a session ended up in [`ConnectionState::Failed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Service discovery finished without the chat service
    PeerNotProtocolCompliant,
    TransportFailure {
        operation: LinkOperation,
        status: GattStatus,
    },
    /// The connect ceiling elapsed before the session became ready
    Timeout,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::PeerNotProtocolCompliant => write!(f, "peer does not implement BlueChat"),
            FailureReason::TransportFailure { operation, status } => {
                write!(f, "{} failed with status {}", operation.as_str(), status)
            }
            FailureReason::Timeout => write!(f, "timed out"),
        }
    }
}

/// Observable lifecycle state of a client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    ServicesDiscovered,
    /// The only state in which send and read are permitted
    Ready,
    Disconnected,
    Failed(FailureReason),
}

impl ConnectionState {
    /// Get current state name for logging/audit
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::ServicesDiscovered => "ServicesDiscovered",
            ConnectionState::Ready => "Ready",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Failed(_) => "Failed",
        }
    }

    /// Whether a link is (or is being) held in this state
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::ServicesDiscovered
                | ConnectionState::Ready
        )
    }

    /// Whether a new connect may start from this state
    pub fn can_connect(&self) -> bool {
        matches!(
            self,
            ConnectionState::Idle | ConnectionState::Disconnected | ConnectionState::Failed(_)
        )
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Failed(reason) => write!(f, "Failed ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// Full value of a client session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub state: ConnectionState,
    pub target: Option<PeerTarget>,
    /// Usable payload bytes, set once the MTU is settled
    pub max_payload: Option<usize>,
    pub last_message_received: Option<String>,
    pub last_write_status: Option<GattStatus>,
    /// MTU requested after service discovery
    pub requested_mtu: u16,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(MAX_ATT_MTU)
    }
}

// ----------------------------------------------------------------------------
// State Transition Inputs and Effects
// ----------------------------------------------------------------------------

/// Inputs that drive the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    Connect(PeerTarget),
    Link(LinkEvent),
    Send { text: String },
    Read,
    Disconnect,
    /// The connect ceiling elapsed
    Timeout,
}

impl SessionInput {
    pub fn name(&self) -> &'static str {
        match self {
            SessionInput::Connect(_) => "Connect",
            SessionInput::Link(event) => event.name(),
            SessionInput::Send { .. } => "Send",
            SessionInput::Read => "Read",
            SessionInput::Disconnect => "Disconnect",
            SessionInput::Timeout => "Timeout",
        }
    }
}

/// Work the session owner must perform after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    OpenLink { address: LinkAddress },
    DiscoverAttributes,
    NegotiateMtu { requested: u16 },
    WriteAttribute { value: Vec<u8> },
    ReadAttribute { offset: u16 },
    /// Close the transport handle; must run at most once per link
    ReleaseLink,
    /// A decoded inbound message to forward
    EmitMessage { content: String },
    /// The peer exposed the chat service
    Handshake,
}

pub type Effects = SmallVec<[SessionEffect; 3]>;

/// Result of a state transition
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub new_state: SessionState,
    pub effects: Effects,
    pub audit_entry: AuditEntry,
}

impl StateTransition {
    /// Whether the observable connection state changed
    pub fn state_changed(&self) -> bool {
        self.audit_entry.from_state != self.audit_entry.to_state
    }
}

/// Audit trail entry for state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub peer: Option<PeerIdentity>,
    pub from_state: ConnectionState,
    pub to_state: ConnectionState,
    pub event: String,
    pub effects_count: usize,
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl SessionState {
    /// Create an idle session that will request `requested_mtu` once connected
    pub fn new(requested_mtu: u16) -> Self {
        Self {
            state: ConnectionState::Idle,
            target: None,
            max_payload: None,
            last_message_received: None,
            last_write_status: None,
            requested_mtu,
        }
    }

    pub fn peer(&self) -> Option<PeerIdentity> {
        self.target.as_ref().map(|t| t.identity)
    }

    /// Codec for the negotiated payload size, available only when ready
    pub fn codec(&self) -> Option<MessageCodec> {
        match (self.state, self.max_payload) {
            (ConnectionState::Ready, Some(max)) => Some(MessageCodec::new(max)),
            _ => None,
        }
    }

    /// Compute the next state for `input`
    ///
    /// `Err` means the input was rejected and the current state stands:
    /// `NotReady` / `PayloadTooLarge` for sends, `InvalidTransition` for
    /// inputs that make no sense in the current state.
    pub fn transition(&self, input: SessionInput) -> Result<StateTransition> {
        let event_name = input.name().to_string();
        let (new_state, effects) = self.next(input)?;

        let audit_entry = AuditEntry {
            timestamp: Timestamp::now(),
            peer: new_state.peer().or_else(|| self.peer()),
            from_state: self.state,
            to_state: new_state.state,
            event: event_name,
            effects_count: effects.len(),
        };

        Ok(StateTransition {
            new_state,
            effects,
            audit_entry,
        })
    }

    fn next(&self, input: SessionInput) -> Result<(SessionState, Effects)> {
        let state = self.state;
        match input {
            SessionInput::Connect(target) if state.can_connect() => {
                let address = target.address.clone();
                let next = SessionState {
                    state: ConnectionState::Connecting,
                    target: Some(target),
                    max_payload: None,
                    last_message_received: None,
                    last_write_status: None,
                    requested_mtu: self.requested_mtu,
                };
                Ok((next, smallvec![SessionEffect::OpenLink { address }]))
            }

            SessionInput::Send { text } => {
                let codec = self.codec().ok_or_else(|| self.not_ready())?;
                let value = codec.encode(&text)?;
                Ok((self.clone(), smallvec![SessionEffect::WriteAttribute { value }]))
            }

            SessionInput::Read => {
                if !state.is_ready() {
                    return Err(self.not_ready());
                }
                Ok((self.clone(), smallvec![SessionEffect::ReadAttribute { offset: 0 }]))
            }

            SessionInput::Disconnect
            | SessionInput::Link(LinkEvent::Disconnected { .. })
                if state.is_active() =>
            {
                Ok((self.released(), smallvec![SessionEffect::ReleaseLink]))
            }

            // Nothing held: disconnecting again is a no-op
            SessionInput::Disconnect | SessionInput::Link(LinkEvent::Disconnected { .. }) => {
                Ok((self.clone(), Effects::new()))
            }

            SessionInput::Timeout => {
                if state.is_active() && !state.is_ready() {
                    Ok((
                        self.failed(FailureReason::Timeout),
                        smallvec![SessionEffect::ReleaseLink],
                    ))
                } else {
                    Ok((self.clone(), Effects::new()))
                }
            }

            SessionInput::Link(event) if state.is_active() => self.on_link_event(event),

            other => Err(self.invalid(other.name())),
        }
    }

    fn on_link_event(&self, event: LinkEvent) -> Result<(SessionState, Effects)> {
        let state = self.state;

        if let Some((operation, status)) = failed_status(&event) {
            return Ok((
                self.failed(FailureReason::TransportFailure { operation, status }),
                smallvec![SessionEffect::ReleaseLink],
            ));
        }

        match (state, event) {
            (ConnectionState::Connecting, LinkEvent::Connected { .. }) => Ok((
                self.with_state(ConnectionState::Connected),
                smallvec![SessionEffect::DiscoverAttributes],
            )),

            (ConnectionState::Connected, LinkEvent::ServicesDiscovered { services, .. }) => {
                if services.contains(&BLUECHAT_SERVICE_UUID) {
                    Ok((
                        self.with_state(ConnectionState::ServicesDiscovered),
                        smallvec![
                            SessionEffect::Handshake,
                            SessionEffect::NegotiateMtu {
                                requested: self.requested_mtu,
                            }
                        ],
                    ))
                } else {
                    Ok((
                        self.failed(FailureReason::PeerNotProtocolCompliant),
                        smallvec![SessionEffect::ReleaseLink],
                    ))
                }
            }

            (
                ConnectionState::ServicesDiscovered | ConnectionState::Ready,
                LinkEvent::MtuNegotiated { mtu, .. },
            ) => {
                let mut next = self.with_state(ConnectionState::Ready);
                next.max_payload = Some(protocol::usable_payload(mtu));
                Ok((next, Effects::new()))
            }

            (ConnectionState::ServicesDiscovered, LinkEvent::MtuUnsupported) => {
                let mut next = self.with_state(ConnectionState::Ready);
                next.max_payload = Some(MIN_PAYLOAD);
                Ok((next, Effects::new()))
            }

            (ConnectionState::Ready, LinkEvent::MtuUnsupported) => {
                Ok((self.clone(), Effects::new()))
            }

            (ConnectionState::Ready, LinkEvent::ReadComplete { value, .. })
            | (ConnectionState::Ready, LinkEvent::Notification { value }) => {
                let mut next = self.clone();
                let mut effects = Effects::new();
                match decode_payload(&value) {
                    Ok(content) => {
                        next.last_message_received = Some(content.clone());
                        effects.push(SessionEffect::EmitMessage { content });
                    }
                    Err(_) => next.last_message_received = None,
                }
                Ok((next, effects))
            }

            (ConnectionState::Ready, LinkEvent::WriteComplete { status }) => {
                let mut next = self.clone();
                next.last_write_status = Some(status);
                Ok((next, Effects::new()))
            }

            (_, event) => Err(self.invalid(event.name())),
        }
    }

    fn with_state(&self, state: ConnectionState) -> SessionState {
        SessionState {
            state,
            ..self.clone()
        }
    }

    fn released(&self) -> SessionState {
        SessionState {
            state: ConnectionState::Disconnected,
            max_payload: None,
            ..self.clone()
        }
    }

    fn failed(&self, reason: FailureReason) -> SessionState {
        let mut next = SessionState {
            state: ConnectionState::Failed(reason),
            max_payload: None,
            ..self.clone()
        };
        if let FailureReason::TransportFailure {
            operation: LinkOperation::Write,
            status,
        } = reason
        {
            next.last_write_status = Some(status);
        }
        next
    }

    fn not_ready(&self) -> BluechatError {
        BluechatError::NotReady {
            state: self.state.name().to_string(),
        }
    }

    fn invalid(&self, event: &str) -> BluechatError {
        BluechatError::InvalidTransition {
            from_state: self.state.name().to_string(),
            event: event.to_string(),
        }
    }
}

/// Operation and status of a callback that reported failure
fn failed_status(event: &LinkEvent) -> Option<(LinkOperation, GattStatus)> {
    let (operation, status) = match event {
        LinkEvent::Connected { status } => (LinkOperation::Connect, *status),
        LinkEvent::ServicesDiscovered { status, .. } => (LinkOperation::DiscoverServices, *status),
        LinkEvent::MtuNegotiated { status, .. } => (LinkOperation::NegotiateMtu, *status),
        LinkEvent::ReadComplete { status, .. } => (LinkOperation::Read, *status),
        LinkEvent::WriteComplete { status } => (LinkOperation::Write, *status),
        LinkEvent::Disconnected { .. } | LinkEvent::MtuUnsupported | LinkEvent::Notification { .. } => {
            return None
        }
    };
    (!status.is_success()).then_some((operation, status))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
