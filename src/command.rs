//! The narrow command shape the failover core needs to see.
//!
//! The wire protocol and command serialization are external collaborators;
//! this type carries only the fields the core's send-path and
//! server-directed-control logic need to inspect.

use crate::endpoint::Endpoint;
use bytes::Bytes;

/// A command passed through `FailoverTransport::oneway`.
#[derive(Debug, Clone)]
pub struct Command {
    /// Correlation id used as the Request Map key. `None` for commands that
    /// never expect a response and are never replayed individually.
    pub correlation_id: Option<u64>,
    /// Whether the sender is expecting a response command.
    pub response_required: bool,
    /// What kind of command this is, used to decide replay/drop on reconnect.
    pub kind: CommandKind,
    /// Opaque serialized payload, untouched by the core.
    pub payload: Bytes,
    /// Present only when `kind == ConnectionControl`.
    pub control: Option<ConnectionControl>,
}

/// The subset of command kinds the failover core dispatches on directly.
/// Everything else is `Other` and simply flows through the send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Peer is already unreachable; dropped silently when disconnected.
    Shutdown,
    /// A message acknowledgement — stale once the connection is gone.
    MessageAck,
    /// Consumer removal — stale once the connection is gone.
    RemoveConsumer,
    /// Producer removal — stale once the connection is gone.
    RemoveProducer,
    /// Destination removal — stale once the connection is gone.
    RemoveDestination,
    /// A server-directed reconnect/URI-update instruction.
    ConnectionControl,
    /// A response to a previously sent command.
    Response,
    /// Anything else — passed through the ordinary send path.
    Other,
}

impl Command {
    /// Build a plain command with no response expectation.
    pub fn new(kind: CommandKind, payload: Bytes) -> Self {
        Self {
            correlation_id: None,
            response_required: false,
            kind,
            payload,
            control: None,
        }
    }

    pub fn with_correlation_id(mut self, id: u64) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn requiring_response(mut self) -> Self {
        self.response_required = true;
        self
    }

    /// A synthetic success response for `correlation_id`, delivered to the
    /// upper listener when a stale command is short-circuited instead of
    /// actually sent.
    pub fn synthetic_success_response(correlation_id: u64) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            response_required: false,
            kind: CommandKind::Response,
            payload: Bytes::new(),
            control: None,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.kind == CommandKind::Shutdown
    }

    /// Commands that address broker state which will not exist on the new
    /// connection.
    pub fn is_stale_on_reconnect(&self) -> bool {
        matches!(
            self.kind,
            CommandKind::MessageAck | CommandKind::RemoveConsumer | CommandKind::RemoveProducer
                | CommandKind::RemoveDestination
        )
    }

    pub fn is_response(&self) -> bool {
        self.kind == CommandKind::Response
    }

    pub fn is_connection_control(&self) -> bool {
        self.kind == CommandKind::ConnectionControl
    }
}

/// Server-directed control payload.
#[derive(Debug, Clone, Default)]
pub struct ConnectionControl {
    /// A broker-instructed redirect target.
    pub reconnect_to: Option<Endpoint>,
    /// The full list of brokers the peer currently knows about.
    pub connected_brokers: Option<Vec<Endpoint>>,
    /// Whether the peer is asking for an immediate rebalance.
    pub rebalance: bool,
}
