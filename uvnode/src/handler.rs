//! Application callbacks
//!
//! Handlers are held by reference for the lifetime of the node. All methods take `&self`, so a
//! single handler may serve several ports or requests; state should live in a `Cell` or
//! `RefCell`. Plain closures implement the handler traits.
//!
//! Handlers run inside the node call that triggered them and must return promptly: a blocking
//! handler blocks the whole node.

use crate::core::{DatatypeHash, NodeId, PortId, Priority, TransferId};
use crate::dispatch::SendError;

/// Inbound transfer delivered to a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transfer<'p> {
    /// `None` for anonymous messages
    pub source: Option<NodeId>,
    pub port: PortId,
    pub transfer_id: TransferId,
    pub priority: Priority,
    pub type_hash: DatatypeHash,
    pub payload: &'p [u8],
}

/// Fate of an in-flight request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReplyOutcome<'p> {
    Response(&'p [u8]),
    Timeout,
}

/// Continuation of a request, invoked exactly once unless the request is cancelled
pub trait ReplyHandler {
    fn on_reply(&self, outcome: ReplyOutcome<'_>);
}

impl<F: Fn(ReplyOutcome<'_>)> ReplyHandler for F {
    fn on_reply(&self, outcome: ReplyOutcome<'_>) {
        self(outcome)
    }
}

/// Listener for inbound requests on a service port
pub trait ServiceHandler {
    fn on_request(&self, request: &Transfer<'_>, reply: &mut Reply<'_>);
}

impl<F: Fn(&Transfer<'_>, &mut Reply<'_>)> ServiceHandler for F {
    fn on_request(&self, request: &Transfer<'_>, reply: &mut Reply<'_>) {
        self(request, reply)
    }
}

/// Listener for inbound messages on a subscribed port
pub trait MessageHandler {
    fn on_message(&self, message: &Transfer<'_>);
}

impl<F: Fn(&Transfer<'_>)> MessageHandler for F {
    fn on_message(&self, message: &Transfer<'_>) {
        self(message)
    }
}

/// Port listener, invoked in registration order
#[derive(Clone, Copy)]
pub enum Listener<'a> {
    Service(&'a dyn ServiceHandler),
    Subscription {
        /// Deliver only messages from this peer
        peer: Option<NodeId>,
        handler: &'a dyn MessageHandler,
    },
}

impl Listener<'_> {
    pub(crate) fn accepts_message_from(&self, source: Option<NodeId>) -> bool {
        match self {
            Listener::Service(_) => false,
            Listener::Subscription { peer: None, .. } => true,
            Listener::Subscription { peer, .. } => *peer == source,
        }
    }
}

/// Addressing of a response, copied from the originating request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReplyTarget {
    pub peer: NodeId,
    pub port: PortId,
    pub transfer_id: TransferId,
    pub type_hash: DatatypeHash,
    pub priority: Priority,
}

pub(crate) trait Responder {
    fn respond(&mut self, target: &ReplyTarget, payload: &[u8]) -> Result<(), SendError>;
    fn count_duplicate_reply(&mut self, target: &ReplyTarget);
}

/// Reply continuation bound to one inbound request
///
/// All listeners of a port share the request: the first successful `send` answers it, later
/// calls are counted as duplicates and dropped. The target can be copied out to answer later
/// through `Node::respond`.
pub struct Reply<'r> {
    responder: &'r mut dyn Responder,
    target: ReplyTarget,
    replied: &'r mut bool,
}

impl<'r> Reply<'r> {
    pub(crate) fn new(
        responder: &'r mut dyn Responder,
        target: ReplyTarget,
        replied: &'r mut bool,
    ) -> Self {
        Self {
            responder,
            target,
            replied,
        }
    }

    pub fn target(&self) -> ReplyTarget {
        self.target
    }

    /// Whether a response for this request has already been sent
    pub fn is_sent(&self) -> bool {
        *self.replied
    }

    /// Sends the response, echoing the request transfer ID
    pub fn send(&mut self, payload: &[u8]) -> Result<(), SendError> {
        if *self.replied {
            self.responder.count_duplicate_reply(&self.target);
            return Ok(());
        }
        self.responder.respond(&self.target, payload)?;
        *self.replied = true;
        Ok(())
    }
}
