//! Transport dispatch
//!
//! The dispatcher frames outbound transfers, allocates transfer IDs and picks the transport.
//! Inbound transfers are decoded and routed: responses to the correlation engine, requests and
//! messages to the listeners of the registry port.
//!
//! Transfer ID counters are kept per scope. Messages use one counter per port on the broadcast
//! transport. Requests use one counter per (transport, destination, port), so simultaneous
//! requests to different peers on the same port do not disturb each other.

use crate::core::{DatatypeHash, NodeId, PortId, Priority, TransferId};
use crate::correlation::{Correlation, CorrelationFull};
use crate::frame::{DecodeError, Frame, HEADER_LENGTH, Header, MAX_FRAME_LENGTH, TransferKind};
use crate::handler::{Listener, Reply, ReplyHandler, ReplyTarget, Responder, Transfer};
use crate::registry::Registry;
use crate::time::Instant;
use crate::{SerialTransport, Transport, TransportError};

/// Outbound transfer rejected before or by the transport
///
/// No pending request survives a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// Neither a serial link to the destination nor a broadcast transport is attached
    NoRoute,
    /// The framed transfer exceeds the transport capacity
    PayloadTooLarge,
    /// The port is registered with another datatype
    TypeMismatch,
    TooManyPending,
    /// Every transfer ID of the scope is held by a pending request
    TransferIdExhausted,
    NoCounterSlotLeft,
    Transport(TransportError),
}

impl From<TransportError> for SendError {
    fn from(value: TransportError) -> Self {
        SendError::Transport(value)
    }
}

impl From<CorrelationFull> for SendError {
    fn from(_: CorrelationFull) -> Self {
        SendError::TooManyPending
    }
}

/// Inbound transfer dropped by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    Malformed(DecodeError),
    /// Service transfer from an anonymous node
    MissingSource,
    UnknownPort(PortId),
    TypeMismatch(PortId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttachError {
    /// A transport for the same destination is already attached
    Duplicate,
    NoSlotLeft,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DispatchStats {
    pub transmitted: u64,
    pub malformed: u64,
    pub unknown_port: u64,
    pub type_mismatch: u64,
    /// Service transfers addressed to other nodes
    pub foreign: u64,
    pub duplicate_replies: u64,
}

/// Transport class a transfer is routed through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Route {
    Broadcast,
    Serial(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct CounterScope {
    route: Route,
    destination: Option<NodeId>,
    port: PortId,
}

/// Transport set and transfer ID allocator
///
/// Holds one optional broadcast transport, up to `S` serial transports and up to `C`
/// transfer ID counters.
pub struct Dispatch<'a, const S: usize = 4, const C: usize = 32> {
    node_id: NodeId,
    broadcast: Option<&'a dyn Transport>,
    serial: heapless::Vec<&'a dyn SerialTransport, S>,
    counters: heapless::LinearMap<CounterScope, TransferId, C>,
    scratch: heapless::Vec<u8, MAX_FRAME_LENGTH>,
    stats: DispatchStats,
}

impl<'a, const S: usize, const C: usize> Dispatch<'a, S, C> {
    pub const fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            broadcast: None,
            serial: heapless::Vec::new(),
            counters: heapless::LinearMap::new(),
            scratch: heapless::Vec::new(),
            stats: DispatchStats {
                transmitted: 0,
                malformed: 0,
                unknown_port: 0,
                type_mismatch: 0,
                foreign: 0,
                duplicate_replies: 0,
            },
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn attach_broadcast(&mut self, transport: &'a dyn Transport) -> Result<(), AttachError> {
        if self.broadcast.is_some() {
            return Err(AttachError::Duplicate);
        }
        self.broadcast = Some(transport);
        debug!("broadcast transport attached");
        Ok(())
    }

    pub fn detach_broadcast(&mut self) -> Option<&'a dyn Transport> {
        self.forget_counters(Route::Broadcast);
        self.broadcast.take()
    }

    pub fn attach_serial(&mut self, transport: &'a dyn SerialTransport) -> Result<(), AttachError> {
        let remote = transport.remote();
        if self.find_serial(remote).is_some() {
            return Err(AttachError::Duplicate);
        }
        self.serial
            .push(transport)
            .map_err(|_| AttachError::NoSlotLeft)?;
        debug!("serial transport to node {:?} attached", remote.into_u16());
        Ok(())
    }

    /// Unlinks the serial transport reaching `remote` and resets its transfer ID counters
    ///
    /// Requests pending on the link are left to their deadlines.
    pub fn detach_serial(&mut self, remote: NodeId) -> Option<&'a dyn SerialTransport> {
        let idx = self.find_serial(remote)?;
        self.forget_counters(Route::Serial(remote));
        debug!("serial transport to node {:?} detached", remote.into_u16());
        Some(self.serial.remove(idx))
    }

    /// Transport a transfer to `destination` goes through
    ///
    /// A serial link reaching the destination takes precedence over the broadcast transport.
    pub fn route(&self, destination: NodeId) -> Option<Route> {
        self.select(destination).map(|(route, _)| route)
    }

    /// Publishes a message on the broadcast transport
    ///
    /// `completion` runs once the transport accepts the transfer.
    pub fn publish(
        &mut self,
        port: PortId,
        type_hash: DatatypeHash,
        priority: Priority,
        payload: &[u8],
        completion: impl FnOnce(),
    ) -> Result<TransferId, SendError> {
        let transport = self.broadcast.ok_or(SendError::NoRoute)?;
        Self::check_length(transport, payload)?;
        let scope = CounterScope {
            route: Route::Broadcast,
            destination: None,
            port,
        };
        let transfer_id = self.next_transfer_id(scope)?;

        let header = Header {
            kind: TransferKind::Message,
            priority,
            port,
            source: Some(self.node_id),
            destination: None,
            transfer_id,
            type_hash,
        };
        self.emit(transport, &header, payload)?;
        self.commit_transfer_id(scope, transfer_id, transport.transfer_id_mask());
        completion();
        Ok(transfer_id)
    }

    /// Sends a request and registers its continuation with the correlation engine
    ///
    /// The transfer ID is the next one of the (route, destination, port) scope that is not held
    /// by a pending request on the port. Nothing is registered if the send fails.
    #[allow(clippy::too_many_arguments)]
    pub fn request<const R: usize>(
        &mut self,
        correlation: &mut Correlation<'a, R>,
        destination: NodeId,
        port: PortId,
        type_hash: DatatypeHash,
        priority: Priority,
        payload: &[u8],
        deadline: Instant,
        continuation: &'a dyn ReplyHandler,
    ) -> Result<TransferId, SendError> {
        let (route, transport) = self.select(destination).ok_or(SendError::NoRoute)?;
        Self::check_length(transport, payload)?;
        if correlation.is_full() {
            return Err(SendError::TooManyPending);
        }

        let scope = CounterScope {
            route,
            destination: Some(destination),
            port,
        };
        let mask = transport.transfer_id_mask();
        let mut transfer_id = self.next_transfer_id(scope)?;
        let mut skipped = 0;
        while correlation.contains(port, transfer_id) {
            if skipped >= correlation.len() {
                return Err(SendError::TransferIdExhausted);
            }
            transfer_id = transfer_id.next(mask);
            skipped += 1;
        }

        correlation.register_expecting(port, transfer_id, deadline, type_hash, continuation)?;
        let header = Header {
            kind: TransferKind::Request,
            priority,
            port,
            source: Some(self.node_id),
            destination: Some(destination),
            transfer_id,
            type_hash,
        };
        if let Err(err) = self.emit(transport, &header, payload) {
            correlation.withdraw(port, transfer_id);
            return Err(err);
        }
        self.commit_transfer_id(scope, transfer_id, mask);
        Ok(transfer_id)
    }

    /// Sends a response echoing the transfer ID of the request
    pub fn respond(&mut self, target: &ReplyTarget, payload: &[u8]) -> Result<(), SendError> {
        let (_, transport) = self.select(target.peer).ok_or(SendError::NoRoute)?;
        Self::check_length(transport, payload)?;
        let header = Header {
            kind: TransferKind::Response,
            priority: target.priority,
            port: target.port,
            source: Some(self.node_id),
            destination: Some(target.peer),
            transfer_id: target.transfer_id,
            type_hash: target.type_hash,
        };
        self.emit(transport, &header, payload)
    }

    /// Decodes an inbound transfer and delivers it
    ///
    /// Dropped transfers are counted and reported; they never affect the dispatcher state.
    /// Responses nobody waits for are counted by the correlation engine and are not an error.
    pub fn receive<const R: usize, const P: usize, const L: usize>(
        &mut self,
        registry: &mut Registry<'a, P, L>,
        correlation: &mut Correlation<'a, R>,
        bytes: &[u8],
    ) -> Result<(), ProtocolError> {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.malformed += 1;
                warn!("malformed transfer dropped: {:?}", err);
                return Err(ProtocolError::Malformed(err));
            }
        };
        let header = &frame.header;
        trace!(
            "rx {:?} port {:?} transfer {:?} len {:?}",
            header.kind,
            header.port.into_u16(),
            header.transfer_id.into_u64(),
            frame.payload.len()
        );

        if header.kind != TransferKind::Message && header.destination != Some(self.node_id) {
            self.stats.foreign += 1;
            return Ok(());
        }

        match header.kind {
            TransferKind::Message => self.deliver_message(registry, &frame),
            TransferKind::Request => self.deliver_request(registry, &frame),
            TransferKind::Response => self.deliver_response(registry, correlation, &frame),
        }
    }

    fn deliver_message<const P: usize, const L: usize>(
        &mut self,
        registry: &mut Registry<'a, P, L>,
        frame: &Frame<'_>,
    ) -> Result<(), ProtocolError> {
        let listeners = self.accept(registry, &frame.header)?;
        let transfer = Self::transfer(frame);
        for listener in listeners.iter() {
            if let Listener::Subscription { handler, .. } = listener
                && listener.accepts_message_from(transfer.source)
            {
                handler.on_message(&transfer);
            }
        }
        Ok(())
    }

    fn deliver_request<const P: usize, const L: usize>(
        &mut self,
        registry: &mut Registry<'a, P, L>,
        frame: &Frame<'_>,
    ) -> Result<(), ProtocolError> {
        let header = &frame.header;
        let Some(peer) = header.source else {
            self.stats.malformed += 1;
            return Err(ProtocolError::MissingSource);
        };
        let listeners = self.accept(registry, header)?;
        let transfer = Self::transfer(frame);
        let target = ReplyTarget {
            peer,
            port: header.port,
            transfer_id: header.transfer_id,
            type_hash: header.type_hash,
            priority: header.priority,
        };

        let mut replied = false;
        for listener in listeners.iter() {
            if let Listener::Service(handler) = listener {
                let mut reply = Reply::new(self, target, &mut replied);
                handler.on_request(&transfer, &mut reply);
            }
        }
        if replied {
            registry.record_emit(header.port);
        }
        Ok(())
    }

    fn deliver_response<const R: usize, const P: usize, const L: usize>(
        &mut self,
        registry: &mut Registry<'a, P, L>,
        correlation: &mut Correlation<'a, R>,
        frame: &Frame<'_>,
    ) -> Result<(), ProtocolError> {
        let header = &frame.header;
        if header.source.is_none() {
            self.stats.malformed += 1;
            return Err(ProtocolError::MissingSource);
        }
        if let Some(expected) = correlation.expected_type(header.port, header.transfer_id)
            && expected != header.type_hash
        {
            self.stats.type_mismatch += 1;
            registry.record_error(header.port);
            warn!(
                "response on port {:?} carries unexpected datatype",
                header.port.into_u16()
            );
            return Err(ProtocolError::TypeMismatch(header.port));
        }
        if correlation.resolve(header.port, header.transfer_id, frame.payload) {
            registry.record_receive(header.port);
        }
        Ok(())
    }

    /// Checks the port and datatype of an inbound transfer and snapshots the port listeners
    fn accept<const P: usize, const L: usize>(
        &mut self,
        registry: &mut Registry<'a, P, L>,
        header: &Header,
    ) -> Result<heapless::Vec<Listener<'a>, L>, ProtocolError> {
        let Some(entry) = registry.lookup(header.port) else {
            self.stats.unknown_port += 1;
            debug!("transfer on unknown port {:?} dropped", header.port.into_u16());
            return Err(ProtocolError::UnknownPort(header.port));
        };
        if entry.descriptor().type_hash != header.type_hash {
            self.stats.type_mismatch += 1;
            registry.record_error(header.port);
            warn!(
                "transfer on port {:?} carries unexpected datatype",
                header.port.into_u16()
            );
            return Err(ProtocolError::TypeMismatch(header.port));
        }
        registry.record_receive(header.port);
        Ok(registry.listeners(header.port).unwrap_or_default())
    }

    fn transfer<'p>(frame: &Frame<'p>) -> Transfer<'p> {
        Transfer {
            source: frame.header.source,
            port: frame.header.port,
            transfer_id: frame.header.transfer_id,
            priority: frame.header.priority,
            type_hash: frame.header.type_hash,
            payload: frame.payload,
        }
    }

    fn select(&self, destination: NodeId) -> Option<(Route, &'a dyn Transport)> {
        if let Some(idx) = self.find_serial(destination) {
            let transport: &'a dyn Transport = self.serial[idx];
            return Some((Route::Serial(destination), transport));
        }
        self.broadcast.map(|transport| (Route::Broadcast, transport))
    }

    fn find_serial(&self, remote: NodeId) -> Option<usize> {
        self.serial
            .iter()
            .position(|transport| transport.remote() == remote)
    }

    fn check_length(transport: &dyn Transport, payload: &[u8]) -> Result<(), SendError> {
        let length = HEADER_LENGTH + payload.len();
        if length > MAX_FRAME_LENGTH || length > transport.capacity() {
            return Err(SendError::PayloadTooLarge);
        }
        Ok(())
    }

    fn next_transfer_id(&self, scope: CounterScope) -> Result<TransferId, SendError> {
        if let Some(transfer_id) = self.counters.get(&scope) {
            return Ok(*transfer_id);
        }
        if self.counters.len() == self.counters.capacity() {
            return Err(SendError::NoCounterSlotLeft);
        }
        Ok(TransferId::SESSION_START)
    }

    fn commit_transfer_id(&mut self, scope: CounterScope, sent: TransferId, mask: u64) {
        // Slot availability is checked by next_transfer_id
        unwrap!(self.counters.insert(scope, sent.next(mask)).ok());
    }

    fn forget_counters(&mut self, route: Route) {
        let stale: heapless::Vec<CounterScope, C> = self
            .counters
            .keys()
            .filter(|scope| scope.route == route)
            .copied()
            .collect();
        for scope in stale.iter() {
            self.counters.remove(scope);
        }
    }

    fn emit(
        &mut self,
        transport: &dyn Transport,
        header: &Header,
        payload: &[u8],
    ) -> Result<(), SendError> {
        let frame = Frame {
            header: *header,
            payload,
        };
        frame
            .encode_into(&mut self.scratch)
            .map_err(|_| SendError::PayloadTooLarge)?;
        transport.send(header.priority, &self.scratch)?;
        self.stats.transmitted += 1;
        trace!(
            "tx {:?} port {:?} transfer {:?} len {:?}",
            header.kind,
            header.port.into_u16(),
            header.transfer_id.into_u64(),
            payload.len()
        );
        Ok(())
    }
}

impl<const S: usize, const C: usize> Responder for Dispatch<'_, S, C> {
    fn respond(&mut self, target: &ReplyTarget, payload: &[u8]) -> Result<(), SendError> {
        Dispatch::respond(self, target, payload)
    }

    fn count_duplicate_reply(&mut self, target: &ReplyTarget) {
        self.stats.duplicate_replies += 1;
        debug!(
            "duplicate reply on port {:?} transfer {:?} dropped",
            target.port.into_u16(),
            target.transfer_id.into_u64()
        );
    }
}
