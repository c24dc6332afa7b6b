//! Node engine
//!
//! Node composes the port registry, the correlation engine and the transport dispatcher behind a
//! single-threaded API. The host event loop drives it:
//! * ports are defined once at boot, before the loop starts
//! * transports hand validated inbound transfers to [`Node::receive`]
//! * [`Node::tick`] is called periodically with the current time and expires overdue requests
//!
//! Application callbacks run inside these calls and must return promptly.
//!
//! ## Examples
//!
//! ```
//! use core::cell::Cell;
//! use uvnode::config::Config;
//! use uvnode::core::{DatatypeHash, NodeId, PortId, Priority};
//! use uvnode::node::Node;
//! use uvnode::time::{Duration, Instant};
//! use uvnode::{Transport, TransportError};
//!
//! struct Bus(Cell<usize>);
//!
//! impl Transport for Bus {
//!     fn capacity(&self) -> usize {
//!         1024
//!     }
//!
//!     fn send(&self, _priority: Priority, _frame: &[u8]) -> Result<(), TransportError> {
//!         self.0.set(self.0.get() + 1);
//!         Ok(())
//!     }
//! }
//!
//! const VERSION: &str = "uavcan.node.Version.1.0";
//! const VERSION_PORT: PortId = PortId::new(7509);
//!
//! let bus = Bus(Cell::new(0));
//! let mut node: Node<'_> = Node::new(Config::new(NodeId::new(10).unwrap()));
//! node.attach_broadcast(&bus).unwrap();
//! node.define_publish(VERSION_PORT, VERSION).unwrap();
//!
//! let hash = DatatypeHash::from_name(VERSION).unwrap();
//! node.publish(VERSION_PORT, hash, Priority::Nominal, &[1, 0], || {})
//!     .unwrap();
//! node.tick(Instant::from_millis(10), Duration::from_millis(10));
//! assert_eq!(bus.0.get(), 1);
//! ```

use crate::config::Config;
use crate::core::{DatatypeHash, NodeId, PortId, Priority, TransferId};
use crate::correlation::{Correlation, CorrelationStats};
use crate::dispatch::{AttachError, Dispatch, DispatchStats, ProtocolError, Route, SendError};
use crate::handler::{MessageHandler, ReplyHandler, ReplyTarget, ServiceHandler};
use crate::registry::{ConfigurationError, NodePort, PortStats, Registry};
use crate::time::{Duration, Instant};
use crate::{SerialTransport, Transport};

/// Node engine
///
/// Capacities:
/// * `P` ports with up to `L` listeners each
/// * `R` in-flight requests
/// * `S` serial transports
/// * `C` transfer ID counter scopes
pub struct Node<
    'a,
    const P: usize = 16,
    const L: usize = 4,
    const R: usize = 16,
    const S: usize = 4,
    const C: usize = 32,
> {
    config: Config,
    now: Instant,
    uptime: Duration,
    registry: Registry<'a, P, L>,
    correlation: Correlation<'a, R>,
    dispatch: Dispatch<'a, S, C>,
}

impl<'a, const P: usize, const L: usize, const R: usize, const S: usize, const C: usize>
    Node<'a, P, L, R, S, C>
{
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            now: Instant::from_ticks(0),
            uptime: Duration::from_ticks(0),
            registry: Registry::new(),
            correlation: Correlation::new(),
            dispatch: Dispatch::new(config.node_id),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    /// Time of the last tick
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Sum of tick deltas
    pub fn uptime(&self) -> Duration {
        self.uptime
    }

    pub fn attach_broadcast(&mut self, transport: &'a dyn Transport) -> Result<(), AttachError> {
        self.dispatch.attach_broadcast(transport)
    }

    pub fn detach_broadcast(&mut self) -> Option<&'a dyn Transport> {
        self.dispatch.detach_broadcast()
    }

    pub fn attach_serial(&mut self, transport: &'a dyn SerialTransport) -> Result<(), AttachError> {
        self.dispatch.attach_serial(transport)
    }

    /// Unlinks the serial transport reaching `remote`
    ///
    /// Requests already sent through it stay pending until answered over another route or
    /// timed out.
    pub fn detach_serial(&mut self, remote: NodeId) -> Option<&'a dyn SerialTransport> {
        self.dispatch.detach_serial(remote)
    }

    /// Transport a transfer to `destination` would currently go through
    pub fn route(&self, destination: NodeId) -> Option<Route> {
        self.dispatch.route(destination)
    }

    pub fn define_publish(
        &mut self,
        port: PortId,
        type_name: &'static str,
    ) -> Result<(), ConfigurationError> {
        self.registry.define_publish(port, type_name)
    }

    pub fn define_service(
        &mut self,
        port: PortId,
        type_name: &'static str,
        as_output: bool,
        handler: &'a dyn ServiceHandler,
    ) -> Result<(), ConfigurationError> {
        self.registry.define_service(port, type_name, as_output, handler)
    }

    pub fn subscribe(
        &mut self,
        port: PortId,
        type_name: &'static str,
        peer: Option<NodeId>,
        handler: &'a dyn MessageHandler,
    ) -> Result<(), ConfigurationError> {
        self.registry.subscribe(port, type_name, peer, handler)
    }

    /// Broadcasts a message; `completion` runs once the transport accepts it
    pub fn publish(
        &mut self,
        port: PortId,
        type_hash: DatatypeHash,
        priority: Priority,
        payload: &[u8],
        completion: impl FnOnce(),
    ) -> Result<TransferId, SendError> {
        self.check_type(port, type_hash)?;
        let res = self
            .dispatch
            .publish(port, type_hash, priority, payload, completion);
        self.record(port, res.is_ok());
        res
    }

    /// Sends a request to `peer` at time `now`
    ///
    /// `continuation` receives either the response or, once the configured request timeout
    /// elapses after `now`, a timeout. Returns the transfer ID the request was sent with.
    pub fn request(
        &mut self,
        now: Instant,
        peer: NodeId,
        port: PortId,
        type_hash: DatatypeHash,
        priority: Priority,
        payload: &[u8],
        continuation: &'a dyn ReplyHandler,
    ) -> Result<TransferId, SendError> {
        self.check_type(port, type_hash)?;
        let deadline = now + self.config.request_timeout;
        let res = self.dispatch.request(
            &mut self.correlation,
            peer,
            port,
            type_hash,
            priority,
            payload,
            deadline,
            continuation,
        );
        self.record(port, res.is_ok());
        res
    }

    /// Answers a request previously received from `peer` with `transfer_id`
    pub fn respond(
        &mut self,
        peer: NodeId,
        port: PortId,
        transfer_id: TransferId,
        type_hash: DatatypeHash,
        priority: Priority,
        payload: &[u8],
    ) -> Result<(), SendError> {
        self.check_type(port, type_hash)?;
        let target = ReplyTarget {
            peer,
            port,
            transfer_id,
            type_hash,
            priority,
        };
        let res = self.dispatch.respond(&target, payload);
        self.record(port, res.is_ok());
        res
    }

    /// Drops a pending request; its continuation is never invoked
    pub fn cancel(&mut self, port: PortId, transfer_id: TransferId) -> bool {
        self.correlation.cancel(port, transfer_id)
    }

    /// Delivers a validated inbound transfer
    pub fn receive(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        self.dispatch.receive(&mut self.registry, &mut self.correlation, frame)
    }

    /// Advances the node clock and expires overdue requests
    pub fn tick(&mut self, now: Instant, dt: Duration) {
        self.now = now;
        self.uptime += dt;
        let expired = self.correlation.advance(now);
        if expired > 0 {
            debug!("{:?} requests timed out", expired);
        }
    }

    pub fn port(&self, port: PortId) -> Option<&NodePort<'a, L>> {
        self.registry.lookup(port)
    }

    pub fn port_stats(&self, port: PortId) -> Option<PortStats> {
        self.registry.lookup(port).map(|entry| entry.stats())
    }

    pub fn registry(&self) -> &Registry<'a, P, L> {
        &self.registry
    }

    pub fn pending_requests(&self) -> usize {
        self.correlation.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.correlation.next_deadline()
    }

    pub fn correlation_stats(&self) -> CorrelationStats {
        self.correlation.stats()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatch.stats()
    }

    pub fn log_ports(&self) {
        info!("node {:?} ports:", self.config.node_id.into_u16());
        self.registry.log_ports();
    }

    fn check_type(&mut self, port: PortId, type_hash: DatatypeHash) -> Result<(), SendError> {
        if let Some(entry) = self.registry.lookup(port)
            && entry.descriptor().type_hash != type_hash
        {
            self.registry.record_error(port);
            return Err(SendError::TypeMismatch);
        }
        Ok(())
    }

    fn record(&mut self, port: PortId, sent: bool) {
        if sent {
            self.registry.record_emit(port);
        } else {
            self.registry.record_error(port);
        }
    }
}
