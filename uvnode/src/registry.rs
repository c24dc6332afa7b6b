//! Locally exposed ports
//!
//! The registry is populated once during node initialization. Each port is identified by its
//! port id and carries the datatype hash of its transfers, direction flags, counters and an
//! ordered list of listeners.

use crate::core::{DatatypeHash, DatatypeName, NameError, NodeId, PortId};
use crate::handler::{Listener, MessageHandler, ServiceHandler};

/// Conflicting or unsatisfiable port claim
///
/// Raised at registration time; the node must not run with such a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigurationError {
    InvalidName(NameError),
    DatatypeConflict {
        port: PortId,
        registered: DatatypeHash,
        claimed: DatatypeHash,
    },
    /// Two different datatype names share one hash
    HashCollision { port: PortId, hash: DatatypeHash },
    NoPortSlotLeft,
    NoListenerSlotLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortDescriptor {
    pub port: PortId,
    pub is_input: bool,
    pub is_output: bool,
    pub type_hash: DatatypeHash,
    pub type_name: &'static str,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortStats {
    pub emitted: u64,
    pub received: u64,
    pub errored: u64,
}

/// Registered port
pub struct NodePort<'a, const L: usize> {
    descriptor: PortDescriptor,
    stats: PortStats,
    listeners: heapless::Vec<Listener<'a>, L>,
}

impl<'a, const L: usize> NodePort<'a, L> {
    fn new(port: PortId, type_hash: DatatypeHash, type_name: &'static str) -> Self {
        Self {
            descriptor: PortDescriptor {
                port,
                is_input: false,
                is_output: false,
                type_hash,
                type_name,
            },
            stats: Default::default(),
            listeners: heapless::Vec::new(),
        }
    }

    pub fn descriptor(&self) -> &PortDescriptor {
        &self.descriptor
    }

    pub fn stats(&self) -> PortStats {
        self.stats
    }

    pub fn listeners(&self) -> &[Listener<'a>] {
        &self.listeners
    }

    fn push_listener(&mut self, listener: Listener<'a>) -> Result<(), ConfigurationError> {
        self.listeners
            .push(listener)
            .map_err(|_| ConfigurationError::NoListenerSlotLeft)
    }
}

/// Port table holding up to `P` ports with up to `L` listeners each
pub struct Registry<'a, const P: usize, const L: usize> {
    // Sorted by port id
    ports: heapless::Vec<NodePort<'a, L>, P>,
}

impl<const P: usize, const L: usize> Default for Registry<'_, P, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const P: usize, const L: usize> Registry<'a, P, L> {
    pub const fn new() -> Self {
        Self {
            ports: heapless::Vec::new(),
        }
    }

    /// Finds or creates the port entry
    ///
    /// Claiming an existing port with the same datatype is an idempotent upsert. A different
    /// datatype fails with `DatatypeConflict`, and a different name with an equal hash fails with
    /// `HashCollision`. Minor versions are not compared.
    pub fn claim(
        &mut self,
        port: PortId,
        type_name: &'static str,
    ) -> Result<&mut NodePort<'a, L>, ConfigurationError> {
        let name = DatatypeName::parse(type_name).map_err(ConfigurationError::InvalidName)?;
        let type_hash = name.hash();

        let idx = match self.position(port) {
            Ok(idx) => {
                let registered = self.ports[idx].descriptor.type_hash;
                if registered != type_hash {
                    error!(
                        "port {:?} claimed as {:?}, registered as {:?}",
                        port.into_u16(),
                        type_name,
                        self.ports[idx].descriptor.type_name
                    );
                    return Err(ConfigurationError::DatatypeConflict {
                        port,
                        registered,
                        claimed: type_hash,
                    });
                }
                let existing = self.ports[idx].descriptor.type_name;
                if DatatypeName::parse(existing).ok() != Some(name) {
                    error!(
                        "port {:?}: {:?} and {:?} share hash {:?}",
                        port.into_u16(),
                        type_name,
                        existing,
                        type_hash.into_u64()
                    );
                    return Err(ConfigurationError::HashCollision {
                        port,
                        hash: type_hash,
                    });
                }
                idx
            }
            Err(idx) => {
                self.ports
                    .insert(idx, NodePort::new(port, type_hash, type_name))
                    .map_err(|_| ConfigurationError::NoPortSlotLeft)?;
                idx
            }
        };
        Ok(&mut self.ports[idx])
    }

    pub fn define_publish(
        &mut self,
        port: PortId,
        type_name: &'static str,
    ) -> Result<(), ConfigurationError> {
        let entry = self.claim(port, type_name)?;
        entry.descriptor.is_output = true;
        Ok(())
    }

    /// Appends a request listener; all listeners of a port see every request
    pub fn define_service(
        &mut self,
        port: PortId,
        type_name: &'static str,
        as_output: bool,
        handler: &'a dyn ServiceHandler,
    ) -> Result<(), ConfigurationError> {
        let entry = self.claim(port, type_name)?;
        entry.push_listener(Listener::Service(handler))?;
        if as_output {
            entry.descriptor.is_output = true;
        } else {
            entry.descriptor.is_input = true;
        }
        Ok(())
    }

    /// Appends a message listener, optionally restricted to messages from `peer`
    pub fn subscribe(
        &mut self,
        port: PortId,
        type_name: &'static str,
        peer: Option<NodeId>,
        handler: &'a dyn MessageHandler,
    ) -> Result<(), ConfigurationError> {
        let entry = self.claim(port, type_name)?;
        entry.push_listener(Listener::Subscription { peer, handler })?;
        entry.descriptor.is_input = true;
        Ok(())
    }

    pub fn lookup(&self, port: PortId) -> Option<&NodePort<'a, L>> {
        let idx = self.position(port).ok()?;
        Some(&self.ports[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodePort<'a, L>> {
        self.ports.iter()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Releases all descriptors and listeners
    pub fn clear(&mut self) {
        self.ports.clear();
    }

    /// Logs every port with its datatype and counters
    pub fn log_ports(&self) {
        for entry in self.ports.iter() {
            let d = &entry.descriptor;
            info!(
                "port {:?} in={:?} out={:?} {:?} listeners={:?} stats={:?}",
                d.port.into_u16(),
                d.is_input,
                d.is_output,
                d.type_name,
                entry.listeners.len(),
                entry.stats
            );
        }
    }

    pub(crate) fn record_emit(&mut self, port: PortId) {
        if let Some(stats) = self.stats_mut(port) {
            stats.emitted += 1;
        }
    }

    pub(crate) fn record_receive(&mut self, port: PortId) {
        if let Some(stats) = self.stats_mut(port) {
            stats.received += 1;
        }
    }

    pub(crate) fn record_error(&mut self, port: PortId) {
        if let Some(stats) = self.stats_mut(port) {
            stats.errored += 1;
        }
    }

    pub(crate) fn listeners(&self, port: PortId) -> Option<heapless::Vec<Listener<'a>, L>> {
        self.lookup(port).map(|entry| entry.listeners.clone())
    }

    fn stats_mut(&mut self, port: PortId) -> Option<&mut PortStats> {
        let idx = self.position(port).ok()?;
        Some(&mut self.ports[idx].stats)
    }

    fn position(&self, port: PortId) -> Result<usize, usize> {
        self.ports
            .binary_search_by_key(&port, |entry| entry.descriptor.port)
    }
}
