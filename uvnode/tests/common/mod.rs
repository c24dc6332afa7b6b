#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use uvnode::core::{DatatypeHash, NodeId, PortId, Priority, TransferId};
use uvnode::frame::{Frame, Header, TransferKind};
use uvnode::{SerialTransport, Transport, TransportError};

pub const CAPACITY: usize = 256;

/// In-memory transport recording every accepted frame
pub struct MockTransport {
    capacity: usize,
    mask: u64,
    failure: Cell<Option<TransportError>>,
    sent: RefCell<Vec<(Priority, Vec<u8>)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_mask(u64::MAX)
    }

    pub fn with_mask(mask: u64) -> Self {
        Self {
            capacity: CAPACITY,
            mask,
            failure: Cell::new(None),
            sent: RefCell::new(Vec::new()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::new()
        }
    }

    /// Rejects every following transfer with `failure`
    pub fn fail_with(&self, failure: Option<TransportError>) {
        self.failure.set(failure);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.borrow().len()
    }

    /// Removes and returns the recorded frames
    pub fn take(&self) -> Vec<(Priority, Vec<u8>)> {
        self.sent.take()
    }

    /// Removes the only recorded frame and decodes its header and payload
    pub fn take_single(&self) -> (Header, Vec<u8>) {
        let mut sent = self.take();
        assert_eq!(sent.len(), 1);
        let (priority, bytes) = sent.remove(0);
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.header.priority, priority);
        (frame.header, frame.payload.to_vec())
    }
}

impl Transport for MockTransport {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn transfer_id_mask(&self) -> u64 {
        self.mask
    }

    fn send(&self, priority: Priority, frame: &[u8]) -> Result<(), TransportError> {
        if let Some(failure) = self.failure.get() {
            return Err(failure);
        }
        self.sent.borrow_mut().push((priority, frame.to_vec()));
        Ok(())
    }
}

/// In-memory serial link to a single remote node
pub struct MockLink {
    remote: NodeId,
    pub inner: MockTransport,
}

impl MockLink {
    pub fn new(remote: NodeId) -> Self {
        Self {
            remote,
            inner: MockTransport::new(),
        }
    }
}

impl Transport for MockLink {
    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn transfer_id_mask(&self) -> u64 {
        self.inner.transfer_id_mask()
    }

    fn send(&self, priority: Priority, frame: &[u8]) -> Result<(), TransportError> {
        self.inner.send(priority, frame)
    }
}

impl SerialTransport for MockLink {
    fn remote(&self) -> NodeId {
        self.remote
    }
}

pub fn node_id(value: u16) -> NodeId {
    NodeId::new(value).unwrap()
}

pub fn hash(name: &str) -> DatatypeHash {
    DatatypeHash::from_name(name).unwrap()
}

/// Builds the bytes of an inbound transfer
pub fn transfer(
    kind: TransferKind,
    port: u16,
    source: Option<NodeId>,
    destination: Option<NodeId>,
    transfer_id: u64,
    type_hash: DatatypeHash,
    payload: &[u8],
) -> Vec<u8> {
    let header = Header {
        kind,
        priority: Priority::Nominal,
        port: PortId::new(port),
        source,
        destination,
        transfer_id: TransferId::new(transfer_id),
        type_hash,
    };
    let mut bytes = header.encode().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}
