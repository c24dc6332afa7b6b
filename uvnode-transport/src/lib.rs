//! uvnode transport interface
//!
//! The crate provides the interface between transport implementations and the uvnode engine.
//! Transport crates should depend on this crate. Node users should depend on the `uvnode`
//! crate instead.
//!
//! A node drives exactly one broadcast transport (e.g. a CAN bus adapter) and any number of
//! serial transports, each reaching a single remote node. Transports are opaque reliable-transfer
//! channels: segmentation, byte stuffing and checksums are their business. The engine hands them
//! complete framed transfers (see [`frame`]) and expects to be handed back only validated ones.
//!
//! Transports are referenced by the engine, not owned. All methods take `&self`; an
//! implementation that needs mutable state should keep it behind a `Cell`/`RefCell` or a
//! blocking mutex. The engine runs on a single cooperative thread, so `send` must not block.

#![no_std]

pub mod encoding;
pub mod frame;

pub mod time {
    pub use embassy_time::{Duration, Instant};
}

use uvnode_core::{NodeId, Priority};

/// Failure reported by a transport for a single outbound transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The transmit queue cannot accept the transfer now
    QueueFull,
    /// The physical link is not connected
    LinkDown,
}

/// Outbound channel of framed transfers
pub trait Transport {
    /// Largest framed transfer (header included) the transport accepts, in bytes
    fn capacity(&self) -> usize;

    /// Transfer ID counters wrap around within this mask
    ///
    /// A CAN transport carries 5-bit transfer IDs and returns `0x1f`.
    fn transfer_id_mask(&self) -> u64 {
        u64::MAX
    }

    /// Enqueues a framed transfer. Returning `Ok` means the transfer was accepted for sending.
    fn send(&self, priority: Priority, frame: &[u8]) -> Result<(), TransportError>;
}

/// Point-to-point transport reaching a single remote node
pub trait SerialTransport: Transport {
    fn remote(&self) -> NodeId;
}
