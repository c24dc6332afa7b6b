//! # uvnode
//!
//! This library implements a publish/subscribe and request/response node engine for `no_std`
//! targets. A node talks over one broadcast transport (e.g. a CAN bus) and any number of serial
//! point-to-point links. It uses fixed-capacity tables and requires no dynamic memory allocation.
//!
//! ## Architecture
//!
//! ```text
//!  application                       transports
//!       │                                ▲   │
//!       ▼                                │   ▼
//! ┌──────────┐   ┌─────────────┐   ┌──────────┐
//! │   Node   ├──►│ Correlation │◄──┤ Dispatch │
//! └────┬─────┘   └─────────────┘   └────┬─────┘
//!      │         ┌─────────────┐        │
//!      └────────►│  Registry   │◄───────┘
//!                └─────────────┘
//! ```
//! Components:
//! * _Registry_ holds the locally exposed ports: datatype, direction, counters and listeners.
//! * _Correlation_ tracks in-flight requests by (port, transfer ID) and expires them by deadline.
//! * _Dispatch_ owns transport references and transfer ID counters. It frames outbound
//!   transfers and routes inbound ones to the correlation engine or to port listeners.
//! * _Node_ composes the above and is driven by the host event loop.
//!
//! Every transfer carries a 64-bit datatype hash (see [`core::DatatypeHash`]). Transfers whose
//! hash does not match the local port definition are dropped.
//!
//! ## Concurrency model
//!
//! The engine runs on a single cooperative thread. Ticks, inbound transfers and application
//! calls must be strictly sequenced by the host; the engine uses no locks. Callbacks run inside
//! the node call that triggered them, so a blocking callback blocks the node.
//!
//! ## Limitations
//!
//! * Segmentation, checksums and retransmission are left to transports.
//! * Requests are matched by (port, transfer ID); the responding node is not verified.
#![no_std]

pub use uvnode_core as core;
pub use uvnode_transport::{SerialTransport, Transport, TransportError, frame, time};

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod handler;
pub mod node;
pub mod registry;

pub use config::Config;
pub use dispatch::{AttachError, ProtocolError, Route, SendError};
pub use handler::{
    MessageHandler, Reply, ReplyHandler, ReplyOutcome, ReplyTarget, ServiceHandler, Transfer,
};
pub use node::Node;
pub use registry::ConfigurationError;
