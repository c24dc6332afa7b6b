//! Transfer framing
//!
//! Every transfer handed to a transport is a fixed little-endian header followed by the payload:
//!
//! ```text
//! offset size field
//!      0    1 kind (0 message, 1 request, 2 response)
//!      1    1 priority
//!      2    2 port id
//!      4    2 source node id (0xFFFF: anonymous)
//!      6    2 destination node id (0xFFFF: none)
//!      8    8 transfer id
//!     16    8 datatype hash
//!     24    - payload
//! ```

use uvnode_core::{DatatypeHash, NodeId, PortId, Priority, TransferId};

use crate::encoding::{get_u16, get_u64, put_u16, put_u64};

pub const HEADER_LENGTH: usize = 24;

/// Largest payload the engine frames
pub const MAX_PAYLOAD_LENGTH: usize = 1000;

/// Largest framed transfer the engine produces
pub const MAX_FRAME_LENGTH: usize = HEADER_LENGTH + MAX_PAYLOAD_LENGTH;

const KIND_OFFSET: usize = 0;
const PRIORITY_OFFSET: usize = 1;
const PORT_OFFSET: usize = 2;
const SOURCE_OFFSET: usize = 4;
const DESTINATION_OFFSET: usize = 6;
const TRANSFER_ID_OFFSET: usize = 8;
const TYPE_HASH_OFFSET: usize = 16;

/// Direction of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferKind {
    Message,
    Request,
    Response,
}

impl TransferKind {
    const fn into_u8(self) -> u8 {
        match self {
            TransferKind::Message => 0,
            TransferKind::Request => 1,
            TransferKind::Response => 2,
        }
    }

    const fn try_from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(TransferKind::Message),
            1 => Some(TransferKind::Request),
            2 => Some(TransferKind::Response),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    Truncated,
    InvalidKind,
    InvalidPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CapacityExceeded;

/// Transport-agnostic transfer metadata
///
/// The addresses should be consistent with the kind:
/// * `destination` is `None` for messages
/// * both addresses are `Some` for services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    pub kind: TransferKind,
    pub priority: Priority,
    pub port: PortId,
    pub source: Option<NodeId>,
    pub destination: Option<NodeId>,
    pub transfer_id: TransferId,
    pub type_hash: DatatypeHash,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_LENGTH] {
        let mut bytes = [0; HEADER_LENGTH];
        bytes[KIND_OFFSET] = self.kind.into_u8();
        bytes[PRIORITY_OFFSET] = self.priority.into_u8();
        put_u16(&mut bytes[PORT_OFFSET..], self.port.into_u16());
        put_u16(
            &mut bytes[SOURCE_OFFSET..],
            NodeId::into_u16_optional(self.source),
        );
        put_u16(
            &mut bytes[DESTINATION_OFFSET..],
            NodeId::into_u16_optional(self.destination),
        );
        put_u64(&mut bytes[TRANSFER_ID_OFFSET..], self.transfer_id.into_u64());
        put_u64(&mut bytes[TYPE_HASH_OFFSET..], self.type_hash.into_u64());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LENGTH {
            return Err(DecodeError::Truncated);
        }
        let kind =
            TransferKind::try_from_u8(bytes[KIND_OFFSET]).ok_or(DecodeError::InvalidKind)?;
        let priority =
            Priority::try_from_u8(bytes[PRIORITY_OFFSET]).ok_or(DecodeError::InvalidPriority)?;
        let field16 = |offset: usize| get_u16(&bytes[offset..]).ok_or(DecodeError::Truncated);
        let field64 = |offset: usize| get_u64(&bytes[offset..]).ok_or(DecodeError::Truncated);

        Ok(Self {
            kind,
            priority,
            port: PortId::new(field16(PORT_OFFSET)?),
            source: NodeId::from_u16_optional(field16(SOURCE_OFFSET)?),
            destination: NodeId::from_u16_optional(field16(DESTINATION_OFFSET)?),
            transfer_id: TransferId::new(field64(TRANSFER_ID_OFFSET)?),
            type_hash: DatatypeHash::new(field64(TYPE_HASH_OFFSET)?),
        })
    }
}

/// Framed transfer borrowing its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame<'a> {
    pub header: Header,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn decode(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        let header = Header::decode(bytes)?;
        Ok(Self {
            header,
            payload: &bytes[HEADER_LENGTH..],
        })
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LENGTH + self.payload.len()
    }

    /// Writes header and payload into `out`, replacing its contents
    pub fn encode_into<const N: usize>(
        &self,
        out: &mut heapless::Vec<u8, N>,
    ) -> Result<(), CapacityExceeded> {
        out.clear();
        out.extend_from_slice(&self.header.encode())
            .map_err(|_| CapacityExceeded)?;
        out.extend_from_slice(self.payload)
            .map_err(|_| CapacityExceeded)
    }
}
