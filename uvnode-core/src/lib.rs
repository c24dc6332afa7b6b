//! Protocol primitives for the uvnode stack
//!
//! This crate provides the basic identifiers shared by the transport interface and the node
//! engine, together with the datatype hash used as the wire-level type witness.
//! Node users should not depend on this crate directly. Use the `uvnode::core` reexport instead.
#![no_std]

pub mod hash;

pub use hash::{DatatypeHash, DatatypeName, NameError};

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Transfer priority
///
/// The numeric encoding is shared by every transport, thus the ordering is reversed:
/// Optional > Exceptional
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    /// Reserved for total system failure, never accounted for in bus load.
    Exceptional = 0,
    Immediate = 1,
    Fast = 2,
    High = 3,
    /// Default priority for regular traffic.
    #[default]
    Nominal = 4,
    Low = 5,
    Slow = 6,
    /// Diagnostic traffic that may never be delivered.
    Optional = 7,
}

impl Priority {
    pub const MIN: Priority = Priority::Exceptional;
    pub const MAX: Priority = Priority::Optional;

    pub const fn try_from_u8(code: u8) -> Option<Priority> {
        if code <= Self::MAX.into_u8() {
            Some(Priority::from_u8_truncating(code))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(code: u8) -> Priority {
        match code & 0x7 {
            0 => Priority::Exceptional,
            1 => Priority::Immediate,
            2 => Priority::Fast,
            3 => Priority::High,
            4 => Priority::Nominal,
            5 => Priority::Low,
            6 => Priority::Slow,
            7 => Priority::Optional,
            _ => unreachable!(),
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}

/// Node address, unique within a network
///
/// Serial links use the full 16-bit range; `0xFFFF` is reserved to encode a missing address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u16);

impl NodeId {
    const UNSET_VALUE: u16 = u16::MAX;
    pub const MIN: NodeId = NodeId(0);
    pub const MAX: NodeId = NodeId(Self::UNSET_VALUE - 1);

    pub const fn new(value: u16) -> Option<Self> {
        if value != Self::UNSET_VALUE {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Decodes an optional address, mapping the reserved value to `None`
    pub const fn from_u16_optional(value: u16) -> Option<Self> {
        Self::new(value)
    }

    /// Encodes an optional address, mapping `None` to the reserved value
    pub const fn into_u16_optional(value: Option<Self>) -> u16 {
        match value {
            Some(id) => id.0,
            None => Self::UNSET_VALUE,
        }
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl From<NodeId> for u16 {
    fn from(value: NodeId) -> Self {
        value.into_u16()
    }
}

impl TryFrom<u16> for NodeId {
    type Error = InvalidValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Numbered channel for publish or request/response traffic
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortId(u16);

impl PortId {
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for PortId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<PortId> for u16 {
    fn from(value: PortId) -> Self {
        value.into_u16()
    }
}

/// Transfer identifier
///
/// The identifier width is transport-defined. Counters wrap around within a transport mask,
/// e.g. `0x1f` for a 5-bit field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferId(u64);

impl TransferId {
    /// TransferId of the first transfer in a session
    pub const SESSION_START: TransferId = TransferId(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn into_u64(self) -> u64 {
        self.0
    }

    /// Next identifier, wrapping around within `mask`
    pub const fn next(self, mask: u64) -> Self {
        Self(self.0.wrapping_add(1) & mask)
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::SESSION_START
    }
}

impl From<u64> for TransferId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TransferId> for u64 {
    fn from(value: TransferId) -> Self {
        value.into_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_code() {
        for code in 0u8..8 {
            assert_eq!(Priority::try_from_u8(code).unwrap().into_u8(), code);
        }
        assert_eq!(Priority::try_from_u8(8), None);
        assert!(Priority::Exceptional < Priority::Optional);
    }

    #[test]
    fn test_node_id_reserved_value() {
        assert_eq!(NodeId::new(u16::MAX), None);
        assert_eq!(NodeId::from_u16_optional(0xffff), None);
        assert_eq!(NodeId::into_u16_optional(None), 0xffff);
        let id = NodeId::new(42).unwrap();
        assert_eq!(NodeId::from_u16_optional(NodeId::into_u16_optional(Some(id))), Some(id));
    }

    #[test]
    fn test_transfer_id_wraps_within_mask() {
        assert_eq!(TransferId::new(30).next(0x1f), TransferId::new(31));
        assert_eq!(TransferId::new(31).next(0x1f), TransferId::SESSION_START);
        assert_eq!(TransferId::new(u64::MAX).next(u64::MAX), TransferId::SESSION_START);
    }
}
