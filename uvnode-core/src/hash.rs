//! Datatype hash
//!
//! Maps a fully-qualified datatype name and major version to a 64-bit identifier carried by
//! every transfer. The namespace sits in the high bits so that related types sort adjacently:
//!
//! ```text
//!  63        48 47                                              0
//! ┌────────────┬─────────────────────────────────────────────────┐
//! │ namespace  │           qualified name and version            │
//! └────────────┴─────────────────────────────────────────────────┘
//! ```
//!
//! The namespace field is the FNV-1a hash of `root[.subroot]` folded to 16 bits. The low field
//! continues that hash over the leaf name and the major version and is folded to 48 bits, so two
//! distinct types collide with a probability of about 2^-48 even when they share a namespace.
//!
//! The hash can be built either from a dotted name, e.g. `uavcan.node.GetInfo.0.1`, or from
//! discrete components; both forms yield the same value.

use core::fmt;

/// Longest accepted fully-qualified name, in bytes
pub const MAX_NAME_LENGTH: usize = 255;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const NAMESPACE_SHIFT: u32 = 48;
const LEAF_MASK: u64 = 0xffff_ffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NameError {
    Empty,
    TooLong,
    EmptyComponent,
    MissingName,
    MissingVersion,
    InvalidVersion,
}

/// 64-bit content identifier of a datatype
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DatatypeHash(u64);

impl DatatypeHash {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn into_u64(self) -> u64 {
        self.0
    }

    /// Hashes a dotted name `root[.subroot].name.major[.minor]`
    pub fn from_name(name: &str) -> Result<Self, NameError> {
        Ok(DatatypeName::parse(name)?.hash())
    }

    /// Hashes discrete name components
    ///
    /// `name` may itself contain dots, e.g. `udp.OutgoingPacket`.
    pub const fn from_parts(root: &str, subroot: Option<&str>, name: &str, version: u8) -> Self {
        let mut namespace = fnv1a(FNV_OFFSET, root.as_bytes());
        if let Some(subroot) = subroot {
            namespace = fnv1a(fnv1a(namespace, b"."), subroot.as_bytes());
        }
        let leaf = fnv1a(fnv1a(namespace, b"/"), name.as_bytes());
        let leaf = fnv1a(leaf, &[b'.', version]);
        Self(fold16(namespace) << NAMESPACE_SHIFT | fold48(leaf))
    }

    /// Namespace part (root and subroot), shared by all types of a namespace
    pub const fn namespace(self) -> u16 {
        (self.0 >> NAMESPACE_SHIFT) as u16
    }

    /// Qualified name and version part
    pub const fn leaf(self) -> u64 {
        self.0 & LEAF_MASK
    }
}

impl From<DatatypeHash> for u64 {
    fn from(value: DatatypeHash) -> Self {
        value.into_u64()
    }
}

impl From<u64> for DatatypeHash {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Renders the hash as `namespace_leaf` hex groups, for inspection only
impl fmt::Display for DatatypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}_{:012x}", self.namespace(), self.leaf())
    }
}

/// Fully-qualified datatype name split into hashed components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DatatypeName<'a> {
    pub root: &'a str,
    pub subroot: Option<&'a str>,
    pub name: &'a str,
    pub version: u8,
}

impl<'a> DatatypeName<'a> {
    /// Splits `root[.subroot].name.major[.minor]`
    ///
    /// The version is one or two trailing numeric components; the minor version is dropped.
    /// When more than one component remains between the root and the version, the first one
    /// is the subroot and the rest is the leaf name.
    pub fn parse(full: &'a str) -> Result<Self, NameError> {
        if full.is_empty() {
            return Err(NameError::Empty);
        }
        if full.len() > MAX_NAME_LENGTH {
            return Err(NameError::TooLong);
        }

        let (root, rest) = full.split_once('.').ok_or(NameError::MissingName)?;
        let (head, last) = rest.rsplit_once('.').ok_or(NameError::MissingVersion)?;
        if !is_numeric(last) {
            return Err(NameError::MissingVersion);
        }
        let (rest, major) = match head.rsplit_once('.') {
            Some((head, tail)) if is_numeric(tail) => (head, tail),
            _ => (head, last),
        };
        let version = major.parse::<u8>().map_err(|_| NameError::InvalidVersion)?;

        if rest.is_empty() || is_numeric(rest) {
            return Err(NameError::MissingName);
        }
        let (subroot, name) = match rest.split_once('.') {
            Some((subroot, name)) => (Some(subroot), name),
            None => (None, rest),
        };

        if root.is_empty()
            || subroot.is_some_and(str::is_empty)
            || name.split('.').any(str::is_empty)
        {
            return Err(NameError::EmptyComponent);
        }

        Ok(Self {
            root,
            subroot,
            name,
            version,
        })
    }

    pub const fn hash(&self) -> DatatypeHash {
        DatatypeHash::from_parts(self.root, self.subroot, self.name, self.version)
    }
}

impl fmt::Display for DatatypeName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.", self.root)?;
        if let Some(subroot) = self.subroot {
            write!(f, "{}.", subroot)?;
        }
        write!(f, "{}.{}", self.name, self.version)
    }
}

fn is_numeric(component: &str) -> bool {
    !component.is_empty() && component.bytes().all(|b| b.is_ascii_digit())
}

/// Continues an FNV-1a hash over `bytes`
const fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

const fn fold16(hash: u64) -> u64 {
    (hash ^ (hash >> 16) ^ (hash >> 32) ^ (hash >> 48)) & 0xffff
}

const fn fold48(hash: u64) -> u64 {
    (hash ^ (hash >> 48)) & LEAF_MASK
}
