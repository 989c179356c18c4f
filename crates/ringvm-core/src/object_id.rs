//! Local/remote identity for shared objects.
//!
//! A [`LogicalObjectId`] addresses an operand that lives either in this
//! process or on a remote machine. The tag is part of the identity: a local
//! and a remote id with the same numeric payload are different objects.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VmError};

/// Size of the fixed byte layout produced by [`LogicalObjectId::to_bytes`].
pub const LOGICAL_OBJECT_ID_BYTES: usize = 16;

const REMOTE_TAG: u64 = 0;
const LOCAL_TAG: u64 = 1;

/// Tagged identity of a logical object.
///
/// Ordering compares the tag first (`Remote < Local`) and then the payload,
/// which keeps `Ord` and `Hash` consistent with equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalObjectId {
    /// Object owned by another machine.
    Remote(u64),
    /// Object owned by this process.
    Local(u64),
}

impl LogicalObjectId {
    /// Create a local id.
    pub const fn local(value: u64) -> Self {
        Self::Local(value)
    }

    /// Create a remote id.
    pub const fn remote(value: u64) -> Self {
        Self::Remote(value)
    }

    /// Numeric payload, regardless of locality.
    pub const fn value(&self) -> u64 {
        match *self {
            Self::Remote(v) | Self::Local(v) => v,
        }
    }

    /// Check if this id addresses a local object.
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Check if this id addresses a remote object.
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Compare payloads while ignoring locality.
    pub const fn same_value(&self, other: &Self) -> bool {
        self.value() == other.value()
    }

    /// Encode as tag followed by payload, both little-endian.
    pub fn to_bytes(&self) -> [u8; LOGICAL_OBJECT_ID_BYTES] {
        let tag = match self {
            Self::Remote(_) => REMOTE_TAG,
            Self::Local(_) => LOCAL_TAG,
        };
        let mut bytes = [0u8; LOGICAL_OBJECT_ID_BYTES];
        bytes[..8].copy_from_slice(&tag.to_le_bytes());
        bytes[8..].copy_from_slice(&self.value().to_le_bytes());
        bytes
    }

    /// Decode the layout produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8; LOGICAL_OBJECT_ID_BYTES]) -> Result<Self> {
        let mut tag = [0u8; 8];
        let mut value = [0u8; 8];
        tag.copy_from_slice(&bytes[..8]);
        value.copy_from_slice(&bytes[8..]);
        let value = u64::from_le_bytes(value);

        match u64::from_le_bytes(tag) {
            REMOTE_TAG => Ok(Self::Remote(value)),
            LOCAL_TAG => Ok(Self::Local(value)),
            other => Err(VmError::InvalidConfig(format!(
                "unknown logical object id tag {}",
                other
            ))),
        }
    }
}

impl fmt::Display for LogicalObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(v) => write!(f, "remote:{}", v),
            Self::Local(v) => write!(f, "local:{}", v),
        }
    }
}
