//! Core identifiers for Strata
//!
//! Replica, volume and archive ids are plain 64-bit newtypes. `SegId` names
//! one logical segment and orders by volume first, then index.

use bytes::{Buf, BufMut};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{FormatError, Result};

/// Wall-clock milliseconds since the Unix epoch, the unit of every
/// persisted or reported timestamp
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Identifier of a storage node instance (one replica holder)
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
)]
#[display("{_0}")]
pub struct InstanceId(u64);

impl InstanceId {
    /// Create from a raw id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

/// Identifier of a volume
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[display("{_0}")]
pub struct VolumeId(u64);

impl VolumeId {
    /// Create from a raw id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeId({})", self.0)
    }
}

/// Identifier of an archive (physical device)
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
)]
#[display("{_0}")]
pub struct ArchiveId(u64);

impl ArchiveId {
    /// Create from a raw id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchiveId({})", self.0)
    }
}

/// Logical segment identity: (volume, index within volume)
///
/// Field order matters: the derived ordering compares volume first.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{volume_id}:{index}")]
pub struct SegId {
    /// Owning volume
    pub volume_id: VolumeId,
    /// Index of the segment within the volume
    pub index: u32,
}

impl SegId {
    /// Encoded size: 8-byte volume id followed by a 4-byte index
    pub const ENCODED_LEN: usize = 12;

    /// Create a new segment id
    #[must_use]
    pub const fn new(volume_id: VolumeId, index: u32) -> Self {
        Self { volume_id, index }
    }

    /// Write the id in big-endian order
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.volume_id.get());
        buf.put_u32(self.index);
    }

    /// Read an id written by [`SegId::encode`]
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return Err(FormatError::BufferTooSmall {
                needed: Self::ENCODED_LEN,
                actual: buf.remaining(),
            }
            .into());
        }
        let volume_id = VolumeId::new(buf.get_u64());
        let index = buf.get_u32();
        Ok(Self::new(volume_id, index))
    }
}

impl fmt::Debug for SegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegId({}:{})", self.volume_id, self.index)
    }
}
