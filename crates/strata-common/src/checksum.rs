//! Header checksum helpers
//!
//! The header codec only frames the 8-byte checksum; which algorithm fills
//! it is a property of the archive type and is enforced by the caller.

use serde::{Deserialize, Serialize};

/// Algorithm used to fill an archive header's checksum slot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderChecksum {
    /// Slot is written as zero and never checked
    None,
    /// CRC32C of the metadata blob, zero-extended to 64 bits
    #[default]
    Crc32c,
    /// xxHash64 of the metadata blob
    Xxh64,
}

impl HeaderChecksum {
    /// Compute the checksum value for a metadata blob
    #[must_use]
    pub fn compute(self, blob: &[u8]) -> u64 {
        match self {
            Self::None => 0,
            Self::Crc32c => u64::from(crc32c::crc32c(blob)),
            Self::Xxh64 => xxhash_rust::xxh64::xxh64(blob, 0),
        }
    }

    /// Verify a stored checksum against a metadata blob
    #[must_use]
    pub fn verify(self, blob: &[u8], stored: u64) -> bool {
        match self {
            Self::None => true,
            _ => self.compute(blob) == stored,
        }
    }
}
