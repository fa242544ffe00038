//! Archive header layout
//!
//! Header region, at offset 0 of every formatted device:
//! ```text
//! +-----------+-----------------+----------------------+-----------+---------+
//! | magic     | metadata length | metadata blob        | checksum  | zeroes  |
//! | 8 bytes   | 4 bytes         | `length` bytes       | 8 bytes   |         |
//! +-----------+-----------------+----------------------+-----------+---------+
//! 0           8                 12                     12 + len
//! ```
//! All integers are big-endian. The total region length is configurable
//! (128 KiB by default). The codec frames the checksum but does not pick or
//! verify its algorithm; see [`strata_common::HeaderChecksum`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use strata_common::{ArchiveOptions, Error, FormatError, Result};

/// Offset of the magic number
pub const MAGIC_OFFSET: usize = 0;

/// Offset of the metadata length
pub const METADATA_LENGTH_OFFSET: usize = 8;

/// Offset of the metadata blob
pub const METADATA_OFFSET: usize = 12;

/// Size of the trailing checksum
pub const CHECKSUM_LEN: usize = 8;

/// Magic + length + checksum
pub const FIXED_OVERHEAD: usize = METADATA_OFFSET + CHECKSUM_LEN;

/// Offset of the checksum for a blob of `metadata_len` bytes
#[inline]
#[must_use]
pub const fn checksum_offset(metadata_len: usize) -> usize {
    METADATA_OFFSET + metadata_len
}

/// Registered on-disk formats, identified by their header magic
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveType {
    /// A raw block device owned by this node
    #[default]
    RawDisk,
    /// A device recognized but not yet settled into a role
    UnsettledDisk,
}

impl ArchiveType {
    /// Every registered type
    pub const ALL: [Self; 2] = [Self::RawDisk, Self::UnsettledDisk];

    /// Header magic for this type
    #[must_use]
    pub const fn magic(self) -> u64 {
        match self {
            Self::RawDisk => 0x1847_EBD7_F527_B3C0,
            Self::UnsettledDisk => 0x1847_EBD7_F527_B3C6,
        }
    }

    /// Numeric value persisted in metadata
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::RawDisk => 0,
            Self::UnsettledDisk => 6,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RawDisk => "RawDisk",
            Self::UnsettledDisk => "UnsettledDisk",
        }
    }

    /// Resolve a header magic to a registered type
    #[must_use]
    pub fn from_magic(magic: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.magic() == magic)
    }

    /// Resolve a persisted value
    pub fn from_value(value: i32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.value() == value)
            .ok_or(Error::InvalidValue {
                kind: "archive type",
                value: i64::from(value),
            })
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded header region
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// Format the magic resolved to
    pub archive_type: ArchiveType,
    /// Type-specific metadata blob
    pub metadata: Bytes,
    /// Checksum slot as stored; verification belongs to the caller
    pub checksum: u64,
}

/// Encoder/decoder for a header region of fixed total length
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchiveHeaderCodec {
    header_length: usize,
}

impl ArchiveHeaderCodec {
    /// Create a codec for a header region of `header_length` bytes
    pub fn new(header_length: usize) -> Result<Self> {
        if header_length <= FIXED_OVERHEAD {
            return Err(Error::configuration(format!(
                "header length {header_length} leaves no room for metadata"
            )));
        }
        Ok(Self { header_length })
    }

    /// Create a codec sized by archive options
    #[must_use]
    pub const fn from_options(options: &ArchiveOptions) -> Self {
        Self {
            header_length: options.archive_header_length() as usize,
        }
    }

    /// Total header region length
    #[must_use]
    pub const fn header_length(&self) -> usize {
        self.header_length
    }

    /// Largest metadata blob that fits in the region
    #[must_use]
    pub const fn max_metadata_length(&self) -> usize {
        self.header_length - FIXED_OVERHEAD
    }

    fn check_length(&self, length: i64) -> Result<usize> {
        let max = self.max_metadata_length();
        match usize::try_from(length) {
            Ok(len) if len > 0 && len <= max => Ok(len),
            _ => Err(FormatError::CorruptLength { length, max }.into()),
        }
    }

    /// Encode a full header region, zero padded to `header_length`
    pub fn encode(&self, archive_type: ArchiveType, metadata: &[u8], checksum: u64) -> Result<Bytes> {
        let len = self.check_length(metadata.len() as i64)?;
        let mut buf = BytesMut::with_capacity(self.header_length);
        buf.put_u64(archive_type.magic());
        buf.put_i32(len as i32);
        buf.put_slice(metadata);
        buf.put_u64(checksum);
        buf.resize(self.header_length, 0);
        Ok(buf.freeze())
    }

    /// Encode a decoded header back into a region
    pub fn encode_header(&self, header: &ArchiveHeader) -> Result<Bytes> {
        self.encode(header.archive_type, &header.metadata, header.checksum)
    }

    /// Decode a header region.
    ///
    /// An unregistered magic yields `UnrecognizedFormat`, which callers read
    /// as "never formatted". A registered magic that differs from `expected`
    /// yields `TypeMismatch`.
    pub fn decode(&self, data: &[u8], expected: Option<ArchiveType>) -> Result<ArchiveHeader> {
        if data.len() < METADATA_OFFSET {
            return Err(FormatError::BufferTooSmall {
                needed: METADATA_OFFSET,
                actual: data.len(),
            }
            .into());
        }

        let mut buf = &data[MAGIC_OFFSET..];
        let magic = buf.get_u64();
        let archive_type =
            ArchiveType::from_magic(magic).ok_or(FormatError::UnrecognizedFormat { magic })?;
        if let Some(expected) = expected
            && expected != archive_type
        {
            return Err(FormatError::TypeMismatch {
                expected: expected.name(),
                found: archive_type.name(),
            }
            .into());
        }

        let len = self.check_length(i64::from(buf.get_i32()))?;
        let needed = checksum_offset(len) + CHECKSUM_LEN;
        if data.len() < needed {
            return Err(FormatError::BufferTooSmall {
                needed,
                actual: data.len(),
            }
            .into());
        }

        let metadata = Bytes::copy_from_slice(&data[METADATA_OFFSET..checksum_offset(len)]);
        let mut tail = &data[checksum_offset(len)..];
        let checksum = tail.get_u64();

        Ok(ArchiveHeader {
            archive_type,
            metadata,
            checksum,
        })
    }
}
