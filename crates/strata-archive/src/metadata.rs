//! Persisted archive metadata
//!
//! The metadata is stored as a JSON blob inside the archive header region.
//! Optional fields stay `None` (or zero for counters) until a snapshot sets
//! them, so a refresh can merge a partial snapshot without clobbering
//! fields it does not carry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use strata_common::{ArchiveId, Error, FormatError, HeaderChecksum, InstanceId, Result};

use crate::layout::{ArchiveHeaderCodec, ArchiveType};
use crate::status::ArchiveStatus;

/// Medium class of the underlying device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageType {
    Sata,
    Sas,
    Ssd,
    Pcie,
}

impl StorageType {
    /// Persisted numeric value
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::Sata => 1,
            Self::Sas => 2,
            Self::Ssd => 3,
            Self::Pcie => 4,
        }
    }

    pub fn from_value(value: i32) -> Result<Self> {
        match value {
            1 => Ok(Self::Sata),
            2 => Ok(Self::Sas),
            3 => Ok(Self::Ssd),
            4 => Ok(Self::Pcie),
            _ => Err(Error::InvalidValue {
                kind: "storage type",
                value: i64::from(value),
            }),
        }
    }

    /// Whether the medium is solid state
    #[must_use]
    pub const fn is_ssd(self) -> bool {
        matches!(self, Self::Ssd | Self::Pcie)
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Header payload describing one archive
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveMetadata {
    pub archive_id: Option<ArchiveId>,
    pub serial_number: Option<String>,
    pub slot_no: Option<String>,
    /// Node that owns the archive
    pub instance_id: Option<InstanceId>,
    /// Page size in bytes; 0 when unknown
    pub page_size: u32,
    pub device_name: Option<String>,
    /// Unset until the archive is first classified
    pub status: Option<ArchiveStatus>,
    pub storage_type: Option<StorageType>,
    pub version: u32,
    pub archive_type: Option<ArchiveType>,
    /// Milliseconds since the Unix epoch; 0 when unknown
    pub created_time: u64,
    pub updated_time: u64,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub description: Option<String>,
    /// Bytes addressable for data
    pub logical_space: u64,
    pub logical_free_space: u64,
    pub used_space: u64,
    pub file_system_partition_name: Option<String>,
}

fn merge_opt<T: Clone + PartialEq>(dst: &mut Option<T>, src: Option<&T>) -> bool {
    match src {
        Some(v) if dst.as_ref() != Some(v) => {
            *dst = Some(v.clone());
            true
        }
        _ => false,
    }
}

fn merge_nonzero<T: Copy + PartialEq + Default>(dst: &mut T, src: T) -> bool {
    if src != T::default() && *dst != src {
        *dst = src;
        true
    } else {
        false
    }
}

impl ArchiveMetadata {
    /// Create metadata for a newly recognized archive
    #[must_use]
    pub fn new(archive_id: ArchiveId, archive_type: ArchiveType) -> Self {
        Self {
            archive_id: Some(archive_id),
            archive_type: Some(archive_type),
            ..Self::default()
        }
    }

    /// Current status, `Offlined` until one is set
    #[must_use]
    pub fn status(&self) -> ArchiveStatus {
        self.status.unwrap_or_default()
    }

    /// Header format, `RawDisk` until one is set
    #[must_use]
    pub fn archive_type(&self) -> ArchiveType {
        self.archive_type.unwrap_or_default()
    }

    /// Copy every field `other` carries into `self`.
    ///
    /// Unset fields in `other` leave `self` untouched. Returns whether any
    /// field of `self` changed.
    pub fn merge_from(&mut self, other: &Self) -> bool {
        let mut changed = false;
        changed |= merge_opt(&mut self.archive_id, other.archive_id.as_ref());
        changed |= merge_opt(&mut self.serial_number, other.serial_number.as_ref());
        changed |= merge_opt(&mut self.slot_no, other.slot_no.as_ref());
        changed |= merge_opt(&mut self.instance_id, other.instance_id.as_ref());
        changed |= merge_nonzero(&mut self.page_size, other.page_size);
        changed |= merge_opt(&mut self.device_name, other.device_name.as_ref());
        changed |= merge_opt(&mut self.status, other.status.as_ref());
        changed |= merge_opt(&mut self.storage_type, other.storage_type.as_ref());
        changed |= merge_nonzero(&mut self.version, other.version);
        changed |= merge_opt(&mut self.archive_type, other.archive_type.as_ref());
        changed |= merge_nonzero(&mut self.created_time, other.created_time);
        changed |= merge_nonzero(&mut self.updated_time, other.updated_time);
        changed |= merge_opt(&mut self.created_by, other.created_by.as_ref());
        changed |= merge_opt(&mut self.updated_by, other.updated_by.as_ref());
        changed |= merge_opt(&mut self.description, other.description.as_ref());
        changed |= merge_nonzero(&mut self.logical_space, other.logical_space);
        changed |= merge_nonzero(&mut self.logical_free_space, other.logical_free_space);
        changed |= merge_nonzero(&mut self.used_space, other.used_space);
        changed |= merge_opt(
            &mut self.file_system_partition_name,
            other.file_system_partition_name.as_ref(),
        );
        changed
    }

    /// Serialize into a header region
    pub fn to_header(&self, codec: &ArchiveHeaderCodec, checksum: HeaderChecksum) -> Result<Bytes> {
        let blob = serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))?;
        codec.encode(self.archive_type(), &blob, checksum.compute(&blob))
    }

    /// Parse a header region, verifying the checksum with `checksum`
    pub fn from_header(
        codec: &ArchiveHeaderCodec,
        data: &[u8],
        expected: Option<ArchiveType>,
        checksum: HeaderChecksum,
    ) -> Result<Self> {
        let header = codec.decode(data, expected)?;
        if !checksum.verify(&header.metadata, header.checksum) {
            return Err(FormatError::ChecksumMismatch {
                stored: header.checksum,
                computed: checksum.compute(&header.metadata),
            }
            .into());
        }
        let mut metadata: Self = serde_json::from_slice(&header.metadata)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        // The magic is authoritative for the type
        metadata.archive_type = Some(header.archive_type);
        Ok(metadata)
    }
}
