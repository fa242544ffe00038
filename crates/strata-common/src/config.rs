//! Configuration types for Strata
//!
//! `ArchiveOptions` replaces process-wide sizing constants: it is built once
//! from page and segment sizes, validated, and then shared read-only
//! (typically as `Arc<ArchiveOptions>`) with every component that needs
//! derived lengths.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Sector size every on-disk region is aligned to
pub const SECTOR_SIZE: u32 = 512;

/// Default total length of the archive header region (128 KiB)
pub const DEFAULT_ARCHIVE_HEADER_LENGTH: u32 = 128 * 1024;

/// Length reserved for one segment unit's serialized metadata
pub const SEGMENT_UNIT_METADATA_LENGTH: u64 = 2048;

/// Length reserved for one segment unit's acceptor record
pub const SEGMENT_UNIT_ACCEPTOR_LENGTH: u64 = 512;

/// Default number of flexible segment unit slots per archive
pub const DEFAULT_MAX_FLEXIBLE_COUNT: u32 = 1500;

/// Align a length up to the next sector boundary
#[inline]
#[must_use]
pub const fn align_to_sector(value: u64) -> u64 {
    value.div_ceil(SECTOR_SIZE as u64) * SECTOR_SIZE as u64
}

/// Length of one bit region covering `page_count` pages
#[inline]
#[must_use]
pub const fn bit_region_length(page_count: u32) -> usize {
    page_count.div_ceil(8) as usize
}

/// On-disk length of a segment unit bitmap record: page count, data region
/// and migration region, padded to a sector
#[inline]
#[must_use]
pub const fn segment_unit_bitmap_length(page_count: u32) -> usize {
    align_to_sector((4 + 2 * bit_region_length(page_count)) as u64) as usize
}

/// Sizing inputs as they appear in a config file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSizing {
    /// Logical page size in bytes
    pub page_size: u32,
    /// Logical segment size in bytes
    pub segment_size: u64,
    /// Per-page metadata (checksum, address) in bytes
    pub page_metadata_size: u32,
    /// Whether page metadata is persisted next to each page
    pub page_metadata_flush: bool,
    /// Number of flexible segment unit slots
    pub max_flexible_count: u32,
    /// Total length of the archive header region
    pub archive_header_length: u32,
}

impl Default for ArchiveSizing {
    fn default() -> Self {
        Self {
            page_size: 8 * 1024,
            segment_size: 16 * 1024 * 1024,
            page_metadata_size: SECTOR_SIZE,
            page_metadata_flush: true,
            max_flexible_count: DEFAULT_MAX_FLEXIBLE_COUNT,
            archive_header_length: DEFAULT_ARCHIVE_HEADER_LENGTH,
        }
    }
}

/// Validated, immutable archive sizing with every derived length
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ArchiveSizing", into = "ArchiveSizing")]
pub struct ArchiveOptions {
    sizing: ArchiveSizing,
    page_count_per_segment: u32,
    page_physical_size: u64,
    segment_physical_size: u64,
    segment_unit_bitmap_length: usize,
    segment_unit_descdata_length: u64,
    all_flexible_length: u64,
}

impl ArchiveOptions {
    /// Build options from page and segment sizes, keeping other inputs at
    /// their defaults
    pub fn new(page_size: u32, segment_size: u64, page_metadata_size: u32) -> Result<Self> {
        Self::from_sizing(ArchiveSizing {
            page_size,
            segment_size,
            page_metadata_size,
            ..ArchiveSizing::default()
        })
    }

    /// Validate sizing inputs and compute derived lengths
    pub fn from_sizing(sizing: ArchiveSizing) -> Result<Self> {
        let sector = u64::from(SECTOR_SIZE);
        if sizing.page_size == 0 || u64::from(sizing.page_size) % sector != 0 {
            return Err(Error::configuration(format!(
                "page size {} is not a non-zero multiple of {SECTOR_SIZE}",
                sizing.page_size
            )));
        }
        if sizing.segment_size == 0 || sizing.segment_size % sector != 0 {
            return Err(Error::configuration(format!(
                "segment size {} is not a non-zero multiple of {SECTOR_SIZE}",
                sizing.segment_size
            )));
        }
        if sizing.segment_size % u64::from(sizing.page_size) != 0 {
            return Err(Error::configuration(format!(
                "segment size {} is not a multiple of page size {}",
                sizing.segment_size, sizing.page_size
            )));
        }
        if sizing.page_metadata_size % SECTOR_SIZE != 0 {
            return Err(Error::configuration(format!(
                "page metadata size {} is not a multiple of {SECTOR_SIZE}",
                sizing.page_metadata_size
            )));
        }
        if sizing.archive_header_length <= 20 || sizing.archive_header_length % SECTOR_SIZE != 0 {
            return Err(Error::configuration(format!(
                "archive header length {} must exceed 20 bytes and be sector aligned",
                sizing.archive_header_length
            )));
        }

        let page_count_per_segment = u32::try_from(sizing.segment_size / u64::from(sizing.page_size))
            .map_err(|_| Error::configuration("too many pages per segment"))?;

        let max_flexible_count = if sizing.max_flexible_count == 0 {
            DEFAULT_MAX_FLEXIBLE_COUNT
        } else {
            sizing.max_flexible_count
        };

        let page_physical_size = if sizing.page_metadata_flush {
            u64::from(sizing.page_size) + u64::from(sizing.page_metadata_size)
        } else {
            u64::from(sizing.page_size)
        };
        let segment_physical_size = page_physical_size * u64::from(page_count_per_segment);
        let segment_unit_bitmap_length = segment_unit_bitmap_length(page_count_per_segment);
        let segment_unit_descdata_length = SEGMENT_UNIT_METADATA_LENGTH
            + segment_unit_bitmap_length as u64
            + SEGMENT_UNIT_ACCEPTOR_LENGTH;
        let all_flexible_length = u64::from(max_flexible_count) * segment_unit_descdata_length;

        Ok(Self {
            sizing: ArchiveSizing {
                max_flexible_count,
                ..sizing
            },
            page_count_per_segment,
            page_physical_size,
            segment_physical_size,
            segment_unit_bitmap_length,
            segment_unit_descdata_length,
            all_flexible_length,
        })
    }

    /// The validated sizing inputs
    #[must_use]
    pub const fn sizing(&self) -> &ArchiveSizing {
        &self.sizing
    }

    #[must_use]
    pub const fn page_size(&self) -> u32 {
        self.sizing.page_size
    }

    #[must_use]
    pub const fn segment_size(&self) -> u64 {
        self.sizing.segment_size
    }

    #[must_use]
    pub const fn archive_header_length(&self) -> u32 {
        self.sizing.archive_header_length
    }

    /// Pages in one segment unit; also the largest page count a bitmap
    /// record may claim
    #[must_use]
    pub const fn page_count_per_segment(&self) -> u32 {
        self.page_count_per_segment
    }

    /// Bytes a page occupies on disk including persisted page metadata
    #[must_use]
    pub const fn page_physical_size(&self) -> u64 {
        self.page_physical_size
    }

    #[must_use]
    pub const fn segment_physical_size(&self) -> u64 {
        self.segment_physical_size
    }

    #[must_use]
    pub const fn segment_unit_bitmap_length(&self) -> usize {
        self.segment_unit_bitmap_length
    }

    /// Metadata + bitmap + acceptor length of one segment unit descriptor
    #[must_use]
    pub const fn segment_unit_descdata_length(&self) -> u64 {
        self.segment_unit_descdata_length
    }

    /// Space consumed by every flexible segment unit descriptor
    #[must_use]
    pub const fn all_flexible_length(&self) -> u64 {
        self.all_flexible_length
    }
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        let sizing = ArchiveSizing::default();
        let page_count_per_segment = (sizing.segment_size / u64::from(sizing.page_size)) as u32;
        let page_physical_size = u64::from(sizing.page_size) + u64::from(sizing.page_metadata_size);
        let bitmap = segment_unit_bitmap_length(page_count_per_segment);
        let descdata =
            SEGMENT_UNIT_METADATA_LENGTH + bitmap as u64 + SEGMENT_UNIT_ACCEPTOR_LENGTH;
        Self {
            page_count_per_segment,
            page_physical_size,
            segment_physical_size: page_physical_size * u64::from(page_count_per_segment),
            segment_unit_bitmap_length: bitmap,
            segment_unit_descdata_length: descdata,
            all_flexible_length: u64::from(sizing.max_flexible_count) * descdata,
            sizing,
        }
    }
}

impl TryFrom<ArchiveSizing> for ArchiveOptions {
    type Error = Error;

    fn try_from(sizing: ArchiveSizing) -> Result<Self> {
        Self::from_sizing(sizing)
    }
}

impl From<ArchiveOptions> for ArchiveSizing {
    fn from(options: ArchiveOptions) -> Self {
        options.sizing
    }
}

/// Settings for segment status derivation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentStatusConfig {
    /// Age in milliseconds after which a replica report is considered stale
    pub report_timeout_ms: u64,
}

impl SegmentStatusConfig {
    /// Staleness timeout as a duration
    #[must_use]
    pub const fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms)
    }
}

impl Default for SegmentStatusConfig {
    fn default() -> Self {
        Self {
            report_timeout_ms: 90_000,
        }
    }
}

/// Root configuration for Strata tools
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Archive sizing
    pub archive: ArchiveOptions,
    /// Segment status derivation
    pub segment: SegmentStatusConfig,
}
