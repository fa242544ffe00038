//! Segment unit page bitmaps
//!
//! A segment unit tracks two bits per page:
//! - Data: the page has been written at least once. A set bit for an
//!   unwritten page only costs a needless read; a clear bit for a written
//!   page loses data, so callers set before acknowledging a write.
//! - Migration: the page is pending or excluded from a migration/clone.
//!
//! On-disk record:
//! ```text
//! +-----------------+------------------------+------------------------+---------+
//! | page count (BE) | data region            | migration region       | padding |
//! | 4 bytes         | ceil(pages / 8) bytes  | ceil(pages / 8) bytes  | to 512  |
//! +-----------------+------------------------+------------------------+---------+
//! ```
//! Bit `p` lives in byte `p / 8` at position `p % 8`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use strata_common::config::{bit_region_length, segment_unit_bitmap_length};
use strata_common::{Error, FormatError, Result};

/// Size of the page count prefix
const PAGE_COUNT_LEN: usize = 4;

/// Fixed-length bit vector addressed by page index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitRegion {
    bits: Vec<u8>,
    len: u32,
}

impl BitRegion {
    /// Create a region of `len` clear bits
    #[must_use]
    pub fn new(len: u32) -> Self {
        Self {
            bits: vec![0u8; bit_region_length(len)],
            len,
        }
    }

    /// Load a region from its packed bytes; bits past `len` are ignored
    pub fn from_bytes(len: u32, data: &[u8]) -> Result<Self> {
        let needed = bit_region_length(len);
        if data.len() < needed {
            return Err(FormatError::BufferTooSmall {
                needed,
                actual: data.len(),
            }
            .into());
        }
        let mut region = Self {
            bits: data[..needed].to_vec(),
            len,
        };
        region.mask_tail();
        Ok(region)
    }

    /// Packed bytes of the region
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Number of bits in the region
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, index: u32) -> Result<(usize, u8)> {
        if index >= self.len {
            return Err(Error::OutOfRange {
                index: index as usize,
                len: self.len as usize,
            });
        }
        Ok(((index / 8) as usize, 1 << (index % 8)))
    }

    /// Clear any bits in the last byte beyond `len`
    fn mask_tail(&mut self) {
        let rem = self.len % 8;
        if rem != 0
            && let Some(last) = self.bits.last_mut()
        {
            *last &= (1u8 << rem) - 1;
        }
    }

    /// Read one bit
    pub fn get(&self, index: u32) -> Result<bool> {
        let (byte, mask) = self.check(index)?;
        Ok(self.bits[byte] & mask != 0)
    }

    /// Set one bit, returning whether it was already set
    pub fn set(&mut self, index: u32) -> Result<bool> {
        let (byte, mask) = self.check(index)?;
        let was_set = self.bits[byte] & mask != 0;
        self.bits[byte] |= mask;
        Ok(was_set)
    }

    /// Clear one bit, returning whether it was set
    pub fn clear(&mut self, index: u32) -> Result<bool> {
        let (byte, mask) = self.check(index)?;
        let was_set = self.bits[byte] & mask != 0;
        self.bits[byte] &= !mask;
        Ok(was_set)
    }

    /// Clear every bit
    pub fn clear_all(&mut self) {
        self.bits.fill(0);
    }

    /// Set every bit
    pub fn set_all(&mut self) {
        self.bits.fill(0xff);
        self.mask_tail();
    }

    /// First clear bit at or after `from`, if any
    #[must_use]
    pub fn next_clear(&self, from: u32) -> Option<u32> {
        if from >= self.len {
            return None;
        }
        let start_byte = (from / 8) as usize;
        for (offset, &byte) in self.bits[start_byte..].iter().enumerate() {
            if byte == 0xff {
                continue;
            }
            let base = ((start_byte + offset) * 8) as u32;
            for bit in 0..8 {
                let index = base + bit;
                if index >= self.len {
                    return None;
                }
                if index >= from && byte & (1 << bit) == 0 {
                    return Some(index);
                }
            }
        }
        None
    }

    /// Number of set bits
    #[must_use]
    pub fn cardinality(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    /// Whether every bit is set
    #[must_use]
    pub fn all_set(&self) -> bool {
        self.cardinality() == self.len
    }

    /// self |= other
    fn union_with(&mut self, other: &Self) {
        for (dst, src) in self.bits.iter_mut().zip(&other.bits) {
            *dst |= src;
        }
    }

    /// self = !other
    fn complement_of(&mut self, other: &Self) {
        for (dst, src) in self.bits.iter_mut().zip(&other.bits) {
            *dst = !src;
        }
        self.mask_tail();
    }
}

/// Which of the two bitmaps an operation targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitmapKind {
    /// Page has been written
    Data,
    /// Page is pending or excluded from migration
    Migration,
}

/// Data and migration bitmaps over the same page count
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentUnitBitmap {
    data: BitRegion,
    migration: BitRegion,
}

impl SegmentUnitBitmap {
    /// Create an empty bitmap for `page_count` pages
    #[must_use]
    pub fn new(page_count: u32) -> Self {
        Self {
            data: BitRegion::new(page_count),
            migration: BitRegion::new(page_count),
        }
    }

    /// Number of pages covered
    #[must_use]
    pub const fn page_count(&self) -> u32 {
        self.data.len()
    }

    /// Borrow one region
    #[must_use]
    pub const fn region(&self, kind: BitmapKind) -> &BitRegion {
        match kind {
            BitmapKind::Data => &self.data,
            BitmapKind::Migration => &self.migration,
        }
    }

    const fn region_mut(&mut self, kind: BitmapKind) -> &mut BitRegion {
        match kind {
            BitmapKind::Data => &mut self.data,
            BitmapKind::Migration => &mut self.migration,
        }
    }

    pub fn get(&self, kind: BitmapKind, page: u32) -> Result<bool> {
        self.region(kind).get(page)
    }

    /// Set a page's bit, returning whether it was already set
    pub fn set(&mut self, kind: BitmapKind, page: u32) -> Result<bool> {
        self.region_mut(kind).set(page)
    }

    /// Clear a page's bit, returning whether it was set
    pub fn clear(&mut self, kind: BitmapKind, page: u32) -> Result<bool> {
        self.region_mut(kind).clear(page)
    }

    pub fn clear_all(&mut self, kind: BitmapKind) {
        self.region_mut(kind).clear_all();
    }

    #[must_use]
    pub fn next_clear(&self, kind: BitmapKind, from: u32) -> Option<u32> {
        self.region(kind).next_clear(from)
    }

    #[must_use]
    pub fn cardinality(&self, kind: BitmapKind) -> u32 {
        self.region(kind).cardinality()
    }

    #[must_use]
    pub fn all_set(&self, kind: BitmapKind) -> bool {
        self.region(kind).all_set()
    }

    /// Prepare this bitmap to receive a clone of `source`.
    ///
    /// Pages present in the source become written here; pages absent from
    /// the source are flagged in the migration bitmap for copy on first write.
    pub fn init_for_clone(&mut self, source: &BitRegion) -> Result<()> {
        if source.len() != self.page_count() {
            return Err(Error::illegal_state(format!(
                "clone source covers {} pages, bitmap covers {}",
                source.len(),
                self.page_count()
            )));
        }
        self.data.union_with(source);
        self.migration.complement_of(source);
        Ok(())
    }

    /// Length of the encoded record, including sector padding
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        segment_unit_bitmap_length(self.page_count())
    }

    /// Encode to the on-disk record
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let len = self.encoded_len();
        let mut buf = BytesMut::with_capacity(len);
        buf.put_u32(self.page_count());
        buf.put_slice(self.data.as_bytes());
        buf.put_slice(self.migration.as_bytes());
        buf.resize(len, 0);
        buf.freeze()
    }

    /// Decode an on-disk record, rejecting page counts above `max_page_count`
    pub fn decode(mut data: &[u8], max_page_count: u32) -> Result<Self> {
        if data.len() < PAGE_COUNT_LEN {
            return Err(FormatError::BufferTooSmall {
                needed: PAGE_COUNT_LEN,
                actual: data.len(),
            }
            .into());
        }
        let page_count = data.get_u32();
        if page_count > max_page_count {
            return Err(FormatError::PageCountExceeded {
                found: page_count,
                max: max_page_count,
            }
            .into());
        }

        let region_len = bit_region_length(page_count);
        if data.len() < region_len * 2 {
            return Err(FormatError::BufferTooSmall {
                needed: PAGE_COUNT_LEN + region_len * 2,
                actual: PAGE_COUNT_LEN + data.len(),
            }
            .into());
        }
        let data_region = BitRegion::from_bytes(page_count, &data[..region_len])?;
        let migration = BitRegion::from_bytes(page_count, &data[region_len..region_len * 2])?;
        Ok(Self {
            data: data_region,
            migration,
        })
    }
}
