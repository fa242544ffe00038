//! Strata Archive - on-disk device formats and device health
//!
//! This crate provides:
//! - The archive header codec and registered archive types
//! - Segment unit page bitmaps and their on-disk record
//! - The archive status state machine
//! - Archive metadata and the archive handle with status listeners

pub mod archive;
pub mod bitmap;
pub mod layout;
pub mod metadata;
pub mod status;

pub use archive::{Archive, ArchiveStatusListener};
pub use bitmap::{BitRegion, BitmapKind, SegmentUnitBitmap};
pub use layout::{ArchiveHeader, ArchiveHeaderCodec, ArchiveType};
pub use metadata::{ArchiveMetadata, StorageType};
pub use status::ArchiveStatus;
