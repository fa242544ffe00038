//! Strata Common - Shared types and utilities
//!
//! This crate provides the identifiers, error definitions, sizing
//! configuration and checksum helpers used by the archive and segment crates.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use checksum::HeaderChecksum;
pub use config::{ArchiveOptions, SegmentStatusConfig, StrataConfig};
pub use error::{Error, FormatError, Result};
pub use types::*;
