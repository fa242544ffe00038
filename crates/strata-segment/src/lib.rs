//! Strata Segment - replica views and segment availability
//!
//! This crate provides:
//! - Segment versions and role memberships
//! - Replica lifecycle and migration states
//! - Per-replica metadata with page allocation tracking
//! - Volume types, segment forms and the write policy
//! - The segment aggregate that derives a [`SegmentStatus`] from replica reports

pub mod form;
pub mod membership;
pub mod migration;
pub mod segment;
pub mod unit;
pub mod unit_status;
pub mod version;

pub use form::{Quorum, SegmentForm, VolumeType, WritePolicy};
pub use membership::{MembershipParts, SegmentMembership};
pub use migration::{MigrationEvent, MigrationStatus};
pub use segment::{RoleCounts, SegmentMetadata, SegmentStatus, SegmentStatusListener, StatusRefresh};
pub use unit::{SegmentUnitMetadata, SegmentUnitReport};
pub use unit_status::SegmentUnitStatus;
pub use version::SegmentVersion;
