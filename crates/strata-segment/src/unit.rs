//! Replica (segment unit) metadata
//!
//! One replica's view of a segment: page allocation, lifecycle state,
//! migration state, membership and report timestamps. The archive that
//! stores the replica owns it; segment aggregates hold it through an `Arc`.
//!
//! Locking:
//! - page bitmap and free page count change together under one mutex
//! - membership is an immutable value published through an atomic swap,
//!   so readers never block
//! - status, migration status and membership publication share the state
//!   lock, which serializes writers

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use strata_archive::{BitRegion, BitmapKind, SegmentUnitBitmap};
use strata_common::{ArchiveId, Error, InstanceId, Result, SegId};
use tracing::{debug, trace, warn};

use crate::form::VolumeType;
use crate::membership::SegmentMembership;
use crate::migration::{MigrationEvent, MigrationStatus};
use crate::unit_status::SegmentUnitStatus;
use crate::version::SegmentVersion;

struct PageState {
    bitmap: SegmentUnitBitmap,
    free_page_count: u32,
}

#[derive(Clone, Copy)]
struct UnitState {
    status: SegmentUnitStatus,
    migration: MigrationStatus,
}

/// Metadata of one replica of a segment
pub struct SegmentUnitMetadata {
    seg_id: SegId,
    instance_id: InstanceId,
    volume_type: VolumeType,
    archive_id: Option<ArchiveId>,
    physical_data_offset: u64,
    logical_data_offset: u64,
    pages: Mutex<PageState>,
    state: RwLock<UnitState>,
    membership: ArcSwapOption<SegmentMembership>,
    last_updated: AtomicU64,
    last_reported: AtomicU64,
}

impl SegmentUnitMetadata {
    /// Create a replica in `Start` with every page free
    #[must_use]
    pub fn new(seg_id: SegId, instance_id: InstanceId, page_count: u32) -> Self {
        Self {
            seg_id,
            instance_id,
            volume_type: VolumeType::default(),
            archive_id: None,
            physical_data_offset: 0,
            logical_data_offset: 0,
            pages: Mutex::new(PageState {
                bitmap: SegmentUnitBitmap::new(page_count),
                free_page_count: page_count,
            }),
            state: RwLock::new(UnitState {
                status: SegmentUnitStatus::Start,
                migration: MigrationStatus::None,
            }),
            membership: ArcSwapOption::empty(),
            last_updated: AtomicU64::new(0),
            last_reported: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn with_volume_type(mut self, volume_type: VolumeType) -> Self {
        self.volume_type = volume_type;
        self
    }

    #[must_use]
    pub const fn with_archive(mut self, archive_id: ArchiveId) -> Self {
        self.archive_id = Some(archive_id);
        self
    }

    /// Byte offsets of the data region on the device and in the volume
    #[must_use]
    pub const fn with_offsets(mut self, physical: u64, logical: u64) -> Self {
        self.physical_data_offset = physical;
        self.logical_data_offset = logical;
        self
    }

    #[must_use]
    pub fn with_status(self, status: SegmentUnitStatus) -> Self {
        self.state.write().status = status;
        self
    }

    #[must_use]
    pub fn with_membership(self, membership: SegmentMembership) -> Self {
        self.membership.store(Some(Arc::new(membership)));
        self
    }

    #[must_use]
    pub fn with_last_reported(self, millis: u64) -> Self {
        self.last_reported.store(millis, AtomicOrdering::Release);
        self
    }

    /// Use a decoded bitmap as the initial page state
    pub fn with_bitmap(self, bitmap: SegmentUnitBitmap) -> Result<Self> {
        self.replace_bitmap(bitmap)?;
        Ok(self)
    }

    #[must_use]
    pub const fn seg_id(&self) -> SegId {
        self.seg_id
    }

    #[must_use]
    pub const fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    #[must_use]
    pub const fn volume_type(&self) -> VolumeType {
        self.volume_type
    }

    #[must_use]
    pub const fn archive_id(&self) -> Option<ArchiveId> {
        self.archive_id
    }

    #[must_use]
    pub const fn physical_data_offset(&self) -> u64 {
        self.physical_data_offset
    }

    #[must_use]
    pub const fn logical_data_offset(&self) -> u64 {
        self.logical_data_offset
    }

    // Pages

    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.pages.lock().bitmap.page_count()
    }

    #[must_use]
    pub fn free_page_count(&self) -> u32 {
        self.pages.lock().free_page_count
    }

    /// Fraction of pages not yet written
    #[must_use]
    pub fn free_ratio(&self) -> f64 {
        let pages = self.pages.lock();
        let total = pages.bitmap.page_count();
        if total == 0 {
            return 0.0;
        }
        f64::from(pages.free_page_count) / f64::from(total)
    }

    /// Mark a page written. Returns false if it already was.
    pub fn set_page(&self, page: u32) -> Result<bool> {
        let was_set = {
            let mut pages = self.pages.lock();
            let was_set = pages.bitmap.set(BitmapKind::Data, page)?;
            if !was_set {
                pages.free_page_count -= 1;
            }
            was_set
        };
        if was_set {
            warn!("segment unit {} page {} has already been set", self.seg_id, page);
        }
        Ok(!was_set)
    }

    /// Mark a page free. Returns false if it already was.
    pub fn clear_page(&self, page: u32) -> Result<bool> {
        let was_set = {
            let mut pages = self.pages.lock();
            let was_set = pages.bitmap.clear(BitmapKind::Data, page)?;
            if was_set {
                pages.free_page_count += 1;
            }
            was_set
        };
        if !was_set {
            trace!("segment unit {} page {} was already clear", self.seg_id, page);
        }
        Ok(was_set)
    }

    /// Free every page and reset migration flags
    pub fn clear_all_pages(&self) {
        let mut pages = self.pages.lock();
        pages.bitmap.clear_all(BitmapKind::Data);
        pages.bitmap.clear_all(BitmapKind::Migration);
        pages.free_page_count = pages.bitmap.page_count();
    }

    pub fn is_page_free(&self, page: u32) -> Result<bool> {
        Ok(!self.pages.lock().bitmap.get(BitmapKind::Data, page)?)
    }

    #[must_use]
    pub fn first_free_page(&self) -> Option<u32> {
        self.pages.lock().bitmap.next_clear(BitmapKind::Data, 0)
    }

    /// Whether a page is flagged for migration
    pub fn is_page_migrating(&self, page: u32) -> Result<bool> {
        self.pages.lock().bitmap.get(BitmapKind::Migration, page)
    }

    /// Clear a page's migration flag once it has been copied
    pub fn page_migrated(&self, page: u32) -> Result<bool> {
        self.pages.lock().bitmap.clear(BitmapKind::Migration, page)
    }

    /// Prepare to receive a clone of a source replica's data bitmap
    pub fn init_for_clone(&self, source: &BitRegion) -> Result<()> {
        let mut pages = self.pages.lock();
        pages.bitmap.init_for_clone(source)?;
        pages.free_page_count =
            pages.bitmap.page_count() - pages.bitmap.cardinality(BitmapKind::Data);
        Ok(())
    }

    /// Replace the page state with a decoded bitmap of the same page count
    pub fn replace_bitmap(&self, bitmap: SegmentUnitBitmap) -> Result<()> {
        let mut pages = self.pages.lock();
        if bitmap.page_count() != pages.bitmap.page_count() {
            return Err(Error::illegal_state(format!(
                "bitmap covers {} pages, segment unit {} has {}",
                bitmap.page_count(),
                self.seg_id,
                pages.bitmap.page_count()
            )));
        }
        pages.free_page_count = bitmap.page_count() - bitmap.cardinality(BitmapKind::Data);
        pages.bitmap = bitmap;
        Ok(())
    }

    #[must_use]
    pub fn bitmap(&self) -> SegmentUnitBitmap {
        self.pages.lock().bitmap.clone()
    }

    /// Encoded bitmap record for persistence
    #[must_use]
    pub fn encode_bitmap(&self) -> Bytes {
        self.pages.lock().bitmap.encode()
    }

    // Lifecycle

    #[must_use]
    pub fn status(&self) -> SegmentUnitStatus {
        self.state.read().status
    }

    pub fn set_status(&self, status: SegmentUnitStatus) {
        let old = std::mem::replace(&mut self.state.write().status, status);
        if old != status {
            debug!("segment unit {} at {}: {} -> {}", self.seg_id, self.instance_id, old, status);
        }
    }

    #[must_use]
    pub fn migration_status(&self) -> MigrationStatus {
        self.state.read().migration
    }

    /// Feed a migration event; the state is unchanged on error
    pub fn apply_migration_event(&self, event: MigrationEvent) -> Result<MigrationStatus> {
        let mut state = self.state.write();
        let next = state.migration.next(event)?;
        state.migration = next;
        Ok(next)
    }

    /// Start migrating pages; joining replicas are told apart by role
    pub fn begin_migration(&self) -> Result<MigrationStatus> {
        let joining = self
            .membership()
            .is_some_and(|m| m.is_joining_secondary(self.instance_id));
        self.apply_migration_event(MigrationEvent::Begin { joining })
    }

    pub fn finish_migration(&self, success: bool) -> Result<MigrationStatus> {
        self.apply_migration_event(MigrationEvent::Finished { success })
    }

    // Membership

    /// Current membership, if one has been received
    #[must_use]
    pub fn membership(&self) -> Option<Arc<SegmentMembership>> {
        self.membership.load_full()
    }

    #[must_use]
    pub fn membership_version(&self) -> Option<SegmentVersion> {
        self.membership.load().as_ref().map(|m| m.version())
    }

    /// Publish a membership unconditionally
    pub fn set_membership(&self, membership: SegmentMembership) {
        let _writer = self.state.write();
        self.membership.store(Some(Arc::new(membership)));
    }

    /// Publish `candidate` if it is newer than the current membership.
    ///
    /// Returns whether it was published. Unrelated memberships with equal
    /// versions are rejected.
    pub fn update_membership(&self, candidate: SegmentMembership) -> Result<bool> {
        let _writer = self.state.write();
        let newer = match self.membership.load().as_deref() {
            None => true,
            Some(current) => candidate.compare(current)? == Ordering::Greater,
        };
        if newer {
            self.membership.store(Some(Arc::new(candidate)));
        }
        Ok(newer)
    }

    /// Order two replicas by membership version; a replica without a
    /// membership sorts lowest
    #[must_use]
    pub fn compare_membership(&self, other: &Self) -> Ordering {
        self.membership_version().cmp(&other.membership_version())
    }

    /// Refresh lifecycle fields from a newer report of the same replica
    pub fn update_with_new_one(&self, newer: &Self) {
        let newer_state = *newer.state.read();
        let newer_membership = newer.membership();
        {
            let mut state = self.state.write();
            *state = newer_state;
            self.membership.store(newer_membership);
        }
        self.last_updated
            .fetch_max(newer.last_updated(), AtomicOrdering::AcqRel);
        self.last_reported
            .fetch_max(newer.last_reported(), AtomicOrdering::AcqRel);
    }

    // Timestamps (milliseconds since the Unix epoch)

    #[must_use]
    pub fn last_reported(&self) -> u64 {
        self.last_reported.load(AtomicOrdering::Acquire)
    }

    pub fn set_last_reported(&self, millis: u64) {
        self.last_reported.store(millis, AtomicOrdering::Release);
    }

    #[must_use]
    pub fn last_updated(&self) -> u64 {
        self.last_updated.load(AtomicOrdering::Acquire)
    }

    pub fn set_last_updated(&self, millis: u64) {
        self.last_updated.store(millis, AtomicOrdering::Release);
    }
}

impl std::fmt::Debug for SegmentUnitMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = *self.state.read();
        f.debug_struct("SegmentUnitMetadata")
            .field("seg_id", &self.seg_id)
            .field("instance_id", &self.instance_id)
            .field("status", &state.status)
            .field("migration", &state.migration)
            .field("membership", &self.membership())
            .field("last_reported", &self.last_reported())
            .finish_non_exhaustive()
    }
}

/// Replica report as delivered by report ingestion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentUnitReport {
    pub instance_id: InstanceId,
    pub status: SegmentUnitStatus,
    #[serde(default)]
    pub migration_status: MigrationStatus,
    #[serde(default)]
    pub membership: Option<SegmentMembership>,
    /// Milliseconds since the Unix epoch
    pub last_reported: u64,
}

impl SegmentUnitReport {
    /// Build replica metadata for `seg_id` from this report
    #[must_use]
    pub fn into_unit(self, seg_id: SegId, volume_type: VolumeType, page_count: u32) -> SegmentUnitMetadata {
        let unit = SegmentUnitMetadata::new(seg_id, self.instance_id, page_count)
            .with_volume_type(volume_type)
            .with_status(self.status)
            .with_last_reported(self.last_reported);
        unit.state.write().migration = self.migration_status;
        match self.membership {
            Some(membership) => unit.with_membership(membership),
            None => unit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::VolumeId;

    fn seg() -> SegId {
        SegId::new(VolumeId::new(1), 0)
    }

    fn id(n: u64) -> InstanceId {
        InstanceId::new(n)
    }

    fn membership(generation: u32) -> SegmentMembership {
        SegmentMembership::new(SegmentVersion::new(1, generation), id(1), [id(2), id(3)], [])
            .unwrap()
    }

    #[test]
    fn test_free_page_accounting() {
        let unit = SegmentUnitMetadata::new(seg(), id(1), 16);
        assert_eq!(unit.free_page_count(), 16);

        assert!(unit.set_page(3).unwrap());
        assert_eq!(unit.free_page_count(), 15);
        assert!(!unit.is_page_free(3).unwrap());

        // Setting twice is a no-op
        assert!(!unit.set_page(3).unwrap());
        assert_eq!(unit.free_page_count(), 15);

        assert!(unit.clear_page(3).unwrap());
        assert!(!unit.clear_page(3).unwrap());
        assert_eq!(unit.free_page_count(), 16);

        assert!(unit.set_page(16).is_err());
        assert_eq!(unit.free_page_count(), 16);
    }

    #[test]
    fn test_first_free_page_and_ratio() {
        let unit = SegmentUnitMetadata::new(seg(), id(1), 4);
        for page in 0..2 {
            unit.set_page(page).unwrap();
        }
        assert_eq!(unit.first_free_page(), Some(2));
        assert!((unit.free_ratio() - 0.5).abs() < f64::EPSILON);

        unit.clear_all_pages();
        assert_eq!(unit.free_page_count(), 4);
        assert_eq!(unit.first_free_page(), Some(0));
    }

    #[test]
    fn test_replace_bitmap_recomputes_free_count() {
        let unit = SegmentUnitMetadata::new(seg(), id(1), 10);
        let mut bitmap = SegmentUnitBitmap::new(10);
        bitmap.set(BitmapKind::Data, 1).unwrap();
        bitmap.set(BitmapKind::Data, 2).unwrap();

        let decoded = SegmentUnitBitmap::decode(&bitmap.encode(), 10).unwrap();
        unit.replace_bitmap(decoded).unwrap();
        assert_eq!(unit.free_page_count(), 8);
        assert_eq!(unit.encode_bitmap(), bitmap.encode());

        assert!(unit.replace_bitmap(SegmentUnitBitmap::new(11)).is_err());
    }

    #[test]
    fn test_init_for_clone() {
        let unit = SegmentUnitMetadata::new(seg(), id(4), 8);
        let mut source = BitRegion::new(8);
        source.set(0).unwrap();
        source.set(5).unwrap();

        unit.init_for_clone(&source).unwrap();
        assert_eq!(unit.free_page_count(), 6);
        assert!(unit.is_page_migrating(1).unwrap());
        assert!(!unit.is_page_migrating(5).unwrap());
        assert!(unit.page_migrated(1).unwrap());
        assert!(!unit.is_page_migrating(1).unwrap());
    }

    #[test]
    fn test_concurrent_set_page() {
        let unit = Arc::new(SegmentUnitMetadata::new(seg(), id(1), 1024));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let unit = Arc::clone(&unit);
                std::thread::spawn(move || {
                    // Overlapping ranges: every page is set by two threads
                    for page in (t * 256)..(t * 256 + 512).min(1024) {
                        unit.set_page(page).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(unit.free_page_count(), 0);
        assert_eq!(unit.bitmap().cardinality(BitmapKind::Data), 1024);
    }

    #[test]
    fn test_update_membership_only_moves_forward() {
        let unit = SegmentUnitMetadata::new(seg(), id(2), 8);
        assert!(unit.membership().is_none());
        assert!(unit.update_membership(membership(1)).unwrap());
        assert!(!unit.update_membership(membership(0)).unwrap());
        assert!(unit.update_membership(membership(2)).unwrap());
        assert_eq!(unit.membership_version(), Some(SegmentVersion::new(1, 2)));

        let unrelated =
            SegmentMembership::new(SegmentVersion::new(1, 2), id(9), [id(2)], []).unwrap();
        assert!(unit.update_membership(unrelated).is_err());
    }

    #[test]
    fn test_compare_membership_absent_lowest() {
        let without = SegmentUnitMetadata::new(seg(), id(1), 8);
        let with = SegmentUnitMetadata::new(seg(), id(2), 8).with_membership(membership(0));
        assert_eq!(without.compare_membership(&with), Ordering::Less);
        assert_eq!(with.compare_membership(&with), Ordering::Equal);
    }

    #[test]
    fn test_migration_by_role() {
        let joining = membership(0).add_joining_secondary(id(4)).unwrap();
        let unit = SegmentUnitMetadata::new(seg(), id(4), 8).with_membership(joining.clone());
        assert_eq!(unit.begin_migration().unwrap(), MigrationStatus::FromJoining);
        assert_eq!(unit.finish_migration(false).unwrap(), MigrationStatus::FromFailMigration);
        assert!(unit.finish_migration(true).is_err());
        assert_eq!(unit.migration_status(), MigrationStatus::FromFailMigration);

        let voting = SegmentUnitMetadata::new(seg(), id(2), 8).with_membership(joining);
        assert_eq!(voting.begin_migration().unwrap(), MigrationStatus::FromVoting);
        assert_eq!(voting.finish_migration(true).unwrap(), MigrationStatus::None);
    }

    #[test]
    fn test_update_with_new_one() {
        let unit = SegmentUnitMetadata::new(seg(), id(2), 8).with_last_reported(100);
        let newer = SegmentUnitMetadata::new(seg(), id(2), 8)
            .with_status(SegmentUnitStatus::Secondary)
            .with_membership(membership(3))
            .with_last_reported(200);
        newer.apply_migration_event(MigrationEvent::Begin { joining: false }).unwrap();

        unit.update_with_new_one(&newer);
        assert_eq!(unit.status(), SegmentUnitStatus::Secondary);
        assert_eq!(unit.migration_status(), MigrationStatus::FromVoting);
        assert_eq!(unit.membership_version(), Some(SegmentVersion::new(1, 3)));
        assert_eq!(unit.last_reported(), 200);
    }

    #[test]
    fn test_report_into_unit() {
        let json = r#"{
            "instance_id": 3,
            "status": "Secondary",
            "membership": {"version": {"epoch": 2, "generation": 1}, "primary": 1, "secondaries": [2, 3]},
            "last_reported": 5000
        }"#;
        let report: SegmentUnitReport = serde_json::from_str(json).unwrap();
        let unit = report.into_unit(seg(), VolumeType::Regular, 64);
        assert_eq!(unit.instance_id(), id(3));
        assert_eq!(unit.status(), SegmentUnitStatus::Secondary);
        assert_eq!(unit.migration_status(), MigrationStatus::None);
        assert_eq!(unit.membership_version(), Some(SegmentVersion::new(2, 1)));
        assert_eq!(unit.last_reported(), 5000);
        assert_eq!(unit.free_page_count(), 64);
    }
}
