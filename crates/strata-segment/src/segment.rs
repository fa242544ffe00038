//! Segment aggregate and status derivation
//!
//! A [`SegmentMetadata`] collects the latest report of every replica of one
//! segment and reduces them to a single [`SegmentStatus`]. Derivation evicts
//! replicas that stopped reporting, picks the highest membership among the
//! rest, counts roles of the replicas that membership names, and applies the
//! verdicts in a fixed order: Healthy, Recovering/Degraded, Deleting, Dead,
//! Writable, Unavailable.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strata_common::{InstanceId, SegId, SegmentStatusConfig, now_millis};
use tracing::{debug, info, warn};

use crate::form::{Quorum, VolumeType, WritePolicy};
use crate::membership::SegmentMembership;
use crate::unit::SegmentUnitMetadata;
use crate::unit_status::SegmentUnitStatus;

/// Availability verdict for a segment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentStatus {
    /// Every member is available
    Healthy,
    /// A primary and a voting quorum are available, some members are missing
    Degraded,
    /// Like `Degraded`, with a joining member catching up
    Recovering,
    Unavailable,
    /// The primary and a voting quorum of secondaries are deleting
    Deleting,
    /// A write quorum of members has been deleted
    Dead,
    /// No quorum, but the reachable roles can still take writes
    Writable,
}

impl SegmentStatus {
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::Healthy => 1,
            Self::Degraded => 2,
            Self::Recovering => 3,
            Self::Unavailable => 4,
            Self::Deleting => 5,
            Self::Dead => 6,
            Self::Writable => 7,
        }
    }

    /// Whether the segment can serve I/O
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(
            self,
            Self::Healthy | Self::Degraded | Self::Recovering | Self::Writable
        )
    }

    #[must_use]
    pub const fn is_stable(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Callback invoked when a derivation changes a segment's status
pub trait SegmentStatusListener: Send + Sync {
    /// `old` is `None` on the first derivation.
    fn on_status_change(&self, seg_id: SegId, old: Option<SegmentStatus>, new: SegmentStatus);
}

/// Role tally of the replicas named by the highest membership
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoleCounts {
    /// Primary-role holders past `Start` (including `PrePrimary`)
    pub primary: usize,
    /// Secondary-role holders past `Start`
    pub secondary: usize,
    /// Joining-secondary holders past `Start`
    pub joining_secondary: usize,
    pub available_primary: usize,
    /// Includes a `PrePrimary` holding the primary role
    pub available_secondary: usize,
    pub available_arbiter: usize,
    pub available_joining_secondary: usize,
    pub available_joining_arbiter: usize,
    pub deleting_primary: usize,
    pub deleting_secondary: usize,
    pub deleted_primary: usize,
    pub deleted_secondary: usize,
}

impl RoleCounts {
    /// Count one replica holding `id` in `membership` with `status`
    pub fn classify(
        &mut self,
        membership: &SegmentMembership,
        id: InstanceId,
        status: SegmentUnitStatus,
    ) {
        use SegmentUnitStatus as S;

        match status {
            S::Primary if membership.is_primary(id) => {
                self.primary += 1;
                self.available_primary += 1;
            }
            // Not yet the decided primary
            S::PrePrimary if membership.is_primary(id) => {
                self.primary += 1;
                self.available_secondary += 1;
            }
            S::Secondary if membership.is_secondary(id) => {
                self.secondary += 1;
                self.available_secondary += 1;
            }
            S::Arbiter if membership.is_arbiter(id) => self.available_arbiter += 1,
            S::Deleting => {
                if membership.is_primary(id) {
                    self.deleting_primary += 1;
                } else if membership.is_alive_secondary(id) {
                    self.deleting_secondary += 1;
                }
            }
            S::Deleted => {
                if membership.is_primary(id) {
                    self.deleted_primary += 1;
                } else if membership.is_alive_secondary(id) {
                    self.deleted_secondary += 1;
                }
            }
            S::Offlining | S::Offlined | S::Unknown | S::Broken => {}
            _ if membership.is_arbiter(id) => {
                if matches!(
                    status,
                    S::ModeratorSelected | S::SecondaryEnrolled | S::SecondaryApplicant | S::PreArbiter
                ) {
                    self.available_joining_arbiter += 1;
                }
            }
            _ if membership.is_joining_secondary(id) => {
                if matches!(
                    status,
                    S::ModeratorSelected
                        | S::SecondaryEnrolled
                        | S::SecondaryApplicant
                        | S::PreSecondary
                        | S::Secondary
                ) {
                    self.available_joining_secondary += 1;
                }
                if status != S::Start {
                    self.joining_secondary += 1;
                }
            }
            _ if membership.is_primary(id) => {
                if status != S::Start {
                    self.primary += 1;
                }
            }
            _ if membership.is_secondary(id) => {
                if status != S::Start {
                    self.secondary += 1;
                }
            }
            _ => {}
        }
    }

    /// Replicas able to take writes right now
    #[must_use]
    pub const fn writable_unit_number(&self) -> usize {
        self.available_primary + self.available_secondary + self.joining_secondary
    }

    /// Apply the verdict precedence. `writable` is the write policy's answer
    /// for the current role counts.
    #[must_use]
    pub const fn verdict(&self, quorum: &Quorum, writable: bool) -> SegmentStatus {
        let voting_rest = quorum.voting_quorum.saturating_sub(1);
        if self.available_primary + self.available_secondary + self.available_arbiter
            == quorum.num_members
        {
            SegmentStatus::Healthy
        } else if self.available_primary == 1
            && self.available_secondary
                + self.available_arbiter
                + self.available_joining_arbiter
                + self.available_joining_secondary
                >= voting_rest
        {
            if self.available_joining_secondary > 0 || self.available_joining_arbiter > 0 {
                SegmentStatus::Recovering
            } else {
                SegmentStatus::Degraded
            }
        } else if self.deleting_primary >= 1 && self.deleting_secondary >= voting_rest {
            SegmentStatus::Deleting
        } else if self.deleted_primary + self.deleted_secondary >= quorum.write_quorum {
            SegmentStatus::Dead
        } else if writable {
            SegmentStatus::Writable
        } else {
            SegmentStatus::Unavailable
        }
    }
}

/// Outcome of one status derivation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusRefresh {
    pub status: SegmentStatus,
    pub previous: Option<SegmentStatus>,
    pub counts: RoleCounts,
    /// Replicas dropped for not reporting within the timeout
    pub evicted: Vec<InstanceId>,
}

impl StatusRefresh {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.previous != Some(self.status)
    }
}

struct SegmentState {
    units: BTreeMap<InstanceId, Arc<SegmentUnitMetadata>>,
    status: Option<SegmentStatus>,
    writable_unit_number: usize,
}

/// In-memory aggregate of every replica report for one segment
pub struct SegmentMetadata {
    seg_id: SegId,
    index: u32,
    state: Mutex<SegmentState>,
    listeners: RwLock<Vec<Arc<dyn SegmentStatusListener>>>,
    /// Held across derivation and notification
    derivation: Mutex<()>,
}

impl SegmentMetadata {
    #[must_use]
    pub fn new(seg_id: SegId, index: u32) -> Self {
        Self {
            seg_id,
            index,
            state: Mutex::new(SegmentState {
                units: BTreeMap::new(),
                status: None,
                writable_unit_number: 0,
            }),
            listeners: RwLock::new(Vec::new()),
            derivation: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn seg_id(&self) -> SegId {
        self.seg_id
    }

    /// Logical index of the segment within its volume
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    pub fn add_listener(&self, listener: Arc<dyn SegmentStatusListener>) {
        self.listeners.write().push(listener);
    }

    /// Record a replica report, replacing any previous one from the same instance
    pub fn put_unit(&self, unit: Arc<SegmentUnitMetadata>) -> Option<Arc<SegmentUnitMetadata>> {
        self.state.lock().units.insert(unit.instance_id(), unit)
    }

    #[must_use]
    pub fn unit(&self, instance_id: InstanceId) -> Option<Arc<SegmentUnitMetadata>> {
        self.state.lock().units.get(&instance_id).cloned()
    }

    pub fn remove_unit(&self, instance_id: InstanceId) -> Option<Arc<SegmentUnitMetadata>> {
        self.state.lock().units.remove(&instance_id)
    }

    #[must_use]
    pub fn units(&self) -> Vec<Arc<SegmentUnitMetadata>> {
        self.state.lock().units.values().cloned().collect()
    }

    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.state.lock().units.len()
    }

    /// Whether no replica is known, e.g. all of them timed out
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().units.is_empty()
    }

    /// Status from the last derivation
    #[must_use]
    pub fn status(&self) -> Option<SegmentStatus> {
        self.state.lock().status
    }

    #[must_use]
    pub fn writable_unit_number(&self) -> usize {
        self.state.lock().writable_unit_number
    }

    /// Highest membership reported by any replica
    #[must_use]
    pub fn latest_membership(&self) -> Option<Arc<SegmentMembership>> {
        highest_membership(self.seg_id, &self.state.lock().units)
    }

    /// Replicas named by the highest membership: its primary and alive
    /// secondaries, where reported
    #[must_use]
    pub fn choose_latest_units(&self) -> Vec<Arc<SegmentUnitMetadata>> {
        let state = self.state.lock();
        highest_membership(self.seg_id, &state.units)
            .map(|membership| latest_units(&state.units, &membership))
            .unwrap_or_default()
    }

    /// Derive the status at the current wall-clock time
    pub fn refresh(&self, config: &SegmentStatusConfig, volume_type: VolumeType) -> StatusRefresh {
        self.refresh_status(
            now_millis(),
            config.report_timeout(),
            &volume_type.quorum(),
            &volume_type,
        )
    }

    /// Evict stale replicas and derive the segment status.
    ///
    /// Eviction and derivation form one step: a replica evicted here is
    /// not counted by this call. A segment with no replica left is `Dead`.
    pub fn refresh_status(
        &self,
        now_ms: u64,
        timeout: Duration,
        quorum: &Quorum,
        policy: &dyn WritePolicy,
    ) -> StatusRefresh {
        let _serial = self.derivation.lock();
        let refresh = {
            let mut state = self.state.lock();
            let evicted = self.evict_stale(&mut state.units, now_ms, timeout);

            let mut counts = RoleCounts::default();
            let status = if state.units.is_empty() {
                SegmentStatus::Dead
            } else {
                let writable = highest_membership(self.seg_id, &state.units).is_some_and(|m| {
                    for unit in latest_units(&state.units, &m) {
                        counts.classify(&m, unit.instance_id(), unit.status());
                    }
                    policy.writable(&m, counts.primary, counts.secondary, counts.joining_secondary)
                });
                counts.verdict(quorum, writable)
            };

            let previous = state.status.replace(status);
            state.writable_unit_number = counts.writable_unit_number();
            StatusRefresh {
                status,
                previous,
                counts,
                evicted,
            }
        };

        debug!(
            "segment {} counts {:?}, writable units {}",
            self.seg_id,
            refresh.counts,
            refresh.counts.writable_unit_number()
        );
        if refresh.changed() {
            info!(
                "segment {} status change: {:?} -> {}",
                self.seg_id, refresh.previous, refresh.status
            );
            let listeners = self.listeners.read().clone();
            for listener in &listeners {
                listener.on_status_change(self.seg_id, refresh.previous, refresh.status);
            }
        }
        refresh
    }

    fn evict_stale(
        &self,
        units: &mut BTreeMap<InstanceId, Arc<SegmentUnitMetadata>>,
        now_ms: u64,
        timeout: Duration,
    ) -> Vec<InstanceId> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let mut evicted = Vec::new();
        units.retain(|id, unit| {
            let age = now_ms.saturating_sub(unit.last_reported());
            if age >= timeout_ms {
                debug!(
                    "segment {} evicting replica {}: last report {} ms ago",
                    self.seg_id, id, age
                );
                evicted.push(*id);
                false
            } else {
                true
            }
        });
        evicted
    }
}

impl fmt::Debug for SegmentMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SegmentMetadata")
            .field("seg_id", &self.seg_id)
            .field("index", &self.index)
            .field("status", &state.status)
            .field("units", &state.units)
            .finish_non_exhaustive()
    }
}

/// Memberships that cannot be ordered against the current best are skipped
fn highest_membership(
    seg_id: SegId,
    units: &BTreeMap<InstanceId, Arc<SegmentUnitMetadata>>,
) -> Option<Arc<SegmentMembership>> {
    let mut highest: Option<Arc<SegmentMembership>> = None;
    for (id, unit) in units {
        let Some(candidate) = unit.membership() else {
            continue;
        };
        match &highest {
            None => highest = Some(candidate),
            Some(best) => match candidate.compare(best) {
                Ok(Ordering::Greater) => highest = Some(candidate),
                Ok(_) => {}
                Err(e) => warn!(
                    "segment {} skipping membership of replica {}: {}",
                    seg_id, id, e
                ),
            },
        }
    }
    highest
}

fn latest_units(
    units: &BTreeMap<InstanceId, Arc<SegmentUnitMetadata>>,
    membership: &SegmentMembership,
) -> Vec<Arc<SegmentUnitMetadata>> {
    std::iter::once(membership.primary())
        .chain(membership.alive_secondaries())
        .filter_map(|id| units.get(&id).cloned())
        .collect()
}
