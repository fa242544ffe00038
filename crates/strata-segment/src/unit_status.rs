//! Replica (segment unit) lifecycle states
//!
//! Transitions are driven by the replication protocol; this type only
//! classifies a state for quorum counting.

use serde::{Deserialize, Serialize};
use std::fmt;
use strata_common::{Error, Result};

/// Lifecycle state of one replica
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentUnitStatus {
    #[default]
    Start,
    ModeratorSelected,
    SecondaryEnrolled,
    SecondaryApplicant,
    PreSecondary,
    PreArbiter,
    PrePrimary,
    Secondary,
    Arbiter,
    Primary,
    Offlining,
    Offlined,
    Deleting,
    Deleted,
    Broken,
    Unknown,
}

impl SegmentUnitStatus {
    /// Every state, in value order
    pub const ALL: [Self; 16] = [
        Self::Start,
        Self::ModeratorSelected,
        Self::SecondaryEnrolled,
        Self::SecondaryApplicant,
        Self::PreSecondary,
        Self::PreArbiter,
        Self::PrePrimary,
        Self::Secondary,
        Self::Arbiter,
        Self::Primary,
        Self::Offlining,
        Self::Offlined,
        Self::Deleting,
        Self::Deleted,
        Self::Broken,
        Self::Unknown,
    ];

    /// Persisted numeric value; 11 is unassigned
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::Start => 1,
            Self::ModeratorSelected => 2,
            Self::SecondaryEnrolled => 3,
            Self::SecondaryApplicant => 4,
            Self::PreSecondary => 5,
            Self::PreArbiter => 6,
            Self::PrePrimary => 7,
            Self::Secondary => 8,
            Self::Arbiter => 9,
            Self::Primary => 10,
            Self::Offlining => 12,
            Self::Offlined => 13,
            Self::Deleting => 14,
            Self::Deleted => 15,
            Self::Broken => 16,
            Self::Unknown => 17,
        }
    }

    pub fn from_value(value: i32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.value() == value)
            .ok_or(Error::InvalidValue {
                kind: "segment unit status",
                value: i64::from(value),
            })
    }

    /// Holding or about to hold the primary role
    #[must_use]
    pub const fn is_primary(self) -> bool {
        matches!(self, Self::PrePrimary | Self::Primary)
    }

    #[must_use]
    pub const fn is_stable(self) -> bool {
        matches!(self, Self::Secondary | Self::Arbiter | Self::Primary)
    }

    /// The replica no longer takes part in read or write quorums
    #[must_use]
    pub const fn has_gone(self) -> bool {
        matches!(
            self,
            Self::Offlining
                | Self::Offlined
                | Self::Deleting
                | Self::Deleted
                | Self::Broken
                | Self::Unknown
        )
    }

    /// No protocol event moves the replica out of this state on its own
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(
            self,
            Self::Deleting | Self::Deleted | Self::Broken | Self::Offlined
        )
    }

    /// Numeric precedence, for logging and ordering only
    #[must_use]
    pub const fn higher(self, other: Self) -> bool {
        self.value() > other.value()
    }
}

impl fmt::Display for SegmentUnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SegmentUnitStatus::*;

    #[test]
    fn test_predicates() {
        let primary: Vec<_> = SegmentUnitStatus::ALL
            .into_iter()
            .filter(|s| s.is_primary())
            .collect();
        assert_eq!(primary, vec![PrePrimary, Primary]);

        let stable: Vec<_> = SegmentUnitStatus::ALL
            .into_iter()
            .filter(|s| s.is_stable())
            .collect();
        assert_eq!(stable, vec![Secondary, Arbiter, Primary]);

        let gone: Vec<_> = SegmentUnitStatus::ALL
            .into_iter()
            .filter(|s| s.has_gone())
            .collect();
        assert_eq!(gone, vec![Offlining, Offlined, Deleting, Deleted, Broken, Unknown]);

        assert!(Offlined.is_final());
        assert!(!Offlining.is_final());
    }

    #[test]
    fn test_values() {
        for status in SegmentUnitStatus::ALL {
            assert_eq!(SegmentUnitStatus::from_value(status.value()).unwrap(), status);
        }
        assert!(SegmentUnitStatus::from_value(11).is_err());
        assert!(SegmentUnitStatus::from_value(0).is_err());
        assert!(Primary.higher(Secondary));
        assert!(!Start.higher(Start));
    }
}
