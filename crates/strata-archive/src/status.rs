//! Archive (device) health states
//!
//! Transitions are validated against a static allow-list indexed by the
//! source state, so the whole matrix can be inspected and tested as data.

use serde::{Deserialize, Serialize};
use std::fmt;
use strata_common::{Error, Result};

/// Health of a whole archive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveStatus {
    Good,
    Degraded,
    Broken,
    /// Metadata on the device belongs to another owner
    ConfigMismatch,
    #[default]
    Offlined,
    Offlining,
    Ejected,
    /// Removed without going through offlining first
    ImproperlyEjected,
    Unknown,
    Separated,
}

use ArchiveStatus::{
    Broken, ConfigMismatch, Degraded, Ejected, Good, ImproperlyEjected, Offlined, Offlining,
    Separated, Unknown,
};

/// Allowed targets per source state, in declaration order of the source
const TRANSITIONS: [&[ArchiveStatus]; 10] = [
    // Good
    &[Offlining, Degraded, ImproperlyEjected, ConfigMismatch, Broken, Good],
    // Degraded
    &[Broken, Offlining, ImproperlyEjected, ConfigMismatch, Degraded],
    // Broken
    &[Broken, ImproperlyEjected, ConfigMismatch],
    // ConfigMismatch
    &[ConfigMismatch, Good, ImproperlyEjected],
    // Offlined
    &[Offlined, Ejected, Good, ConfigMismatch],
    // Offlining
    &[Offlined, Degraded, ConfigMismatch, ImproperlyEjected, Broken],
    // Ejected
    &[Good, Offlined, ConfigMismatch, Broken],
    // ImproperlyEjected
    &[ImproperlyEjected, ConfigMismatch, Offlined, Good, Broken],
    // Unknown
    &ArchiveStatus::ALL,
    // Separated
    &ArchiveStatus::ALL,
];

impl ArchiveStatus {
    /// Every state, in value order
    pub const ALL: [Self; 10] = [
        Good,
        Degraded,
        Broken,
        ConfigMismatch,
        Offlined,
        Offlining,
        Ejected,
        ImproperlyEjected,
        Unknown,
        Separated,
    ];

    /// Persisted numeric value (1-based)
    #[must_use]
    pub const fn value(self) -> i32 {
        self as i32 + 1
    }

    /// Resolve a persisted value; values with no state are rejected
    pub fn from_value(value: i32) -> Result<Self> {
        value
            .checked_sub(1)
            .and_then(|v| usize::try_from(v).ok())
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(Error::InvalidValue {
                kind: "archive status",
                value: i64::from(value),
            })
    }

    /// Whether I/O may be issued to an archive in this state
    #[must_use]
    pub const fn can_do_io(self) -> bool {
        matches!(self, Good | Degraded | Offlining)
    }

    #[must_use]
    pub const fn is_ejected(self) -> bool {
        matches!(self, Ejected | ImproperlyEjected)
    }

    /// Whether new segment units may be placed on the archive
    #[must_use]
    pub const fn can_be_used(self) -> bool {
        matches!(self, Good | Degraded)
    }

    /// States reachable from this one
    #[must_use]
    pub const fn allowed_targets(self) -> &'static [Self] {
        TRANSITIONS[self as usize]
    }

    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Check a transition without performing it
    pub fn validate(self, target: Self) -> Result<()> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(Error::invalid_transition(self, target))
        }
    }

    /// Pure transition function: the target state if allowed
    pub fn transition(self, target: Self) -> Result<Self> {
        self.validate(target).map(|()| target)
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_matrix() {
        // Rows: source, columns: target, both in `ArchiveStatus::ALL` order.
        #[rustfmt::skip]
        let expected: [[u8; 10]; 10] = [
            // G  D  B  C  Od Oi E  IE U  S
            [1, 1, 1, 1, 0, 1, 0, 1, 0, 0], // Good
            [0, 1, 1, 1, 0, 1, 0, 1, 0, 0], // Degraded
            [0, 0, 1, 1, 0, 0, 0, 1, 0, 0], // Broken
            [1, 0, 0, 1, 0, 0, 0, 1, 0, 0], // ConfigMismatch
            [1, 0, 0, 1, 1, 0, 1, 0, 0, 0], // Offlined
            [0, 1, 1, 1, 1, 0, 0, 1, 0, 0], // Offlining
            [1, 0, 1, 1, 1, 0, 0, 0, 0, 0], // Ejected
            [1, 0, 1, 1, 1, 0, 0, 1, 0, 0], // ImproperlyEjected
            [1, 1, 1, 1, 1, 1, 1, 1, 1, 1], // Unknown
            [1, 1, 1, 1, 1, 1, 1, 1, 1, 1], // Separated
        ];

        for (i, from) in ArchiveStatus::ALL.into_iter().enumerate() {
            for (j, to) in ArchiveStatus::ALL.into_iter().enumerate() {
                let result = from.validate(to);
                if expected[i][j] == 1 {
                    assert!(result.is_ok(), "{from} -> {to} should be allowed");
                } else {
                    assert!(
                        matches!(result, Err(Error::InvalidTransition { .. })),
                        "{from} -> {to} should be rejected"
                    );
                }
            }
        }
    }

    #[test]
    fn test_config_mismatch_reachable_from_everywhere() {
        for from in ArchiveStatus::ALL {
            assert!(from.can_transition_to(ConfigMismatch), "{from}");
        }
    }

    #[test]
    fn test_transition_returns_target() {
        assert_eq!(Good.transition(Degraded).unwrap(), Degraded);
        let err = Good.transition(Ejected).unwrap_err();
        assert_eq!(err.to_string(), "invalid transition from Good to Ejected");
    }

    #[test]
    fn test_io_predicates() {
        let io: Vec<_> = ArchiveStatus::ALL
            .into_iter()
            .filter(|s| s.can_do_io())
            .collect();
        assert_eq!(io, vec![Good, Degraded, Offlining]);
        assert!(Ejected.is_ejected());
        assert!(ImproperlyEjected.is_ejected());
        assert!(!Offlined.is_ejected());
        assert!(Degraded.can_be_used());
        assert!(!Offlining.can_be_used());
    }

    #[test]
    fn test_values() {
        assert_eq!(Good.value(), 1);
        assert_eq!(Separated.value(), 10);
        for status in ArchiveStatus::ALL {
            assert_eq!(ArchiveStatus::from_value(status.value()).unwrap(), status);
        }
        assert!(ArchiveStatus::from_value(0).is_err());
        assert!(ArchiveStatus::from_value(11).is_err());
    }
}
