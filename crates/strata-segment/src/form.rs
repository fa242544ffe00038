//! Volume replication shapes and write eligibility
//!
//! A [`VolumeType`] fixes how many members a segment has and its quorum
//! sizes. The role composition of a membership under that type is a
//! [`SegmentForm`]: `P` primary, `S` secondary, `J` joining secondary,
//! `A` arbiter, `I` inactive secondary, `TP` a two-copy primary. Each form
//! decides whether writes can proceed with a given number of reachable
//! primaries, secondaries and joining secondaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strata_common::Error;

use crate::membership::SegmentMembership;

/// Decides whether a segment may still accept writes
pub trait WritePolicy: Send + Sync {
    /// `primary`, `secondaries` and `joining` are the counts of replicas
    /// holding those roles in `membership` and past their start state.
    fn writable(
        &self,
        membership: &SegmentMembership,
        primary: usize,
        secondaries: usize,
        joining: usize,
    ) -> bool;
}

/// Quorum sizes of a segment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quorum {
    /// Primary + secondaries + arbiters in a full membership
    pub num_members: usize,
    /// Votes needed to elect a primary
    pub voting_quorum: usize,
    /// Acknowledgements needed to commit a write
    pub write_quorum: usize,
}

/// Replication shape of a volume
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    /// Primary and two secondaries
    #[default]
    Regular,
    /// Primary, one secondary and one arbiter
    Small,
    /// Primary, two secondaries and two arbiters
    Large,
}

impl VolumeType {
    pub const ALL: [Self; 3] = [Self::Regular, Self::Small, Self::Large];

    #[must_use]
    pub const fn num_members(self) -> usize {
        match self {
            Self::Regular | Self::Small => 3,
            Self::Large => 5,
        }
    }

    #[must_use]
    pub const fn num_secondaries(self) -> usize {
        match self {
            Self::Regular | Self::Large => 2,
            Self::Small => 1,
        }
    }

    #[must_use]
    pub const fn num_arbiters(self) -> usize {
        self.num_members() - self.num_secondaries() - 1
    }

    #[must_use]
    pub const fn write_quorum(self) -> usize {
        match self {
            Self::Regular | Self::Small => 2,
            Self::Large => 3,
        }
    }

    #[must_use]
    pub const fn voting_quorum(self) -> usize {
        match self {
            Self::Regular | Self::Small => 2,
            Self::Large => 3,
        }
    }

    #[must_use]
    pub const fn quorum(self) -> Quorum {
        Quorum {
            num_members: self.num_members(),
            voting_quorum: self.voting_quorum(),
            write_quorum: self.write_quorum(),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Small => "small",
            Self::Large => "large",
        }
    }

    /// Resolve a membership's role composition; `None` if this volume
    /// type has no form for it.
    #[must_use]
    pub fn segment_form(self, membership: &SegmentMembership) -> Option<SegmentForm> {
        SegmentForm::resolve(
            self,
            membership.secondaries().len(),
            membership.joining_secondaries().len(),
            membership.arbiters().len(),
            membership.inactive_secondaries().len(),
        )
    }
}

impl WritePolicy for VolumeType {
    fn writable(
        &self,
        membership: &SegmentMembership,
        primary: usize,
        secondaries: usize,
        joining: usize,
    ) -> bool {
        self.segment_form(membership)
            .is_some_and(|form| form.writable(primary, secondaries, joining, self.write_quorum()))
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VolumeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::configuration(format!("unknown volume type: {s}")))
    }
}

/// Role composition of a membership
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentForm {
    // Regular
    PSS,
    PSJ,
    PSI,
    PJI,
    PJJ,
    PII,
    PS,
    PJ,
    PI,
    // Small
    PSA,
    PJA,
    PIA,
    PA,
    TPS,
    TPJ,
    TPI,
    // Large, four non-primary members
    PSSAA,
    PSJAA,
    PJJAA,
    PSIAA,
    PJIAA,
    PIIAA,
    PSSAI,
    PSJAI,
    PJJAI,
    PSIAI,
    PJIAI,
    PIIAI,
    PSSII,
    PSJII,
    PJJII,
    PSIII,
    PJIII,
    PIIII,
    // Large, three non-primary members
    PSAA,
    PJAA,
    PIAA,
    PSAI,
    PJAI,
    PIAI,
    PSII,
    PJII,
    PIII,
    // Large, two arbiters only
    PAA,
}

impl SegmentForm {
    /// Look up the form for role counts under a volume type.
    ///
    /// Inactive secondaries only count up to the slots the active roles
    /// leave free.
    #[must_use]
    pub fn resolve(
        volume_type: VolumeType,
        secondaries: usize,
        joining: usize,
        arbiters: usize,
        inactive: usize,
    ) -> Option<Self> {
        let active = secondaries + joining + arbiters;
        let free = volume_type.num_members().checked_sub(active + 1)?;
        let inactive = inactive.min(free);

        match volume_type {
            VolumeType::Regular => match (arbiters, secondaries, joining, inactive) {
                (0, 2, 0, 0) => Some(Self::PSS),
                (0, 1, 1, 0) => Some(Self::PSJ),
                (0, 1, 0, 1) => Some(Self::PSI),
                (0, 0, 1, 1) => Some(Self::PJI),
                (0, 0, 2, 0) => Some(Self::PJJ),
                (0, 0, 0, 2) => Some(Self::PII),
                (0, 1, 0, 0) => Some(Self::PS),
                (0, 0, 1, 0) => Some(Self::PJ),
                (0, 0, 0, 1) => Some(Self::PI),
                _ => None,
            },
            VolumeType::Small => match (arbiters, secondaries, joining, inactive) {
                (1, 0, 0, 0) => Some(Self::PA),
                (1, 0, 0, 1) => Some(Self::PIA),
                (1, 0, 1, 0) => Some(Self::PJA),
                (1, 1, 0, 0) => Some(Self::PSA),
                (0, 0, 0, 1 | 2) => Some(Self::TPI),
                (0, 0, 1, 0 | 1) => Some(Self::TPJ),
                (0, 1, 0, 0 | 1) => Some(Self::TPS),
                _ => None,
            },
            VolumeType::Large => match (arbiters, secondaries, joining, inactive) {
                (2, 2, 0, 0) => Some(Self::PSSAA),
                (2, 1, 1, 0) => Some(Self::PSJAA),
                (2, 0, 2, 0) => Some(Self::PJJAA),
                (2, 1, 0, 1) => Some(Self::PSIAA),
                (2, 0, 1, 1) => Some(Self::PJIAA),
                (2, 0, 0, 2) => Some(Self::PIIAA),
                (1, 2, 0, 1) => Some(Self::PSSAI),
                (1, 1, 1, 1) => Some(Self::PSJAI),
                (1, 0, 2, 1) => Some(Self::PJJAI),
                (1, 1, 0, 2) => Some(Self::PSIAI),
                (1, 0, 1, 2) => Some(Self::PJIAI),
                (1, 0, 0, 3) => Some(Self::PIIAI),
                (0, 2, 0, 2) => Some(Self::PSSII),
                (0, 1, 1, 2) => Some(Self::PSJII),
                (0, 0, 2, 2) => Some(Self::PJJII),
                (0, 1, 0, 3) => Some(Self::PSIII),
                (0, 0, 1, 3) => Some(Self::PJIII),
                (0, 0, 0, 4) => Some(Self::PIIII),
                (2, 1, 0, 0) => Some(Self::PSAA),
                (2, 0, 1, 0) => Some(Self::PJAA),
                (2, 0, 0, 1) => Some(Self::PIAA),
                (1, 1, 0, 1) => Some(Self::PSAI),
                (1, 0, 1, 1) => Some(Self::PJAI),
                (1, 0, 0, 2) => Some(Self::PIAI),
                (0, 1, 0, 2) => Some(Self::PSII),
                (0, 0, 1, 2) => Some(Self::PJII),
                (0, 0, 0, 3) => Some(Self::PIII),
                (2, 0, 0, 0) => Some(Self::PAA),
                _ => None,
            },
        }
    }

    /// Whether writes can proceed with the given reachable role counts
    #[must_use]
    pub const fn writable(
        self,
        primary: usize,
        secondaries: usize,
        joining: usize,
        write_quorum: usize,
    ) -> bool {
        !self.blocks_write(primary, secondaries, joining, write_quorum)
    }

    const fn blocks_write(self, p: usize, s: usize, j: usize, write_quorum: usize) -> bool {
        match self {
            Self::PSS => {
                if p == 0 {
                    s < write_quorum
                } else {
                    s == 0
                }
            }
            Self::PSJ => {
                if p == 0 {
                    s + j < write_quorum
                } else {
                    s + j == 0
                }
            }
            Self::PSI => p + s < write_quorum,
            Self::PJI
            | Self::PII
            | Self::PS
            | Self::PJ
            | Self::PI
            | Self::PJA
            | Self::PIA
            | Self::PA
            | Self::TPS
            | Self::TPJ
            | Self::TPI
            | Self::PIIAA
            | Self::PIAA
            | Self::PJAA
            | Self::PAA => p == 0,
            Self::PJJ
            | Self::PSIII
            | Self::PJIII
            | Self::PIIAI
            | Self::PIIII
            | Self::PSII
            | Self::PIAI
            | Self::PIII
            | Self::PJII => true,
            Self::PSA | Self::PSIAA => p + s == 0,
            Self::PSSAA | Self::PSJAA | Self::PSAA => p == 0 && s == 0,
            Self::PSSAI => {
                if p == 0 {
                    s < 2
                } else {
                    s == 0
                }
            }
            Self::PSSII => p == 0 || s < 2,
            Self::PSJAI => {
                if p == 0 {
                    s == 0 || j == 0
                } else {
                    s + j < 1
                }
            }
            Self::PSJII => p == 0 || s + j < 2,
            Self::PSIAI | Self::PSAI => p == 0 || s == 0,
            Self::PJJAA | Self::PJJAI | Self::PJAI => p == 0 || j == 0,
            Self::PJJII => p == 0 || j < 2,
            Self::PJIAA | Self::PJIAI => p == 0 || j == 0,
        }
    }
}

impl fmt::Display for SegmentForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SegmentVersion;
    use strata_common::InstanceId;

    fn id(n: u64) -> InstanceId {
        InstanceId::new(n)
    }

    #[test]
    fn test_volume_type_sizes() {
        assert_eq!(VolumeType::Regular.num_arbiters(), 0);
        assert_eq!(VolumeType::Small.num_arbiters(), 1);
        assert_eq!(VolumeType::Large.num_arbiters(), 2);
        assert_eq!(
            VolumeType::Large.quorum(),
            Quorum {
                num_members: 5,
                voting_quorum: 3,
                write_quorum: 3
            }
        );
        assert_eq!("Small".parse::<VolumeType>().unwrap(), VolumeType::Small);
        assert!("huge".parse::<VolumeType>().is_err());
    }

    #[test]
    fn test_resolve_regular() {
        let t = VolumeType::Regular;
        assert_eq!(SegmentForm::resolve(t, 2, 0, 0, 0), Some(SegmentForm::PSS));
        assert_eq!(SegmentForm::resolve(t, 1, 1, 0, 0), Some(SegmentForm::PSJ));
        // Extra inactive secondaries beyond the free slots are ignored
        assert_eq!(SegmentForm::resolve(t, 1, 0, 0, 3), Some(SegmentForm::PSI));
        assert_eq!(SegmentForm::resolve(t, 0, 0, 0, 0), None);
        assert_eq!(SegmentForm::resolve(t, 1, 0, 1, 0), None);
        assert_eq!(SegmentForm::resolve(t, 3, 0, 0, 0), None);
    }

    #[test]
    fn test_resolve_small_and_large() {
        assert_eq!(
            SegmentForm::resolve(VolumeType::Small, 1, 0, 1, 0),
            Some(SegmentForm::PSA)
        );
        assert_eq!(
            SegmentForm::resolve(VolumeType::Small, 1, 0, 0, 1),
            Some(SegmentForm::TPS)
        );
        assert_eq!(
            SegmentForm::resolve(VolumeType::Large, 2, 0, 2, 0),
            Some(SegmentForm::PSSAA)
        );
        assert_eq!(
            SegmentForm::resolve(VolumeType::Large, 1, 1, 1, 5),
            Some(SegmentForm::PSJAI)
        );
        assert_eq!(
            SegmentForm::resolve(VolumeType::Large, 0, 0, 2, 0),
            Some(SegmentForm::PAA)
        );
    }

    #[test]
    fn test_pss_write_rules() {
        let form = SegmentForm::PSS;
        assert!(form.writable(1, 2, 0, 2));
        assert!(form.writable(1, 1, 0, 2));
        assert!(!form.writable(1, 0, 0, 2));
        assert!(form.writable(0, 2, 0, 2));
        assert!(!form.writable(0, 1, 0, 2));
    }

    #[test]
    fn test_fixed_rules() {
        assert!(!SegmentForm::PJJ.writable(1, 0, 2, 2));
        assert!(!SegmentForm::PAA.writable(0, 0, 0, 3));
        assert!(SegmentForm::PAA.writable(1, 0, 0, 3));
        assert!(SegmentForm::PS.writable(1, 0, 0, 2));
        assert!(!SegmentForm::PS.writable(0, 1, 0, 2));
        assert!(SegmentForm::PSSAA.writable(0, 1, 0, 3));
        assert!(!SegmentForm::PSSAA.writable(0, 0, 0, 3));
        assert!(SegmentForm::PJJII.writable(1, 0, 2, 3));
        assert!(!SegmentForm::PJJII.writable(1, 0, 1, 3));
    }

    #[test]
    fn test_write_rules_per_form() {
        use SegmentForm::*;
        // (form, primary, secondaries, joining, writable)
        let rows: &[(SegmentForm, usize, usize, usize, bool)] = &[
            (PSS, 0, 2, 0, true),
            (PSS, 0, 1, 0, false),
            (PSS, 1, 1, 0, true),
            (PSS, 1, 0, 0, false),
            (PSJ, 0, 1, 1, true),
            (PSJ, 0, 1, 0, false),
            (PSJ, 1, 0, 1, true),
            (PSJ, 1, 0, 0, false),
            (PSI, 1, 1, 0, true),
            (PSI, 1, 0, 0, false),
            (PSI, 0, 1, 0, false),
            (PJI, 1, 0, 0, true),
            (PJI, 0, 0, 1, false),
            (PJJ, 1, 0, 2, false),
            (PII, 1, 0, 0, true),
            (PII, 0, 0, 0, false),
            (PS, 1, 0, 0, true),
            (PS, 0, 1, 0, false),
            (PJ, 1, 0, 0, true),
            (PJ, 0, 0, 1, false),
            (PI, 1, 0, 0, true),
            (PI, 0, 0, 0, false),
            (PSA, 0, 1, 0, true),
            (PSA, 1, 0, 0, true),
            (PSA, 0, 0, 0, false),
            (PJA, 1, 0, 0, true),
            (PJA, 0, 0, 1, false),
            (PIA, 1, 0, 0, true),
            (PIA, 0, 0, 0, false),
            (PA, 1, 0, 0, true),
            (PA, 0, 0, 0, false),
            (TPS, 1, 0, 0, true),
            (TPS, 0, 1, 0, false),
            (TPJ, 1, 0, 0, true),
            (TPJ, 0, 0, 1, false),
            (TPI, 1, 0, 0, true),
            (TPI, 0, 0, 0, false),
            (PSSAA, 0, 1, 0, true),
            (PSSAA, 1, 0, 0, true),
            (PSSAA, 0, 0, 5, false),
            (PSJAA, 0, 1, 0, true),
            (PSJAA, 0, 0, 1, false),
            (PJJAA, 1, 0, 1, true),
            (PJJAA, 1, 0, 0, false),
            (PJJAA, 0, 0, 2, false),
            (PSIAA, 0, 1, 0, true),
            (PSIAA, 0, 0, 0, false),
            (PJIAA, 1, 0, 1, true),
            (PJIAA, 1, 0, 0, false),
            (PJIAA, 0, 0, 1, false),
            (PIIAA, 1, 0, 0, true),
            (PIIAA, 0, 0, 0, false),
            (PSSAI, 0, 2, 0, true),
            (PSSAI, 0, 1, 0, false),
            (PSSAI, 1, 1, 0, true),
            (PSSAI, 1, 0, 0, false),
            (PSJAI, 0, 1, 1, true),
            (PSJAI, 0, 1, 0, false),
            (PSJAI, 0, 0, 1, false),
            (PSJAI, 1, 0, 1, true),
            (PSJAI, 1, 0, 0, false),
            (PJJAI, 1, 0, 1, true),
            (PJJAI, 1, 0, 0, false),
            (PJJAI, 0, 0, 2, false),
            (PSIAI, 1, 1, 0, true),
            (PSIAI, 1, 0, 0, false),
            (PSIAI, 0, 1, 0, false),
            (PJIAI, 1, 0, 1, true),
            (PJIAI, 1, 0, 0, false),
            (PJIAI, 0, 0, 1, false),
            (PIIAI, 1, 2, 2, false),
            (PSSII, 1, 2, 0, true),
            (PSSII, 1, 1, 0, false),
            (PSSII, 0, 2, 0, false),
            (PSJII, 1, 1, 1, true),
            (PSJII, 1, 1, 0, false),
            (PSJII, 0, 1, 1, false),
            (PJJII, 1, 0, 2, true),
            (PJJII, 1, 0, 1, false),
            (PJJII, 0, 0, 2, false),
            (PSIII, 1, 2, 2, false),
            (PJIII, 1, 2, 2, false),
            (PIIII, 1, 2, 2, false),
            (PSAA, 0, 1, 0, true),
            (PSAA, 1, 0, 0, true),
            (PSAA, 0, 0, 5, false),
            (PJAA, 1, 0, 0, true),
            (PJAA, 0, 0, 1, false),
            (PIAA, 1, 0, 0, true),
            (PIAA, 0, 0, 0, false),
            (PSAI, 1, 1, 0, true),
            (PSAI, 1, 0, 0, false),
            (PSAI, 0, 1, 0, false),
            (PJAI, 1, 0, 1, true),
            (PJAI, 1, 0, 0, false),
            (PJAI, 0, 0, 1, false),
            (PIAI, 1, 2, 2, false),
            (PSII, 1, 2, 2, false),
            (PJII, 1, 2, 2, false),
            (PIII, 1, 2, 2, false),
            (PAA, 1, 0, 0, true),
            (PAA, 0, 0, 0, false),
        ];

        for &(form, p, s, j, expected) in rows {
            let write_quorum = match form {
                PSS | PSJ | PSI | PJI | PJJ | PII | PS | PJ | PI | PSA | PJA | PIA | PA | TPS
                | TPJ | TPI => 2,
                _ => 3,
            };
            assert_eq!(
                form.writable(p, s, j, write_quorum),
                expected,
                "{form} with p={p} s={s} j={j}"
            );
        }

        let covered: std::collections::HashSet<SegmentForm> =
            rows.iter().map(|row| row.0).collect();
        assert_eq!(covered.len(), 44);
    }

    #[test]
    fn test_policy_uses_membership_form() {
        let pss = SegmentMembership::new(SegmentVersion::new(1, 0), id(1), [id(2), id(3)], [])
            .unwrap();
        assert!(VolumeType::Regular.writable(&pss, 1, 1, 0));
        assert!(!VolumeType::Regular.writable(&pss, 1, 0, 0));

        // Arbiters have no form under a regular volume
        let psa = SegmentMembership::new(SegmentVersion::new(1, 0), id(1), [id(2)], [id(3)])
            .unwrap();
        assert!(!VolumeType::Regular.writable(&psa, 1, 1, 0));
        assert!(VolumeType::Small.writable(&psa, 1, 0, 0));
    }
}
