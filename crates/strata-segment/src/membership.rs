//! Segment membership
//!
//! A membership assigns roles for one segment and is tagged with a
//! [`SegmentVersion`]. Memberships are immutable: every transition returns
//! a new value with a bumped version, and holders publish the new value
//! instead of editing the old one.
//!
//! Roles:
//! - primary: exactly one
//! - secondaries: full voting replicas
//! - arbiters: voting members without data
//! - joining secondaries: catching up, not yet voting as full secondaries
//! - inactive secondaries: known members currently out of the quorum

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use strata_common::{Error, InstanceId, Result};

use crate::version::SegmentVersion;

/// Raw role assignment, validated by [`SegmentMembership::from_parts`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipParts {
    pub version: SegmentVersion,
    pub primary: InstanceId,
    pub secondaries: BTreeSet<InstanceId>,
    pub arbiters: BTreeSet<InstanceId>,
    pub joining_secondaries: BTreeSet<InstanceId>,
    pub inactive_secondaries: BTreeSet<InstanceId>,
}

/// Versioned role assignment for one segment
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MembershipParts", into = "MembershipParts")]
pub struct SegmentMembership {
    parts: MembershipParts,
}

impl SegmentMembership {
    /// Create a membership with a primary, secondaries and arbiters
    pub fn new(
        version: SegmentVersion,
        primary: InstanceId,
        secondaries: impl IntoIterator<Item = InstanceId>,
        arbiters: impl IntoIterator<Item = InstanceId>,
    ) -> Result<Self> {
        Self::from_parts(MembershipParts {
            version,
            primary,
            secondaries: secondaries.into_iter().collect(),
            arbiters: arbiters.into_iter().collect(),
            ..MembershipParts::default()
        })
    }

    /// Validate a raw role assignment.
    ///
    /// The primary must not hold any other role and no replica may appear
    /// in two role sets.
    pub fn from_parts(parts: MembershipParts) -> Result<Self> {
        let sets = [
            ("secondaries", &parts.secondaries),
            ("arbiters", &parts.arbiters),
            ("joining secondaries", &parts.joining_secondaries),
            ("inactive secondaries", &parts.inactive_secondaries),
        ];
        for (name, set) in sets {
            if set.contains(&parts.primary) {
                return Err(Error::invalid_membership(format!(
                    "primary {} also listed in {name}",
                    parts.primary
                )));
            }
        }
        for (i, (name_a, a)) in sets.iter().enumerate() {
            for (name_b, b) in &sets[i + 1..] {
                if let Some(id) = a.intersection(b).next() {
                    return Err(Error::invalid_membership(format!(
                        "{id} listed in both {name_a} and {name_b}"
                    )));
                }
            }
        }
        Ok(Self { parts })
    }

    /// Borrow the raw role assignment
    #[must_use]
    pub const fn parts(&self) -> &MembershipParts {
        &self.parts
    }

    #[must_use]
    pub const fn version(&self) -> SegmentVersion {
        self.parts.version
    }

    #[must_use]
    pub const fn primary(&self) -> InstanceId {
        self.parts.primary
    }

    #[must_use]
    pub const fn secondaries(&self) -> &BTreeSet<InstanceId> {
        &self.parts.secondaries
    }

    #[must_use]
    pub const fn arbiters(&self) -> &BTreeSet<InstanceId> {
        &self.parts.arbiters
    }

    #[must_use]
    pub const fn joining_secondaries(&self) -> &BTreeSet<InstanceId> {
        &self.parts.joining_secondaries
    }

    #[must_use]
    pub const fn inactive_secondaries(&self) -> &BTreeSet<InstanceId> {
        &self.parts.inactive_secondaries
    }

    #[must_use]
    pub fn is_primary(&self, id: InstanceId) -> bool {
        self.parts.primary == id
    }

    #[must_use]
    pub fn is_secondary(&self, id: InstanceId) -> bool {
        self.parts.secondaries.contains(&id)
    }

    #[must_use]
    pub fn is_arbiter(&self, id: InstanceId) -> bool {
        self.parts.arbiters.contains(&id)
    }

    #[must_use]
    pub fn is_joining_secondary(&self, id: InstanceId) -> bool {
        self.parts.joining_secondaries.contains(&id)
    }

    #[must_use]
    pub fn is_inactive_secondary(&self, id: InstanceId) -> bool {
        self.parts.inactive_secondaries.contains(&id)
    }

    /// Whether `id` holds a non-primary role that counts toward quorum
    #[must_use]
    pub fn is_alive_secondary(&self, id: InstanceId) -> bool {
        self.is_secondary(id) || self.is_arbiter(id) || self.is_joining_secondary(id)
    }

    /// Whether `id` holds any role, inactive included
    #[must_use]
    pub fn contains(&self, id: InstanceId) -> bool {
        self.is_primary(id) || self.is_alive_secondary(id) || self.is_inactive_secondary(id)
    }

    /// Secondaries, arbiters and joining secondaries
    #[must_use]
    pub fn alive_secondaries(&self) -> BTreeSet<InstanceId> {
        self.parts
            .secondaries
            .iter()
            .chain(&self.parts.arbiters)
            .chain(&self.parts.joining_secondaries)
            .copied()
            .collect()
    }

    /// Alive secondaries plus inactive secondaries
    #[must_use]
    pub fn all_secondaries(&self) -> BTreeSet<InstanceId> {
        let mut all = self.alive_secondaries();
        all.extend(&self.parts.inactive_secondaries);
        all
    }

    /// Replicas that receive writes besides the primary
    #[must_use]
    pub fn write_secondaries(&self) -> BTreeSet<InstanceId> {
        self.parts
            .secondaries
            .union(&self.parts.joining_secondaries)
            .copied()
            .collect()
    }

    /// Primary plus every alive secondary
    #[must_use]
    pub fn members(&self) -> BTreeSet<InstanceId> {
        let mut members = self.alive_secondaries();
        members.insert(self.parts.primary);
        members
    }

    /// Every member except `id`
    #[must_use]
    pub fn peers_of(&self, id: InstanceId) -> BTreeSet<InstanceId> {
        let mut peers = self.members();
        peers.remove(&id);
        peers
    }

    /// Number of members, inactive secondaries included
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self.all_secondaries().len()
    }

    /// Number of members counting toward quorum
    #[must_use]
    pub fn alive_size(&self) -> usize {
        1 + self.alive_secondaries().len()
    }

    /// Whether another joining secondary may be admitted
    #[must_use]
    pub fn allow_new_joining_secondary(&self, total_secondaries: usize) -> bool {
        self.parts.secondaries.len() < total_secondaries
            && self.parts.joining_secondaries.is_empty()
    }

    #[must_use]
    pub fn compare_version(&self, other: &Self) -> Ordering {
        self.parts.version.cmp(&other.parts.version)
    }

    /// Order two memberships by version.
    ///
    /// Equal versions must carry equal role assignments; if they do not the
    /// memberships are unrelated and comparing them is an error.
    pub fn compare(&self, other: &Self) -> Result<Ordering> {
        match self.compare_version(other) {
            Ordering::Equal if self.parts != other.parts => Err(Error::invalid_membership(
                format!("{self} and {other} share a version but differ in members"),
            )),
            ord => Ok(ord),
        }
    }

    /// Compare memberships that may not have been received yet.
    ///
    /// An absent side has no defined order and yields `InvalidMembership`.
    pub fn compare_optional(a: Option<&Self>, b: Option<&Self>) -> Result<Ordering> {
        match (a, b) {
            (Some(a), Some(b)) => a.compare(b),
            _ => Err(Error::invalid_membership("cannot order an absent membership")),
        }
    }

    fn with_parts(
        &self,
        version: SegmentVersion,
        edit: impl FnOnce(&mut MembershipParts),
    ) -> Result<Self> {
        let mut parts = self.parts.clone();
        parts.version = version;
        edit(&mut parts);
        Self::from_parts(parts)
    }

    fn require(&self, held: bool, id: InstanceId, role: &str) -> Result<()> {
        if held {
            Ok(())
        } else {
            Err(Error::invalid_membership(format!("{id} is not {role} in {self}")))
        }
    }

    fn require_new(&self, id: InstanceId) -> Result<()> {
        if self.contains(id) {
            Err(Error::invalid_membership(format!("{id} is already a member of {self}")))
        } else {
            Ok(())
        }
    }

    /// Add secondaries; unchanged version if all were already secondaries
    pub fn add_secondaries(&self, ids: impl IntoIterator<Item = InstanceId>) -> Result<Self> {
        let new: Vec<_> = ids.into_iter().filter(|id| !self.is_secondary(*id)).collect();
        if new.is_empty() {
            return Ok(self.clone());
        }
        self.with_parts(self.version().inc_generation()?, |p| p.secondaries.extend(new))
    }

    /// Add arbiters; unchanged version if all were already arbiters
    pub fn add_arbiters(&self, ids: impl IntoIterator<Item = InstanceId>) -> Result<Self> {
        let new: Vec<_> = ids.into_iter().filter(|id| !self.is_arbiter(*id)).collect();
        if new.is_empty() {
            return Ok(self.clone());
        }
        self.with_parts(self.version().inc_generation()?, |p| p.arbiters.extend(new))
    }

    /// Swap one secondary for a replica that holds no role yet
    pub fn replace_secondary(&self, old: InstanceId, new: InstanceId) -> Result<Self> {
        self.require(self.is_secondary(old), old, "a secondary")?;
        self.require_new(new)?;
        self.with_parts(self.version().inc_generation()?, |p| {
            p.secondaries.remove(&old);
            p.secondaries.insert(new);
        })
    }

    pub fn remove_secondary(&self, id: InstanceId) -> Result<Self> {
        self.require(self.is_secondary(id), id, "a secondary")?;
        self.with_parts(self.version().inc_generation()?, |p| {
            p.secondaries.remove(&id);
        })
    }

    pub fn remove_arbiter(&self, id: InstanceId) -> Result<Self> {
        self.require(self.is_arbiter(id), id, "an arbiter")?;
        self.with_parts(self.version().inc_generation()?, |p| {
            p.arbiters.remove(&id);
        })
    }

    /// Elect a new primary, starting a new epoch.
    ///
    /// Re-electing the current primary only bumps the epoch. Electing a
    /// secondary demotes the old primary to secondary.
    pub fn new_primary_chosen(&self, new_primary: InstanceId) -> Result<Self> {
        if self.is_primary(new_primary) {
            return self.with_parts(self.version().inc_epoch()?, |_| {});
        }
        self.require(self.is_secondary(new_primary), new_primary, "a secondary")?;
        let old = self.primary();
        self.with_parts(self.version().inc_epoch()?, |p| {
            p.secondaries.remove(&new_primary);
            p.secondaries.insert(old);
            p.primary = new_primary;
        })
    }

    pub fn add_joining_secondary(&self, id: InstanceId) -> Result<Self> {
        self.require_new(id)?;
        self.with_parts(self.version().inc_generation()?, |p| {
            p.joining_secondaries.insert(id);
        })
    }

    pub fn joining_secondary_become_secondary(&self, id: InstanceId) -> Result<Self> {
        self.require(self.is_joining_secondary(id), id, "a joining secondary")?;
        self.with_parts(self.version().inc_generation()?, |p| {
            p.joining_secondaries.remove(&id);
            p.secondaries.insert(id);
        })
    }

    pub fn joining_secondary_become_inactive(&self, id: InstanceId) -> Result<Self> {
        self.require(self.is_joining_secondary(id), id, "a joining secondary")?;
        self.with_parts(self.version().inc_generation()?, |p| {
            p.joining_secondaries.remove(&id);
            p.inactive_secondaries.insert(id);
        })
    }

    /// Move a secondary or joining secondary out of the quorum
    pub fn alive_secondary_become_inactive(&self, id: InstanceId) -> Result<Self> {
        self.require(
            self.is_secondary(id) || self.is_joining_secondary(id),
            id,
            "a secondary or joining secondary",
        )?;
        self.with_parts(self.version().inc_generation()?, |p| {
            p.secondaries.remove(&id);
            p.joining_secondaries.remove(&id);
            p.inactive_secondaries.insert(id);
        })
    }

    pub fn arbiter_become_inactive(&self, id: InstanceId) -> Result<Self> {
        self.require(self.is_arbiter(id), id, "an arbiter")?;
        self.with_parts(self.version().inc_generation()?, |p| {
            p.arbiters.remove(&id);
            p.inactive_secondaries.insert(id);
        })
    }

    pub fn inactive_secondary_become_joining(&self, id: InstanceId) -> Result<Self> {
        self.require(self.is_inactive_secondary(id), id, "an inactive secondary")?;
        self.with_parts(self.version().inc_generation()?, |p| {
            p.inactive_secondaries.remove(&id);
            p.joining_secondaries.insert(id);
        })
    }

    pub fn inactive_secondary_become_arbiter(&self, id: InstanceId) -> Result<Self> {
        self.require(self.is_inactive_secondary(id), id, "an inactive secondary")?;
        self.with_parts(self.version().inc_generation()?, |p| {
            p.inactive_secondaries.remove(&id);
            p.arbiters.insert(id);
        })
    }

    pub fn remove_inactive_secondary(&self, id: InstanceId) -> Result<Self> {
        self.require(self.is_inactive_secondary(id), id, "an inactive secondary")?;
        self.with_parts(self.version().inc_generation()?, |p| {
            p.inactive_secondaries.remove(&id);
        })
    }
}

impl TryFrom<MembershipParts> for SegmentMembership {
    type Error = Error;

    fn try_from(parts: MembershipParts) -> Result<Self> {
        Self::from_parts(parts)
    }
}

impl From<SegmentMembership> for MembershipParts {
    fn from(membership: SegmentMembership) -> Self {
        membership.parts
    }
}

fn fmt_set(f: &mut fmt::Formatter<'_>, set: &BTreeSet<InstanceId>) -> fmt::Result {
    f.write_str("[")?;
    for (i, id) in set.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{id}")?;
    }
    f.write_str("]")
}

impl fmt::Display for SegmentMembership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} P={} S=", self.parts.version, self.parts.primary)?;
        fmt_set(f, &self.parts.secondaries)?;
        f.write_str(" A=")?;
        fmt_set(f, &self.parts.arbiters)?;
        f.write_str(" J=")?;
        fmt_set(f, &self.parts.joining_secondaries)?;
        f.write_str(" I=")?;
        fmt_set(f, &self.parts.inactive_secondaries)
    }
}

impl fmt::Debug for SegmentMembership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentMembership({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> InstanceId {
        InstanceId::new(n)
    }

    fn psa() -> SegmentMembership {
        SegmentMembership::new(SegmentVersion::new(1, 0), id(1), [id(2)], [id(3)]).unwrap()
    }

    #[test]
    fn test_roles() {
        let m = psa();
        assert!(m.is_primary(id(1)));
        assert!(m.is_secondary(id(2)));
        assert!(m.is_arbiter(id(3)));
        assert!(!m.is_joining_secondary(id(2)));
        assert!(m.is_alive_secondary(id(3)));
        assert!(!m.is_alive_secondary(id(1)));
        assert_eq!(m.alive_secondaries(), [id(2), id(3)].into());
        assert_eq!(m.members(), [id(1), id(2), id(3)].into());
        assert_eq!(m.peers_of(id(2)), [id(1), id(3)].into());
        assert_eq!(m.size(), 3);
        assert_eq!(m.alive_size(), 3);
        assert_eq!(m.to_string(), "(1, 0) P=1 S=[2] A=[3] J=[] I=[]");
    }

    #[test]
    fn test_primary_cannot_hold_other_role() {
        let err = SegmentMembership::new(SegmentVersion::default(), id(1), [id(1)], []).unwrap_err();
        assert!(matches!(err, Error::InvalidMembership(_)));

        let err = SegmentMembership::new(SegmentVersion::default(), id(1), [id(2)], [id(2)]).unwrap_err();
        assert!(matches!(err, Error::InvalidMembership(_)));
    }

    #[test]
    fn test_compare() {
        let a = psa();
        let b = a.add_joining_secondary(id(4)).unwrap();
        assert_eq!(a.compare(&b).unwrap(), Ordering::Less);
        assert_eq!(b.compare(&a).unwrap(), Ordering::Greater);
        assert_eq!(a.compare(&a.clone()).unwrap(), Ordering::Equal);

        // Same version, different members
        let c = SegmentMembership::new(SegmentVersion::new(1, 0), id(1), [id(5)], [id(3)]).unwrap();
        assert!(matches!(a.compare(&c), Err(Error::InvalidMembership(_))));
    }

    #[test]
    fn test_compare_absent() {
        let a = psa();
        assert!(SegmentMembership::compare_optional(Some(&a), None).is_err());
        assert!(SegmentMembership::compare_optional(None, Some(&a)).is_err());
        assert!(SegmentMembership::compare_optional(None, None).is_err());
        assert_eq!(
            SegmentMembership::compare_optional(Some(&a), Some(&a)).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn test_new_primary_chosen() {
        let m = SegmentMembership::new(SegmentVersion::new(2, 5), id(1), [id(2), id(3)], []).unwrap();
        let next = m.new_primary_chosen(id(2)).unwrap();
        assert_eq!(next.version(), SegmentVersion::new(3, 0));
        assert_eq!(next.primary(), id(2));
        assert_eq!(next.secondaries(), &[id(1), id(3)].into());

        let same = m.new_primary_chosen(id(1)).unwrap();
        assert_eq!(same.version(), SegmentVersion::new(3, 0));
        assert_eq!(same.primary(), id(1));

        assert!(m.new_primary_chosen(id(9)).is_err());
    }

    #[test]
    fn test_joining_lifecycle() {
        let m = psa();
        assert!(m.allow_new_joining_secondary(2));

        let joined = m.add_joining_secondary(id(4)).unwrap();
        assert_eq!(joined.version(), SegmentVersion::new(1, 1));
        assert!(joined.is_joining_secondary(id(4)));
        assert!(!joined.allow_new_joining_secondary(2));
        assert_eq!(joined.write_secondaries(), [id(2), id(4)].into());
        assert!(joined.add_joining_secondary(id(2)).is_err());

        let promoted = joined.joining_secondary_become_secondary(id(4)).unwrap();
        assert!(promoted.is_secondary(id(4)));
        assert_eq!(promoted.version(), SegmentVersion::new(1, 2));

        let inactive = promoted.alive_secondary_become_inactive(id(4)).unwrap();
        assert!(inactive.is_inactive_secondary(id(4)));
        assert!(inactive.contains(id(4)));
        assert!(!inactive.members().contains(&id(4)));
        assert_eq!(inactive.size(), 4);
        assert_eq!(inactive.alive_size(), 3);

        let back = inactive.inactive_secondary_become_joining(id(4)).unwrap();
        assert!(back.is_joining_secondary(id(4)));
        let dropped = back
            .joining_secondary_become_inactive(id(4))
            .and_then(|m| m.remove_inactive_secondary(id(4)))
            .unwrap();
        assert!(!dropped.contains(id(4)));
        assert_eq!(dropped.version(), SegmentVersion::new(1, 6));
    }

    #[test]
    fn test_arbiter_transitions() {
        let m = psa();
        let inactive = m.arbiter_become_inactive(id(3)).unwrap();
        assert!(inactive.is_inactive_secondary(id(3)));
        let arbiter = inactive.inactive_secondary_become_arbiter(id(3)).unwrap();
        assert!(arbiter.is_arbiter(id(3)));
        let removed = arbiter.remove_arbiter(id(3)).unwrap();
        assert!(!removed.contains(id(3)));
        assert!(removed.remove_arbiter(id(3)).is_err());
    }

    #[test]
    fn test_add_and_replace_secondaries() {
        let m = psa();
        let same = m.add_secondaries([id(2)]).unwrap();
        assert_eq!(same.version(), m.version());

        let grown = m.add_secondaries([id(2), id(5)]).unwrap();
        assert_eq!(grown.version(), SegmentVersion::new(1, 1));
        assert!(grown.is_secondary(id(5)));

        let replaced = grown.replace_secondary(id(5), id(6)).unwrap();
        assert!(replaced.is_secondary(id(6)));
        assert!(!replaced.contains(id(5)));
        assert!(replaced.replace_secondary(id(9), id(7)).is_err());
        assert!(replaced.replace_secondary(id(6), id(3)).is_err());

        let removed = replaced.remove_secondary(id(6)).unwrap();
        assert!(!removed.contains(id(6)));

        let arbiters = m.add_arbiters([id(8)]).unwrap();
        assert_eq!(arbiters.arbiters(), &[id(3), id(8)].into());
        // An arbiter may not also become a secondary
        assert!(m.add_secondaries([id(3)]).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let m = psa();
        let json = serde_json::to_string(&m).unwrap();
        let back: SegmentMembership = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);

        let bad = r#"{"version":{"epoch":1,"generation":0},"primary":1,"secondaries":[1]}"#;
        assert!(serde_json::from_str::<SegmentMembership>(bad).is_err());
    }
}
