//! Segment version: the (epoch, generation) clock ordering memberships

use serde::{Deserialize, Serialize};
use std::fmt;
use strata_common::{Error, Result};

/// Two-part monotonic version of a segment membership.
///
/// The epoch moves when a new primary is elected and resets the generation;
/// the generation moves when the member set changes under the same primary.
/// Field order matters: the derived ordering compares epoch first.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SegmentVersion {
    epoch: u32,
    generation: u32,
}

impl SegmentVersion {
    #[must_use]
    pub const fn new(epoch: u32, generation: u32) -> Self {
        Self { epoch, generation }
    }

    #[must_use]
    pub const fn epoch(&self) -> u32 {
        self.epoch
    }

    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Version after a leadership change.
    ///
    /// Fails instead of wrapping once the epoch is exhausted.
    pub fn inc_epoch(&self) -> Result<Self> {
        self.epoch
            .checked_add(1)
            .map(|epoch| Self::new(epoch, 0))
            .ok_or_else(|| Error::illegal_state(format!("epoch exhausted at version {self}")))
    }

    /// Version after a member set change
    pub fn inc_generation(&self) -> Result<Self> {
        self.generation
            .checked_add(1)
            .map(|generation| Self::new(self.epoch, generation))
            .ok_or_else(|| Error::illegal_state(format!("generation exhausted at version {self}")))
    }
}

impl fmt::Display for SegmentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.epoch, self.generation)
    }
}
