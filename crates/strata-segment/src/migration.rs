//! Page migration state of a replica
//!
//! ```text
//!            begin (voting)           success
//!   None ─────────────────────► FromVoting ───────► None
//!     │      begin (joining)          │ failure
//!     └─────────────────────► FromJoining ──► FromFailMigration
//!                                              │  begin: FromVoting/FromJoining
//!                                              │  failure: stays
//!                                              └  success: illegal
//!   Deleted absorbs every event.
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use strata_common::{Error, Result};

/// Event fed to [`MigrationStatus::next`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationEvent {
    /// A secondary-role replica starts migrating pages
    Begin {
        /// The replica is joining fresh rather than already voting
        joining: bool,
    },
    /// The running migration finished
    Finished { success: bool },
    /// The replica was deleted
    Delete,
}

/// Migration state of a replica
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationStatus {
    #[default]
    None,
    FromVoting,
    FromJoining,
    FromFailMigration,
    Deleted,
}

impl MigrationStatus {
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::FromVoting,
        Self::FromJoining,
        Self::FromFailMigration,
        Self::Deleted,
    ];

    /// Persisted numeric value
    #[must_use]
    pub const fn value(self) -> i32 {
        self as i32
    }

    pub fn from_value(value: i32) -> Result<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(Error::InvalidValue {
                kind: "migration status",
                value: i64::from(value),
            })
    }

    /// A migration is running
    #[must_use]
    pub const fn is_migrating(self) -> bool {
        matches!(self, Self::FromVoting | Self::FromJoining)
    }

    /// The replica has been through a migration at some point
    #[must_use]
    pub const fn is_migrated_status(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Pure transition function
    pub fn next(self, event: MigrationEvent) -> Result<Self> {
        use MigrationEvent::{Begin, Delete, Finished};

        match (self, event) {
            (Self::Deleted, _) | (_, Delete) => Ok(Self::Deleted),
            (_, Begin { joining: true }) => Ok(Self::FromJoining),
            (_, Begin { joining: false }) => Ok(Self::FromVoting),
            (Self::FromFailMigration, Finished { success: true }) => Err(Error::illegal_state(
                "migration cannot succeed from a failed state without restarting",
            )),
            (Self::FromFailMigration, Finished { success: false }) => Ok(Self::FromFailMigration),
            (_, Finished { success: true }) => Ok(Self::None),
            (_, Finished { success: false }) => Ok(Self::FromFailMigration),
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
