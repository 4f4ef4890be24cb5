//! Job lifecycle status vocabulary.
//!
//! The string forms are persisted and sent over the wire; renaming one
//! requires a data migration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Posted and waiting for a driver
    #[default]
    Open,
    /// A driver has taken the job
    Claimed,
    /// Driver is on the way to the pickup location
    EnRoute,
    /// Food collected
    PickedUp,
    /// Food dropped off, done
    Delivered,
    /// Withdrawn by the dispatcher
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Open,
        JobStatus::Claimed,
        JobStatus::EnRoute,
        JobStatus::PickedUp,
        JobStatus::Delivered,
        JobStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Open => "open",
            JobStatus::Claimed => "claimed",
            JobStatus::EnRoute => "en_route",
            JobStatus::PickedUp => "picked_up",
            JobStatus::Delivered => "delivered",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if the job can still be claimed.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Open)
    }

    /// Returns true if the job has reached an end state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Delivered | JobStatus::Cancelled)
    }
}

/// Rejected status string. Matching is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job status '{value}'. valid values: open, claimed, en_route, picked_up, delivered, cancelled")]
pub struct UnknownStatus {
    pub value: String,
}

impl std::str::FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| UnknownStatus {
                value: value.to_string(),
            })
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
