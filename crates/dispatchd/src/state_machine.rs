//! Status transitions for pickup jobs.
//!
//! Every function here is pure: it returns the record the caller should
//! persist, keyed on the status it expects to find at write time.

use chrono::{DateTime, SubsecRound, Utc};
use dispatch_core::state::JobStatus;
use dispatch_core::types::Job;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("invalid job status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub at: DateTime<Utc>,
}

/// A validated mutation awaiting a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpdate {
    pub next: Job,
    pub transition: StatusTransition,
}

impl PlannedUpdate {
    /// Status the stored row must still have for the write to apply.
    pub fn expected(&self) -> JobStatus {
        self.transition.from
    }
}

/// Check if a status-set request is legal.
///
/// Any status may move to any other distinct status. Only `claim` is gated.
pub fn is_transition_allowed(from: JobStatus, to: JobStatus) -> bool {
    from != to
}

pub fn is_claim_allowed(from: JobStatus) -> bool {
    from.is_claimable()
}

/// Plan a general status change.
pub fn plan_status_change(
    job: &Job,
    to: JobStatus,
    at: DateTime<Utc>,
) -> Result<PlannedUpdate, StateMachineError> {
    let from = job.status;
    if !is_transition_allowed(from, to) {
        return Err(StateMachineError::InvalidTransition { from, to });
    }

    let mut next = job.clone();
    next.status = to;
    next.updated_at = monotonic(job, at);
    Ok(planned(next, from, at))
}

/// Plan `open -> claimed` for `driver`. The caller trims and checks the name.
pub fn plan_claim(
    job: &Job,
    driver: &str,
    at: DateTime<Utc>,
) -> Result<PlannedUpdate, StateMachineError> {
    let from = job.status;
    if !is_claim_allowed(from) {
        return Err(StateMachineError::InvalidTransition {
            from,
            to: JobStatus::Claimed,
        });
    }

    let mut next = job.clone();
    next.status = JobStatus::Claimed;
    next.claimed_by = Some(driver.to_string());
    next.updated_at = monotonic(job, at);
    Ok(planned(next, from, at))
}

/// Plan a photo attachment. Allowed at any status; the status is unchanged.
pub fn plan_photo(job: &Job, photo_path: &str, at: DateTime<Utc>) -> PlannedUpdate {
    let mut next = job.clone();
    next.photo_path = Some(photo_path.to_string());
    next.updated_at = monotonic(job, at);
    planned(next, job.status, at)
}

fn planned(next: Job, from: JobStatus, at: DateTime<Utc>) -> PlannedUpdate {
    let to = next.status;
    PlannedUpdate {
        next,
        transition: StatusTransition { from, to, at },
    }
}

/// Sub-second digits the store keeps for timestamps.
pub const TIMESTAMP_PRECISION: u16 = 6;

// Clock skew must not move updated_at backwards. Truncated so the planned
// record equals what the store reads back.
fn monotonic(job: &Job, at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(TIMESTAMP_PRECISION).max(job.updated_at)
}
