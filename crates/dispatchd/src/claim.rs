//! First-come-first-served claiming of open jobs.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dispatch_core::state::JobStatus;
use dispatch_core::types::{Job, JobId};

use crate::persistence::{JobStore, PersistenceError};
use crate::state_machine::{plan_claim, StateMachineError};

/// Conditional writes attempted before giving up on a contended job.
pub const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("job {job_id} not found")]
    NotFound { job_id: JobId },
    #[error("job {job_id} is not open (status: {status})")]
    NotOpen { job_id: JobId, status: JobStatus },
    #[error("job {job_id} already claimed by {claimed_by}")]
    AlreadyClaimed { job_id: JobId, claimed_by: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("job {job_id} kept changing underneath the claim")]
    Conflict { job_id: JobId },
    #[error(transparent)]
    Storage(#[from] PersistenceError),
}

/// Serializes mutations per job id.
///
/// Each job gets a "door": a mutex held for the whole read, plan and
/// conditional write. Doors are created on demand and dropped once no caller
/// holds them. The store's conditional update still rejects stale writes
/// from anything that bypasses the door.
pub struct ClaimCoordinator {
    store: Arc<dyn JobStore>,
    doors: DashMap<JobId, Arc<Mutex<()>>>,
}

impl ClaimCoordinator {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            doors: DashMap::new(),
        }
    }

    /// Run `f` while holding the door for `job_id`.
    pub fn serialize<R>(&self, job_id: JobId, f: impl FnOnce() -> R) -> R {
        let door = Arc::clone(self.doors.entry(job_id).or_default().value());
        let result = {
            let _guard = door.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f()
        };
        drop(door);
        self.doors
            .remove_if(&job_id, |_, door| Arc::strong_count(door) == 1);
        result
    }

    pub fn claim(&self, job_id: JobId, driver: &str, at: DateTime<Utc>) -> Result<Job, ClaimError> {
        self.claim_with(job_id, driver, at, |_| {})
    }

    /// Claim `job_id` for `driver`, calling `on_claimed` with the stored job
    /// before the door is released.
    pub fn claim_with(
        &self,
        job_id: JobId,
        driver: &str,
        at: DateTime<Utc>,
        on_claimed: impl FnOnce(&Job),
    ) -> Result<Job, ClaimError> {
        let driver = driver.trim();
        if driver.is_empty() {
            return Err(ClaimError::InvalidInput {
                message: "driver name is required".to_string(),
            });
        }

        self.serialize(job_id, || -> Result<Job, ClaimError> {
            for attempt in 1..=MAX_WRITE_ATTEMPTS {
                let job = self
                    .store
                    .load_job(job_id)?
                    .ok_or(ClaimError::NotFound { job_id })?;
                let plan = plan_claim(&job, driver, at).map_err(|err| match err {
                    StateMachineError::InvalidTransition { .. } => refusal(&job),
                })?;

                if self.store.update_job_if_status(&plan.next, plan.expected())? {
                    tracing::info!(job_id = %job_id, driver, "job claimed");
                    on_claimed(&plan.next);
                    return Ok(plan.next);
                }
                tracing::debug!(job_id = %job_id, attempt, "claim write lost a race; re-reading");
            }
            Err(ClaimError::Conflict { job_id })
        })
    }

    #[cfg(test)]
    fn open_doors(&self) -> usize {
        self.doors.len()
    }
}

impl std::fmt::Debug for ClaimCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimCoordinator")
            .field("open_doors", &self.doors.len())
            .finish()
    }
}

fn refusal(job: &Job) -> ClaimError {
    match &job.claimed_by {
        Some(claimed_by) => ClaimError::AlreadyClaimed {
            job_id: job.id,
            claimed_by: claimed_by.clone(),
        },
        None => ClaimError::NotOpen {
            job_id: job.id,
            status: job.status,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqliteStore;
    use dispatch_core::types::NewJob;
    use std::sync::Barrier;

    fn mk_store() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().expect("open in-memory db");
        store.migrate().expect("migrate");
        Arc::new(store)
    }

    fn post(store: &SqliteStore) -> Job {
        store
            .insert_job(&NewJob::new("Bakery surplus", "123 Main St"), Utc::now())
            .expect("insert")
    }

    #[test]
    fn first_claim_wins_second_sees_already_claimed() {
        let store = mk_store();
        let job = post(&store);
        let coordinator = ClaimCoordinator::new(store.clone());

        let claimed = coordinator.claim(job.id, " X ", Utc::now()).expect("claim");
        assert_eq!(claimed.status, JobStatus::Claimed);
        assert_eq!(claimed.claimed_by.as_deref(), Some("X"));

        let err = coordinator.claim(job.id, "Y", Utc::now()).expect_err("taken");
        assert!(
            matches!(err, ClaimError::AlreadyClaimed { ref claimed_by, .. } if claimed_by == "X"),
            "{err:?}"
        );
        assert_eq!(store.load_job(job.id).unwrap().unwrap(), claimed);
    }

    #[test]
    fn missing_job_and_blank_driver_are_rejected() {
        let store = mk_store();
        let job = post(&store);
        let coordinator = ClaimCoordinator::new(store.clone());

        assert!(matches!(
            coordinator.claim(JobId(999), "X", Utc::now()),
            Err(ClaimError::NotFound { job_id: JobId(999) })
        ));
        assert!(matches!(
            coordinator.claim(job.id, "   ", Utc::now()),
            Err(ClaimError::InvalidInput { .. })
        ));
        assert_eq!(store.load_job(job.id).unwrap().unwrap().status, JobStatus::Open);
    }

    #[test]
    fn cancelled_unclaimed_job_is_not_open() {
        let store = mk_store();
        let job = post(&store);
        let mut cancelled = job.clone();
        cancelled.status = JobStatus::Cancelled;
        assert!(store.update_job_if_status(&cancelled, JobStatus::Open).unwrap());

        let coordinator = ClaimCoordinator::new(store);
        let err = coordinator.claim(job.id, "X", Utc::now()).expect_err("cancelled");
        assert!(matches!(
            err,
            ClaimError::NotOpen {
                status: JobStatus::Cancelled,
                ..
            }
        ));
    }

    #[test]
    fn concurrent_claims_produce_one_winner() {
        const DRIVERS: usize = 16;
        let store = mk_store();
        let job_id = post(&store).id;
        let coordinator = ClaimCoordinator::new(store.clone());
        let barrier = Barrier::new(DRIVERS);

        let results: Vec<(String, Result<Job, ClaimError>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..DRIVERS)
                .map(|n| {
                    let coordinator = &coordinator;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        let driver = format!("driver-{n}");
                        barrier.wait();
                        let result = coordinator.claim(job_id, &driver, Utc::now());
                        (driver, result)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("claim thread"))
                .collect()
        });

        let winners: Vec<&String> = results
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(driver, _)| driver)
            .collect();
        assert_eq!(winners.len(), 1);
        let losers = results
            .iter()
            .filter(|(_, result)| matches!(result, Err(ClaimError::AlreadyClaimed { .. })))
            .count();
        assert_eq!(losers, DRIVERS - 1);

        let stored = store.load_job(job_id).unwrap().unwrap();
        assert_eq!(stored.claimed_by.as_ref(), Some(winners[0]));
        assert_eq!(coordinator.open_doors(), 0);
    }

    #[test]
    fn on_claimed_runs_once_for_the_winner() {
        let store = mk_store();
        let job = post(&store);
        let coordinator = ClaimCoordinator::new(store);
        let mut seen = Vec::new();

        coordinator
            .claim_with(job.id, "X", Utc::now(), |job| seen.push(job.clone()))
            .expect("claim");
        let _ = coordinator.claim_with(job.id, "Y", Utc::now(), |job| seen.push(job.clone()));

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].claimed_by.as_deref(), Some("X"));
    }

    #[test]
    fn serialize_releases_door_after_use() {
        let coordinator = ClaimCoordinator::new(mk_store());
        let value = coordinator.serialize(JobId(5), || 42);
        assert_eq!(value, 42);
        assert_eq!(coordinator.open_doors(), 0);
    }
}
