//! Dispatch service: the entry point for every job and roster operation.
//!
//! Mutations run inside the job's door, publish one change event while the
//! door is held, and hand one activity to the notification layer after it
//! is released.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dispatch_core::config::DispatchConfig;
use dispatch_core::events::{activity_kind_tag, ActivityKind, JobActivity};
use dispatch_core::state::{JobStatus, UnknownStatus};
use dispatch_core::types::{Driver, DriverId, Job, JobId, NewDriver, NewJob};
use dispatch_core::validation::{has_errors, Validate, ValidationIssue};
use dispatch_notify::{
    notification_for_activity, wants_roster, BackgroundNotifier, MessagePolicy,
    NotificationDispatcher, Notifier,
};

use crate::claim::{ClaimCoordinator, ClaimError, MAX_WRITE_ATTEMPTS};
use crate::event_bus::{ChangeKind, EventBus, Subscription};
use crate::persistence::{JobStore, PersistenceError, SqliteStore};
use crate::state_machine::{plan_photo, plan_status_change, PlannedUpdate, StateMachineError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("validation failed: {}", summarize(.issues))]
    Validation { issues: Vec<ValidationIssue> },
    #[error("job not found: {job_id}")]
    JobNotFound { job_id: JobId },
    #[error("driver not found: {driver_id}")]
    DriverNotFound { driver_id: DriverId },
    #[error(transparent)]
    InvalidStatus(#[from] UnknownStatus),
    #[error(transparent)]
    InvalidTransition(#[from] StateMachineError),
    #[error("job {job_id} is not open (status: {status})")]
    NotOpen { job_id: JobId, status: JobStatus },
    #[error("job {job_id} already claimed by {claimed_by}")]
    AlreadyClaimed { job_id: JobId, claimed_by: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("job {job_id} was modified concurrently; retry")]
    Conflict { job_id: JobId },
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] PersistenceError),
    #[error("failed to start dispatch service: {0}")]
    Startup(#[from] std::io::Error),
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ClaimError> for DispatchError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::NotFound { job_id } => DispatchError::JobNotFound { job_id },
            ClaimError::NotOpen { job_id, status } => DispatchError::NotOpen { job_id, status },
            ClaimError::AlreadyClaimed { job_id, claimed_by } => {
                DispatchError::AlreadyClaimed { job_id, claimed_by }
            }
            ClaimError::InvalidInput { message } => DispatchError::InvalidInput { message },
            ClaimError::Conflict { job_id } => DispatchError::Conflict { job_id },
            ClaimError::Storage(source) => DispatchError::StorageUnavailable(source),
        }
    }
}

pub struct DispatchService {
    store: Arc<dyn JobStore>,
    coordinator: ClaimCoordinator,
    bus: EventBus,
    notifier: Arc<dyn Notifier>,
    policy: MessagePolicy,
}

impl DispatchService {
    pub fn new(
        store: Arc<dyn JobStore>,
        bus: EventBus,
        notifier: Arc<dyn Notifier>,
        policy: MessagePolicy,
    ) -> Self {
        Self {
            coordinator: ClaimCoordinator::new(Arc::clone(&store)),
            store,
            bus,
            notifier,
            policy,
        }
    }

    /// Open the SQLite store, run migrations and start notification delivery.
    pub fn from_config(config: &DispatchConfig) -> Result<Self, DispatchError> {
        let store = open_store(&config.storage.sqlite_path)?;
        let dispatcher = NotificationDispatcher::from_config(&config.notifications);
        tracing::info!(sinks = ?dispatcher.sink_kinds(), "notification sinks configured");
        let notifier = BackgroundNotifier::spawn(dispatcher, config.notifications.queue_capacity)?;

        Ok(Self::new(
            Arc::new(store),
            EventBus::new(config.events.subscriber_buffer),
            Arc::new(notifier),
            MessagePolicy {
                notify_on_claim: config.notifications.notify_on_claim,
            },
        ))
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    // --- Jobs ---

    pub fn create_job(&self, spec: &NewJob) -> Result<Job, DispatchError> {
        let spec = spec.normalized();
        let issues = spec.validate();
        if has_errors(&issues) {
            return Err(DispatchError::Validation { issues });
        }

        let job = self.store.insert_job(&spec, Utc::now())?;
        self.bus.publish(ChangeKind::JobsChanged);
        tracing::info!(job_id = %job.id, title = %job.title, "job posted");

        self.hand_off(JobActivity::new(job.clone(), ActivityKind::JobPosted));
        Ok(job)
    }

    /// Jobs newest first. `status` must be one of the six status strings.
    pub fn list_jobs(&self, status: Option<&str>) -> Result<Vec<Job>, DispatchError> {
        let status = status.map(str::parse::<JobStatus>).transpose()?;
        self.list_jobs_with(status)
    }

    pub fn list_jobs_with(&self, status: Option<JobStatus>) -> Result<Vec<Job>, DispatchError> {
        Ok(self.store.list_jobs(status)?)
    }

    pub fn job(&self, job_id: JobId) -> Result<Job, DispatchError> {
        self.store
            .load_job(job_id)?
            .ok_or(DispatchError::JobNotFound { job_id })
    }

    pub fn claim(&self, job_id: JobId, driver_name: &str) -> Result<Job, DispatchError> {
        let job = self.coordinator.claim_with(job_id, driver_name, Utc::now(), |_| {
            self.bus.publish(ChangeKind::JobsChanged);
        })?;

        let driver = job.claimed_by.clone().unwrap_or_default();
        self.hand_off(JobActivity::new(job.clone(), ActivityKind::JobClaimed { driver }));
        Ok(job)
    }

    pub fn set_status(&self, job_id: JobId, status: &str) -> Result<Job, DispatchError> {
        let status = status.parse::<JobStatus>()?;
        self.set_status_to(job_id, status)
    }

    pub fn set_status_to(&self, job_id: JobId, status: JobStatus) -> Result<Job, DispatchError> {
        let update = self.apply(job_id, |job, at| {
            Ok(plan_status_change(job, status, at)?)
        })?;
        tracing::info!(
            job_id = %job_id,
            from = %update.transition.from,
            to = %update.transition.to,
            closed = update.transition.to.is_terminal(),
            "job status changed"
        );

        let kind = ActivityKind::StatusChanged {
            from: update.transition.from,
            to: update.transition.to,
        };
        self.hand_off(JobActivity::new(update.next.clone(), kind));
        Ok(update.next)
    }

    pub fn attach_photo(&self, job_id: JobId, photo_path: &str) -> Result<Job, DispatchError> {
        let photo_path = photo_path.trim();
        if photo_path.is_empty() {
            return Err(DispatchError::InvalidInput {
                message: "photo reference is required".to_string(),
            });
        }

        let update = self.apply(job_id, |job, at| Ok(plan_photo(job, photo_path, at)))?;
        tracing::info!(job_id = %job_id, photo_path, "photo attached");

        let kind = ActivityKind::PhotoAttached {
            photo_path: photo_path.to_string(),
        };
        self.hand_off(JobActivity::new(update.next.clone(), kind));
        Ok(update.next)
    }

    // --- Drivers ---

    pub fn register_driver(&self, spec: &NewDriver) -> Result<Driver, DispatchError> {
        let issues = spec.validate();
        if has_errors(&issues) {
            return Err(DispatchError::Validation { issues });
        }
        let driver = self.store.register_driver(spec, Utc::now())?;
        tracing::info!(driver_id = %driver.id, "driver registered");
        Ok(driver)
    }

    pub fn list_drivers(&self) -> Result<Vec<Driver>, DispatchError> {
        Ok(self.store.list_drivers()?)
    }

    pub fn toggle_driver(&self, driver_id: DriverId) -> Result<Driver, DispatchError> {
        let driver = self
            .store
            .toggle_driver(driver_id)?
            .ok_or(DispatchError::DriverNotFound { driver_id })?;
        tracing::info!(driver_id = %driver.id, active = driver.is_active, "driver toggled");
        Ok(driver)
    }

    /// Load, plan and conditionally write one job inside its door.
    fn apply<F>(&self, job_id: JobId, plan: F) -> Result<PlannedUpdate, DispatchError>
    where
        F: Fn(&Job, DateTime<Utc>) -> Result<PlannedUpdate, DispatchError>,
    {
        self.coordinator
            .serialize(job_id, || -> Result<PlannedUpdate, DispatchError> {
                for attempt in 1..=MAX_WRITE_ATTEMPTS {
                    let job = self
                        .store
                        .load_job(job_id)?
                        .ok_or(DispatchError::JobNotFound { job_id })?;
                    let update = plan(&job, Utc::now())?;
                    if self
                        .store
                        .update_job_if_status(&update.next, update.expected())?
                    {
                        self.bus.publish(ChangeKind::JobsChanged);
                        return Ok(update);
                    }
                    tracing::debug!(job_id = %job_id, attempt, "conditional write missed; re-reading");
                }
                Err(DispatchError::Conflict { job_id })
            })
    }

    /// Pass one activity to the notifier. Never fails the caller.
    fn hand_off(&self, activity: JobActivity) {
        let recipients = if wants_roster(&activity, self.policy) {
            match self.store.active_driver_phones() {
                Ok(phones) => phones,
                Err(err) => {
                    tracing::warn!(job_id = %activity.job.id, error = %err, "driver roster unavailable; skipping notification");
                    return;
                }
            }
        } else {
            Vec::new()
        };

        match notification_for_activity(&activity, &recipients, self.policy) {
            Some(message) => self.notifier.notify(message),
            None => tracing::debug!(
                job_id = %activity.job.id,
                activity = activity_kind_tag(&activity.kind),
                "no notification for activity"
            ),
        }
    }
}

impl std::fmt::Debug for DispatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchService")
            .field("coordinator", &self.coordinator)
            .field("bus", &self.bus)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Open a SQLite store at `path`, creating parent directories and tables.
pub fn open_store(path: &Path) -> Result<SqliteStore, DispatchError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::open(path)?;
    store.migrate()?;
    tracing::debug!(path = %path.display(), "sqlite store ready");
    Ok(store)
}
