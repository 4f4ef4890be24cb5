use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::JobStatus;
use crate::types::Job;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    JobPosted,
    JobClaimed { driver: String },
    StatusChanged { from: JobStatus, to: JobStatus },
    PhotoAttached { photo_path: String },
}

/// A successful mutation of a job, carrying the job as persisted afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobActivity {
    pub at: DateTime<Utc>,
    pub job: Job,
    pub kind: ActivityKind,
}

impl JobActivity {
    pub fn new(job: Job, kind: ActivityKind) -> Self {
        Self {
            at: job.updated_at,
            job,
            kind,
        }
    }
}

pub fn activity_kind_tag(kind: &ActivityKind) -> &'static str {
    match kind {
        ActivityKind::JobPosted => "job_posted",
        ActivityKind::JobClaimed { .. } => "job_claimed",
        ActivityKind::StatusChanged { .. } => "status_changed",
        ActivityKind::PhotoAttached { .. } => "photo_attached",
    }
}
