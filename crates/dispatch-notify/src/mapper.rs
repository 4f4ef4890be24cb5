//! Map job activity to driver notifications.

use dispatch_core::events::{ActivityKind, JobActivity};
use dispatch_core::types::Job;

use crate::types::{NotificationMessage, NotificationTopic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessagePolicy {
    pub notify_on_claim: bool,
}

/// Whether `activity` produces a roster-wide text under `policy`.
///
/// Lets the caller skip the roster lookup for activity that never notifies.
pub fn wants_roster(activity: &JobActivity, policy: MessagePolicy) -> bool {
    match activity.kind {
        ActivityKind::JobPosted => true,
        ActivityKind::JobClaimed { .. } => policy.notify_on_claim,
        ActivityKind::StatusChanged { .. } | ActivityKind::PhotoAttached { .. } => false,
    }
}

/// Map an activity to a notification, if applicable.
pub fn notification_for_activity(
    activity: &JobActivity,
    recipients: &[String],
    policy: MessagePolicy,
) -> Option<NotificationMessage> {
    if recipients.is_empty() || !wants_roster(activity, policy) {
        return None;
    }

    let (topic, body) = match &activity.kind {
        ActivityKind::JobPosted => (NotificationTopic::JobPosted, posted_body(&activity.job)),
        ActivityKind::JobClaimed { driver } => (
            NotificationTopic::JobClaimed,
            format!(
                "Pickup claimed: {} @ {} by {}.",
                activity.job.title, activity.job.location, driver
            ),
        ),
        _ => return None,
    };

    Some(NotificationMessage {
        at: activity.at,
        topic,
        job_id: Some(activity.job.id),
        recipients: recipients.to_vec(),
        body,
    })
}

fn posted_body(job: &Job) -> String {
    let expires = job
        .expires_at
        .as_deref()
        .map(|at| format!(" (expires {at})"))
        .unwrap_or_default();
    format!("New pickup: {} @ {}{}.", job.title, job.location, expires)
}
