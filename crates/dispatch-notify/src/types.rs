use chrono::{DateTime, Utc};
use dispatch_core::types::JobId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTopic {
    JobPosted,
    JobClaimed,
}

/// One text to be sent to every phone in `recipients`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub at: DateTime<Utc>,
    pub topic: NotificationTopic,
    pub job_id: Option<JobId>,
    pub recipients: Vec<String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSinkKind {
    Log,
    Sms,
    Webhook,
}

impl From<dispatch_core::config::SinkKind> for NotificationSinkKind {
    fn from(kind: dispatch_core::config::SinkKind) -> Self {
        match kind {
            dispatch_core::config::SinkKind::Log => NotificationSinkKind::Log,
            dispatch_core::config::SinkKind::Sms => NotificationSinkKind::Sms,
            dispatch_core::config::SinkKind::Webhook => NotificationSinkKind::Webhook,
        }
    }
}
