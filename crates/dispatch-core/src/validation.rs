//! Validation for dispatch inputs and configuration.

use serde::{Deserialize, Serialize};

use crate::config::{DispatchConfig, SinkKind};
use crate::types::{NewDriver, NewJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

/// Returns true if any issue is an error.
pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues
        .iter()
        .any(|issue| issue.level == ValidationLevel::Error)
}

impl Validate for NewJob {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.title.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "job.title.empty",
                message: "title is required".to_string(),
            });
        }

        if self.location.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "job.location.empty",
                message: "location is required".to_string(),
            });
        }

        issues
    }
}

impl Validate for NewDriver {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.phone.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "driver.phone.empty",
                message: "phone is required".to_string(),
            });
        }

        issues
    }
}

impl Validate for DispatchConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.server.bind.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "server.bind.empty",
                message: "bind address must not be empty".to_string(),
            });
        }

        if self.storage.sqlite_path.as_os_str().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "storage.sqlite_path.empty",
                message: "sqlite_path must not be empty".to_string(),
            });
        }

        if self.events.subscriber_buffer == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "events.subscriber_buffer.zero",
                message: "subscriber_buffer must be greater than zero".to_string(),
            });
        }

        if self.notifications.queue_capacity == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "notifications.queue_capacity.zero",
                message: "queue_capacity must be greater than zero".to_string(),
            });
        }

        if self.notifications.retry.max_attempts == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "notifications.retry.max_attempts.zero",
                message: "max_attempts is 0; each notification will still be tried once"
                    .to_string(),
            });
        }

        let wants_webhook = self.notifications.enabled_sinks.contains(&SinkKind::Webhook);
        match &self.notifications.webhook_url {
            None if wants_webhook => issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "notifications.webhook_url.missing",
                message: "webhook sink is enabled but webhook_url is not set".to_string(),
            }),
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Warning,
                    code: "notifications.webhook_url.invalid",
                    message: "webhook URL should start with http:// or https://".to_string(),
                })
            }
            _ => {}
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::{has_errors, Validate, ValidationLevel};
    use crate::config::{DispatchConfig, SinkKind};
    use crate::types::{NewDriver, NewJob};

    #[test]
    fn new_job_requires_title_and_location() {
        let issues = NewJob::new("  ", "").validate();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|issue| issue.code == "job.title.empty"));
        assert!(issues.iter().any(|issue| issue.code == "job.location.empty"));
        assert!(has_errors(&issues));
    }

    #[test]
    fn complete_new_job_has_no_issues() {
        assert!(NewJob::new("Bakery surplus", "123 Main St")
            .validate()
            .is_empty());
    }

    #[test]
    fn new_driver_requires_phone_but_not_name() {
        assert!(NewDriver::new("", "+15550001111").validate().is_empty());

        let issues = NewDriver::new("Ana", " ").validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, "driver.phone.empty");
    }

    #[test]
    fn default_config_is_valid() {
        assert!(DispatchConfig::default().validate().is_empty());
    }

    #[test]
    fn config_reports_zero_buffer_and_missing_webhook() {
        let mut config = DispatchConfig::default();
        config.events.subscriber_buffer = 0;
        config.notifications.enabled_sinks = vec![SinkKind::Webhook];

        let issues = config.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|issue| {
            issue.level == ValidationLevel::Error && issue.code == "events.subscriber_buffer.zero"
        }));
        assert!(issues
            .iter()
            .any(|issue| issue.code == "notifications.webhook_url.missing"));
    }

    #[test]
    fn config_rejects_zero_notification_queue() {
        let mut config = DispatchConfig::default();
        config.notifications.queue_capacity = 0;

        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, ValidationLevel::Error);
        assert_eq!(issues[0].code, "notifications.queue_capacity.zero");
    }

    #[test]
    fn config_warns_on_non_http_webhook() {
        let mut config = DispatchConfig::default();
        config.notifications.webhook_url = Some("ftp://example.test".to_string());

        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, ValidationLevel::Warning);
        assert!(!has_errors(&issues));
    }
}
