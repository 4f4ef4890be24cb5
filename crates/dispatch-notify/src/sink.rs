use crate::error::NotifyError;
use crate::types::{NotificationMessage, NotificationSinkKind};
use chrono::Utc;
use dispatch_core::config::{NotificationConfig, RetrySettings, TwilioConfig};
use serde::{Deserialize, Serialize};
use std::process::Command;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay_ms: settings.initial_delay_ms,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub notification_id: String,
    pub sink_kind: String,
    pub payload: String,
    pub last_error: String,
    pub attempts: u32,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct DeadLetterQueue {
    entries: Vec<DeadLetterEntry>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_size,
        }
    }

    pub fn push(&mut self, entry: DeadLetterEntry) {
        if self.max_size == 0 {
            return;
        }

        if self.entries.len() >= self.max_size {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[DeadLetterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(1000)
    }
}

pub fn exponential_backoff_delay_ms(config: &RetryConfig, attempt: u32) -> u64 {
    if attempt <= 1 {
        return config.initial_delay_ms;
    }

    let mut delay = config.initial_delay_ms;
    for _ in 1..attempt {
        delay = delay.saturating_mul(config.backoff_multiplier);
    }
    delay
}

fn should_retry(err: &NotifyError) -> bool {
    matches!(err, NotifyError::SinkFailed { .. })
}

fn build_dead_letter_entry(
    sink: &dyn NotificationSink,
    message: &NotificationMessage,
    attempts: u32,
    last_error: NotifyError,
) -> DeadLetterEntry {
    let payload = serde_json::to_string(message).unwrap_or_else(|e| {
        format!(
            "{{\"error\":\"failed to serialize notification\",\"detail\":\"{}\"}}",
            e
        )
    });

    DeadLetterEntry {
        notification_id: format!(
            "{:?}-{}-{}",
            message.topic,
            message.job_id.map(|id| id.0).unwrap_or_default(),
            message.at.timestamp_millis()
        ),
        sink_kind: format!("{:?}", sink.kind()),
        payload,
        last_error: last_error.to_string(),
        attempts,
        created_at: Utc::now().to_rfc3339(),
    }
}

fn deliver_with_retry(
    sink: &dyn NotificationSink,
    message: &NotificationMessage,
    config: &RetryConfig,
) -> Result<(), Box<DeadLetterEntry>> {
    let max_attempts = config.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match sink.send(message) {
            Ok(()) => return Ok(()),
            Err(err) => {
                if attempt >= max_attempts || !should_retry(&err) {
                    return Err(Box::new(build_dead_letter_entry(sink, message, attempt, err)));
                }

                let delay_ms = exponential_backoff_delay_ms(config, attempt);
                tracing::warn!(
                    sink = ?sink.kind(),
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms,
                    error = %err,
                    "retrying notification"
                );

                if delay_ms > 0 {
                    thread::sleep(Duration::from_millis(delay_ms));
                }
            }
        }
    }

    Err(Box::new(build_dead_letter_entry(
        sink,
        message,
        max_attempts,
        NotifyError::SinkFailed {
            message: "retry loop exhausted without terminal result".to_string(),
        },
    )))
}

pub trait NotificationSink: Send + Sync {
    fn kind(&self) -> NotificationSinkKind;
    fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError>;
}

/// Writes notifications to the tracing log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn kind(&self) -> NotificationSinkKind {
        NotificationSinkKind::Log
    }

    fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        tracing::info!(
            topic = ?message.topic,
            job_id = ?message.job_id.map(|id| id.0),
            recipients = message.recipients.len(),
            body = %message.body,
            "notification"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

impl TwilioCredentials {
    /// Resolve credentials through `lookup`; any missing value disables SMS.
    pub fn resolve<F>(config: &TwilioConfig, lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Some(Self {
            account_sid: get(&config.account_sid_env)?,
            auth_token: get(&config.auth_token_env)?,
            from_number: get(&config.from_number_env)?,
        })
    }
}

/// Twilio SMS sink. Texts each recipient separately.
#[derive(Debug, Clone)]
pub struct SmsSink {
    pub credentials: Option<TwilioCredentials>,
    pub timeout_secs: u64,
}

impl SmsSink {
    pub fn from_env(config: &TwilioConfig) -> Self {
        Self {
            credentials: TwilioCredentials::resolve(config, |name| std::env::var(name).ok()),
            timeout_secs: config.timeout_secs,
        }
    }

    pub fn messages_url(credentials: &TwilioCredentials) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            credentials.account_sid
        )
    }

    /// Form fields for a single outbound text.
    pub fn form_fields(
        credentials: &TwilioCredentials,
        to: &str,
        body: &str,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("To", to.to_string()),
            ("From", credentials.from_number.clone()),
            ("Body", body.to_string()),
        ]
    }

    fn send_one(
        &self,
        credentials: &TwilioCredentials,
        to: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let mut command = Command::new("curl");
        command
            .arg("-sS")
            .arg("--fail")
            .arg("-m")
            .arg(self.timeout_secs.to_string())
            .arg("-X")
            .arg("POST")
            .arg("-u")
            .arg(format!(
                "{}:{}",
                credentials.account_sid, credentials.auth_token
            ));
        for (field, value) in Self::form_fields(credentials, to, body) {
            command.arg("--data-urlencode").arg(format!("{field}={value}"));
        }
        let output = command
            .arg(Self::messages_url(credentials))
            .output()
            .map_err(|e| NotifyError::SinkFailed {
                message: format!("failed to execute curl for sms sink: {e}"),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(NotifyError::SinkFailed {
            message: format!(
                "twilio request failed (status {:?}): {}",
                output.status.code(),
                stderr.trim()
            ),
        })
    }
}

impl NotificationSink for SmsSink {
    fn kind(&self) -> NotificationSinkKind {
        NotificationSinkKind::Sms
    }

    /// Fails only when every recipient failed, so a retry never re-texts
    /// someone who already got the message.
    fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let Some(credentials) = &self.credentials else {
            return Err(NotifyError::SinkDisabled {
                sink: "sms".to_string(),
            });
        };

        let mut delivered = 0usize;
        let mut last_error = None;
        for phone in &message.recipients {
            match self.send_one(credentials, phone, &message.body) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!(phone = %phone, error = %err, "sms send failed");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if delivered == 0 => Err(err),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookSink {
    pub url: String,
    pub timeout_secs: u64,
}

impl WebhookSink {
    pub fn build_payload(message: &NotificationMessage) -> serde_json::Value {
        serde_json::json!({
            "topic": message.topic,
            "job_id": message.job_id,
            "recipients": &message.recipients,
            "body": &message.body,
            "at": message.at.to_rfc3339(),
        })
    }
}

impl NotificationSink for WebhookSink {
    fn kind(&self) -> NotificationSinkKind {
        NotificationSinkKind::Webhook
    }

    fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&Self::build_payload(message)).map_err(|e| {
            NotifyError::SinkFailed {
                message: format!("failed to encode webhook payload: {e}"),
            }
        })?;

        let output = Command::new("curl")
            .arg("-sS")
            .arg("--fail")
            .arg("-m")
            .arg(self.timeout_secs.to_string())
            .arg("-X")
            .arg("POST")
            .arg("-H")
            .arg("Content-Type: application/json")
            .arg("-d")
            .arg(payload)
            .arg(&self.url)
            .output()
            .map_err(|e| NotifyError::SinkFailed {
                message: format!("failed to execute curl for webhook sink: {e}"),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(NotifyError::SinkFailed {
            message: format!(
                "webhook sink request failed (status {:?}): {}",
                output.status.code(),
                stderr.trim()
            ),
        })
    }
}

pub struct NotificationDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
    retry_config: RetryConfig,
    dead_letters: Mutex<DeadLetterQueue>,
}

impl NotificationDispatcher {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self::with_retry_config(sinks, RetryConfig::default(), 1000)
    }

    pub fn with_retry_config(
        sinks: Vec<Box<dyn NotificationSink>>,
        retry_config: RetryConfig,
        dead_letter_max_size: usize,
    ) -> Self {
        Self {
            sinks,
            retry_config,
            dead_letters: Mutex::new(DeadLetterQueue::new(dead_letter_max_size)),
        }
    }

    pub fn from_config(config: &NotificationConfig) -> Self {
        let mut sinks: Vec<Box<dyn NotificationSink>> = Vec::new();
        for kind in &config.enabled_sinks {
            match NotificationSinkKind::from(*kind) {
                NotificationSinkKind::Log => sinks.push(Box::new(LogSink)),
                NotificationSinkKind::Sms => {
                    let sink = SmsSink::from_env(&config.twilio);
                    if sink.credentials.is_some() {
                        sinks.push(Box::new(sink));
                    } else {
                        tracing::warn!("sms sink enabled but twilio credentials are missing; skipping");
                    }
                }
                NotificationSinkKind::Webhook => match &config.webhook_url {
                    Some(url) => sinks.push(Box::new(WebhookSink {
                        url: url.clone(),
                        timeout_secs: config.twilio.timeout_secs,
                    })),
                    None => tracing::warn!("webhook sink enabled without webhook_url; skipping"),
                },
            }
        }
        Self::with_retry_config(
            sinks,
            RetryConfig::from(&config.retry),
            config.retry.dead_letter_max_size,
        )
    }

    pub fn sink_kinds(&self) -> Vec<NotificationSinkKind> {
        self.sinks.iter().map(|sink| sink.kind()).collect()
    }

    pub fn failed_notifications(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entries()
            .to_vec()
    }

    pub fn failed_notifications_len(&self) -> usize {
        self.dead_letters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn dispatch(
        &self,
        message: &NotificationMessage,
    ) -> Vec<(NotificationSinkKind, Result<(), NotifyError>)> {
        let mut out = Vec::new();
        for sink in &self.sinks {
            let result = match deliver_with_retry(sink.as_ref(), message, &self.retry_config) {
                Ok(()) => Ok(()),
                Err(dead_letter_entry) => {
                    let error_message = dead_letter_entry.last_error.clone();
                    tracing::error!(
                        sink = ?sink.kind(),
                        attempts = dead_letter_entry.attempts,
                        error = %error_message,
                        "notification moved to dead letter queue"
                    );
                    self.dead_letters
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(*dead_letter_entry);

                    Err(NotifyError::SinkFailed {
                        message: format!("delivery failed after retry attempts: {error_message}"),
                    })
                }
            };

            out.push((sink.kind(), result));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use dispatch_core::config::{NotificationConfig, SinkKind, TwilioConfig};
    use dispatch_core::types::JobId;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::{
        exponential_backoff_delay_ms, DeadLetterEntry, DeadLetterQueue, NotificationDispatcher,
        NotificationSink, RetryConfig, SmsSink, TwilioCredentials, WebhookSink,
    };
    use crate::error::NotifyError;
    use crate::types::{NotificationMessage, NotificationSinkKind, NotificationTopic};

    #[derive(Clone)]
    struct CaptureSink {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl NotificationSink for CaptureSink {
        fn kind(&self) -> NotificationSinkKind {
            NotificationSinkKind::Log
        }

        fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
            self.seen
                .lock()
                .expect("capture lock")
                .push(message.body.clone());
            Ok(())
        }
    }

    #[derive(Clone)]
    struct AlwaysFailSink;

    impl NotificationSink for AlwaysFailSink {
        fn kind(&self) -> NotificationSinkKind {
            NotificationSinkKind::Sms
        }

        fn send(&self, _message: &NotificationMessage) -> Result<(), NotifyError> {
            Err(NotifyError::SinkFailed {
                message: "fail".to_string(),
            })
        }
    }

    #[derive(Clone)]
    struct FlakySink {
        attempts: Arc<Mutex<u32>>,
        succeed_on: u32,
    }

    impl NotificationSink for FlakySink {
        fn kind(&self) -> NotificationSinkKind {
            NotificationSinkKind::Webhook
        }

        fn send(&self, _message: &NotificationMessage) -> Result<(), NotifyError> {
            let mut attempts = self.attempts.lock().expect("flaky sink attempts lock");
            *attempts += 1;
            if *attempts >= self.succeed_on {
                Ok(())
            } else {
                Err(NotifyError::SinkFailed {
                    message: "transient failure".to_string(),
                })
            }
        }
    }

    fn mk_message() -> NotificationMessage {
        NotificationMessage {
            at: Utc::now(),
            topic: NotificationTopic::JobPosted,
            job_id: Some(JobId(1)),
            recipients: vec!["+15550001111".to_string()],
            body: "New pickup: Bread @ Depot.".to_string(),
        }
    }

    fn no_delay(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 0,
            backoff_multiplier: 2,
        }
    }

    fn mk_dead_letter(id: &str) -> DeadLetterEntry {
        DeadLetterEntry {
            notification_id: id.to_string(),
            sink_kind: "Sms".to_string(),
            payload: "{}".to_string(),
            last_error: "boom".to_string(),
            attempts: 3,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn credentials() -> TwilioCredentials {
        TwilioCredentials {
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            from_number: "+15559990000".to_string(),
        }
    }

    #[test]
    fn dispatch_fans_out_and_returns_per_sink_results() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let dispatcher = NotificationDispatcher::with_retry_config(
            vec![
                Box::new(CaptureSink { seen: seen.clone() }),
                Box::new(AlwaysFailSink),
            ],
            no_delay(1),
            10,
        );

        let results = dispatcher.dispatch(&mk_message());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, NotificationSinkKind::Log);
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, NotificationSinkKind::Sms);
        assert!(results[1].1.is_err());

        let captured = seen.lock().expect("capture lock");
        assert_eq!(captured.as_slice(), ["New pickup: Bread @ Depot."]);
    }

    #[test]
    fn retry_succeeds_on_second_attempt() {
        let attempts = Arc::new(Mutex::new(0));
        let dispatcher = NotificationDispatcher::with_retry_config(
            vec![Box::new(FlakySink {
                attempts: attempts.clone(),
                succeed_on: 2,
            })],
            no_delay(3),
            10,
        );

        let results = dispatcher.dispatch(&mk_message());
        assert!(results[0].1.is_ok());
        assert_eq!(*attempts.lock().expect("attempts lock"), 2);
        assert_eq!(dispatcher.failed_notifications_len(), 0);
    }

    #[test]
    fn retry_exhausts_attempts_to_dead_letter() {
        let dispatcher =
            NotificationDispatcher::with_retry_config(vec![Box::new(AlwaysFailSink)], no_delay(3), 10);

        let results = dispatcher.dispatch(&mk_message());
        assert!(results[0].1.is_err());

        let failed = dispatcher.failed_notifications();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 3);
        assert_eq!(failed[0].sink_kind, "Sms");
    }

    #[test]
    fn disabled_sink_is_not_retried() {
        let dispatcher = NotificationDispatcher::with_retry_config(
            vec![Box::new(SmsSink {
                credentials: None,
                timeout_secs: 1,
            })],
            no_delay(5),
            10,
        );

        let results = dispatcher.dispatch(&mk_message());
        assert!(results[0].1.is_err());
        assert_eq!(dispatcher.failed_notifications()[0].attempts, 1);
    }

    #[test]
    fn dead_letter_queue_respects_max_size() {
        let mut queue = DeadLetterQueue::new(2);
        queue.push(mk_dead_letter("n1"));
        queue.push(mk_dead_letter("n2"));
        queue.push(mk_dead_letter("n3"));

        let ids: Vec<&str> = queue
            .entries()
            .iter()
            .map(|entry| entry.notification_id.as_str())
            .collect();
        assert_eq!(ids, vec!["n2", "n3"]);
    }

    #[test]
    fn zero_sized_dead_letter_queue_drops_everything() {
        let mut queue = DeadLetterQueue::new(0);
        queue.push(mk_dead_letter("n1"));
        assert!(queue.is_empty());
    }

    #[test]
    fn exponential_backoff_calculation() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2,
        };

        assert_eq!(exponential_backoff_delay_ms(&config, 1), 1000);
        assert_eq!(exponential_backoff_delay_ms(&config, 2), 2000);
        assert_eq!(exponential_backoff_delay_ms(&config, 3), 4000);
    }

    #[test]
    fn twilio_credentials_require_every_variable() {
        let config = TwilioConfig::default();
        let full: HashMap<&str, &str> = [
            ("TWILIO_ACCOUNT_SID", "AC123"),
            ("TWILIO_AUTH_TOKEN", "secret"),
            ("TWILIO_FROM_NUMBER", "+15559990000"),
        ]
        .into();

        let resolved =
            TwilioCredentials::resolve(&config, |name| full.get(name).map(|v| v.to_string()));
        assert_eq!(resolved, Some(credentials()));

        let partial = TwilioCredentials::resolve(&config, |name| {
            (name != "TWILIO_FROM_NUMBER")
                .then(|| full.get(name).map(|v| v.to_string()))
                .flatten()
        });
        assert_eq!(partial, None);
    }

    #[test]
    fn sms_sink_without_credentials_is_disabled() {
        let sink = SmsSink {
            credentials: None,
            timeout_secs: 5,
        };
        let err = sink.send(&mk_message()).expect_err("disabled");
        assert!(matches!(err, NotifyError::SinkDisabled { sink } if sink == "sms"));
    }

    #[test]
    fn sms_form_targets_account_and_recipient() {
        let creds = credentials();
        assert_eq!(
            SmsSink::messages_url(&creds),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );

        let fields = SmsSink::form_fields(&creds, "+15550001111", "hello");
        assert_eq!(
            fields,
            vec![
                ("To", "+15550001111".to_string()),
                ("From", "+15559990000".to_string()),
                ("Body", "hello".to_string()),
            ]
        );
    }

    #[test]
    fn webhook_payload_carries_topic_and_recipients() {
        let payload = WebhookSink::build_payload(&mk_message());
        assert_eq!(payload["topic"], "job_posted");
        assert_eq!(payload["job_id"], 1);
        assert_eq!(payload["recipients"][0], "+15550001111");
    }

    #[test]
    fn from_config_builds_enabled_sinks() {
        let config = NotificationConfig {
            enabled_sinks: vec![SinkKind::Log, SinkKind::Webhook],
            webhook_url: Some("https://example.test/hook".to_string()),
            ..NotificationConfig::default()
        };
        let dispatcher = NotificationDispatcher::from_config(&config);
        assert_eq!(
            dispatcher.sink_kinds(),
            vec![NotificationSinkKind::Log, NotificationSinkKind::Webhook]
        );
    }

    #[test]
    fn from_config_skips_sms_without_credentials() {
        let config = NotificationConfig {
            enabled_sinks: vec![SinkKind::Log, SinkKind::Sms],
            twilio: TwilioConfig {
                account_sid_env: "DISPATCH_TEST_UNSET_SID".to_string(),
                auth_token_env: "DISPATCH_TEST_UNSET_TOKEN".to_string(),
                from_number_env: "DISPATCH_TEST_UNSET_FROM".to_string(),
                timeout_secs: 1,
            },
            ..NotificationConfig::default()
        };
        let dispatcher = NotificationDispatcher::from_config(&config);
        assert_eq!(dispatcher.sink_kinds(), vec![NotificationSinkKind::Log]);
    }

    #[test]
    fn from_config_skips_webhook_without_url() {
        let config = NotificationConfig {
            enabled_sinks: vec![SinkKind::Webhook],
            ..NotificationConfig::default()
        };
        let dispatcher = NotificationDispatcher::from_config(&config);
        assert!(dispatcher.sink_kinds().is_empty());
    }
}
