//! # Notifier
//!
//! Delivers the outcome of every run to whoever is on call. The monitor only
//! relies on the contract "accepts a notification, says whether it went
//! out": a failed delivery is logged and recorded, never allowed to change
//! the report.
//!
//! Two notification shapes exist and are never conflated:
//! - [`Notification::Report`]: the check completed; systems may or may not
//!   be healthy. Healthy runs still send an "all clear" so silence always
//!   means the monitor itself is down.
//! - [`Notification::MonitorFailed`]: the check could not complete.

use crate::{
    report::{HealthReport, HealthStatus},
    Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Write as _;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of handing a notification to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl NotifyOutcome {
    pub fn delivered(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// What is being reported.
#[derive(Debug, Clone)]
pub enum Notification {
    Report(HealthReport),
    MonitorFailed {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        error: String,
    },
}

/// Delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// # Report Message
///
/// Human-facing rendering of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMessage {
    pub kind: String,
    pub subject: String,
    pub priority: Priority,
    pub text: String,
}

impl ReportMessage {
    pub fn render(notification: &Notification) -> Self {
        match notification {
            Notification::Report(report) => Self::for_report(report),
            Notification::MonitorFailed { run_id, timestamp, error } => Self {
                kind: "monitor_failed".to_string(),
                subject: "❌ Health check could not complete".to_string(),
                priority: Priority::High,
                text: format!(
                    "The scheduled health check {} started at {} did not complete.\n\
                     Provider status is unknown for this run.\n\nError: {}\n",
                    run_id,
                    timestamp.to_rfc3339(),
                    error
                ),
            },
        }
    }

    fn for_report(report: &HealthReport) -> Self {
        let (subject, priority) = match report.overall_status {
            HealthStatus::Healthy => ("✅ All systems healthy", Priority::Low),
            HealthStatus::AutoFixed => ("🔧 Issues detected and auto-fixed", Priority::Normal),
            HealthStatus::Warning => ("⚠️ Health check warnings", Priority::Normal),
            HealthStatus::Critical => ("🚨 Critical: manual attention required", Priority::High),
        };

        let mut text = String::new();
        let _ = writeln!(text, "Run {} at {}", report.run_id, report.timestamp.to_rfc3339());
        let _ = writeln!(text, "Overall status: {}", report.overall_status);

        if report.is_all_clear() {
            let _ = writeln!(
                text,
                "\nAll clear: {} providers and {} subsystem checks healthy.",
                report.providers.len(),
                report.subsystems.len()
            );
        }

        let fixed = report.auto_fixed();
        if !fixed.is_empty() {
            let _ = writeln!(text, "\nAuto-fixed:");
            for outcome in fixed {
                if let Some(remediation) = &outcome.remediation {
                    let _ = writeln!(text, "  - {} via {}", outcome.provider, remediation.strategy);
                }
            }
        }

        if !report.issues_requiring_attention.is_empty() {
            let _ = writeln!(text, "\nRequires attention:");
            for issue in &report.issues_requiring_attention {
                let _ = write!(text, "  - [{}] {}: {}", issue.severity, issue.source, issue.description);
                if !issue.attempted_fixes.is_empty() {
                    let fixes: Vec<String> = issue.attempted_fixes.iter().map(ToString::to_string).collect();
                    let _ = write!(text, " (tried: {})", fixes.join(", "));
                }
                text.push('\n');
            }
        }

        if !report.timed_out.is_empty() {
            let _ = writeln!(text, "\nDid not finish in time: {}", report.timed_out.join(", "));
        }

        Self {
            kind: "report".to_string(),
            subject: subject.to_string(),
            priority,
            text,
        }
    }
}

/// # Notifier
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> NotifyOutcome;
}

/// Logs notifications instead of delivering them. Used when no sink is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> NotifyOutcome {
        let message = ReportMessage::render(notification);
        match message.priority {
            Priority::High => warn!(subject = %message.subject, "📣 {}", message.text),
            _ => info!(subject = %message.subject, "📣 {}", message.text),
        }
        NotifyOutcome::delivered(None)
    }
}

/// # Webhook Notifier
///
/// POSTs the rendered message (plus the structured report) as JSON to an
/// email/message relay.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    token: Option<String>,
}

impl WebhookNotifier {
    pub fn new(client: Client, url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url)?;
        Ok(Self { client, url, token })
    }

    fn payload(notification: &Notification) -> Value {
        let message = ReportMessage::render(notification);
        let mut payload = json!({
            "kind": message.kind,
            "subject": message.subject,
            "priority": message.priority,
            "text": message.text,
        });
        if let Notification::Report(report) = notification {
            payload["report"] = serde_json::to_value(report).unwrap_or(Value::Null);
        }
        payload
    }

    async fn deliver(&self, payload: &Value) -> std::result::Result<Option<String>, String> {
        let mut request = self.client.post(&self.url).json(payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(format!("notifier returned HTTP {}", status.as_u16()));
        }

        let message_id = ["id", "message_id", "messageId"]
            .iter()
            .find_map(|field| body.get(field))
            .and_then(|value| match value {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        Ok(message_id)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> NotifyOutcome {
        let payload = Self::payload(notification);
        match self.deliver(&payload).await {
            Ok(message_id) => {
                info!(message_id = ?message_id, "📨 Notification delivered");
                NotifyOutcome::delivered(message_id)
            }
            Err(err) => {
                error!(error = %err, "📭 Notification delivery failed");
                NotifyOutcome::failed(err)
            }
        }
    }
}
