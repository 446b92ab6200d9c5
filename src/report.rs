//! # Health Reports
//!
//! Data produced by one aggregation run, the status reduction rule and the
//! bounded history of past runs.

use crate::{
    backup::BackupTestSummary,
    notifier::NotifyOutcome,
    probe::ProbeResult,
    remediation::{FixStrategy, RemediationAttempt},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
};
use uuid::Uuid;

/// # Health Status
///
/// Status of a single bucket (a provider or a subsystem) and of a whole run.
/// Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    AutoFixed,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::AutoFixed => "auto_fixed",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }

    /// Whether a bucket in this state needs a human.
    pub fn needs_attention(&self) -> bool {
        matches!(self, HealthStatus::Warning | HealthStatus::Critical)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduce bucket statuses to an overall status.
///
/// critical beats warning beats auto_fixed beats healthy, so a successful
/// auto-fix can never hide a problem found elsewhere in the same run. No
/// buckets at all reduces to healthy.
pub fn reduce_status<I>(buckets: I) -> HealthStatus
where
    I: IntoIterator<Item = HealthStatus>,
{
    buckets.into_iter().max().unwrap_or(HealthStatus::Healthy)
}

/// # Issue
///
/// One unresolved problem that a human should look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Provider or subsystem name
    pub source: String,
    pub severity: HealthStatus,
    pub description: String,
    pub attempted_fixes: Vec<FixStrategy>,
}

/// # Provider Outcome
///
/// Everything learned about one provider during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub provider: String,
    pub status: HealthStatus,
    pub probe: ProbeResult,
    pub remediation: Option<RemediationAttempt>,
    pub backups: Option<BackupTestSummary>,
    pub active_index: usize,
    pub pool_size: usize,
    pub consecutive_errors: u32,
    pub daily_limit: Option<u64>,
    pub monthly_limit: Option<u64>,
}

impl ProviderOutcome {
    /// The issue this outcome raises, if it is not resolved.
    pub fn issue(&self) -> Option<Issue> {
        if !self.status.needs_attention() {
            return None;
        }

        let mut description = self.probe.describe();
        if let Some(remediation) = &self.remediation {
            if let Some(final_probe) = &remediation.final_probe {
                description.push_str(&format!("; after {}: {}", remediation.strategy, final_probe.describe()));
            }
        }
        if let Some(backups) = &self.backups {
            description.push_str(&format!(
                "; backups working {}/{}",
                backups.working_count,
                backups.tested()
            ));
        }

        Some(Issue {
            source: self.provider.clone(),
            severity: self.status,
            description,
            attempted_fixes: self
                .remediation
                .as_ref()
                .map(|r| r.attempted_strategies.clone())
                .unwrap_or_default(),
        })
    }
}

/// # Subsystem Report
///
/// Result of one non-provider health dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsystemReport {
    pub name: String,
    pub status: HealthStatus,
    pub issues: Vec<String>,
    /// Severity of each entry in `issues`, same order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issue_severities: Vec<HealthStatus>,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl SubsystemReport {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            issues: Vec::new(),
            issue_severities: Vec::new(),
            details: BTreeMap::new(),
        }
    }

    /// Record a finding and raise the status to at least `severity`.
    pub fn flag(&mut self, severity: HealthStatus, issue: impl Into<String>) {
        self.status = self.status.max(severity);
        self.issues.push(issue.into());
        self.issue_severities.push(severity);
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn add_detail(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.details.insert(key.into(), value.into());
    }

    pub fn to_issues(&self) -> Vec<Issue> {
        if !self.status.needs_attention() {
            return Vec::new();
        }
        if self.issues.is_empty() {
            return vec![Issue {
                source: self.name.clone(),
                severity: self.status,
                description: format!("{} check reported {}", self.name, self.status),
                attempted_fixes: Vec::new(),
            }];
        }
        self.issues
            .iter()
            .enumerate()
            .map(|(i, description)| Issue {
                source: self.name.clone(),
                severity: self.issue_severities.get(i).copied().unwrap_or(self.status),
                description: description.clone(),
                attempted_fixes: Vec::new(),
            })
            .collect()
    }
}

/// # Health Report
///
/// Output of one aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub overall_status: HealthStatus,
    pub providers: BTreeMap<String, ProviderOutcome>,
    pub subsystems: BTreeMap<String, SubsystemReport>,
    pub issues_requiring_attention: Vec<Issue>,
    pub timed_out: Vec<String>,
}

impl HealthReport {
    /// Assemble a report, computing the overall status and the issue list.
    pub fn assemble(
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        duration_ms: u64,
        providers: BTreeMap<String, ProviderOutcome>,
        subsystems: BTreeMap<String, SubsystemReport>,
        timed_out: Vec<String>,
    ) -> Self {
        let overall_status = reduce_status(
            providers
                .values()
                .map(|p| p.status)
                .chain(subsystems.values().map(|s| s.status)),
        );

        let mut issues: Vec<Issue> = providers.values().filter_map(ProviderOutcome::issue).collect();
        issues.extend(subsystems.values().flat_map(SubsystemReport::to_issues));
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));

        Self {
            run_id,
            timestamp,
            duration_ms,
            overall_status,
            providers,
            subsystems,
            issues_requiring_attention: issues,
            timed_out,
        }
    }

    pub fn is_all_clear(&self) -> bool {
        self.overall_status == HealthStatus::Healthy && self.issues_requiring_attention.is_empty()
    }

    /// Providers whose remediation succeeded this run.
    pub fn auto_fixed(&self) -> Vec<&ProviderOutcome> {
        self.providers
            .values()
            .filter(|p| p.remediation.as_ref().is_some_and(|r| r.succeeded))
            .collect()
    }

    pub fn summary(&self) -> ReportSummary {
        let count = |status: HealthStatus| {
            self.providers.values().filter(|p| p.status == status).count()
                + self.subsystems.values().filter(|s| s.status == status).count()
        };

        ReportSummary {
            run_id: self.run_id,
            timestamp: self.timestamp,
            overall_status: self.overall_status,
            duration_ms: self.duration_ms,
            healthy: count(HealthStatus::Healthy),
            auto_fixed: count(HealthStatus::AutoFixed),
            warning: count(HealthStatus::Warning),
            critical: count(HealthStatus::Critical),
            issues: self.issues_requiring_attention.len(),
        }
    }
}

/// Compact view of a report for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub overall_status: HealthStatus,
    pub duration_ms: u64,
    pub healthy: usize,
    pub auto_fixed: usize,
    pub warning: usize,
    pub critical: usize,
    pub issues: usize,
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
    Startup,
}

/// # Run Record
///
/// One entry of the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: Option<ReportSummary>,
    pub failure: Option<String>,
    pub notification: NotifyOutcome,
}

/// # Run History
///
/// Ring buffer of the most recent runs; the oldest entry is evicted once
/// `capacity` is reached.
#[derive(Debug, Clone)]
pub struct RunHistory {
    records: VecDeque<RunRecord>,
    capacity: usize,
    last_report: Option<HealthReport>,
}

impl RunHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            last_report: None,
        }
    }

    pub fn push(&mut self, record: RunRecord, report: Option<HealthReport>) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        if report.is_some() {
            self.last_report = report;
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&RunRecord> {
        self.records.back()
    }

    /// Most recent completed report.
    pub fn last_report(&self) -> Option<&HealthReport> {
        self.last_report.as_ref()
    }

    /// Up to `n` most recent records, newest first.
    pub fn recent(&self, n: usize) -> Vec<RunRecord> {
        self.records.iter().rev().take(n).cloned().collect()
    }
}
