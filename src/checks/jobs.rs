//! Detection of transcription jobs stuck in a non-terminal state.

use super::SubsystemCheck;
use crate::{
    core::clock::Clock,
    report::{HealthStatus, SubsystemReport},
    Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Stuck-job count at which the check turns critical.
pub const CRITICAL_STUCK_JOBS: usize = 5;

/// Job states that are expected to make progress.
const ACTIVE_STATES: &[&str] = &["queued", "processing"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

/// Source of currently non-finished jobs.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn active_jobs(&self) -> Result<Vec<JobSnapshot>>;
}

/// Used when no job feed is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJobSource;

#[async_trait]
impl JobSource for NoJobSource {
    async fn active_jobs(&self) -> Result<Vec<JobSnapshot>> {
        Ok(Vec::new())
    }
}

/// Reads a JSON array of [`JobSnapshot`] from a URL.
#[derive(Debug, Clone)]
pub struct HttpJobSource {
    client: Client,
    url: String,
}

impl HttpJobSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn active_jobs(&self) -> Result<Vec<JobSnapshot>> {
        let jobs = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<JobSnapshot>>()
            .await?;
        Ok(jobs)
    }
}

pub struct StuckJobCheck {
    source: Box<dyn JobSource>,
    clock: Arc<dyn Clock>,
    threshold: ChronoDuration,
}

impl StuckJobCheck {
    pub fn new(source: Box<dyn JobSource>, clock: Arc<dyn Clock>, threshold: ChronoDuration) -> Self {
        Self { source, clock, threshold }
    }
}

#[async_trait]
impl SubsystemCheck for StuckJobCheck {
    fn name(&self) -> &str {
        "stuck_jobs"
    }

    async fn run(&self) -> SubsystemReport {
        let mut report = SubsystemReport::healthy(self.name());

        let jobs = match self.source.active_jobs().await {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(error = %err, "🧾 Job feed unavailable");
                report.flag(HealthStatus::Warning, format!("job status unavailable: {}", err));
                return report;
            }
        };

        let now = self.clock.now();
        let stuck: Vec<&JobSnapshot> = jobs
            .iter()
            .filter(|job| ACTIVE_STATES.contains(&job.status.to_lowercase().as_str()))
            .filter(|job| now - job.updated_at > self.threshold)
            .collect();

        let severity = match stuck.len() {
            0 => None,
            n if n >= CRITICAL_STUCK_JOBS => Some(HealthStatus::Critical),
            _ => Some(HealthStatus::Warning),
        };
        if let Some(severity) = severity {
            let ids: Vec<&str> = stuck.iter().take(10).map(|job| job.id.as_str()).collect();
            report.flag(
                severity,
                format!(
                    "{} job(s) unchanged for more than {} minutes: {}",
                    stuck.len(),
                    self.threshold.num_minutes(),
                    ids.join(", ")
                ),
            );
        }

        report.add_detail("active_jobs", jobs.len());
        report.add_detail("stuck_jobs", stuck.len());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use chrono::TimeZone;

    struct FixedJobs(Vec<JobSnapshot>);

    #[async_trait]
    impl JobSource for FixedJobs {
        async fn active_jobs(&self) -> Result<Vec<JobSnapshot>> {
            Ok(self.0.clone())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn job(id: &str, status: &str, minutes_ago: i64) -> JobSnapshot {
        JobSnapshot {
            id: id.to_string(),
            status: status.to_string(),
            updated_at: now() - ChronoDuration::minutes(minutes_ago),
        }
    }

    fn check(jobs: Vec<JobSnapshot>) -> StuckJobCheck {
        StuckJobCheck::new(
            Box::new(FixedJobs(jobs)),
            Arc::new(ManualClock::new(now())),
            ChronoDuration::minutes(30),
        )
    }

    #[tokio::test]
    async fn test_fresh_and_finished_jobs_are_fine() {
        let report = check(vec![job("a", "processing", 5), job("b", "completed", 600)]).run().await;
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_few_stuck_jobs_warn() {
        let report = check(vec![job("a", "Processing", 45), job("b", "queued", 31)]).run().await;
        assert_eq!(report.status, HealthStatus::Warning);
        assert!(report.issues[0].starts_with("2 job(s)"));
    }

    #[tokio::test]
    async fn test_many_stuck_jobs_critical() {
        let jobs = (0..CRITICAL_STUCK_JOBS).map(|i| job(&format!("j{}", i), "processing", 120)).collect();
        let report = check(jobs).run().await;
        assert_eq!(report.status, HealthStatus::Critical);
    }
}
