//! # Composite Health Aggregator
//!
//! One aggregation run: every provider and every subsystem check runs as
//! its own tokio task, the results are collected until all finish or the
//! run ceiling passes, and everything is reduced into a [`HealthReport`].
//!
//! Per provider the pipeline is sequential, so no two tasks ever touch the
//! same credential pool:
//!
//! ```text
//! probe ─► classify ─► (unhealthy) remediate ─► (still down, quota) test backups
//! ```
//!
//! A crashed task never takes the report down with it. A provider whose
//! task panicked is reported critical; one cut off by the run ceiling is
//! reported as a network timeout and listed in `timed_out`.

use crate::{
    backup::{BackupTestSummary, BackupTester},
    checks::SubsystemCheck,
    core::clock::Clock,
    credentials::{CredentialPool, ProviderRegistry},
    error::MonitorError,
    probe::{ErrorKind, ProbeResult, Prober},
    remediation::{RemediationAttempt, RemediationConfig, RemediationEngine},
    report::{HealthReport, HealthStatus, ProviderOutcome, SubsystemReport},
    Result,
};
use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::{AbortHandle, JoinError};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Default ceiling for one whole run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Target {
    Provider(usize),
    Subsystem(usize),
}

enum TaskOutput {
    Provider(ProviderOutcome),
    Subsystem(SubsystemReport),
}

type Joined = BoxFuture<'static, (Target, std::result::Result<TaskOutput, JoinError>)>;

pub struct HealthAggregator {
    registry: Arc<ProviderRegistry>,
    prober: Arc<dyn Prober>,
    remediation: Arc<RemediationEngine>,
    backups: Arc<BackupTester>,
    checks: Vec<Arc<dyn SubsystemCheck>>,
    clock: Arc<dyn Clock>,
    run_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(registry: Arc<ProviderRegistry>, prober: Arc<dyn Prober>, clock: Arc<dyn Clock>) -> Self {
        Self {
            remediation: Arc::new(RemediationEngine::new(prober.clone(), RemediationConfig::default())),
            backups: Arc::new(BackupTester::new(prober.clone())),
            registry,
            prober,
            checks: Vec::new(),
            clock,
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    pub fn with_remediation(mut self, config: RemediationConfig) -> Self {
        self.remediation = Arc::new(RemediationEngine::new(self.prober.clone(), config));
        self
    }

    pub fn with_check(mut self, check: Arc<dyn SubsystemCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_checks<I>(mut self, checks: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn SubsystemCheck>>,
    {
        self.checks.extend(checks);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Run every provider and subsystem check once and reduce the results.
    ///
    /// Fails only when there is nothing to monitor at all.
    pub async fn run_full_check(&self) -> Result<HealthReport> {
        let pools = self.registry.pools();
        if pools.is_empty() && self.checks.is_empty() {
            return Err(MonitorError::Config(
                "nothing to monitor: no provider has a credential and no subsystem check is configured".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        let timestamp = self.clock.now();
        let started = Instant::now();
        info!(
            %run_id,
            providers = pools.len(),
            checks = self.checks.len(),
            "🩺 Starting health check run"
        );

        let mut pending: HashMap<Target, AbortHandle> = HashMap::new();
        let mut running: FuturesUnordered<Joined> = FuturesUnordered::new();

        for (index, pool) in pools.iter().enumerate() {
            let handle = tokio::spawn(check_provider(
                pool.clone(),
                self.prober.clone(),
                self.remediation.clone(),
                self.backups.clone(),
            ));
            let target = Target::Provider(index);
            pending.insert(target, handle.abort_handle());
            running.push(async move { (target, handle.await.map(TaskOutput::Provider)) }.boxed());
        }
        for (index, check) in self.checks.iter().enumerate() {
            let check = check.clone();
            let handle = tokio::spawn(async move { check.run().await });
            let target = Target::Subsystem(index);
            pending.insert(target, handle.abort_handle());
            running.push(async move { (target, handle.await.map(TaskOutput::Subsystem)) }.boxed());
        }

        let mut providers = BTreeMap::new();
        let mut subsystems = BTreeMap::new();

        let deadline = tokio::time::sleep(self.run_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = running.next() => {
                    let Some((target, joined)) = next else { break };
                    pending.remove(&target);
                    match joined {
                        Ok(TaskOutput::Provider(outcome)) => {
                            providers.insert(outcome.provider.clone(), outcome);
                        }
                        Ok(TaskOutput::Subsystem(report)) => {
                            subsystems.insert(report.name.clone(), report);
                        }
                        Err(join_error) => self.record_crash(target, join_error, &mut providers, &mut subsystems),
                    }
                }
                _ = &mut deadline => {
                    warn!(%run_id, remaining = pending.len(), "⏰ Run ceiling reached, abandoning unfinished checks");
                    break;
                }
            }
        }

        let mut timed_out = Vec::new();
        for (target, abort) in pending {
            abort.abort();
            match target {
                Target::Provider(index) => {
                    let pool = &pools[index];
                    let probe = ProbeResult::transport_failure(
                        format!("check did not finish within {}s", self.run_timeout.as_secs()),
                        self.run_timeout.as_millis() as u64,
                    );
                    timed_out.push(pool.name().to_string());
                    providers.insert(
                        pool.name().to_string(),
                        outcome(pool, HealthStatus::Critical, probe, None, None),
                    );
                }
                Target::Subsystem(index) => {
                    let name = self.checks[index].name().to_string();
                    let mut report = SubsystemReport::healthy(name.clone());
                    report.flag(
                        HealthStatus::Warning,
                        format!("{} check did not finish within {}s", name, self.run_timeout.as_secs()),
                    );
                    timed_out.push(name.clone());
                    subsystems.insert(name, report);
                }
            }
        }
        timed_out.sort();

        let duration_ms = started.elapsed().as_millis() as u64;
        let report = HealthReport::assemble(run_id, timestamp, duration_ms, providers, subsystems, timed_out);

        info!(
            %run_id,
            status = %report.overall_status,
            issues = report.issues_requiring_attention.len(),
            duration_ms,
            "📋 Health check run complete"
        );
        Ok(report)
    }

    fn record_crash(
        &self,
        target: Target,
        join_error: JoinError,
        providers: &mut BTreeMap<String, ProviderOutcome>,
        subsystems: &mut BTreeMap<String, SubsystemReport>,
    ) {
        let reason = if join_error.is_panic() {
            "check panicked".to_string()
        } else {
            format!("check task failed: {}", join_error)
        };

        match target {
            Target::Provider(index) => {
                let pool = &self.registry.pools()[index];
                error!(provider = %pool.name(), %reason, "💥 Provider check crashed");
                let probe = ProbeResult {
                    healthy: false,
                    http_status: None,
                    latency_ms: 0,
                    // No answer came back, same as a probe that never returned.
                    error_kind: ErrorKind::Network,
                    raw_message: Some(reason),
                };
                providers.insert(
                    pool.name().to_string(),
                    outcome(pool, HealthStatus::Critical, probe, None, None),
                );
            }
            Target::Subsystem(index) => {
                let name = self.checks[index].name().to_string();
                error!(check = %name, %reason, "💥 Subsystem check crashed");
                let mut report = SubsystemReport::healthy(name.clone());
                report.flag(HealthStatus::Critical, format!("{} {}", name, reason));
                subsystems.insert(name, report);
            }
        }
    }
}

/// Full pipeline for one provider.
async fn check_provider(
    pool: Arc<CredentialPool>,
    prober: Arc<dyn Prober>,
    remediation: Arc<RemediationEngine>,
    backups: Arc<BackupTester>,
) -> ProviderOutcome {
    let probe = prober.probe(pool.spec(), pool.active()).await;

    if probe.healthy {
        pool.record_success();
        info!(provider = %pool.name(), latency_ms = probe.latency_ms, "✅ Provider healthy");
        return outcome(&pool, HealthStatus::Healthy, probe, None, None);
    }

    let errors = pool.record_failure();
    warn!(
        provider = %pool.name(),
        kind = %probe.error_kind,
        status = ?probe.http_status,
        consecutive_errors = errors,
        "⚠️ Provider probe failed"
    );

    let attempt = remediation.attempt_fix(&pool, &probe).await;
    if attempt.as_ref().is_some_and(|a| a.succeeded) {
        return outcome(&pool, HealthStatus::AutoFixed, probe, attempt, None);
    }

    let summary = if probe.error_kind == ErrorKind::Quota && pool.len() > 1 {
        Some(backups.test_backups(&pool).await)
    } else {
        None
    };

    let status = if summary.as_ref().is_some_and(BackupTestSummary::has_working_backup) {
        HealthStatus::Warning
    } else {
        HealthStatus::Critical
    };
    outcome(&pool, status, probe, attempt, summary)
}

fn outcome(
    pool: &CredentialPool,
    status: HealthStatus,
    probe: ProbeResult,
    remediation: Option<RemediationAttempt>,
    backups: Option<BackupTestSummary>,
) -> ProviderOutcome {
    let spec = pool.spec();
    ProviderOutcome {
        provider: pool.name().to_string(),
        status,
        probe,
        remediation,
        backups,
        active_index: pool.active_index(),
        pool_size: pool.len(),
        consecutive_errors: pool.consecutive_errors(),
        daily_limit: spec.daily_limit,
        monthly_limit: spec.monthly_limit,
    }
}
