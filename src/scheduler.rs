//! # Scheduler
//!
//! [`MonitorService`] owns the run loop: it ticks on a fixed interval,
//! compares the wall clock against a list of daily trigger times and starts
//! an aggregation run when one is due. Manual and external-cron triggers go
//! through the same entry point, so every path shares one guarantee:
//!
//! - at most one run is in flight; a trigger during a run is rejected and
//!   logged, never queued;
//! - a run starting within the minimum spacing of the previous start is
//!   rejected as a duplicate.
//!
//! ## Key Concepts:
//!
//! - **Slots**: each trigger time fires at most once per day. After a slot
//!   is consumed the next one is the soonest trigger strictly after now.
//! - **Fixed offset**: trigger times are read at one configured UTC offset
//!   so the schedule does not shift with the host's timezone.
//! - **Failure path**: an aggregator fault or panic still completes the run
//!   and sends a distinct "monitor failed" notification.

use crate::{
    aggregator::HealthAggregator,
    core::clock::Clock,
    error::MonitorError,
    notifier::{Notification, Notifier, NotifyOutcome},
    report::{HealthReport, ReportSummary, RunHistory, RunRecord, RunTrigger},
    Result,
};
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Default daily trigger times.
pub const DEFAULT_SCHEDULE: &str = "00:00,00:20,00:50,07:00,10:00,12:00,15:00,22:00";

/// A daily trigger time (hour, minute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TriggerTime {
    hour: u32,
    minute: u32,
}

impl TriggerTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    fn as_naive(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or_default()
    }
}

impl FromStr for TriggerTime {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MonitorError::Config(format!("invalid trigger time '{}', expected HH:MM", s));
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl fmt::Display for TriggerTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// # Schedule
///
/// Sorted, de-duplicated trigger times at a fixed UTC offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    triggers: Vec<TriggerTime>,
    offset: FixedOffset,
}

impl Schedule {
    pub fn new(mut triggers: Vec<TriggerTime>, offset: FixedOffset) -> Result<Self> {
        if triggers.is_empty() {
            return Err(MonitorError::Config("schedule has no trigger times".to_string()));
        }
        triggers.sort();
        triggers.dedup();
        Ok(Self { triggers, offset })
    }

    /// Parse a comma-separated `HH:MM` list and a `±HH:MM` offset.
    pub fn parse(triggers: &str, offset: &str) -> Result<Self> {
        let triggers = triggers
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<TriggerTime>>>()?;
        Self::new(triggers, parse_offset(offset)?)
    }

    pub fn triggers(&self) -> &[TriggerTime] {
        &self.triggers
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Soonest trigger strictly after `now`, wrapping to the first trigger
    /// of the next day when none remain today.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.offset);
        let today = local.date_naive();

        let candidate = self
            .triggers
            .iter()
            .map(|t| today.and_time(t.as_naive()))
            .find(|naive| *naive > local.naive_local())
            .or_else(|| {
                let tomorrow = today.succ_opt()?;
                self.triggers.first().map(|t| tomorrow.and_time(t.as_naive()))
            });

        candidate
            .and_then(|naive| self.offset.from_local_datetime(&naive).single())
            .map(|local| local.with_timezone(&Utc))
            // Unreachable for a non-empty schedule; keep the loop alive a day later.
            .unwrap_or_else(|| now + ChronoDuration::days(1))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let times: Vec<String> = self.triggers.iter().map(ToString::to_string).collect();
        write!(f, "{} (UTC{})", times.join(","), self.offset)
    }
}

/// Parse `+HH:MM`, `-HH:MM`, `Z` or `UTC`.
pub fn parse_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    let invalid = || MonitorError::Config(format!("invalid UTC offset '{}', expected ±HH:MM", s));
    if s.is_empty() || s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }
    let (sign, rest) = match s.as_bytes()[0] {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Why a trigger did not start a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RunRejection {
    AlreadyRunning,
    TooSoon { last_run_started: DateTime<Utc> },
}

impl fmt::Display for RunRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunRejection::AlreadyRunning => f.write_str("a health check is already in progress"),
            RunRejection::TooSoon { last_run_started } => write!(
                f,
                "a health check already started at {}",
                last_run_started.to_rfc3339()
            ),
        }
    }
}

/// The most recent refused trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedTrigger {
    pub trigger: RunTrigger,
    pub at: DateTime<Utc>,
    pub rejection: RunRejection,
}

/// # Scheduler Settings
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// How often the wall clock is compared with the schedule
    pub tick_interval: Duration,
    /// Minimum time between two run starts
    pub min_run_spacing: Duration,
    /// Run history ring buffer size
    pub history_capacity: usize,
    /// Run once as soon as the service starts
    pub run_on_startup: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            min_run_spacing: Duration::from_secs(60),
            history_capacity: 100,
            run_on_startup: false,
        }
    }
}

/// # Scheduler State
///
/// Snapshot returned by [`MonitorService::get_status`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    /// Whether the tick loop is active
    pub is_running: bool,
    pub last_run_time: Option<DateTime<Utc>>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub currently_checking: bool,
    pub last_run_started: Option<DateTime<Utc>>,
    pub last_rejection: Option<RejectedTrigger>,
}

/// Everything the status endpoint returns.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub scheduler: SchedulerState,
    pub schedule: Vec<String>,
    pub utc_offset: String,
    pub last_report: Option<ReportSummary>,
    pub recent_runs: Vec<RunRecord>,
}

/// Clears the in-flight flag however the run ends.
struct RunGuard(Arc<Inner>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.checking.store(false, Ordering::SeqCst);
    }
}

struct Inner {
    aggregator: Arc<HealthAggregator>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    schedule: Schedule,
    settings: SchedulerSettings,
    checking: AtomicBool,
    state: RwLock<SchedulerState>,
    history: RwLock<RunHistory>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// # Monitor Service
///
/// Cheap to clone; all clones share one scheduler.
#[derive(Clone)]
pub struct MonitorService {
    inner: Arc<Inner>,
}

impl MonitorService {
    pub fn new(
        aggregator: Arc<HealthAggregator>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        schedule: Schedule,
        settings: SchedulerSettings,
    ) -> Self {
        let state = SchedulerState {
            next_run_time: Some(schedule.next_after(clock.now())),
            ..SchedulerState::default()
        };
        let history = RunHistory::new(settings.history_capacity);
        Self {
            inner: Arc::new(Inner {
                aggregator,
                notifier,
                clock,
                schedule,
                settings,
                checking: AtomicBool::new(false),
                state: RwLock::new(state),
                history: RwLock::new(history),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.inner.schedule
    }

    /// # Start the tick loop
    ///
    /// Returns `false` when the loop is already running.
    pub async fn start(&self) -> bool {
        let mut ticker = self.inner.ticker.lock().await;
        if ticker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!("⚠️ Monitor scheduler already started");
            return false;
        }

        let now = self.inner.clock.now();
        {
            let mut state = self.inner.state.write().await;
            state.is_running = true;
            state.next_run_time = Some(self.inner.schedule.next_after(now));
        }

        let weak = Arc::downgrade(&self.inner);
        let tick = self.inner.settings.tick_interval;
        let run_on_startup = self.inner.settings.run_on_startup;
        *ticker = Some(tokio::spawn(tick_loop(weak, tick, run_on_startup)));

        info!(
            schedule = %self.inner.schedule,
            tick_secs = tick.as_secs(),
            run_on_startup,
            "⏱️ Monitor scheduler started"
        );
        true
    }

    /// Stop the tick loop. A run already in flight keeps its own task and is
    /// left to finish.
    pub async fn stop(&self) {
        if let Some(handle) = self.inner.ticker.lock().await.take() {
            handle.abort();
        }
        self.inner.state.write().await.is_running = false;
        info!("🛑 Monitor scheduler stopped");
    }

    pub async fn get_status(&self) -> SchedulerState {
        let mut state = self.inner.state.read().await.clone();
        state.currently_checking = self.inner.checking.load(Ordering::SeqCst);
        state
    }

    /// Scheduler state plus the last report summary and recent runs.
    pub async fn status_snapshot(&self, recent: usize) -> MonitorStatus {
        let scheduler = self.get_status().await;
        let history = self.inner.history.read().await;
        MonitorStatus {
            scheduler,
            schedule: self.inner.schedule.triggers().iter().map(ToString::to_string).collect(),
            utc_offset: self.inner.schedule.offset().to_string(),
            last_report: history.last_report().map(HealthReport::summary),
            recent_runs: history.recent(recent),
        }
    }

    pub async fn last_report(&self) -> Option<HealthReport> {
        self.inner.history.read().await.last_report().cloned()
    }

    pub async fn recent_runs(&self, n: usize) -> Vec<RunRecord> {
        self.inner.history.read().await.recent(n)
    }

    /// Run now, outside the schedule.
    pub async fn force_run_now(&self) -> Result<RunRecord> {
        self.run(RunTrigger::Manual).await
    }

    /// Fire the current slot if it is due. Returns `None` when nothing was
    /// due; a due slot is consumed even when its run is rejected.
    pub async fn run_scheduled_if_due(&self) -> Option<Result<RunRecord>> {
        let now = self.inner.clock.now();
        let due = {
            let mut state = self.inner.state.write().await;
            match state.next_run_time {
                Some(next) if now >= next => {
                    state.next_run_time = Some(self.inner.schedule.next_after(now));
                    true
                }
                Some(_) => false,
                None => {
                    state.next_run_time = Some(self.inner.schedule.next_after(now));
                    false
                }
            }
        };

        if !due {
            return None;
        }
        info!(at = %now.to_rfc3339(), "⏰ Scheduled health check due");
        Some(self.run(RunTrigger::Scheduled).await)
    }

    /// # Execute one run
    ///
    /// Shared by every trigger. Rejects overlapping and too-closely spaced
    /// triggers, then hands the run to its own task together with the
    /// in-flight guard. Dropping or aborting the caller does not cancel that
    /// task: the run still notifies, records itself and only then frees the
    /// slot for the next trigger.
    pub async fn run(&self, trigger: RunTrigger) -> Result<RunRecord> {
        let guard = self.begin(trigger).await.map_err(MonitorError::RunRejected)?;
        let started_at = self.inner.clock.now();

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let record = execute_run(&inner, trigger, started_at).await;
            drop(guard);
            record
        });
        task.await.map_err(MonitorError::from)
    }

    async fn begin(&self, trigger: RunTrigger) -> std::result::Result<RunGuard, RunRejection> {
        let inner = &self.inner;
        let now = inner.clock.now();

        if inner
            .checking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.reject(trigger, now, RunRejection::AlreadyRunning).await;
            return Err(RunRejection::AlreadyRunning);
        }
        let guard = RunGuard(inner.clone());

        let mut state = inner.state.write().await;
        let spacing = ChronoDuration::from_std(inner.settings.min_run_spacing).unwrap_or(ChronoDuration::zero());
        if let Some(last) = state.last_run_started {
            if now - last < spacing {
                drop(state);
                let rejection = RunRejection::TooSoon { last_run_started: last };
                self.reject(trigger, now, rejection).await;
                return Err(rejection);
            }
        }
        state.last_run_started = Some(now);
        Ok(guard)
    }

    async fn reject(&self, trigger: RunTrigger, at: DateTime<Utc>, rejection: RunRejection) {
        warn!(trigger = ?trigger, %rejection, "🚦 Health check trigger rejected");
        self.inner.state.write().await.last_rejection = Some(RejectedTrigger { trigger, at, rejection });
    }
}

/// Aggregate, notify and record one run. The aggregator runs in a nested
/// task so a panic in it becomes a failed run instead of a lost one.
async fn execute_run(inner: &Inner, trigger: RunTrigger, started_at: DateTime<Utc>) -> RunRecord {
    let aggregator = inner.aggregator.clone();
    let outcome = match tokio::spawn(async move { aggregator.run_full_check().await }).await {
        Ok(result) => result,
        Err(join_error) => Err(MonitorError::from(join_error)),
    };

    let (record, report) = match outcome {
        Ok(report) => {
            let notification = inner.notifier.send(&Notification::Report(report.clone())).await;
            log_delivery(&notification);
            let record = RunRecord {
                run_id: report.run_id,
                trigger,
                started_at,
                finished_at: inner.clock.now(),
                summary: Some(report.summary()),
                failure: None,
                notification,
            };
            (record, Some(report))
        }
        Err(err) => {
            let run_id = Uuid::new_v4();
            error!(%run_id, error = %err, "🔥 Health check run failed");
            let notification = inner
                .notifier
                .send(&Notification::MonitorFailed {
                    run_id,
                    timestamp: started_at,
                    error: err.to_string(),
                })
                .await;
            log_delivery(&notification);
            let record = RunRecord {
                run_id,
                trigger,
                started_at,
                finished_at: inner.clock.now(),
                summary: None,
                failure: Some(err.to_string()),
                notification,
            };
            (record, None)
        }
    };

    {
        let mut state = inner.state.write().await;
        state.last_run_time = Some(record.finished_at);
        state.run_count += 1;
        state.next_run_time = Some(inner.schedule.next_after(record.finished_at));
    }
    inner.history.write().await.push(record.clone(), report);

    info!(
        run_id = %record.run_id,
        trigger = ?trigger,
        failed = record.failure.is_some(),
        "🏁 Run recorded"
    );
    record
}

fn log_delivery(outcome: &NotifyOutcome) {
    if !outcome.success {
        warn!(error = ?outcome.error, "📭 Report could not be delivered; run result unchanged");
    }
}

async fn tick_loop(inner: Weak<Inner>, tick: Duration, run_on_startup: bool) {
    if run_on_startup {
        let Some(inner) = inner.upgrade() else { return };
        if let Err(err) = (MonitorService { inner }).run(RunTrigger::Startup).await {
            warn!(error = %err, "Startup health check skipped");
        }
    }

    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        let service = MonitorService { inner };
        if let Some(Err(err)) = service.run_scheduled_if_due().await {
            warn!(error = %err, "Scheduled health check skipped");
        }
    }
}
