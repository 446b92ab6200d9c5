//! End-to-end monitoring scenarios against scripted providers.

mod common;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use common::*;
use provider_sentinel::{
    classifier::classify,
    notifier::{Notification, Priority, ReportMessage},
    ErrorKind, FixStrategy, GracefulShutdown, HealthAggregator, HealthStatus, ManualClock, MonitorError, MonitorService,
    ProviderRegistry, RemediationConfig, RunRejection, RunTrigger, Schedule, SchedulerSettings,
};
use std::{sync::Arc, time::Duration};
use tokio_test::{assert_err, assert_ok};

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 6, 59, 0).unwrap()
}

fn aggregator(
    pools: Vec<Arc<provider_sentinel::CredentialPool>>,
    prober: Arc<ScriptedProber>,
    clock: Arc<ManualClock>,
    remediation: RemediationConfig,
) -> Arc<HealthAggregator> {
    let registry = Arc::new(ProviderRegistry::new(pools, Vec::new()));
    Arc::new(HealthAggregator::new(registry, prober, clock).with_remediation(remediation))
}

fn service_with(
    aggregator: Arc<HealthAggregator>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
    settings: SchedulerSettings,
) -> MonitorService {
    let schedule = Schedule::parse("07:00,22:00", "Z").unwrap();
    MonitorService::new(aggregator, notifier, clock, schedule, settings)
}

#[tokio::test]
async fn test_quota_exhausted_key_rotates_and_auto_fixes() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let prober = Arc::new(ScriptedProber::new().answer("alpha-1", vec![quota_exceeded()]));
    let agg = aggregator(
        vec![pool("alpha", &["alpha-1", "alpha-2", "alpha-3"])],
        prober.clone(),
        clock,
        fast_remediation(),
    );

    let report = agg.run_full_check().await.unwrap();
    let alpha = &report.providers["alpha"];

    assert_eq!(alpha.status, HealthStatus::AutoFixed);
    assert_eq!(alpha.probe.error_kind, ErrorKind::Quota);
    assert_eq!(alpha.active_index, 1);
    let remediation = alpha.remediation.as_ref().unwrap();
    assert!(remediation.succeeded);
    assert_eq!(remediation.strategy, FixStrategy::CredentialRotation);

    assert_eq!(report.overall_status, HealthStatus::AutoFixed);
    assert!(report.issues_requiring_attention.is_empty());
    assert_eq!(prober.calls_for("alpha"), vec!["alpha-1", "alpha-2"]);
}

#[tokio::test]
async fn test_rejected_single_key_escalates_after_config_reset() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let prober = Arc::new(ScriptedProber::new().answer("beta-1", vec![status(401)]));
    let agg = aggregator(vec![pool("beta", &["beta-1"])], prober.clone(), clock, fast_remediation());

    let report = agg.run_full_check().await.unwrap();
    let beta = &report.providers["beta"];

    assert_eq!(beta.status, HealthStatus::Critical);
    assert_eq!(beta.probe.error_kind, ErrorKind::Auth);
    assert!(beta.backups.is_none());
    assert_eq!(report.overall_status, HealthStatus::Critical);

    assert_eq!(report.issues_requiring_attention.len(), 1);
    let issue = &report.issues_requiring_attention[0];
    assert_eq!(issue.source, "beta");
    assert_eq!(issue.attempted_fixes, vec![FixStrategy::ConfigReset]);
    assert_eq!(prober.calls_for("beta").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_network_failures_retry_three_times_then_escalate() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let prober = Arc::new(ScriptedProber::new().answer("gamma-1", vec![timed_out()]));
    let agg = aggregator(
        vec![pool("gamma", &["gamma-1"])],
        prober.clone(),
        clock,
        RemediationConfig::default(),
    );

    let started = tokio::time::Instant::now();
    let report = agg.run_full_check().await.unwrap();

    // Initial probe plus three retries spaced two seconds apart.
    assert_eq!(prober.calls_for("gamma").len(), 4);
    assert!(started.elapsed() >= Duration::from_secs(6));

    let gamma = &report.providers["gamma"];
    assert_eq!(gamma.status, HealthStatus::Critical);
    assert_eq!(gamma.probe.error_kind, ErrorKind::Network);
    assert_eq!(
        gamma.remediation.as_ref().unwrap().attempted_strategies,
        vec![FixStrategy::NetworkRetry]
    );
    assert!(report.timed_out.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_network_retry_recovers_on_second_attempt() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let prober = Arc::new(ScriptedProber::new().answer("gamma-1", vec![timed_out(), timed_out(), ok()]));
    let agg = aggregator(
        vec![pool("gamma", &["gamma-1"])],
        prober.clone(),
        clock,
        RemediationConfig::default(),
    );

    let report = agg.run_full_check().await.unwrap();

    assert_eq!(report.providers["gamma"].status, HealthStatus::AutoFixed);
    assert_eq!(prober.calls_for("gamma").len(), 3);
}

#[tokio::test]
async fn test_all_healthy_run_sends_all_clear() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let prober = Arc::new(ScriptedProber::new());
    let agg = aggregator(
        vec![pool("alpha", &["alpha-1"]), pool("beta", &["beta-1", "beta-2"])],
        prober,
        clock.clone(),
        fast_remediation(),
    );
    let notifier = RecordingNotifier::new();
    let service = service_with(agg, notifier.clone(), clock, SchedulerSettings::default());

    let record = service.force_run_now().await.unwrap();
    assert_eq!(record.trigger, RunTrigger::Manual);
    assert!(record.failure.is_none());
    assert!(record.notification.success);
    assert_eq!(record.notification.message_id.as_deref(), Some("msg-1"));

    let summary = record.summary.unwrap();
    assert_eq!(summary.overall_status, HealthStatus::Healthy);
    assert_eq!(summary.healthy, 2);
    assert_eq!(summary.issues, 0);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    let Notification::Report(report) = &sent[0] else {
        panic!("expected a report notification");
    };
    assert!(report.is_all_clear());
    let message = ReportMessage::render(&sent[0]);
    assert_eq!(message.priority, Priority::Low);
    assert!(message.text.contains("All clear"));
}

#[tokio::test]
async fn test_second_trigger_in_same_minute_is_rejected() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let agg = aggregator(
        vec![pool("alpha", &["alpha-1"])],
        Arc::new(ScriptedProber::new()),
        clock.clone(),
        fast_remediation(),
    );
    let notifier = RecordingNotifier::new();
    let service = service_with(agg, notifier.clone(), clock.clone(), SchedulerSettings::default());

    assert_ok!(service.force_run_now().await);
    clock.advance(ChronoDuration::seconds(30));
    let err = assert_err!(service.force_run_now().await);

    match err {
        MonitorError::RunRejected(RunRejection::TooSoon { last_run_started }) => {
            assert_eq!(last_run_started, start_time());
        }
        other => panic!("unexpected error: {other}"),
    }

    let state = service.get_status().await;
    assert_eq!(state.run_count, 1);
    assert!(!state.currently_checking);
    assert!(state.last_rejection.is_some());
    assert_eq!(notifier.sent().len(), 1);

    clock.advance(ChronoDuration::seconds(31));
    assert_ok!(service.force_run_now().await);
    assert_eq!(service.get_status().await.run_count, 2);
}

#[tokio::test]
async fn test_concurrent_trigger_is_rejected_while_running() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let prober = Arc::new(ScriptedProber::new().with_delay(Duration::from_millis(300)));
    let agg = aggregator(
        vec![pool("alpha", &["alpha-1"])],
        prober.clone(),
        clock.clone(),
        fast_remediation(),
    );
    let service = service_with(agg, RecordingNotifier::new(), clock, SchedulerSettings::default());

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.force_run_now().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(service.get_status().await.currently_checking);

    let err = assert_err!(service.run(RunTrigger::Scheduled).await);
    assert!(matches!(err, MonitorError::RunRejected(RunRejection::AlreadyRunning)));

    assert_ok!(first.await.unwrap());
    let state = service.get_status().await;
    assert_eq!(state.run_count, 1);
    assert!(!state.currently_checking);
    assert_eq!(prober.calls().len(), 1);
}

#[tokio::test]
async fn test_scheduled_slot_fires_once() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let agg = aggregator(
        vec![pool("alpha", &["alpha-1"])],
        Arc::new(ScriptedProber::new()),
        clock.clone(),
        fast_remediation(),
    );
    let service = service_with(agg, RecordingNotifier::new(), clock.clone(), SchedulerSettings::default());

    assert_eq!(
        service.get_status().await.next_run_time,
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap())
    );
    assert!(service.run_scheduled_if_due().await.is_none());

    clock.advance(ChronoDuration::seconds(90));
    let record = service.run_scheduled_if_due().await.unwrap().unwrap();
    assert_eq!(record.trigger, RunTrigger::Scheduled);

    // Same minute, later tick: the slot is already consumed.
    clock.advance(ChronoDuration::seconds(20));
    assert!(service.run_scheduled_if_due().await.is_none());

    let state = service.get_status().await;
    assert_eq!(state.run_count, 1);
    assert_eq!(state.next_run_time, Some(Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 0).unwrap()));

    clock.set(Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 5).unwrap());
    assert!(service.run_scheduled_if_due().await.unwrap().is_ok());
    assert_eq!(service.get_status().await.run_count, 2);
}

#[tokio::test]
async fn test_failed_run_sends_monitor_failed() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let agg = aggregator(Vec::new(), Arc::new(ScriptedProber::new()), clock.clone(), fast_remediation());
    let notifier = RecordingNotifier::new();
    let service = service_with(agg, notifier.clone(), clock, SchedulerSettings::default());

    let record = service.force_run_now().await.unwrap();
    assert!(record.summary.is_none());
    assert!(record.failure.as_deref().unwrap().contains("nothing to monitor"));
    assert_eq!(service.get_status().await.run_count, 1);
    assert!(service.last_report().await.is_none());

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        Notification::MonitorFailed { run_id, error, .. } => {
            assert_eq!(*run_id, record.run_id);
            assert!(error.contains("nothing to monitor"));
        }
        other => panic!("expected a failure notification, got {other:?}"),
    }
    assert_eq!(ReportMessage::render(&sent[0]).priority, Priority::High);
}

#[tokio::test]
async fn test_notification_failure_does_not_change_result() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let prober = Arc::new(ScriptedProber::new().answer("beta-1", vec![status(403)]));
    let agg = aggregator(vec![pool("beta", &["beta-1"])], prober, clock.clone(), fast_remediation());
    let service = service_with(agg, RecordingNotifier::failing(), clock, SchedulerSettings::default());

    let record = service.force_run_now().await.unwrap();
    assert!(!record.notification.success);
    assert_eq!(record.notification.error.as_deref(), Some("relay unavailable"));
    assert_eq!(record.summary.unwrap().overall_status, HealthStatus::Critical);
    assert!(record.failure.is_none());
}

#[tokio::test]
async fn test_run_history_is_bounded() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let agg = aggregator(
        vec![pool("alpha", &["alpha-1"])],
        Arc::new(ScriptedProber::new()),
        clock.clone(),
        fast_remediation(),
    );
    let settings = SchedulerSettings {
        history_capacity: 2,
        ..SchedulerSettings::default()
    };
    let service = service_with(agg, RecordingNotifier::new(), clock.clone(), settings);

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(service.force_run_now().await.unwrap().run_id);
        clock.advance(ChronoDuration::minutes(2));
    }

    let recent = service.recent_runs(10).await;
    assert_eq!(recent.len(), 2);
    assert!(!recent.iter().any(|r| r.run_id == ids[0]));
    assert_eq!(service.get_status().await.run_count, 3);

    let status = service.status_snapshot(1).await;
    assert_eq!(status.recent_runs.len(), 1);
    assert_eq!(status.schedule, vec!["07:00", "22:00"]);
    assert_eq!(status.last_report.unwrap().run_id, ids[2]);
}

#[tokio::test]
async fn test_startup_run_when_enabled() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let agg = aggregator(
        vec![pool("alpha", &["alpha-1"])],
        Arc::new(ScriptedProber::new()),
        clock.clone(),
        fast_remediation(),
    );
    let settings = SchedulerSettings {
        run_on_startup: true,
        ..SchedulerSettings::default()
    };
    let service = service_with(agg, RecordingNotifier::new(), clock, settings);

    assert!(service.start().await);
    assert!(!service.start().await);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while service.get_status().await.run_count == 0 {
        assert!(tokio::time::Instant::now() < deadline, "startup run never happened");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let runs = service.recent_runs(1).await;
    assert_eq!(runs[0].trigger, RunTrigger::Startup);
    assert!(service.get_status().await.is_running);

    service.stop().await;
    assert!(!service.get_status().await.is_running);
}

#[tokio::test]
async fn test_stopping_scheduler_lets_startup_run_finish() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let prober = Arc::new(ScriptedProber::new().with_delay(Duration::from_millis(300)));
    let agg = aggregator(vec![pool("alpha", &["alpha-1"])], prober, clock.clone(), fast_remediation());
    let notifier = RecordingNotifier::new();
    let settings = SchedulerSettings {
        run_on_startup: true,
        ..SchedulerSettings::default()
    };
    let service = service_with(agg, notifier.clone(), clock, settings);

    assert!(service.start().await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(service.get_status().await.currently_checking);

    let drained = GracefulShutdown::new().drain(&service, Duration::from_secs(2)).await;
    assert!(drained);

    let state = service.get_status().await;
    assert!(!state.is_running);
    assert!(!state.currently_checking);
    assert_eq!(state.run_count, 1);
    assert_eq!(notifier.sent().len(), 1);
    assert_eq!(service.recent_runs(5).await[0].trigger, RunTrigger::Startup);
}

#[tokio::test]
async fn test_abandoned_trigger_keeps_its_run() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let prober = Arc::new(ScriptedProber::new().with_delay(Duration::from_millis(300)));
    let agg = aggregator(
        vec![pool("alpha", &["alpha-1"])],
        prober.clone(),
        clock.clone(),
        fast_remediation(),
    );
    let notifier = RecordingNotifier::new();
    let settings = SchedulerSettings {
        min_run_spacing: Duration::ZERO,
        ..SchedulerSettings::default()
    };
    let service = service_with(agg, notifier.clone(), clock, settings);

    // The caller gives up long before the run is done.
    assert_err!(tokio::time::timeout(Duration::from_millis(50), service.force_run_now()).await);
    assert!(service.get_status().await.currently_checking);

    let err = assert_err!(service.force_run_now().await);
    assert!(matches!(err, MonitorError::RunRejected(RunRejection::AlreadyRunning)));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while service.get_status().await.currently_checking {
        assert!(tokio::time::Instant::now() < deadline, "abandoned run never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(service.get_status().await.run_count, 1);
    assert_eq!(notifier.sent().len(), 1);
    assert_eq!(prober.calls().len(), 1);
}

#[test]
fn test_classifier_prefers_quota_when_ambiguous() {
    assert_eq!(classify(Some(429), Some("{\"error\":\"slow down\"}")), ErrorKind::Quota);
    assert_eq!(classify(Some(402), None), ErrorKind::Quota);
    assert_eq!(classify(Some(400), Some("{\"error\":{\"message\":\"Insufficient credits\"}}")), ErrorKind::Quota);
    assert_eq!(classify(Some(400), Some("{\"error\":\"malformed request\"}")), ErrorKind::ClientOther);
    assert_eq!(classify(Some(403), Some("{\"error\":\"quota\"}")), ErrorKind::Auth);
    assert_eq!(classify(Some(502), None), ErrorKind::Server);
    assert_eq!(classify(None, None), ErrorKind::Network);
    assert_eq!(classify(Some(204), None), ErrorKind::None);
}

#[test]
fn test_rotation_cycles_through_the_pool() {
    let pool = pool("alpha", &["a", "b", "c"]);
    let mut seen = vec![pool.active().to_string()];
    for _ in 0..3 {
        assert!(pool.rotate("quota exceeded"));
        seen.push(pool.active().to_string());
    }
    assert_eq!(seen, vec!["a", "b", "c", "a"]);

    let single = common::pool("beta", &["only"]);
    assert!(!single.rotate("quota exceeded"));
    assert_eq!(single.active_index(), 0);
}
