//! # Bootstrap
//!
//! Wires configuration, credentials and the HTTP client into a ready
//! [`MonitorService`]. Used by the binary for both the long-running server
//! and `--once` mode.

use crate::{
    aggregator::HealthAggregator,
    checks::{
        DependencyCheck, HttpJobSource, HttpUsageSource, JobSource, NoJobSource, NoUsageSource, ResourceCheck,
        SecurityCheck, SecurityPosture, StuckJobCheck, SubsystemCheck, UsageSource,
    },
    config::Config,
    core::{clock::Clock, http_client::HttpClientBuilder},
    credentials::{CredentialSource, ProviderRegistry},
    notifier::{LogNotifier, Notifier, WebhookNotifier},
    probe::HttpProber,
    scheduler::MonitorService,
    Result,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything built from one configuration.
pub struct Components {
    pub registry: Arc<ProviderRegistry>,
    pub aggregator: Arc<HealthAggregator>,
    pub notifier: Arc<dyn Notifier>,
    pub service: MonitorService,
}

/// Build the monitor from `config`, reading provider credentials from
/// `source`.
pub fn build_components(
    config: &Config,
    source: &dyn CredentialSource,
    clock: Arc<dyn Clock>,
) -> Result<Components> {
    let client = HttpClientBuilder::from_config(config).build()?;

    let (specs, unknown) = config.provider_specs();
    for name in unknown {
        warn!(provider = %name, "❓ Unknown provider ignored");
    }
    let registry = Arc::new(ProviderRegistry::from_source(specs, source));

    let usage: Box<dyn UsageSource> = match &config.usage_status_url {
        Some(url) => Box::new(HttpUsageSource::new(client.clone(), url.clone())),
        None => Box::new(NoUsageSource),
    };
    let jobs: Box<dyn JobSource> = match &config.jobs_status_url {
        Some(url) => Box::new(HttpJobSource::new(client.clone(), url.clone())),
        None => Box::new(NoJobSource),
    };

    let checks: Vec<Arc<dyn SubsystemCheck>> = vec![
        Arc::new(SecurityCheck::new(SecurityPosture {
            trigger_secret: config.cron_secret.clone(),
            environment: config.environment.clone(),
            notifier_url: config.notifier_url.clone(),
            registry: (*registry).clone(),
        })),
        Arc::new(ResourceCheck::new(usage, (*registry).clone())),
        Arc::new(StuckJobCheck::new(jobs, clock.clone(), config.stuck_job_threshold())),
        Arc::new(DependencyCheck::new(client.clone(), config.dependency_targets())),
    ];

    let notifier: Arc<dyn Notifier> = match &config.notifier_url {
        Some(url) => Arc::new(WebhookNotifier::new(client.clone(), url.clone(), config.notifier_token.clone())?),
        None => {
            info!("📝 No NOTIFIER_URL set, reports will be logged only");
            Arc::new(LogNotifier)
        }
    };

    let prober = Arc::new(HttpProber::new(client, config.probe_timeout()));
    let aggregator = Arc::new(
        HealthAggregator::new(registry.clone(), prober, clock.clone())
            .with_remediation(config.remediation_config())
            .with_checks(checks)
            .with_run_timeout(config.run_timeout()),
    );

    let service = MonitorService::new(
        aggregator.clone(),
        notifier.clone(),
        clock,
        config.schedule()?,
        config.scheduler_settings(),
    );

    info!(
        providers = registry.pools().len(),
        disabled = registry.disabled().len(),
        schedule = %service.schedule(),
        "🛰️ Monitor assembled"
    );

    Ok(Components {
        registry,
        aggregator,
        notifier,
        service,
    })
}
