//! Resource usage against each provider's informational quota.

use super::SubsystemCheck;
use crate::{
    credentials::ProviderRegistry,
    report::{HealthStatus, SubsystemReport},
    Result,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::warn;

/// Usage ratio at which a provider is flagged as a warning.
pub const DEFAULT_WARN_RATIO: f64 = 0.8;

/// Consumption counters for one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    #[serde(default)]
    pub daily_used: u64,
    #[serde(default)]
    pub monthly_used: u64,
}

/// Source of per-provider usage counters.
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn fetch_usage(&self) -> Result<HashMap<String, UsageSnapshot>>;
}

/// Used when no usage feed is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUsageSource;

#[async_trait]
impl UsageSource for NoUsageSource {
    async fn fetch_usage(&self) -> Result<HashMap<String, UsageSnapshot>> {
        Ok(HashMap::new())
    }
}

/// Reads `{ "<provider>": { "daily_used": n, "monthly_used": n } }` from a URL.
#[derive(Debug, Clone)]
pub struct HttpUsageSource {
    client: Client,
    url: String,
}

impl HttpUsageSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl UsageSource for HttpUsageSource {
    async fn fetch_usage(&self) -> Result<HashMap<String, UsageSnapshot>> {
        let usage = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<HashMap<String, UsageSnapshot>>()
            .await?;
        Ok(usage)
    }
}

pub struct ResourceCheck {
    source: Box<dyn UsageSource>,
    registry: ProviderRegistry,
    warn_ratio: f64,
}

impl ResourceCheck {
    pub fn new(source: Box<dyn UsageSource>, registry: ProviderRegistry) -> Self {
        Self {
            source,
            registry,
            warn_ratio: DEFAULT_WARN_RATIO,
        }
    }

    pub fn with_warn_ratio(mut self, ratio: f64) -> Self {
        self.warn_ratio = ratio;
        self
    }

    fn assess(&self, report: &mut SubsystemReport, provider: &str, period: &str, used: u64, limit: Option<u64>) {
        let Some(limit) = limit.filter(|l| *l > 0) else {
            return;
        };
        let ratio = used as f64 / limit as f64;
        let percent = (ratio * 100.0).round();

        if ratio >= 1.0 {
            report.flag(
                HealthStatus::Critical,
                format!("{} {} usage at {}% ({}/{})", provider, period, percent, used, limit),
            );
        } else if ratio >= self.warn_ratio {
            report.flag(
                HealthStatus::Warning,
                format!("{} {} usage at {}% ({}/{})", provider, period, percent, used, limit),
            );
        }
    }
}

#[async_trait]
impl SubsystemCheck for ResourceCheck {
    fn name(&self) -> &str {
        "resources"
    }

    async fn run(&self) -> SubsystemReport {
        let mut report = SubsystemReport::healthy(self.name());

        let usage = match self.source.fetch_usage().await {
            Ok(usage) => usage,
            Err(err) => {
                warn!(error = %err, "📉 Usage data unavailable");
                report.flag(HealthStatus::Warning, format!("usage data unavailable: {}", err));
                return report;
            }
        };

        for pool in self.registry.pools() {
            let spec = pool.spec();
            let Some(snapshot) = usage.get(&spec.name) else {
                continue;
            };
            self.assess(&mut report, &spec.name, "daily", snapshot.daily_used, spec.daily_limit);
            self.assess(&mut report, &spec.name, "monthly", snapshot.monthly_used, spec.monthly_limit);
            report.add_detail(
                spec.name.clone(),
                json!({
                    "daily_used": snapshot.daily_used,
                    "daily_limit": spec.daily_limit,
                    "monthly_used": snapshot.monthly_used,
                    "monthly_limit": spec.monthly_limit,
                }),
            );
        }

        report.add_detail("providers_with_usage", usage.len());
        report
    }
}
