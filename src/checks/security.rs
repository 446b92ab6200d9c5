//! Security and configuration posture.

use super::SubsystemCheck;
use crate::{
    credentials::{mask_secret, ProviderRegistry},
    report::{HealthStatus, SubsystemReport},
};
use async_trait::async_trait;

/// Minimum length of the trigger secret before it is considered weak.
pub const MIN_SECRET_LEN: usize = 32;

/// Credentials shorter than this are almost certainly not real keys.
const MIN_CREDENTIAL_LEN: usize = 16;

const PLACEHOLDER_MARKERS: &[&str] = &["your", "xxx", "changeme", "example", "placeholder", "todo"];

/// Snapshot of the security-relevant configuration, taken at startup.
#[derive(Debug, Clone, Default)]
pub struct SecurityPosture {
    pub trigger_secret: Option<String>,
    pub environment: String,
    pub notifier_url: Option<String>,
    pub registry: ProviderRegistry,
}

pub struct SecurityCheck {
    posture: SecurityPosture,
}

impl SecurityCheck {
    pub fn new(posture: SecurityPosture) -> Self {
        Self { posture }
    }
}

fn looks_like_placeholder(credential: &str) -> bool {
    let lowered = credential.to_lowercase();
    credential.len() < MIN_CREDENTIAL_LEN || PLACEHOLDER_MARKERS.iter().any(|m| lowered.contains(m))
}

fn is_plain_http(url: &str) -> bool {
    url::Url::parse(url).is_ok_and(|u| u.scheme() == "http")
}

#[async_trait]
impl SubsystemCheck for SecurityCheck {
    fn name(&self) -> &str {
        "security"
    }

    async fn run(&self) -> SubsystemReport {
        let posture = &self.posture;
        let mut report = SubsystemReport::healthy(self.name());

        match posture.trigger_secret.as_deref().map(str::trim) {
            None | Some("") => report.flag(
                HealthStatus::Critical,
                "trigger secret is not configured; monitor endpoints are unprotected",
            ),
            Some(secret) if secret.len() < MIN_SECRET_LEN => report.flag(
                HealthStatus::Warning,
                format!("trigger secret is shorter than {} characters", MIN_SECRET_LEN),
            ),
            Some(_) => {}
        }

        for provider in posture.registry.disabled() {
            report.flag(
                HealthStatus::Critical,
                format!("provider '{}' disabled: primary credential missing", provider),
            );
        }

        let production = posture.environment == "production";
        for pool in posture.registry.pools() {
            for index in 0..pool.len() {
                if let Some(credential) = pool.credential(index) {
                    if looks_like_placeholder(credential) {
                        report.flag(
                            HealthStatus::Warning,
                            format!(
                                "provider '{}' credential #{} ({}) looks like a placeholder",
                                pool.name(),
                                index + 1,
                                mask_secret(credential)
                            ),
                        );
                    }
                }
            }
            if production && is_plain_http(&pool.spec().endpoint) {
                report.flag(
                    HealthStatus::Warning,
                    format!("provider '{}' is probed over plain HTTP in production", pool.name()),
                );
            }
        }

        if let Some(url) = &posture.notifier_url {
            if production && is_plain_http(url) {
                report.flag(HealthStatus::Warning, "notifier endpoint uses plain HTTP in production");
            }
        }

        report.add_detail("environment", posture.environment.clone());
        report.add_detail("providers_enabled", posture.registry.pools().len());
        report.add_detail("providers_disabled", posture.registry.disabled().len());
        report
    }
}
