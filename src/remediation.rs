//! # Auto-Remediation Engine
//!
//! Given a failed probe, pick the fix strategies that apply to it, execute
//! them in a fixed order and verify each with an immediate re-probe.
//!
//! | Condition                      | Strategy             |
//! |--------------------------------|----------------------|
//! | quota and pool size > 1        | credential rotation  |
//! | HTTP 401 / 403                 | config reset         |
//! | network error                  | network retry (×N)   |
//! | HTTP ≥ 500                     | delayed retry        |
//!
//! Network errors are checked before server errors, so a transport fault is
//! never retried as if the provider had answered. A strategy is tried at
//! most once per attempt and the engine stops at the first healthy
//! re-probe.

use crate::{
    credentials::CredentialPool,
    probe::{ErrorKind, ProbeResult, Prober},
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use tracing::{info, warn};

/// # Fix Strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    CredentialRotation,
    ConfigReset,
    DelayedRetry,
    NetworkRetry,
}

impl fmt::Display for FixStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FixStrategy::CredentialRotation => "credential rotation",
            FixStrategy::ConfigReset => "config reset",
            FixStrategy::DelayedRetry => "delayed retry",
            FixStrategy::NetworkRetry => "network retry",
        };
        f.write_str(name)
    }
}

/// # Remediation Attempt
///
/// Record of one remediation pass over a failed probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationAttempt {
    /// Last strategy executed
    pub strategy: FixStrategy,
    /// Whether a verifying re-probe came back healthy
    pub succeeded: bool,
    /// Every strategy executed, in order
    pub attempted_strategies: Vec<FixStrategy>,
    /// The last verifying re-probe
    pub final_probe: Option<ProbeResult>,
}

/// Timing knobs for the retry strategies.
#[derive(Debug, Clone)]
pub struct RemediationConfig {
    pub server_error_backoff: Duration,
    pub network_retry_delay: Duration,
    pub network_retry_attempts: u32,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            server_error_backoff: Duration::from_secs(5),
            network_retry_delay: Duration::from_secs(2),
            network_retry_attempts: 3,
        }
    }
}

/// Strategies that apply to `probe`, in execution order.
pub fn applicable_strategies(pool_size: usize, probe: &ProbeResult) -> Vec<FixStrategy> {
    let mut strategies = Vec::new();
    if probe.healthy {
        return strategies;
    }

    if probe.error_kind == ErrorKind::Quota && pool_size > 1 {
        strategies.push(FixStrategy::CredentialRotation);
    }
    if matches!(probe.http_status, Some(401) | Some(403)) {
        strategies.push(FixStrategy::ConfigReset);
    }
    if probe.error_kind == ErrorKind::Network {
        strategies.push(FixStrategy::NetworkRetry);
    } else if probe.http_status.is_some_and(|status| status >= 500) {
        strategies.push(FixStrategy::DelayedRetry);
    }

    strategies
}

pub struct RemediationEngine {
    prober: Arc<dyn Prober>,
    config: RemediationConfig,
}

impl RemediationEngine {
    pub fn new(prober: Arc<dyn Prober>, config: RemediationConfig) -> Self {
        Self { prober, config }
    }

    /// Try to restore `pool`'s provider. Returns `None` when no strategy
    /// applies to this failure.
    pub async fn attempt_fix(&self, pool: &CredentialPool, probe: &ProbeResult) -> Option<RemediationAttempt> {
        let strategies = applicable_strategies(pool.len(), probe);
        if strategies.is_empty() {
            info!(
                provider = %pool.name(),
                kind = %probe.error_kind,
                "🩹 No automatic fix applies"
            );
            return None;
        }

        let mut attempted = Vec::with_capacity(strategies.len());
        let mut final_probe = None;

        for strategy in strategies {
            attempted.push(strategy);
            let verification = self.execute(strategy, pool, probe).await;
            let healthy = verification.as_ref().is_some_and(|p| p.healthy);
            if verification.is_some() {
                final_probe = verification;
            }

            if healthy {
                pool.record_success();
                info!(provider = %pool.name(), %strategy, "✅ Auto-fix succeeded");
                return Some(RemediationAttempt {
                    strategy,
                    succeeded: true,
                    attempted_strategies: attempted,
                    final_probe,
                });
            }
            warn!(provider = %pool.name(), %strategy, "❌ Auto-fix did not restore provider");
        }

        let strategy = *attempted.last()?;
        Some(RemediationAttempt {
            strategy,
            succeeded: false,
            attempted_strategies: attempted,
            final_probe,
        })
    }

    /// Apply one strategy and return the verifying probe, if one was sent.
    async fn execute(&self, strategy: FixStrategy, pool: &CredentialPool, probe: &ProbeResult) -> Option<ProbeResult> {
        match strategy {
            FixStrategy::CredentialRotation => {
                let reason = probe.raw_message.as_deref().unwrap_or("quota exhausted");
                if !pool.rotate(reason) {
                    return None;
                }
                Some(self.prober.probe(pool.spec(), pool.active()).await)
            }
            FixStrategy::ConfigReset => {
                pool.reset_error_count();
                Some(self.prober.probe(pool.spec(), pool.active()).await)
            }
            FixStrategy::DelayedRetry => {
                tokio::time::sleep(self.config.server_error_backoff).await;
                Some(self.prober.probe(pool.spec(), pool.active()).await)
            }
            FixStrategy::NetworkRetry => {
                let mut last = None;
                for attempt in 1..=self.config.network_retry_attempts {
                    tokio::time::sleep(self.config.network_retry_delay).await;
                    let result = self.prober.probe(pool.spec(), pool.active()).await;
                    let healthy = result.healthy;
                    last = Some(result);
                    if healthy {
                        break;
                    }
                    info!(provider = %pool.name(), attempt, "🔁 Network retry failed");
                }
                last
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{self, ProviderSpec};
    use async_trait::async_trait;
    use std::{collections::VecDeque, sync::Mutex};

    /// Replays canned results in order; repeats the last one when drained.
    struct ReplayProber {
        script: Mutex<VecDeque<ProbeResult>>,
        calls: Mutex<Vec<String>>,
    }

    impl ReplayProber {
        fn new(script: Vec<ProbeResult>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Prober for ReplayProber {
        async fn probe(&self, _provider: &ProviderSpec, credential: &str) -> ProbeResult {
            self.calls.lock().unwrap().push(credential.to_string());
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn fast_config() -> RemediationConfig {
        RemediationConfig {
            server_error_backoff: Duration::from_millis(1),
            network_retry_delay: Duration::from_millis(1),
            network_retry_attempts: 3,
        }
    }

    fn pool(keys: &[&str]) -> CredentialPool {
        CredentialPool::new(providers::openai(), keys.iter().map(|k| k.to_string()).collect()).unwrap()
    }

    fn status(code: u16) -> ProbeResult {
        ProbeResult::from_response(code, None, 1)
    }

    #[test]
    fn test_strategy_selection() {
        let quota = ProbeResult::from_response(429, Some("{\"error\":\"quota exceeded\"}"), 1);
        assert_eq!(applicable_strategies(3, &quota), vec![FixStrategy::CredentialRotation]);
        assert!(applicable_strategies(1, &quota).is_empty());
        assert_eq!(applicable_strategies(1, &status(401)), vec![FixStrategy::ConfigReset]);
        assert_eq!(applicable_strategies(2, &status(503)), vec![FixStrategy::DelayedRetry]);
        assert_eq!(
            applicable_strategies(2, &ProbeResult::transport_failure("timeout", 1)),
            vec![FixStrategy::NetworkRetry]
        );
        assert!(applicable_strategies(2, &status(404)).is_empty());
        assert!(applicable_strategies(2, &status(200)).is_empty());
    }

    #[tokio::test]
    async fn test_rotation_fixes_quota() {
        let pool = pool(&["sk-key-one-000001", "sk-key-two-000002", "sk-key-three-0003"]);
        let prober = ReplayProber::new(vec![status(200)]);
        let engine = RemediationEngine::new(prober.clone(), fast_config());
        let failed = ProbeResult::from_response(429, Some("{\"error\":\"quota exceeded\"}"), 1);

        let attempt = engine.attempt_fix(&pool, &failed).await.unwrap();

        assert!(attempt.succeeded);
        assert_eq!(attempt.strategy, FixStrategy::CredentialRotation);
        assert_eq!(attempt.attempted_strategies, vec![FixStrategy::CredentialRotation]);
        assert_eq!(pool.active_index(), 1);
        assert_eq!(prober.calls(), vec!["sk-key-two-000002".to_string()]);
    }

    #[tokio::test]
    async fn test_config_reset_reprobes_same_key() {
        let pool = pool(&["sk-only-key-00001"]);
        pool.record_failure();
        pool.record_failure();
        let prober = ReplayProber::new(vec![status(401)]);
        let engine = RemediationEngine::new(prober.clone(), fast_config());

        let attempt = engine.attempt_fix(&pool, &status(401)).await.unwrap();

        assert!(!attempt.succeeded);
        assert_eq!(attempt.attempted_strategies, vec![FixStrategy::ConfigReset]);
        assert_eq!(pool.consecutive_errors(), 0);
        assert_eq!(prober.calls(), vec!["sk-only-key-00001".to_string()]);
    }

    #[tokio::test]
    async fn test_network_retry_exhausts_attempts() {
        let pool = pool(&["sk-only-key-00001"]);
        let prober = ReplayProber::new(vec![ProbeResult::transport_failure("timed out", 1)]);
        let engine = RemediationEngine::new(prober.clone(), fast_config());

        let attempt = engine
            .attempt_fix(&pool, &ProbeResult::transport_failure("timed out", 1))
            .await
            .unwrap();

        assert!(!attempt.succeeded);
        assert_eq!(attempt.attempted_strategies, vec![FixStrategy::NetworkRetry]);
        assert_eq!(prober.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_network_retry_stops_when_healthy() {
        let pool = pool(&["sk-only-key-00001"]);
        let prober = ReplayProber::new(vec![ProbeResult::transport_failure("timed out", 1), status(200)]);
        let engine = RemediationEngine::new(prober.clone(), fast_config());

        let attempt = engine
            .attempt_fix(&pool, &ProbeResult::transport_failure("timed out", 1))
            .await
            .unwrap();

        assert!(attempt.succeeded);
        assert_eq!(prober.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_server_error_retried_once() {
        let pool = pool(&["sk-only-key-00001"]);
        let prober = ReplayProber::new(vec![status(502)]);
        let engine = RemediationEngine::new(prober.clone(), fast_config());

        let attempt = engine.attempt_fix(&pool, &status(503)).await.unwrap();

        assert!(!attempt.succeeded);
        assert_eq!(attempt.strategy, FixStrategy::DelayedRetry);
        assert_eq!(prober.calls().len(), 1);
        assert_eq!(attempt.final_probe.unwrap().http_status, Some(502));
    }

    #[tokio::test]
    async fn test_no_strategy_for_client_error() {
        let pool = pool(&["sk-only-key-00001"]);
        let prober = ReplayProber::new(vec![status(200)]);
        let engine = RemediationEngine::new(prober.clone(), fast_config());
        assert!(engine.attempt_fix(&pool, &status(404)).await.is_none());
        assert!(prober.calls().is_empty());
    }

    #[tokio::test]
    async fn test_strategies_never_repeat() {
        let failures = [
            ProbeResult::from_response(429, Some("{\"error\":\"rate limit\"}"), 1),
            status(401),
            status(403),
            status(500),
            ProbeResult::transport_failure("refused", 1),
        ];
        for failure in failures {
            let pool = pool(&["sk-key-one-000001", "sk-key-two-000002"]);
            let engine = RemediationEngine::new(ReplayProber::new(vec![status(500)]), fast_config());
            let attempt = engine.attempt_fix(&pool, &failure).await.unwrap();
            let unique: std::collections::HashSet<_> = attempt.attempted_strategies.iter().collect();
            assert_eq!(unique.len(), attempt.attempted_strategies.len());
        }
    }
}
