//! # Credential Pools
//!
//! Each provider owns an ordered pool of interchangeable credentials with a
//! pointer to the one currently in use. Pools are created once at startup
//! and shared for the lifetime of the process: a rotation made during one
//! run is what the next run starts from.
//!
//! The active index and error counter are atomics, so a pool can be shared
//! between the aggregator task that owns a provider's check and readers such
//! as the status endpoint without a lock.

use crate::{error::MonitorError, providers::ProviderSpec, Result};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{info, warn};

/// Highest numbered backup variable scanned (`KEY_2` .. `KEY_9`).
pub const MAX_BACKUP_SLOT: usize = 9;

/// # Credential Source
///
/// Where secrets come from. Injected so the monitor can run against the
/// process environment in production and a fixed map in tests.
pub trait CredentialSource: Send + Sync {
    fn lookup(&self, name: &str) -> Option<String>;
}

/// Reads credentials from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialSource;

impl CredentialSource for EnvCredentialSource {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// In-memory credential source.
#[derive(Debug, Clone, Default)]
pub struct MapCredentialSource {
    values: HashMap<String, String>,
}

impl MapCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl CredentialSource for MapCredentialSource {
    fn lookup(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Render a secret for logs and reports: a short prefix, an ellipsis and the
/// last four characters. Short secrets are fully hidden.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

/// # Credential Pool
///
/// Live configuration of one provider: its spec, its credentials and the
/// mutable rotation state.
#[derive(Debug)]
pub struct CredentialPool {
    spec: ProviderSpec,
    credentials: Vec<String>,
    active_index: AtomicUsize,
    consecutive_errors: AtomicU32,
}

impl CredentialPool {
    /// Build a pool. Blank credentials are dropped; at least one must remain.
    pub fn new(spec: ProviderSpec, credentials: Vec<String>) -> Result<Self> {
        let credentials: Vec<String> = credentials
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        if credentials.is_empty() {
            return Err(MonitorError::Config(format!(
                "provider '{}' has no usable credential",
                spec.name
            )));
        }

        Ok(Self {
            spec,
            credentials,
            active_index: AtomicUsize::new(0),
            consecutive_errors: AtomicU32::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Pools always hold at least one credential.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn active_index(&self) -> usize {
        self.active_index.load(Ordering::Acquire)
    }

    /// The credential currently in use.
    pub fn active(&self) -> &str {
        &self.credentials[self.active_index() % self.credentials.len()]
    }

    /// Credential at a given pool position.
    pub fn credential(&self, index: usize) -> Option<&str> {
        self.credentials.get(index).map(String::as_str)
    }

    /// Every credential except the active one, with its pool position.
    pub fn backups(&self) -> Vec<(usize, &str)> {
        let active = self.active_index();
        self.credentials
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != active)
            .map(|(index, credential)| (index, credential.as_str()))
            .collect()
    }

    /// Advance to the next credential, wrapping at the end of the pool.
    ///
    /// Returns false, leaving the pool untouched, when there is nothing to
    /// rotate to.
    pub fn rotate(&self, reason: &str) -> bool {
        let len = self.credentials.len();
        if len < 2 {
            warn!(
                provider = %self.spec.name,
                reason,
                "🔑 Rotation requested but pool has a single credential"
            );
            return false;
        }

        let previous = self
            .active_index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |index| {
                Some((index + 1) % len)
            })
            .unwrap_or_else(|index| index);
        let next = (previous + 1) % len;

        info!(
            provider = %self.spec.name,
            reason,
            from = previous,
            to = next,
            credential = %mask_secret(&self.credentials[next]),
            "🔄 Rotated credential"
        );
        true
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Acquire)
    }

    /// Count a failed probe; returns the new streak length.
    pub fn record_failure(&self) -> u32 {
        self.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::Release);
    }

    pub fn reset_error_count(&self) {
        self.consecutive_errors.store(0, Ordering::Release);
    }
}

/// # Provider Registry
///
/// All pools built at startup, plus the providers that could not be enabled
/// because their primary credential is missing.
#[derive(Debug, Default, Clone)]
pub struct ProviderRegistry {
    pools: Vec<Arc<CredentialPool>>,
    disabled: Vec<String>,
}

impl ProviderRegistry {
    pub fn new(pools: Vec<Arc<CredentialPool>>, disabled: Vec<String>) -> Self {
        Self { pools, disabled }
    }

    /// Build pools for `specs` from a credential source.
    ///
    /// For env key `K` the primary credential is `K` and backups are
    /// `K_2` through `K_9`. `K_PROBE_URL` overrides the probe endpoint.
    pub fn from_source(specs: Vec<ProviderSpec>, source: &dyn CredentialSource) -> Self {
        let mut pools = Vec::new();
        let mut disabled = Vec::new();

        for spec in specs {
            let primary = source
                .lookup(&spec.env_key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());

            let Some(primary) = primary else {
                warn!(
                    provider = %spec.name,
                    env_key = %spec.env_key,
                    "⛔ Primary credential missing, provider disabled"
                );
                disabled.push(spec.name);
                continue;
            };

            let mut credentials = vec![primary];
            for slot in 2..=MAX_BACKUP_SLOT {
                if let Some(value) = source.lookup(&format!("{}_{}", spec.env_key, slot)) {
                    credentials.push(value);
                }
            }

            let spec = match source.lookup(&spec.endpoint_override_key()) {
                Some(endpoint) if !endpoint.trim().is_empty() => spec.with_endpoint(endpoint.trim()),
                _ => spec,
            };

            match CredentialPool::new(spec, credentials) {
                Ok(pool) => {
                    info!(
                        provider = %pool.name(),
                        credentials = pool.len(),
                        "🔑 Credential pool ready"
                    );
                    pools.push(Arc::new(pool));
                }
                Err(err) => warn!("⛔ {}", err),
            }
        }

        Self { pools, disabled }
    }

    pub fn pools(&self) -> &[Arc<CredentialPool>] {
        &self.pools
    }

    pub fn disabled(&self) -> &[String] {
        &self.disabled
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CredentialPool>> {
        self.pools.iter().find(|pool| pool.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers;

    fn pool_of(n: usize) -> CredentialPool {
        let keys = (1..=n).map(|i| format!("sk-test-credential-{:02}", i)).collect();
        CredentialPool::new(providers::openai(), keys).unwrap()
    }

    #[test]
    fn test_single_credential_rotation_is_noop() {
        let pool = pool_of(1);
        assert!(!pool.rotate("quota"));
        assert_eq!(pool.active_index(), 0);
        assert_eq!(pool.active(), "sk-test-credential-01");
    }

    #[test]
    fn test_rotation_is_cyclic() {
        for n in 2..=5 {
            let pool = pool_of(n);
            let start = pool.active_index();
            for step in 1..=n {
                assert!(pool.rotate("test"));
                assert_eq!(pool.active_index(), step % n);
            }
            assert_eq!(pool.active_index(), start);
        }
    }

    #[test]
    fn test_blank_credentials_filtered() {
        let pool = CredentialPool::new(
            providers::deepgram(),
            vec!["primary-key-value".into(), "   ".into(), String::new()],
        )
        .unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_empty_pool_rejected() {
        let result = CredentialPool::new(providers::deepgram(), vec![" ".into()]);
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_backups_skip_active() {
        let pool = pool_of(3);
        pool.rotate("test");
        let indexes: Vec<_> = pool.backups().into_iter().map(|(i, _)| i).collect();
        assert_eq!(indexes, vec![0, 2]);
    }

    #[test]
    fn test_error_counter() {
        let pool = pool_of(1);
        assert_eq!(pool.record_failure(), 1);
        assert_eq!(pool.record_failure(), 2);
        pool.reset_error_count();
        assert_eq!(pool.consecutive_errors(), 0);
        pool.record_failure();
        pool.record_success();
        assert_eq!(pool.consecutive_errors(), 0);
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-abcdefghijkl1234"), "sk-…1234");
        assert_eq!(mask_secret("short"), "****");
    }

    #[test]
    fn test_registry_from_source() {
        let source = MapCredentialSource::new()
            .with("OPENAI_API_KEY", "sk-primary-000000")
            .with("OPENAI_API_KEY_2", "")
            .with("OPENAI_API_KEY_3", "sk-backup-3333333")
            .with("OPENAI_API_KEY_PROBE_URL", "http://127.0.0.1:9/v1/chat")
            .with("DEEPGRAM_API_KEY", "   ");

        let registry = ProviderRegistry::from_source(
            vec![providers::openai(), providers::deepgram()],
            &source,
        );

        let openai = registry.get("openai").unwrap();
        assert_eq!(openai.len(), 2);
        assert_eq!(openai.credential(1), Some("sk-backup-3333333"));
        assert_eq!(openai.spec().endpoint, "http://127.0.0.1:9/v1/chat");
        assert_eq!(registry.disabled(), &["deepgram".to_string()]);
    }
}
