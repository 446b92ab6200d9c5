//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use provider_sentinel::{
    notifier::{Notification, Notifier, NotifyOutcome},
    probe::{ProbeResult, Prober},
    providers::{AuthStyle, ProbeKind, ProviderSpec},
    remediation::RemediationConfig,
    CredentialPool,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

/// # Scripted Prober
///
/// Answers per credential from a queue; the last answer repeats once the
/// queue is down to one. Unknown credentials answer 200.
#[derive(Default)]
pub struct ScriptedProber {
    answers: Mutex<HashMap<String, Vec<ProbeResult>>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(self, credential: &str, results: Vec<ProbeResult>) -> Self {
        self.answers.lock().unwrap().insert(credential.to_string(), results);
        self
    }

    /// Every probe sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(provider, credential)` for every probe sent, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, provider: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(p, _)| p == provider)
            .map(|(_, credential)| credential)
            .collect()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, provider: &ProviderSpec, credential: &str) -> ProbeResult {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap()
            .push((provider.name.clone(), credential.to_string()));

        let mut answers = self.answers.lock().unwrap();
        match answers.get_mut(credential) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => ProbeResult::from_response(200, Some("{\"data\":[]}"), 12),
        }
    }
}

/// In-memory notifier that records everything it is handed.
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    /// A notifier whose every delivery fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> NotifyOutcome {
        let mut sent = self.sent.lock().unwrap();
        sent.push(notification.clone());
        if self.fail {
            NotifyOutcome::failed("relay unavailable")
        } else {
            NotifyOutcome::delivered(Some(format!("msg-{}", sent.len())))
        }
    }
}

/// A generic list-style provider named `name`.
pub fn provider(name: &str) -> ProviderSpec {
    ProviderSpec::new(
        name,
        format!("https://{}.example.com/v1/models", name),
        ProbeKind::ListGet,
        AuthStyle::Bearer,
        format!("{}_API_KEY", name.to_uppercase()),
    )
}

pub fn pool(name: &str, keys: &[&str]) -> Arc<CredentialPool> {
    Arc::new(CredentialPool::new(provider(name), keys.iter().map(|k| k.to_string()).collect()).unwrap())
}

pub fn fast_remediation() -> RemediationConfig {
    RemediationConfig {
        server_error_backoff: Duration::from_millis(5),
        network_retry_delay: Duration::from_millis(5),
        network_retry_attempts: 3,
    }
}

pub fn ok() -> ProbeResult {
    ProbeResult::from_response(200, Some("{\"data\":[]}"), 12)
}

pub fn quota_exceeded() -> ProbeResult {
    ProbeResult::from_response(429, Some("{\"error\":\"quota exceeded\"}"), 12)
}

pub fn status(code: u16) -> ProbeResult {
    ProbeResult::from_response(code, None, 12)
}

pub fn timed_out() -> ProbeResult {
    ProbeResult::transport_failure("request timed out", 15_000)
}
