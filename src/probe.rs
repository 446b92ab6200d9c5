//! # Provider Probe
//!
//! Sends one synthetic request to a provider with a given credential and
//! reports what happened. A non-2xx response is a perfectly valid probe
//! result; only transport faults (DNS, refused connection, timeout) turn
//! into [`ErrorKind::Network`]. Every probe is bounded in time so a hung
//! provider can never stall an aggregation run.

use crate::{
    classifier::{classify, extract_error_message},
    core::http_client::HttpClientBuilder,
    providers::{AuthStyle, ProbeKind, ProviderSpec},
    Result,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    time::{Duration, Instant},
};
use tracing::{debug, instrument};

/// Largest response body read from a probe.
const MAX_BODY_BYTES: usize = 16 * 1024;

/// # Error Kind
///
/// Failure taxonomy shared by the classifier, remediation and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Healthy response
    None,
    /// Rate limit or billing exhaustion
    Quota,
    /// Credential rejected
    Auth,
    /// Provider-side failure
    Server,
    /// Transport failure or timeout
    Network,
    /// Any other 4xx
    ClientOther,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::None => "none",
            ErrorKind::Quota => "quota",
            ErrorKind::Auth => "auth",
            ErrorKind::Server => "server",
            ErrorKind::Network => "network",
            ErrorKind::ClientOther => "client_other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Probe Result
///
/// Outcome of a single probe call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub healthy: bool,
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    pub error_kind: ErrorKind,
    pub raw_message: Option<String>,
}

impl ProbeResult {
    /// Build a result from a received response.
    pub fn from_response(status: u16, body: Option<&str>, latency_ms: u64) -> Self {
        let error_kind = classify(Some(status), body);
        let healthy = error_kind == ErrorKind::None;
        Self {
            healthy,
            http_status: Some(status),
            latency_ms,
            error_kind,
            raw_message: if healthy { None } else { body.and_then(extract_error_message) },
        }
    }

    /// Build a result for a request that never produced a response.
    pub fn transport_failure(message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            healthy: false,
            http_status: None,
            latency_ms,
            error_kind: ErrorKind::Network,
            raw_message: Some(message.into()),
        }
    }

    /// Human-readable one-line description.
    pub fn describe(&self) -> String {
        let status = self
            .http_status
            .map(|s| format!("HTTP {}", s))
            .unwrap_or_else(|| "no response".to_string());
        match &self.raw_message {
            Some(message) => format!("{} ({}): {}", self.error_kind, status, message),
            None => format!("{} ({})", self.error_kind, status),
        }
    }
}

/// # Prober
///
/// Executes a probe against one provider with one explicit credential.
/// Taking the credential as an argument, rather than reading the pool,
/// lets backup testing probe any key without touching the active index.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, provider: &ProviderSpec, credential: &str) -> ProbeResult;
}

/// # HTTP Prober
///
/// Real prober over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Build a prober whose client and outer deadline share `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = HttpClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| crate::error::MonitorError::Config(e.to_string()))?;
        Ok(Self::new(client, timeout))
    }

    fn build_request(&self, provider: &ProviderSpec, credential: &str) -> reqwest::RequestBuilder {
        let request = match &provider.probe {
            ProbeKind::ListGet => self.client.get(&provider.endpoint),
            ProbeKind::Inference { body } => self.client.post(&provider.endpoint).json(body),
        };

        match &provider.auth {
            AuthStyle::Bearer => request.bearer_auth(credential),
            AuthStyle::Header { name, prefix } => {
                let value = format!("{}{}", prefix.as_deref().unwrap_or(""), credential);
                request.header(name.as_str(), value)
            }
            AuthStyle::Query { param } => request.query(&[(param.as_str(), credential)]),
        }
    }

    async fn send(&self, provider: &ProviderSpec, credential: &str) -> std::result::Result<(u16, String), String> {
        let response = self
            .build_request(provider, credential)
            .send()
            .await
            .map_err(describe_transport_error)?;

        let status = response.status().as_u16();
        Ok((status, read_capped_body(response).await))
    }
}

/// Read at most `MAX_BODY_BYTES` of the body, chunk by chunk. A body that
/// fails to stream still leaves a meaningful status, so errors end the read.
async fn read_capped_body(mut response: reqwest::Response) -> String {
    let mut buf: Vec<u8> = Vec::new();
    while buf.len() < MAX_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(MAX_BODY_BYTES - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn describe_transport_error(err: reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        format!("transport error: {}", err)
    }
}

#[async_trait]
impl Prober for HttpProber {
    #[instrument(skip(self, credential), fields(provider = %provider.name))]
    async fn probe(&self, provider: &ProviderSpec, credential: &str) -> ProbeResult {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.send(provider, credential)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok((status, body))) => {
                let body = (!body.trim().is_empty()).then_some(body);
                ProbeResult::from_response(status, body.as_deref(), latency_ms)
            }
            Ok(Err(message)) => ProbeResult::transport_failure(message, latency_ms),
            Err(_) => ProbeResult::transport_failure(
                format!("probe exceeded {}s deadline", self.timeout.as_secs()),
                latency_ms,
            ),
        };

        debug!(
            healthy = result.healthy,
            status = ?result.http_status,
            kind = %result.error_kind,
            latency_ms,
            "🔎 Probe finished"
        );
        result
    }
}
