//! # Provider Catalog
//!
//! Describes every external API the transcription service depends on: where
//! to send the synthetic probe, what shape the probe takes and how the
//! credential is attached. The probe shape is the only provider-specific
//! knowledge in the monitor; everything downstream treats providers alike.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// # Probe Kind
///
/// The lightweight synthetic request used to verify a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeKind {
    /// A list-style GET (simple REST APIs).
    ListGet,
    /// A minimal inference POST (LLM-style APIs).
    Inference { body: serde_json::Value },
}

/// # Auth Style
///
/// How a credential is attached to the probe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthStyle {
    /// `Authorization: Bearer <credential>`
    Bearer,
    /// `<name>: <prefix><credential>`
    Header { name: String, prefix: Option<String> },
    /// `?<param>=<credential>`
    Query { param: String },
}

/// # Provider Spec
///
/// Immutable description of one monitored provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Unique provider identifier
    pub name: String,
    /// Probe URL
    pub endpoint: String,
    /// Probe request shape
    pub probe: ProbeKind,
    /// Credential placement
    pub auth: AuthStyle,
    /// Environment variable holding the primary credential
    pub env_key: String,
    /// Informational daily quota (reporting only)
    pub daily_limit: Option<u64>,
    /// Informational monthly quota (reporting only)
    pub monthly_limit: Option<u64>,
}

impl ProviderSpec {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        probe: ProbeKind,
        auth: AuthStyle,
        env_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            probe,
            auth,
            env_key: env_key.into(),
            daily_limit: None,
            monthly_limit: None,
        }
    }

    pub fn with_limits(mut self, daily: Option<u64>, monthly: Option<u64>) -> Self {
        self.daily_limit = daily;
        self.monthly_limit = monthly;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Environment variable that overrides the probe endpoint.
    pub fn endpoint_override_key(&self) -> String {
        format!("{}_PROBE_URL", self.env_key)
    }
}

/// OpenAI chat completions, used for summaries.
pub fn openai() -> ProviderSpec {
    ProviderSpec::new(
        "openai",
        "https://api.openai.com/v1/chat/completions",
        ProbeKind::Inference {
            body: json!({
                "model": "gpt-4o-mini",
                "messages": [{ "role": "user", "content": "ping" }],
                "max_tokens": 1
            }),
        },
        AuthStyle::Bearer,
        "OPENAI_API_KEY",
    )
    .with_limits(Some(10_000), Some(300_000))
}

/// AssemblyAI transcription API.
pub fn assemblyai() -> ProviderSpec {
    ProviderSpec::new(
        "assemblyai",
        "https://api.assemblyai.com/v2/transcript?limit=1",
        ProbeKind::ListGet,
        AuthStyle::Header {
            name: "authorization".to_string(),
            prefix: None,
        },
        "ASSEMBLYAI_API_KEY",
    )
    .with_limits(Some(500), Some(15_000))
}

/// Deepgram transcription API.
pub fn deepgram() -> ProviderSpec {
    ProviderSpec::new(
        "deepgram",
        "https://api.deepgram.com/v1/projects",
        ProbeKind::ListGet,
        AuthStyle::Header {
            name: "Authorization".to_string(),
            prefix: Some("Token ".to_string()),
        },
        "DEEPGRAM_API_KEY",
    )
    .with_limits(Some(500), Some(15_000))
}

/// Google Gemini, the fallback summary model.
pub fn gemini() -> ProviderSpec {
    ProviderSpec::new(
        "gemini",
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent",
        ProbeKind::Inference {
            body: json!({
                "contents": [{ "parts": [{ "text": "ping" }] }],
                "generationConfig": { "maxOutputTokens": 1 }
            }),
        },
        AuthStyle::Query {
            param: "key".to_string(),
        },
        "GEMINI_API_KEY",
    )
    .with_limits(Some(1_500), Some(45_000))
}

/// Every provider the monitor knows how to probe.
pub fn builtin_catalog() -> Vec<ProviderSpec> {
    vec![openai(), assemblyai(), deepgram(), gemini()]
}

/// Resolve a comma-separated list of provider names against the catalog.
///
/// Unknown names are returned separately so the caller can report them.
pub fn select(names: &str) -> (Vec<ProviderSpec>, Vec<String>) {
    let catalog = builtin_catalog();
    let mut selected = Vec::new();
    let mut unknown = Vec::new();

    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let name = name.to_ascii_lowercase();
        if selected.iter().any(|s: &ProviderSpec| s.name == name) {
            continue;
        }
        match catalog.iter().find(|spec| spec.name == name) {
            Some(spec) => selected.push(spec.clone()),
            None => unknown.push(name),
        }
    }

    (selected, unknown)
}
