//! # Provider Sentinel
//!
//! Health monitoring and credential failover for the external HTTP APIs a
//! transcription service depends on (speech-to-text providers and an LLM).
//!
//! On a schedule, every configured provider is probed with its active
//! credential. Failures are classified, automatic fixes are attempted
//! (credential rotation, config reset, delayed and network retries), backup
//! credentials are tested when quota runs out, and a set of subsystem
//! checks runs alongside. Everything is reduced to one overall status and
//! a list of issues requiring attention, then handed to a notifier.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use provider_sentinel::{bootstrap::build_components, Config, EnvCredentialSource, SystemClock};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::for_test(); // or Config::parse_args() for CLI
//!     let components = build_components(&config, &EnvCredentialSource, Arc::new(SystemClock))?;
//!
//!     let report = components.aggregator.run_full_check().await?;
//!     println!("overall: {}", report.overall_status);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`providers`] - Catalog of monitored providers and their probe shapes
//! - [`credentials`] - Credential pools, rotation and credential sources
//! - [`probe`] / [`classifier`] - Synthetic requests and failure taxonomy
//! - [`remediation`] / [`backup`] - Automatic fixes and backup key testing
//! - [`checks`] - Security, resource, stuck-job and dependency checks
//! - [`aggregator`] - Concurrent fan-out and status reduction
//! - [`scheduler`] - `MonitorService`: schedule, non-overlap, history
//! - [`notifier`] - Report delivery
//! - [`server`] - HTTP trigger and status routes

// Core infrastructure
pub mod bootstrap;
pub mod config;
pub mod core;
pub mod error;
pub mod graceful_shutdown;

// Monitoring domain
pub mod aggregator;
pub mod backup;
pub mod checks;
pub mod classifier;
pub mod credentials;
pub mod notifier;
pub mod probe;
pub mod providers;
pub mod remediation;
pub mod report;
pub mod scheduler;

#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types for convenience
pub use aggregator::HealthAggregator;
pub use config::Config;
pub use core::clock::{Clock, ManualClock, SystemClock};
pub use core::http_client::{HttpClientBuilder, HttpClientConfig};
pub use credentials::{CredentialPool, CredentialSource, EnvCredentialSource, MapCredentialSource, ProviderRegistry};
pub use error::MonitorError;
pub use graceful_shutdown::GracefulShutdown;
pub use notifier::{LogNotifier, Notification, Notifier, NotifyOutcome, WebhookNotifier};
pub use probe::{ErrorKind, HttpProber, ProbeResult, Prober};
pub use remediation::{FixStrategy, RemediationAttempt, RemediationConfig, RemediationEngine};
pub use report::{HealthReport, HealthStatus, RunRecord, RunTrigger};
pub use scheduler::{MonitorService, RunRejection, Schedule, SchedulerSettings, SchedulerState};

// Server re-exports (feature-gated)
#[cfg(feature = "server")]
pub use server::{create_router, AppState};

/// The result type used throughout the library
pub type Result<T> = std::result::Result<T, MonitorError>;
