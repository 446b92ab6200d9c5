#[cfg(feature = "cli")]
use clap::Parser;
use std::{env, time::Duration};
use url::Url;

use crate::{
    checks::DependencyTarget,
    providers::{self, ProviderSpec},
    remediation::RemediationConfig,
    scheduler::{Schedule, SchedulerSettings, DEFAULT_SCHEDULE},
};

/// # Provider Sentinel Configuration
///
/// Configuration loaded from command-line arguments, environment variables
/// and an optional `.env` file. Provider credentials are deliberately not
/// part of this struct: they are read per provider by a
/// [`crate::credentials::CredentialSource`] so they never end up in a
/// `Debug` dump.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", command(name = "sentinel"))]
#[cfg_attr(feature = "cli", command(about = "Health monitoring and credential failover for external API providers"))]
#[cfg_attr(feature = "cli", command(version))]
pub struct Config {
    // =============================================================================
    // CORE SERVER CONFIGURATION
    // =============================================================================

    /// Server port to listen on
    #[cfg_attr(feature = "cli", arg(short, long, env = "PORT", default_value = "8080"))]
    pub port: u16,

    /// Server host to bind to
    #[cfg_attr(feature = "cli", arg(long, env = "HOST", default_value = "0.0.0.0"))]
    pub host: String,

    /// Shared secret expected as `Authorization: Bearer <secret>` on trigger
    /// and status routes
    #[cfg_attr(feature = "cli", arg(long, env = "CRON_SECRET", hide_env_values = true))]
    pub cron_secret: Option<String>,

    // =============================================================================
    // MONITORING TARGETS
    // =============================================================================

    /// Providers to monitor (comma-separated catalog names)
    #[cfg_attr(feature = "cli", arg(long, env = "MONITOR_PROVIDERS", default_value = "openai,assemblyai,deepgram,gemini"))]
    pub providers: String,

    /// External dependencies to check for reachability (`name=url`, comma-separated)
    #[cfg_attr(feature = "cli", arg(long, env = "DEPENDENCY_URLS"))]
    pub dependency_urls: Option<String>,

    /// URL returning active jobs as JSON, for stuck-job detection
    #[cfg_attr(feature = "cli", arg(long, env = "JOBS_STATUS_URL"))]
    pub jobs_status_url: Option<String>,

    /// Minutes without progress after which a job counts as stuck
    #[cfg_attr(feature = "cli", arg(long, env = "STUCK_JOB_THRESHOLD_MINS", default_value = "30"))]
    pub stuck_job_threshold_mins: u64,

    /// URL returning per-provider usage counters as JSON
    #[cfg_attr(feature = "cli", arg(long, env = "USAGE_STATUS_URL"))]
    pub usage_status_url: Option<String>,

    // =============================================================================
    // SCHEDULING
    // =============================================================================

    /// Daily trigger times (HH:MM, comma-separated)
    #[cfg_attr(feature = "cli", arg(long, env = "MONITOR_SCHEDULE", default_value = DEFAULT_SCHEDULE))]
    pub schedule: String,

    /// UTC offset the trigger times are expressed in
    #[cfg_attr(feature = "cli", arg(long, env = "MONITOR_UTC_OFFSET", default_value = "+00:00", allow_hyphen_values = true))]
    pub utc_offset: String,

    /// Seconds between schedule checks
    #[cfg_attr(feature = "cli", arg(long, env = "TICK_INTERVAL_SECS", default_value = "60"))]
    pub tick_interval_secs: u64,

    /// Minimum seconds between two run starts
    #[cfg_attr(feature = "cli", arg(long, env = "MIN_RUN_SPACING_SECS", default_value = "60"))]
    pub min_run_spacing_secs: u64,

    /// Number of past runs kept in memory
    #[cfg_attr(feature = "cli", arg(long, env = "HISTORY_CAPACITY", default_value = "100"))]
    pub history_capacity: usize,

    /// Run one check immediately after startup
    #[cfg_attr(feature = "cli", arg(long, env = "RUN_ON_STARTUP", default_value = "false"))]
    pub run_on_startup: bool,

    /// Run a single check, print the report as JSON and exit
    #[cfg_attr(feature = "cli", arg(long))]
    pub once: bool,

    // =============================================================================
    // TIMEOUTS AND REMEDIATION
    // =============================================================================

    /// Per-probe timeout in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "PROBE_TIMEOUT_SECS", default_value = "15"))]
    pub probe_timeout_secs: u64,

    /// Ceiling for one whole run in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "RUN_TIMEOUT_SECS", default_value = "120"))]
    pub run_timeout_secs: u64,

    /// Wait before re-probing a provider that answered 5xx
    #[cfg_attr(feature = "cli", arg(long, env = "SERVER_ERROR_BACKOFF_SECS", default_value = "5"))]
    pub server_error_backoff_secs: u64,

    /// Wait between network retries
    #[cfg_attr(feature = "cli", arg(long, env = "NETWORK_RETRY_DELAY_SECS", default_value = "2"))]
    pub network_retry_delay_secs: u64,

    /// Number of network retries
    #[cfg_attr(feature = "cli", arg(long, env = "NETWORK_RETRY_ATTEMPTS", default_value = "3"))]
    pub network_retry_attempts: u32,

    // =============================================================================
    // NOTIFICATIONS
    // =============================================================================

    /// Webhook receiving run reports; reports are only logged when unset
    #[cfg_attr(feature = "cli", arg(long, env = "NOTIFIER_URL"))]
    pub notifier_url: Option<String>,

    /// Bearer token for the notifier webhook
    #[cfg_attr(feature = "cli", arg(long, env = "NOTIFIER_TOKEN", hide_env_values = true))]
    pub notifier_token: Option<String>,

    // =============================================================================
    // LOGGING
    // =============================================================================

    /// Log level (error, warn, info, debug, trace)
    #[cfg_attr(feature = "cli", arg(long, env = "RUST_LOG", default_value = "info"))]
    pub log_level: String,

    /// Enable backtrace on panic
    #[cfg_attr(feature = "cli", arg(long, env = "RUST_BACKTRACE"))]
    pub rust_backtrace: Option<String>,

    /// Environment (development, staging, production)
    #[cfg_attr(feature = "cli", arg(long, env = "ENVIRONMENT", default_value = "development"))]
    pub environment: String,
}

impl Config {
    /// Parse configuration from command line arguments and environment variables.
    ///
    /// This method:
    /// 1. Loads environment variables from .env file if it exists
    /// 2. Parses command line arguments
    /// 3. Sets up logging
    /// 4. Validates configuration
    ///
    /// Exits the process when validation fails.
    #[cfg(feature = "cli")]
    pub fn parse_args() -> Self {
        // Load .env file if it exists (ignore errors if file doesn't exist)
        let _ = dotenv::dotenv();

        let config = Self::parse();

        config.setup_logging();

        if let Err(err) = config.validate() {
            eprintln!("Configuration validation failed: {}", err);
            std::process::exit(1);
        }

        config
    }

    /// Create a test configuration with minimal required fields.
    /// This is used for testing purposes only.
    pub fn for_test() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            cron_secret: Some("test-cron-secret-0123456789abcdef0123".to_string()),
            providers: "openai,assemblyai,deepgram,gemini".to_string(),
            dependency_urls: None,
            jobs_status_url: None,
            stuck_job_threshold_mins: 30,
            usage_status_url: None,
            schedule: DEFAULT_SCHEDULE.to_string(),
            utc_offset: "+00:00".to_string(),
            tick_interval_secs: 60,
            min_run_spacing_secs: 60,
            history_capacity: 100,
            run_on_startup: false,
            once: false,
            probe_timeout_secs: 15,
            run_timeout_secs: 120,
            server_error_backoff_secs: 5,
            network_retry_delay_secs: 2,
            network_retry_attempts: 3,
            notifier_url: None,
            notifier_token: None,
            log_level: "info".to_string(),
            rust_backtrace: None,
            environment: "development".to_string(),
        }
    }

    /// Set up logging configuration based on environment variables.
    fn setup_logging(&self) {
        if let Some(backtrace) = &self.rust_backtrace {
            env::set_var("RUST_BACKTRACE", backtrace);
        }

        #[cfg(feature = "cli")]
        let _ = tracing_subscriber::fmt()
            .with_env_filter(&self.log_level)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init();
    }

    /// Validate configuration values and provide helpful error messages.
    ///
    /// Hard errors are returned; questionable but workable settings are
    /// printed as warnings.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0. Please specify a valid port number (1-65535).".to_string());
        }

        if self.host.is_empty() {
            return Err("Host cannot be empty. Please specify a valid host (e.g., '0.0.0.0', 'localhost', or an IP address).".to_string());
        }

        if !self.host.eq("0.0.0.0") && !self.host.eq("localhost") && self.host.parse::<std::net::IpAddr>().is_err() {
            eprintln!(
                "⚠️  Warning: Host '{}' is not a recognized format. \
                Use '0.0.0.0' for all interfaces, 'localhost' for local access, or a valid IP address.",
                self.host
            );
        }

        self.schedule().map_err(|e| e.to_string())?;

        let (specs, unknown) = self.provider_specs();
        if !unknown.is_empty() {
            return Err(format!(
                "Unknown provider(s) in MONITOR_PROVIDERS: {}. Known providers: {}.",
                unknown.join(", "),
                providers::builtin_catalog()
                    .iter()
                    .map(|s| s.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if specs.is_empty() {
            eprintln!("⚠️  Warning: No providers selected; only subsystem checks will run.");
        }

        for (name, value) in [
            ("TICK_INTERVAL_SECS", self.tick_interval_secs),
            ("PROBE_TIMEOUT_SECS", self.probe_timeout_secs),
            ("RUN_TIMEOUT_SECS", self.run_timeout_secs),
            ("STUCK_JOB_THRESHOLD_MINS", self.stuck_job_threshold_mins),
        ] {
            if value == 0 {
                return Err(format!("{} must be greater than 0.", name));
            }
        }

        if self.history_capacity == 0 {
            return Err("HISTORY_CAPACITY must be greater than 0.".to_string());
        }

        if self.run_timeout_secs <= self.probe_timeout_secs {
            eprintln!(
                "⚠️  Warning: RUN_TIMEOUT_SECS ({}) is not larger than PROBE_TIMEOUT_SECS ({}); \
                slow providers will be cut off by the run ceiling.",
                self.run_timeout_secs, self.probe_timeout_secs
            );
        }

        for (name, value) in [
            ("NOTIFIER_URL", &self.notifier_url),
            ("JOBS_STATUS_URL", &self.jobs_status_url),
            ("USAGE_STATUS_URL", &self.usage_status_url),
        ] {
            if let Some(url) = value {
                Self::validate_url(name, url)?;
            }
        }
        for target in self.dependency_targets() {
            Self::validate_url("DEPENDENCY_URLS", &target.url)?;
        }

        match self.cron_secret.as_deref().map(str::trim) {
            None | Some("") => eprintln!(
                "⚠️  Warning: CRON_SECRET is not set. Trigger and status routes will refuse every request."
            ),
            Some(secret) if secret.len() < 32 => eprintln!(
                "⚠️  Warning: CRON_SECRET is shorter than 32 characters."
            ),
            Some(_) => {}
        }

        if !["development", "staging", "production"].contains(&self.environment.as_str()) {
            eprintln!(
                "⚠️  Warning: Unknown environment '{}'. Expected development, staging or production.",
                self.environment
            );
        }

        Ok(())
    }

    fn validate_url(name: &str, value: &str) -> Result<(), String> {
        let url = Url::parse(value).map_err(|err| {
            format!("Invalid {} '{}': {}. Please provide a valid http(s) URL.", name, value, err)
        })?;
        if !["http", "https"].contains(&url.scheme()) {
            return Err(format!(
                "Invalid URL scheme '{}' in {}. Only 'http' and 'https' are supported.",
                url.scheme(),
                name
            ));
        }
        Ok(())
    }

    pub fn schedule(&self) -> crate::Result<Schedule> {
        Schedule::parse(&self.schedule, &self.utc_offset)
    }

    /// Catalog entries selected by `MONITOR_PROVIDERS`, plus unknown names.
    pub fn provider_specs(&self) -> (Vec<ProviderSpec>, Vec<String>) {
        providers::select(&self.providers)
    }

    pub fn dependency_targets(&self) -> Vec<DependencyTarget> {
        self.dependency_urls
            .as_deref()
            .map(DependencyTarget::parse_list)
            .unwrap_or_default()
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn stuck_job_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stuck_job_threshold_mins as i64)
    }

    pub fn remediation_config(&self) -> RemediationConfig {
        RemediationConfig {
            server_error_backoff: Duration::from_secs(self.server_error_backoff_secs),
            network_retry_delay: Duration::from_secs(self.network_retry_delay_secs),
            network_retry_attempts: self.network_retry_attempts,
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            min_run_spacing: Duration::from_secs(self.min_run_spacing_secs),
            history_capacity: self.history_capacity,
            run_on_startup: self.run_on_startup,
        }
    }
}
