//! # Application State
//!
//! Shared state passed to all HTTP handlers.

use crate::{config::Config, scheduler::MonitorService};
use std::sync::Arc;

/// # Application State
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// The scheduler every route talks to
    pub monitor: MonitorService,
}

impl AppState {
    pub fn new(config: Config, monitor: MonitorService) -> Self {
        Self {
            config: Arc::new(config),
            monitor,
        }
    }

    /// Get a reference to the config
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn monitor(&self) -> &MonitorService {
        &self.monitor
    }

    /// Configured trigger secret, if any non-blank one is set.
    pub fn cron_secret(&self) -> Option<&str> {
        self.config
            .cron_secret
            .as_deref()
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
    }
}
