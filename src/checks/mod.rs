//! # Subsystem Checks
//!
//! Health dimensions that are not provider probes: security posture,
//! resource usage, stuck jobs and dependency reachability. Each check owns
//! its failure handling and always returns a [`SubsystemReport`]; a data
//! source that cannot be read becomes a warning, not an error.

pub mod dependencies;
pub mod jobs;
pub mod resources;
pub mod security;

use crate::report::SubsystemReport;
use async_trait::async_trait;

pub use dependencies::{DependencyCheck, DependencyTarget};
pub use jobs::{HttpJobSource, JobSnapshot, JobSource, NoJobSource, StuckJobCheck};
pub use resources::{HttpUsageSource, NoUsageSource, ResourceCheck, UsageSnapshot, UsageSource};
pub use security::{SecurityCheck, SecurityPosture};

/// # Subsystem Check
#[async_trait]
pub trait SubsystemCheck: Send + Sync {
    /// Bucket name used in reports
    fn name(&self) -> &str;

    async fn run(&self) -> SubsystemReport;
}
