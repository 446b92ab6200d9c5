//! # Backup Credential Tester
//!
//! When the active credential is out of quota, every other credential in
//! the pool is probed to measure how much backup capacity is left. Testing
//! never stops at the first working key and never moves the active index.

use crate::{
    credentials::{mask_secret, CredentialPool},
    probe::{ErrorKind, Prober},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of probing one backup credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupKeyResult {
    pub index: usize,
    pub credential: String,
    pub healthy: bool,
    pub error_kind: ErrorKind,
    pub http_status: Option<u16>,
    pub latency_ms: u64,
}

/// # Backup Test Summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupTestSummary {
    pub working_count: usize,
    pub failed_count: usize,
    pub results: Vec<BackupKeyResult>,
}

impl BackupTestSummary {
    pub fn has_working_backup(&self) -> bool {
        self.working_count > 0
    }

    pub fn tested(&self) -> usize {
        self.results.len()
    }
}

pub struct BackupTester {
    prober: Arc<dyn Prober>,
}

impl BackupTester {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    /// Probe every non-active credential of `pool`, sequentially.
    pub async fn test_backups(&self, pool: &CredentialPool) -> BackupTestSummary {
        let mut summary = BackupTestSummary::default();

        for (index, credential) in pool.backups() {
            let result = self.prober.probe(pool.spec(), credential).await;
            if result.healthy {
                summary.working_count += 1;
            } else {
                summary.failed_count += 1;
            }
            summary.results.push(BackupKeyResult {
                index,
                credential: mask_secret(credential),
                healthy: result.healthy,
                error_kind: result.error_kind,
                http_status: result.http_status,
                latency_ms: result.latency_ms,
            });
        }

        if summary.has_working_backup() {
            info!(
                provider = %pool.name(),
                working = summary.working_count,
                failed = summary.failed_count,
                "🛟 Backup credentials available"
            );
        } else {
            warn!(
                provider = %pool.name(),
                tested = summary.tested(),
                "🚫 No working backup credential"
            );
        }

        summary
    }
}
