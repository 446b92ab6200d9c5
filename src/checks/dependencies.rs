//! Reachability of external dependencies that are not credentialed
//! providers (storage, database REST endpoints, status pages).

use super::SubsystemCheck;
use crate::report::{HealthStatus, SubsystemReport};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde_json::json;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyTarget {
    pub name: String,
    pub url: String,
}

impl DependencyTarget {
    /// Parse `name=url` or a bare URL (named after its host).
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        // A `name=` prefix never contains URL punctuation; an `=` after it
        // belongs to the URL's query string.
        if let Some((name, url)) = entry.split_once('=') {
            if !name.contains([':', '/', '?']) {
                return Some(Self {
                    name: name.trim().to_string(),
                    url: url.trim().to_string(),
                });
            }
        }
        let name = url::Url::parse(entry)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| entry.to_string());
        Some(Self {
            name,
            url: entry.to_string(),
        })
    }

    /// Parse a comma-separated list.
    pub fn parse_list(list: &str) -> Vec<Self> {
        list.split(',').filter_map(Self::parse).collect()
    }
}

enum Reachability {
    Up { status: u16, latency: Duration },
    Down(String),
}

pub struct DependencyCheck {
    client: Client,
    targets: Vec<DependencyTarget>,
    slow_threshold: Duration,
}

impl DependencyCheck {
    pub fn new(client: Client, targets: Vec<DependencyTarget>) -> Self {
        Self {
            client,
            targets,
            slow_threshold: Duration::from_secs(5),
        }
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    async fn reach(&self, target: &DependencyTarget) -> Reachability {
        let started = Instant::now();
        match self.client.get(&target.url).send().await {
            Ok(response) => Reachability::Up {
                status: response.status().as_u16(),
                latency: started.elapsed(),
            },
            Err(err) if err.is_timeout() => Reachability::Down("timed out".to_string()),
            Err(err) => Reachability::Down(err.to_string()),
        }
    }
}

#[async_trait]
impl SubsystemCheck for DependencyCheck {
    fn name(&self) -> &str {
        "dependencies"
    }

    async fn run(&self) -> SubsystemReport {
        let mut report = SubsystemReport::healthy(self.name());
        let results = join_all(self.targets.iter().map(|target| self.reach(target))).await;

        for (target, result) in self.targets.iter().zip(results) {
            match result {
                Reachability::Up { status, latency } => {
                    if status >= 500 {
                        report.flag(
                            HealthStatus::Warning,
                            format!("{} answered HTTP {}", target.name, status),
                        );
                    } else if latency > self.slow_threshold {
                        report.flag(
                            HealthStatus::Warning,
                            format!("{} is slow ({} ms)", target.name, latency.as_millis()),
                        );
                    }
                    report.add_detail(
                        target.name.clone(),
                        json!({ "status": status, "latency_ms": latency.as_millis() as u64 }),
                    );
                }
                Reachability::Down(reason) => {
                    report.flag(
                        HealthStatus::Critical,
                        format!("{} unreachable: {}", target.name, reason),
                    );
                    report.add_detail(target.name.clone(), json!({ "error": reason }));
                }
            }
        }

        report
    }
}
